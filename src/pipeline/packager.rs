//! Splits a bundle into sendable groups under the platform's limits.

use super::transcode::Transcoder;
use crate::types::{ConversationId, DeliveryGroup, FailureKind, MediaAsset, MediaBundle, MediaKind};
use crate::utils::telegram_len;
use std::sync::Arc;
use tracing::{info, warn};

/// Size, count and caption limits of the destination
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Largest single upload
    pub max_asset_bytes: u64,
    /// Largest cumulative upload per group
    pub max_group_bytes: u64,
    /// Members per media group
    pub max_group_members: usize,
    /// Longest caption that can ride on media
    pub max_caption_chars: usize,
    /// Text longer than this is shown collapsed
    pub collapse_at_chars: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_asset_bytes: 50_000_000,
            max_group_bytes: 50_000_000,
            max_group_members: 10,
            max_caption_chars: 1024,
            collapse_at_chars: 300,
        }
    }
}

impl Limits {
    /// Largest asset that can be sent at all
    #[must_use]
    pub fn asset_ceiling(&self) -> u64 {
        self.max_asset_bytes.min(self.max_group_bytes)
    }
}

/// An asset left out of delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DroppedAsset {
    pub file_name: String,
    pub size: u64,
    pub reason: FailureKind,
}

/// Packager output for one bundle
#[derive(Debug, Clone, Default)]
pub struct Packed {
    pub groups: Vec<DeliveryGroup>,
    pub dropped: Vec<DroppedAsset>,
}

/// Turns bundles into delivery groups
#[derive(Clone)]
pub struct Packager {
    limits: Limits,
    transcoder: Arc<dyn Transcoder>,
}

impl std::fmt::Debug for Packager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Packager")
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}

impl Packager {
    #[must_use]
    pub fn new(limits: Limits, transcoder: Arc<dyn Transcoder>) -> Self {
        Self { limits, transcoder }
    }

    #[must_use]
    pub const fn limits(&self) -> &Limits {
        &self.limits
    }

    /// Pack a bundle for `conversation`.
    ///
    /// Oversized assets get one re-encode; anything still too large is dropped.
    pub async fn pack(&self, bundle: MediaBundle, conversation: ConversationId) -> Packed {
        let (link, _backend, assets, caption) = bundle.into_parts();
        let (texts, binaries): (Vec<_>, Vec<_>) =
            assets.into_iter().partition(|a| a.kind == MediaKind::Text);

        let caption = fold_caption(caption, &texts);
        let ceiling = self.limits.asset_ceiling();

        let mut kept = Vec::with_capacity(binaries.len());
        let mut dropped = Vec::new();
        for asset in binaries {
            if asset.size() <= ceiling {
                kept.push(asset);
                continue;
            }
            match self.shrink(&asset, ceiling).await {
                Some(smaller) => kept.push(smaller),
                None => dropped.push(DroppedAsset {
                    file_name: asset.file_name.clone(),
                    size: asset.size(),
                    reason: FailureKind::OversizedAsset,
                }),
            }
        }

        Packed {
            groups: group(link.position(), conversation, kept, caption, &self.limits),
            dropped,
        }
    }

    async fn shrink(&self, asset: &MediaAsset, ceiling: u64) -> Option<MediaAsset> {
        match self.transcoder.reencode(asset, ceiling).await {
            Ok(smaller) if smaller.size() <= ceiling => {
                info!(
                    file = %asset.file_name,
                    before = asset.size(),
                    after = smaller.size(),
                    "Oversized asset re-encoded"
                );
                Some(smaller)
            }
            Ok(smaller) => {
                warn!(
                    file = %asset.file_name,
                    size = smaller.size(),
                    ceiling,
                    "Still oversized after re-encode, dropping"
                );
                None
            }
            Err(e) => {
                warn!(file = %asset.file_name, error = %e, "Re-encode failed, dropping");
                None
            }
        }
    }
}

/// Bundle caption followed by text assets, blank-line separated
fn fold_caption(caption: Option<String>, texts: &[MediaAsset]) -> Option<String> {
    let parts: Vec<String> = caption
        .into_iter()
        .chain(texts.iter().filter_map(MediaAsset::text))
        .filter(|t| !t.trim().is_empty())
        .collect();
    (!parts.is_empty()).then(|| parts.join("\n\n"))
}

const fn is_audio(asset: &MediaAsset) -> bool {
    matches!(asset.kind, MediaKind::Audio)
}

/// Group assets in order under the count and byte limits.
///
/// Audio never shares a group with photos or videos. The caption goes on the
/// first group, or into its own leading text group when it is too long for
/// media or there is no media at all.
#[must_use]
pub fn group(
    position: usize,
    conversation: ConversationId,
    assets: Vec<MediaAsset>,
    caption: Option<String>,
    limits: &Limits,
) -> Vec<DeliveryGroup> {
    let make = |assets: Vec<MediaAsset>, caption: Option<String>| DeliveryGroup {
        position,
        conversation,
        assets,
        caption,
    };

    let mut groups = Vec::new();
    let mut media_caption = None;
    if let Some(text) = caption {
        if assets.is_empty() || telegram_len(&text) > limits.max_caption_chars {
            groups.push(make(Vec::new(), Some(text)));
        } else {
            media_caption = Some(text);
        }
    }

    let max_members = limits.max_group_members.max(1);
    let mut current: Vec<MediaAsset> = Vec::new();
    let mut current_bytes = 0_u64;
    for asset in assets {
        let split = current.last().is_some_and(|last| {
            is_audio(last) != is_audio(&asset)
                || current.len() >= max_members
                || current_bytes + asset.size() > limits.max_group_bytes
        });
        if split {
            groups.push(make(std::mem::take(&mut current), media_caption.take()));
            current_bytes = 0;
        }
        current_bytes += asset.size();
        current.push(asset);
    }
    if !current.is_empty() {
        groups.push(make(current, media_caption.take()));
    }

    groups
}
