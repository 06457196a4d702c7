//! Message → links → bundles → ordered deliveries
//!
//! Every link of a message resolves in its own task under the shared worker
//! pool. Results are handed to a delivery session as they finish, and the
//! session releases them in link order.

pub mod coordinator;
pub mod dispatcher;
pub mod packager;
pub mod reorder;
pub mod transcode;

pub use coordinator::{
    ActionHint, DeliveryCoordinator, DeliveryReport, DeliverySession, LinkDelivery, MediaSender,
    SendError,
};
pub use dispatcher::{AttemptRecord, DispatchReport, Dispatcher, RetryPolicy};
pub use packager::{group, DroppedAsset, Limits, Packed, Packager};
pub use reorder::{ReorderBuffer, ReorderError};
pub use transcode::{FfmpegTranscoder, TranscodeError, Transcoder};

use crate::backends::BackendRegistry;
use crate::links::LinkExtractor;
use crate::types::{CandidateLink, Conversation, ConversationId, Platform, ResolutionOutcome};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, error, info_span, Instrument};

/// Immutable pipeline settings, built once at startup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    pub limits: Limits,
    pub retry: RetryPolicy,
    pub worker_pool_size: usize,
    pub link_timeout: Duration,
    /// chat id → identity all sends there go out as
    pub send_as: HashMap<i64, String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            limits: Limits::default(),
            retry: RetryPolicy::default(),
            worker_pool_size: 4,
            link_timeout: Duration::from_secs(600),
            send_as: HashMap::new(),
        }
    }
}

/// A message as the transport hands it over
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub conversation: Conversation,
    pub text: String,
    /// URLs the transport already located, in message order; scanned from `text` when `None`
    pub urls: Option<Vec<String>>,
}

/// The whole link handling pipeline
#[derive(Debug)]
pub struct LinkPipeline {
    extractor: LinkExtractor,
    dispatcher: Arc<Dispatcher>,
    packager: Arc<Packager>,
    coordinator: Arc<DeliveryCoordinator>,
}

impl LinkPipeline {
    #[must_use]
    pub fn new(
        extractor: LinkExtractor,
        registry: BackendRegistry,
        transcoder: Arc<dyn Transcoder>,
        sender: Arc<dyn MediaSender>,
        config: PipelineConfig,
    ) -> Self {
        let dispatcher = Dispatcher::new(
            Arc::new(registry),
            config.retry,
            config.worker_pool_size,
            config.link_timeout,
        );
        Self {
            extractor,
            dispatcher: Arc::new(dispatcher),
            packager: Arc::new(Packager::new(config.limits, transcoder)),
            coordinator: Arc::new(DeliveryCoordinator::new(sender, config.send_as)),
        }
    }

    /// Links found in a message
    #[must_use]
    pub fn links(&self, message: &InboundMessage) -> Vec<CandidateLink> {
        match &message.urls {
            Some(urls) => self.extractor.classify(&message.text, urls),
            None => self.extractor.extract(&message.text),
        }
    }

    /// Handle one inbound message end to end.
    ///
    /// Returns `None` when the message has no links, in which case nothing is sent.
    pub async fn handle(&self, message: InboundMessage) -> Option<DeliveryReport> {
        let links = self.links(&message);
        if links.is_empty() {
            return None;
        }

        let target = self.coordinator.target_for(&message.conversation);
        debug!(chat_id = %target.id, links = links.len(), "Handling message");
        self.coordinator.hint(&target, action_for(&links)).await;

        let mut session = self.coordinator.session(target.clone(), links.len());
        let mut tasks = JoinSet::new();
        for link in links {
            let dispatcher = Arc::clone(&self.dispatcher);
            let packager = Arc::clone(&self.packager);
            let span = info_span!(
                "link",
                url = %link.normalized_url(),
                platform = %link.platform(),
                position = link.position()
            );
            let chat = target.id;
            tasks.spawn(
                async move {
                    let position = link.position();
                    (position, resolve_link(&dispatcher, &packager, &link, chat).await)
                }
                .instrument(span),
            );
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((position, delivery)) => session.complete(position, delivery).await,
                // The slot stays empty and becomes a failure notice in finish()
                Err(e) => error!(chat_id = %target.id, error = %e, "Link task panicked"),
            }
        }

        Some(session.finish().await)
    }
}

/// Resolve and pack one link
pub async fn resolve_link(
    dispatcher: &Dispatcher,
    packager: &Packager,
    link: &CandidateLink,
    chat: ConversationId,
) -> LinkDelivery {
    let report = dispatcher.dispatch(link).await;
    match report.outcome {
        ResolutionOutcome::Success(bundle) => {
            LinkDelivery::Groups(packager.pack(bundle, chat).await)
        }
        ResolutionOutcome::Skipped(reason) => {
            debug!(?reason, "Link skipped");
            LinkDelivery::Skipped
        }
        ResolutionOutcome::Failed { kind, .. } => LinkDelivery::Failed(kind),
    }
}

fn action_for(links: &[CandidateLink]) -> ActionHint {
    let audio_only = links
        .iter()
        .all(|l| matches!(l.platform(), Platform::SoundCloud | Platform::Bandcamp));
    if audio_only {
        ActionHint::UploadingAudio
    } else if links
        .iter()
        .all(|l| matches!(l.platform(), Platform::X | Platform::Bluesky | Platform::Reddit))
    {
        ActionHint::Typing
    } else {
        ActionHint::UploadingVideo
    }
}
