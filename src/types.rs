//! Core data model shared by every pipeline stage.
//!
//! Links, assets and bundles flow strictly forward: the extractor produces
//! [`CandidateLink`]s, a backend turns one link into a [`MediaBundle`], the
//! packager splits a bundle into [`DeliveryGroup`]s and the coordinator
//! consumes each group exactly once.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

static IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "gif", "heic"];
static VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "avi", "mkv", "webm", "m4v"];
static AUDIO_EXTENSIONS: &[&str] = &["mp3", "wav", "ogg", "m4a", "flac", "opus", "aac"];
static TEXT_EXTENSIONS: &[&str] = &["txt", "description"];

/// Media platform a link belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// tiktok.com, vm.tiktok.com
    TikTok,
    /// x.com, twitter.com, t.co
    X,
    /// bsky.app
    Bluesky,
    /// instagram.com posts and reels
    Instagram,
    /// v.redd.it video links
    VReddit,
    /// reddit.com threads
    Reddit,
    /// youtube.com, youtu.be
    YouTube,
    /// vimeo.com
    Vimeo,
    /// soundcloud.com
    SoundCloud,
    /// *.bandcamp.com
    Bandcamp,
    /// Any other URL, only considered when the bot is addressed directly
    Generic,
}

impl Platform {
    /// Every known platform, in registration order
    pub const ALL: [Self; 11] = [
        Self::TikTok,
        Self::X,
        Self::Bluesky,
        Self::Instagram,
        Self::VReddit,
        Self::Reddit,
        Self::YouTube,
        Self::Vimeo,
        Self::SoundCloud,
        Self::Bandcamp,
        Self::Generic,
    ];

    /// Stable lowercase tag used in configuration and logs
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TikTok => "tiktok",
            Self::X => "x",
            Self::Bluesky => "bluesky",
            Self::Instagram => "instagram",
            Self::VReddit => "vreddit",
            Self::Reddit => "reddit",
            Self::YouTube => "youtube",
            Self::Vimeo => "vimeo",
            Self::SoundCloud => "soundcloud",
            Self::Bandcamp => "bandcamp",
            Self::Generic => "generic",
        }
    }

    /// Video hosts whose links carry only tracking or time parameters after the id
    #[must_use]
    pub const fn is_video_host(self) -> bool {
        matches!(self, Self::TikTok | Self::VReddit | Self::YouTube | Self::Vimeo)
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|p| p.as_str() == needle)
            .ok_or_else(|| format!("unknown platform '{s}'"))
    }
}

/// Whether a link points at one item or at a collection of items
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Scope {
    /// A single post, video or track
    Item,
    /// A playlist, album, set or similar container
    Collection,
}

/// A classified link found in a message. Immutable once extracted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateLink {
    raw_url: String,
    normalized_url: String,
    platform: Platform,
    scope: Scope,
    explicit_request: bool,
    position: usize,
}

impl CandidateLink {
    /// Create a classified link
    #[must_use]
    pub fn new(
        raw_url: impl Into<String>,
        normalized_url: impl Into<String>,
        platform: Platform,
        scope: Scope,
        explicit_request: bool,
        position: usize,
    ) -> Self {
        Self {
            raw_url: raw_url.into(),
            normalized_url: normalized_url.into(),
            platform,
            scope,
            explicit_request,
            position,
        }
    }

    /// URL exactly as it appeared in the message
    #[must_use]
    pub fn raw_url(&self) -> &str {
        &self.raw_url
    }

    /// URL handed to backends
    #[must_use]
    pub fn normalized_url(&self) -> &str {
        &self.normalized_url
    }

    /// Platform tag
    #[must_use]
    pub const fn platform(&self) -> Platform {
        self.platform
    }

    /// Classified scope
    #[must_use]
    pub const fn scope(&self) -> Scope {
        self.scope
    }

    /// True if the bot was mentioned anywhere in the source message
    #[must_use]
    pub const fn explicit_request(&self) -> bool {
        self.explicit_request
    }

    /// Zero-based index of this link among the links of its message
    #[must_use]
    pub const fn position(&self) -> usize {
        self.position
    }

    /// Scope a backend should actually resolve.
    ///
    /// Collections are only expanded when explicitly requested.
    #[must_use]
    pub const fn effective_scope(&self) -> Scope {
        match self.scope {
            Scope::Collection if self.explicit_request => Scope::Collection,
            _ => Scope::Item,
        }
    }

    /// True if a collection link was narrowed down to its primary item
    #[must_use]
    pub const fn is_restricted(&self) -> bool {
        matches!(self.scope, Scope::Collection) && !self.explicit_request
    }
}

/// Extraction backend identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BackendId {
    /// yt-dlp, video output
    YtDlp,
    /// yt-dlp, audio-only output
    YtDlpAudio,
    /// gallery-dl
    GalleryDl,
    /// instaloader
    Instaloader,
}

impl BackendId {
    /// Every backend identity
    pub const ALL: [Self; 4] = [
        Self::YtDlp,
        Self::YtDlpAudio,
        Self::GalleryDl,
        Self::Instaloader,
    ];

    /// Stable tag used in configuration and logs
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::YtDlp => "yt-dlp",
            Self::YtDlpAudio => "yt-dlp-audio",
            Self::GalleryDl => "gallery-dl",
            Self::Instaloader => "instaloader",
        }
    }
}

impl fmt::Display for BackendId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|b| b.as_str() == needle)
            .ok_or_else(|| format!("unknown backend '{s}'"))
    }
}

/// Kind of a media asset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MediaKind {
    /// Photo
    Image,
    /// Video clip
    Video,
    /// Audio track
    Audio,
    /// Plain text (post body, description)
    Text,
}

impl MediaKind {
    /// Guess the kind from a file name's extension
    #[must_use]
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_lowercase();
        let ext = ext.as_str();
        if IMAGE_EXTENSIONS.contains(&ext) {
            Some(Self::Image)
        } else if VIDEO_EXTENSIONS.contains(&ext) {
            Some(Self::Video)
        } else if AUDIO_EXTENSIONS.contains(&ext) {
            Some(Self::Audio)
        } else if TEXT_EXTENSIONS.contains(&ext) {
            Some(Self::Text)
        } else {
            None
        }
    }

    /// True for kinds that carry a binary payload
    #[must_use]
    pub const fn is_binary(self) -> bool {
        !matches!(self, Self::Text)
    }
}

/// One piece of media produced by a backend
#[derive(Debug, Clone, PartialEq)]
pub struct MediaAsset {
    /// Asset kind
    pub kind: MediaKind,
    /// File name used when uploading
    pub file_name: String,
    /// Raw bytes
    pub payload: Bytes,
    /// Pixel width, if known
    pub width: Option<u32>,
    /// Pixel height, if known
    pub height: Option<u32>,
    /// Duration in seconds, if known
    pub duration_secs: Option<f64>,
    /// Position within the bundle that produced it
    pub ordinal: usize,
}

impl MediaAsset {
    /// Create an asset with no dimensions
    #[must_use]
    pub fn new(kind: MediaKind, file_name: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            kind,
            file_name: file_name.into(),
            payload: payload.into(),
            width: None,
            height: None,
            duration_secs: None,
            ordinal: 0,
        }
    }

    /// Set pixel dimensions
    #[must_use]
    pub const fn with_dimensions(mut self, width: Option<u32>, height: Option<u32>) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Set duration
    #[must_use]
    pub const fn with_duration(mut self, duration_secs: Option<f64>) -> Self {
        self.duration_secs = duration_secs;
        self
    }

    /// Payload size in bytes
    #[must_use]
    pub fn size(&self) -> u64 {
        self.payload.len() as u64
    }

    /// Payload decoded as text, for `Text` assets
    #[must_use]
    pub fn text(&self) -> Option<String> {
        matches!(self.kind, MediaKind::Text)
            .then(|| String::from_utf8_lossy(&self.payload).trim().to_string())
    }
}

/// Everything one successful resolution produced. Never mutated after creation.
#[derive(Debug, Clone)]
pub struct MediaBundle {
    link: CandidateLink,
    backend: BackendId,
    assets: Vec<MediaAsset>,
    caption: Option<String>,
}

impl MediaBundle {
    /// Create a bundle; asset ordinals are renumbered to their position
    #[must_use]
    pub fn new(
        link: CandidateLink,
        backend: BackendId,
        assets: Vec<MediaAsset>,
        caption: Option<String>,
    ) -> Self {
        let assets = assets
            .into_iter()
            .enumerate()
            .map(|(ordinal, asset)| MediaAsset { ordinal, ..asset })
            .collect();
        let caption = caption
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty());
        Self {
            link,
            backend,
            assets,
            caption,
        }
    }

    /// Link that was resolved
    #[must_use]
    pub const fn link(&self) -> &CandidateLink {
        &self.link
    }

    /// Backend that produced the bundle
    #[must_use]
    pub const fn backend(&self) -> BackendId {
        self.backend
    }

    /// Assets in ordinal order
    #[must_use]
    pub fn assets(&self) -> &[MediaAsset] {
        &self.assets
    }

    /// Optional caption
    #[must_use]
    pub fn caption(&self) -> Option<&str> {
        self.caption.as_deref()
    }

    /// Number of binary (non-text) assets
    #[must_use]
    pub fn binary_count(&self) -> usize {
        self.assets.iter().filter(|a| a.kind.is_binary()).count()
    }

    /// Keep only the primary item: the first binary asset plus any text
    #[must_use]
    pub fn restrict_to_primary(self) -> Self {
        let mut seen_binary = false;
        let assets = self
            .assets
            .into_iter()
            .filter(|asset| {
                if !asset.kind.is_binary() {
                    return true;
                }
                !std::mem::replace(&mut seen_binary, true)
            })
            .collect();
        Self::new(self.link, self.backend, assets, self.caption)
    }

    /// Split into owned parts
    #[must_use]
    pub fn into_parts(self) -> (CandidateLink, BackendId, Vec<MediaAsset>, Option<String>) {
        (self.link, self.backend, self.assets, self.caption)
    }
}

/// Chat identifier on the messaging platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId(pub i64);

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where outbound sends for one inbound message go
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversation {
    /// Target chat
    pub id: ConversationId,
    /// Message to reply to
    pub reply_to: Option<i32>,
    /// Identity to send as (Telegram business connection), if any
    pub identity: Option<String>,
}

impl Conversation {
    /// Conversation without reply threading or identity
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self {
            id: ConversationId(id),
            reply_to: None,
            identity: None,
        }
    }
}

/// A size- and count-bounded slice of a bundle, sent as one outbound unit
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryGroup {
    /// Position of the originating link in its message
    pub position: usize,
    /// Target chat
    pub conversation: ConversationId,
    /// Assets, in bundle order
    pub assets: Vec<MediaAsset>,
    /// Caption; only ever set on the first group of a bundle
    pub caption: Option<String>,
}

impl DeliveryGroup {
    /// Total payload size
    #[must_use]
    pub fn total_bytes(&self) -> u64 {
        self.assets.iter().map(MediaAsset::size).sum()
    }

    /// True if the group carries no media, only caption text
    #[must_use]
    pub fn is_text_only(&self) -> bool {
        self.assets.is_empty()
    }
}

/// Failure categories of a single extraction attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExtractionErrorKind {
    /// The backend cannot handle this link
    Unsupported,
    /// Login or cookies required
    AuthRequired,
    /// The remote service is throttling us
    RateLimited,
    /// The post/video does not exist or is not visible
    NotFound,
    /// Network or service hiccup; worth retrying
    Transient,
}

impl ExtractionErrorKind {
    /// Ranking used to pick the failure surfaced after all backends exhausted
    #[must_use]
    pub const fn severity(self) -> u8 {
        match self {
            Self::Unsupported => 0,
            Self::Transient => 1,
            Self::NotFound => 2,
            Self::RateLimited => 3,
            Self::AuthRequired => 4,
        }
    }
}

impl fmt::Display for ExtractionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unsupported => "unsupported",
            Self::AuthRequired => "auth required",
            Self::RateLimited => "rate limited",
            Self::NotFound => "not found",
            Self::Transient => "transient",
        };
        f.write_str(s)
    }
}

/// Terminal failure of a link, an asset or a send
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    /// No backend could handle the link
    Unsupported,
    /// Every backend needed credentials we don't have
    AuthRequired,
    /// Every backend was throttled
    RateLimited,
    /// Media does not exist or is private
    NotFound,
    /// Retries exhausted on network errors
    Transient,
    /// The per-link time bound was exceeded
    Timeout,
    /// Asset still too large after one re-encode
    OversizedAsset,
    /// The messaging platform rejected an outbound send
    SendFailed,
}

impl FailureKind {
    /// Short user-facing notice placed where the media would have appeared
    #[must_use]
    pub const fn notice(self) -> &'static str {
        match self {
            Self::Timeout => "⏱ Timed out fetching media",
            Self::AuthRequired => "⚠️ Couldn't fetch media (login required)",
            Self::RateLimited => "⚠️ Couldn't fetch media (rate limited, try later)",
            Self::NotFound => "⚠️ Couldn't fetch media (not found or private)",
            Self::OversizedAsset => "⚠️ Media is over the upload size limit",
            Self::SendFailed => "⚠️ Couldn't upload media",
            Self::Unsupported | Self::Transient => "⚠️ Couldn't fetch media",
        }
    }
}

impl From<ExtractionErrorKind> for FailureKind {
    fn from(kind: ExtractionErrorKind) -> Self {
        match kind {
            ExtractionErrorKind::Unsupported => Self::Unsupported,
            ExtractionErrorKind::AuthRequired => Self::AuthRequired,
            ExtractionErrorKind::RateLimited => Self::RateLimited,
            ExtractionErrorKind::NotFound => Self::NotFound,
            ExtractionErrorKind::Transient => Self::Transient,
        }
    }
}

/// Why a link produced nothing, silently
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Every routed backend reported the link as unsupported
    Unsupported,
    /// The platform has no backend routed to it
    NoBackend,
}

/// Terminal result of resolving one link
#[derive(Debug, Clone)]
pub enum ResolutionOutcome {
    /// Media was fetched
    Success(MediaBundle),
    /// Nothing to deliver, nothing to report
    Skipped(SkipReason),
    /// Resolution failed; the user gets a notice
    Failed {
        /// Failure category
        kind: FailureKind,
        /// Platform of the failed link
        platform: Platform,
    },
}
