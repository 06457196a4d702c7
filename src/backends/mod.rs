//! Extraction backends
//!
//! Each backend wraps one external extractor tool and turns a classified
//! link into a [`MediaBundle`]. Failures are normalized into
//! [`ExtractionErrorKind`] so the dispatcher can decide what to do next.

mod gallery_dl;
mod instaloader;
mod process;
mod registry;
mod ytdlp;

pub use gallery_dl::GalleryDlBackend;
pub use instaloader::InstaloaderBackend;
pub use process::{classify_failure, collect_loot, Loot, ToolOutput};
pub use registry::{parse_routes, BackendRegistry, RouteError};
pub use ytdlp::YtDlpBackend;

use crate::types::{BackendId, CandidateLink, ExtractionErrorKind, MediaBundle, Scope};
use async_trait::async_trait;
use thiserror::Error;

/// A failed extraction attempt
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct ExtractionError {
    /// Normalized failure category
    pub kind: ExtractionErrorKind,
    /// Tool output or other detail, for logs only
    pub message: String,
}

impl ExtractionError {
    /// Create an error of the given kind
    #[must_use]
    pub fn new(kind: ExtractionErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::new(ExtractionErrorKind::Unsupported, message)
    }

    #[must_use]
    pub fn auth_required(message: impl Into<String>) -> Self {
        Self::new(ExtractionErrorKind::AuthRequired, message)
    }

    #[must_use]
    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(ExtractionErrorKind::RateLimited, message)
    }

    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ExtractionErrorKind::NotFound, message)
    }

    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ExtractionErrorKind::Transient, message)
    }

    /// True if retrying the same backend may help
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self.kind, ExtractionErrorKind::Transient)
    }
}

impl From<std::io::Error> for ExtractionError {
    fn from(err: std::io::Error) -> Self {
        // A missing executable means this backend can't run here at all
        if err.kind() == std::io::ErrorKind::NotFound {
            Self::unsupported(format!("extractor not installed: {err}"))
        } else {
            Self::transient(err.to_string())
        }
    }
}

/// One media extraction backend
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaBackend: Send + Sync {
    /// Identity used in routing tables and logs
    fn id(&self) -> BackendId;

    /// Resolve `link` into a bundle, honouring `scope`
    ///
    /// # Errors
    ///
    /// Returns an [`ExtractionError`] with a normalized kind on failure.
    async fn resolve(
        &self,
        link: &CandidateLink,
        scope: Scope,
    ) -> Result<MediaBundle, ExtractionError>;
}
