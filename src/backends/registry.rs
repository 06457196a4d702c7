//! Backend registry: identity → backend and platform → ordered backends.

use super::{GalleryDlBackend, InstaloaderBackend, MediaBackend, YtDlpBackend};
use crate::types::{BackendId, Platform};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Invalid route override
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RouteError {
    #[error("route entry '{0}' is not of the form platform=backend[,backend]")]
    Malformed(String),
    #[error("{0}")]
    UnknownPlatform(String),
    #[error("{0}")]
    UnknownBackend(String),
}

/// Parse overrides like `instagram=gallery-dl;x=gallery-dl,yt-dlp`.
///
/// An empty backend list removes every route for that platform.
///
/// # Errors
///
/// Returns [`RouteError`] on malformed entries or unknown names.
pub fn parse_routes(routes: &str) -> Result<Vec<(Platform, Vec<BackendId>)>, RouteError> {
    routes.split(';')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (platform, backends) = entry
                .split_once('=')
                .ok_or_else(|| RouteError::Malformed(entry.to_string()))?;
            let platform = platform
                .parse::<Platform>()
                .map_err(RouteError::UnknownPlatform)?;
            let backends = backends
                .split(',')
                .map(str::trim)
                .filter(|b| !b.is_empty())
                .map(|b| b.parse::<BackendId>().map_err(RouteError::UnknownBackend))
                .collect::<Result<Vec<_>, _>>()?;
            Ok((platform, backends))
        })
        .collect()
}

/// Maps platforms to the backends that should try them, in order
#[derive(Clone, Default)]
pub struct BackendRegistry {
    backends: HashMap<BackendId, Arc<dyn MediaBackend>>,
    routes: HashMap<Platform, Vec<BackendId>>,
}

impl std::fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("backends", &self.backends.keys().collect::<Vec<_>>())
            .field("routes", &self.routes)
            .finish()
    }
}

impl BackendRegistry {
    /// Empty registry, no backends and no routes
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The four extractor-tool backends with default routes
    #[must_use]
    pub fn standard(
        cookies: Option<PathBuf>,
        insta_user: Option<String>,
        max_upload_bytes: u64,
    ) -> Self {
        Self::new()
            .register(Arc::new(YtDlpBackend::video(cookies.clone(), max_upload_bytes)))
            .register(Arc::new(YtDlpBackend::audio(cookies.clone(), max_upload_bytes)))
            .register(Arc::new(GalleryDlBackend::new(cookies)))
            .register(Arc::new(InstaloaderBackend::new(insta_user)))
            .with_default_routes()
    }

    /// Add or replace a backend under its own identity
    #[must_use]
    pub fn register(mut self, backend: Arc<dyn MediaBackend>) -> Self {
        self.backends.insert(backend.id(), backend);
        self
    }

    /// Set the ordered backend list for a platform
    #[must_use]
    pub fn route(mut self, platform: Platform, backends: Vec<BackendId>) -> Self {
        self.routes.insert(platform, backends);
        self
    }

    /// Install the built-in routing table
    #[must_use]
    pub fn with_default_routes(self) -> Self {
        let general = vec![BackendId::YtDlp, BackendId::GalleryDl];
        let mut registry = self
            .route(
                Platform::Instagram,
                vec![BackendId::Instaloader, BackendId::GalleryDl],
            )
            .route(Platform::SoundCloud, vec![BackendId::YtDlpAudio])
            .route(Platform::Bandcamp, vec![BackendId::YtDlpAudio]);
        for platform in [
            Platform::TikTok,
            Platform::VReddit,
            Platform::YouTube,
            Platform::Vimeo,
            Platform::X,
            Platform::Reddit,
            Platform::Bluesky,
            Platform::Generic,
        ] {
            registry = registry.route(platform, general.clone());
        }
        registry
    }

    /// Apply a route override string on top of the current table
    ///
    /// # Errors
    ///
    /// Returns [`RouteError`] if the string can't be parsed.
    pub fn with_overrides(mut self, routes: &str) -> Result<Self, RouteError> {
        for (platform, backends) in parse_routes(routes)? {
            self.routes.insert(platform, backends);
        }
        Ok(self)
    }

    /// Registered backends for `platform`, in routing order.
    ///
    /// Routed identities without a registered backend are skipped.
    #[must_use]
    pub fn backends_for(&self, platform: Platform) -> Vec<Arc<dyn MediaBackend>> {
        self.routes
            .get(&platform)
            .into_iter()
            .flatten()
            .filter_map(|id| self.backends.get(id).cloned())
            .collect()
    }
}
