//! instaloader backend for Instagram posts and reels.

// lazy_regex! statics are validated at compile time
#![allow(clippy::non_std_lazy_statics)]

use super::process::{classify_failure, collect_loot, run_extractor, scratch_dir};
use super::{ExtractionError, MediaBackend};
use crate::types::{BackendId, CandidateLink, ExtractionErrorKind, MediaBundle, Scope};
use async_trait::async_trait;
use lazy_regex::lazy_regex;
use regex::Regex;
use std::path::Path;
use tracing::debug;

static RE_SHORTCODE: lazy_regex::Lazy<Regex> =
    lazy_regex!(r"(?i)instagram\.com/(?:[^/]+/)?(?:p|reel|reels)/([A-Za-z0-9_-]+)");

/// Post shortcode from an Instagram URL
#[must_use]
pub fn shortcode(url: &str) -> Option<&str> {
    RE_SHORTCODE
        .captures(url)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

/// Runs the `instaloader` executable
#[derive(Debug, Clone)]
pub struct InstaloaderBackend {
    program: String,
    login: Option<String>,
}

impl InstaloaderBackend {
    /// `login` selects a saved instaloader session
    #[must_use]
    pub fn new(login: Option<String>) -> Self {
        Self {
            program: "instaloader".to_string(),
            login,
        }
    }

    /// Use a different executable
    #[must_use]
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    fn build_args(&self, shortcode: &str, dir: &Path) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "--dirname-pattern".into(),
            dir.display().to_string(),
            "--filename-pattern".into(),
            "{shortcode}".into(),
            "--no-video-thumbnails".into(),
            "--no-metadata-json".into(),
            "--no-compress-json".into(),
            "--quiet".into(),
        ];
        if let Some(user) = &self.login {
            args.extend(["--login".into(), user.clone()]);
        }
        args.push("--".into());
        args.push(format!("-{shortcode}"));
        args
    }
}

#[async_trait]
impl MediaBackend for InstaloaderBackend {
    fn id(&self) -> BackendId {
        BackendId::Instaloader
    }

    async fn resolve(
        &self,
        link: &CandidateLink,
        scope: Scope,
    ) -> Result<MediaBundle, ExtractionError> {
        let Some(code) = shortcode(link.normalized_url()) else {
            return Err(ExtractionError::unsupported("not an Instagram post URL"));
        };
        debug!(url = %link.normalized_url(), shortcode = code, ?scope, "Downloading");

        let dir = scratch_dir()?;
        let output = run_extractor(&self.program, self.build_args(code, dir.path())).await?;
        if !output.success {
            return Err(output.into_error(self.id().as_str()));
        }

        let mut loot = collect_loot(dir.path()).await?;
        if loot.binary_count() == 0 {
            // instaloader reports many failures on stderr with a zero exit code
            let kind = if output.stderr.trim().is_empty() {
                ExtractionErrorKind::NotFound
            } else {
                classify_failure(&output.stderr)
            };
            return Err(ExtractionError::new(kind, "instaloader produced no media"));
        }
        let caption = loot.take_text();

        Ok(MediaBundle::new(link.clone(), self.id(), loot.assets, caption))
    }
}
