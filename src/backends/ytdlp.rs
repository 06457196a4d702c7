//! yt-dlp backend, video and audio-only flavours.

use super::process::{caption_from_info, collect_loot, run_extractor, scratch_dir};
use super::{ExtractionError, MediaBackend};
use crate::types::{BackendId, CandidateLink, ExtractionErrorKind, MediaBundle, Scope};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Heights tried, best first
const HEIGHTS: &[u32] = &[1080, 720, 540, 480];

/// Output file template; the number keeps playlist order when sorted
const OUTPUT_TEMPLATE: &str = "%(autonumber)03d-%(id)s.%(ext)s";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flavour {
    Video,
    Audio,
}

/// Runs the `yt-dlp` executable
#[derive(Debug, Clone)]
pub struct YtDlpBackend {
    program: String,
    flavour: Flavour,
    cookies: Option<PathBuf>,
    max_upload_bytes: u64,
}

impl YtDlpBackend {
    /// Backend producing mp4 video
    #[must_use]
    pub fn video(cookies: Option<PathBuf>, max_upload_bytes: u64) -> Self {
        Self {
            program: "yt-dlp".to_string(),
            flavour: Flavour::Video,
            cookies,
            max_upload_bytes,
        }
    }

    /// Backend producing mp3 audio
    #[must_use]
    pub fn audio(cookies: Option<PathBuf>, max_upload_bytes: u64) -> Self {
        Self {
            flavour: Flavour::Audio,
            ..Self::video(cookies, max_upload_bytes)
        }
    }

    /// Use a different executable (e.g. a pinned path)
    #[must_use]
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Format selector walking down the height ladder within the size ceiling
    fn format_selector(&self) -> String {
        let megabytes = (self.max_upload_bytes / 1_000_000).max(1);
        let mut chain: Vec<String> = HEIGHTS
            .iter()
            .map(|h| {
                format!(
                    "bv*[height<={h}][filesize<?{megabytes}M]+ba/b[height<={h}][filesize<?{megabytes}M]"
                )
            })
            .collect();
        // Nothing fits: take the smallest rung and let the packager re-encode
        chain.push(format!("b[height<={}]", HEIGHTS[HEIGHTS.len() - 1]));
        chain.push("b".to_string());
        chain.join("/")
    }

    fn build_args(&self, url: &str, scope: Scope, dir: &Path, use_cookies: bool) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "-P".into(),
            dir.display().to_string(),
            "-o".into(),
            OUTPUT_TEMPLATE.into(),
            "--write-info-json".into(),
            "--no-write-playlist-metafiles".into(),
            "--embed-metadata".into(),
            "--embed-thumbnail".into(),
            "--quiet".into(),
            "--no-warnings".into(),
            "--no-progress".into(),
        ];

        match self.flavour {
            Flavour::Video => args.extend([
                "-f".into(),
                self.format_selector(),
                "-S".into(),
                "res,ext:mp4:m4a".into(),
                "--merge-output-format".into(),
                "mp4".into(),
                "--embed-subs".into(),
            ]),
            Flavour::Audio => args.extend([
                "-f".into(),
                "ba/b".into(),
                "-S".into(),
                "ext:mp3:m4a".into(),
                "-x".into(),
                "--audio-format".into(),
                "mp3".into(),
            ]),
        }

        match scope {
            Scope::Item => args.extend([
                "--no-playlist".into(),
                "--playlist-items".into(),
                "1:1".into(),
            ]),
            Scope::Collection => args.push("--yes-playlist".into()),
        }

        if use_cookies {
            if let Some(cookies) = &self.cookies {
                args.extend(["--cookies".into(), cookies.display().to_string()]);
            }
        }

        args.push("--".into());
        args.push(url.to_string());
        args
    }

    async fn download(
        &self,
        link: &CandidateLink,
        scope: Scope,
        use_cookies: bool,
    ) -> Result<MediaBundle, ExtractionError> {
        let dir = scratch_dir()?;
        let args = self.build_args(link.normalized_url(), scope, dir.path(), use_cookies);
        let output = run_extractor(&self.program, &args).await?;
        if !output.success {
            return Err(output.into_error(self.id().as_str()));
        }

        let mut loot = collect_loot(dir.path()).await?;
        if loot.binary_count() == 0 {
            return Err(ExtractionError::not_found("yt-dlp produced no media"));
        }
        let caption = loot
            .first_info()
            .and_then(|info| caption_from_info(info, &["description", "title"]));
        // Description and subtitle files only repeat the caption taken above
        let _descriptions = loot.take_text();

        Ok(MediaBundle::new(link.clone(), self.id(), loot.assets, caption))
    }
}

#[async_trait]
impl MediaBackend for YtDlpBackend {
    fn id(&self) -> BackendId {
        match self.flavour {
            Flavour::Video => BackendId::YtDlp,
            Flavour::Audio => BackendId::YtDlpAudio,
        }
    }

    async fn resolve(
        &self,
        link: &CandidateLink,
        scope: Scope,
    ) -> Result<MediaBundle, ExtractionError> {
        debug!(url = %link.normalized_url(), backend = %self.id(), ?scope, "Downloading");
        match self.download(link, scope, true).await {
            Err(err)
                if self.cookies.is_some()
                    && matches!(
                        err.kind,
                        ExtractionErrorKind::NotFound | ExtractionErrorKind::AuthRequired
                    ) =>
            {
                info!(
                    url = %link.normalized_url(),
                    error = %err,
                    "Failed with cookies, trying once without them"
                );
                self.download(link, scope, false).await
            }
            result => result,
        }
    }
}
