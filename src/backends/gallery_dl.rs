//! gallery-dl backend: images, galleries and text posts.

use super::process::{collect_loot, run_extractor, scratch_dir};
use super::{ExtractionError, MediaBackend};
use crate::types::{BackendId, CandidateLink, MediaBundle, Scope};
use async_trait::async_trait;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Metadata keys that hold post text
const TEXT_KEYS: &[&str] = &["title", "content", "selftext"];

/// Twitter/X options so text-only and quoted posts still produce output
const TWITTER_OPTIONS: &[&str] = &[
    "extractor.twitter.text-tweets=true",
    "extractor.twitter.quoted=true",
    "extractor.twitter.retweets=true",
];

/// Runs the `gallery-dl` executable
#[derive(Debug, Clone)]
pub struct GalleryDlBackend {
    program: String,
    cookies: Option<PathBuf>,
}

impl GalleryDlBackend {
    #[must_use]
    pub fn new(cookies: Option<PathBuf>) -> Self {
        Self {
            program: "gallery-dl".to_string(),
            cookies,
        }
    }

    /// Use a different executable
    #[must_use]
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    fn build_args(&self, link: &CandidateLink, scope: Scope, dir: &Path) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "--directory".into(),
            dir.display().to_string(),
            "--write-info-json".into(),
        ];
        for option in TWITTER_OPTIONS {
            args.extend(["--option".into(), (*option).to_string()]);
        }
        args.push("--quiet".into());

        if let Some(cookies) = &self.cookies {
            args.extend(["--cookies".into(), cookies.display().to_string()]);
        }
        if scope == Scope::Item && link.scope() == Scope::Collection {
            args.extend(["--range".into(), "1".into()]);
        }

        args.push("--".into());
        args.push(link.normalized_url().to_string());
        args
    }
}

/// Join every text field of every metadata document
fn caption_from_infos(infos: &[(String, Value)]) -> Option<String> {
    let texts: Vec<&str> = infos
        .iter()
        .flat_map(|(_, info)| {
            TEXT_KEYS
                .iter()
                .filter_map(move |key| info.get(*key).and_then(Value::as_str))
        })
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect();
    (!texts.is_empty()).then(|| texts.join("\n\n"))
}

#[async_trait]
impl MediaBackend for GalleryDlBackend {
    fn id(&self) -> BackendId {
        BackendId::GalleryDl
    }

    async fn resolve(
        &self,
        link: &CandidateLink,
        scope: Scope,
    ) -> Result<MediaBundle, ExtractionError> {
        debug!(url = %link.normalized_url(), backend = %self.id(), ?scope, "Downloading");
        let dir = scratch_dir()?;
        let args = self.build_args(link, scope, dir.path());
        let output = run_extractor(&self.program, &args).await?;
        if !output.success {
            return Err(output.into_error(self.id().as_str()));
        }

        let loot = collect_loot(dir.path()).await?;
        let caption = caption_from_infos(&loot.infos);
        if loot.assets.is_empty() && caption.is_none() {
            return Err(ExtractionError::not_found("gallery-dl produced nothing"));
        }

        Ok(MediaBundle::new(link.clone(), self.id(), loot.assets, caption))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Platform;
    use serde_json::json;

    fn link(scope: Scope, explicit: bool) -> CandidateLink {
        CandidateLink::new(
            "https://x.com/a/status/1",
            "https://x.com/a/status/1",
            Platform::X,
            scope,
            explicit,
            0,
        )
    }

    #[test]
    fn test_args_include_twitter_options_and_cookies() {
        let backend = GalleryDlBackend::new(Some(PathBuf::from("c.txt")));
        let args = backend.build_args(&link(Scope::Item, false), Scope::Item, Path::new("/tmp/g"));
        assert_eq!(args.iter().filter(|a| *a == "--option").count(), 3);
        assert!(args.windows(2).any(|w| w[0] == "--cookies" && w[1] == "c.txt"));
        assert!(!args.iter().any(|a| a == "--range"));
    }

    #[test]
    fn test_restricted_collection_takes_first_item() {
        let backend = GalleryDlBackend::new(None);
        let restricted =
            backend.build_args(&link(Scope::Collection, false), Scope::Item, Path::new("/t"));
        assert!(restricted.windows(2).any(|w| w[0] == "--range" && w[1] == "1"));

        let full = backend.build_args(
            &link(Scope::Collection, true),
            Scope::Collection,
            Path::new("/t"),
        );
        assert!(!full.iter().any(|a| a == "--range"));
    }

    #[test]
    fn test_caption_joins_text_keys() {
        let infos = vec![
            (String::new(), json!({"title": "Title", "selftext": "Body"})),
            ("x".to_string(), json!({"content": "  ", "width": 3})),
        ];
        assert_eq!(caption_from_infos(&infos), Some("Title\n\nBody".to_string()));
        assert_eq!(caption_from_infos(&[]), None);
    }
}
