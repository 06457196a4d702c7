//! Shared plumbing for backends that shell out to an extractor tool.

use super::ExtractionError;
use crate::types::{ExtractionErrorKind, MediaAsset, MediaKind};
use serde_json::Value;
use std::ffi::OsStr;
use std::path::Path;
use std::process::Stdio;
use tracing::{debug, warn};

/// Stderr fragments meaning the service throttled us
const RATE_LIMIT_PATTERNS: &[&str] = &[
    "http error 429",
    "too many requests",
    "rate limit",
    "rate-limit",
    "please wait a few minutes",
];

/// Stderr fragments meaning credentials are needed
const AUTH_PATTERNS: &[&str] = &[
    "login required",
    "log in",
    "sign in to confirm",
    "sign in to view",
    "cookies",
    "authorization",
    "authentication",
    "age-restricted",
    "members-only",
    "join this channel",
    "401 unauthorized",
    "http error 401",
];

/// Stderr fragments meaning the media is gone or hidden
const NOT_FOUND_PATTERNS: &[&str] = &[
    "http error 404",
    "404 not found",
    "video unavailable",
    "private video",
    "this video is private",
    "this video is not available",
    "this content isn't available",
    "media is not available",
    "no longer available",
    "has been removed",
    "removed by the uploader",
    "does not exist",
    "blocked it in your country",
    "geo-restricted",
    "copyright",
    "no video could be found",
    "no media found",
];

/// Stderr fragments meaning the tool can't handle this URL at all
const UNSUPPORTED_PATTERNS: &[&str] = &[
    "unsupported url",
    "no suitable extractor",
    "is not a valid url",
    "no extractor found",
];

/// Map extractor stderr to a failure category.
///
/// Anything unrecognized is treated as transient.
#[must_use]
pub fn classify_failure(stderr: &str) -> ExtractionErrorKind {
    let lower = stderr.to_lowercase();
    let has = |patterns: &[&str]| patterns.iter().any(|p| lower.contains(p));

    if has(RATE_LIMIT_PATTERNS) {
        ExtractionErrorKind::RateLimited
    } else if has(AUTH_PATTERNS) {
        ExtractionErrorKind::AuthRequired
    } else if has(NOT_FOUND_PATTERNS) {
        ExtractionErrorKind::NotFound
    } else if has(UNSUPPORTED_PATTERNS) {
        ExtractionErrorKind::Unsupported
    } else {
        ExtractionErrorKind::Transient
    }
}

/// Captured result of one tool run
#[derive(Debug, Clone)]
pub struct ToolOutput {
    /// Exit status was zero
    pub success: bool,
    /// Standard output, lossily decoded
    pub stdout: String,
    /// Standard error, lossily decoded
    pub stderr: String,
}

impl ToolOutput {
    /// Turn a failed run into a classified error
    #[must_use]
    pub fn into_error(self, tool: &str) -> ExtractionError {
        let kind = classify_failure(&self.stderr);
        let detail = self.stderr.lines().rev().find(|l| !l.trim().is_empty());
        ExtractionError::new(
            kind,
            format!("{tool}: {}", detail.unwrap_or("exited with an error")),
        )
    }
}

/// Run `program` with `args` and capture its output.
///
/// The child is killed if the returned future is dropped, so an outer
/// timeout also stops the tool.
///
/// # Errors
///
/// Returns `Unsupported` if the executable is missing, `Transient` for other I/O errors.
pub async fn run_extractor<I, S>(program: &str, args: I) -> Result<ToolOutput, ExtractionError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut cmd = tokio::process::Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let output = cmd.output().await?;
    let result = ToolOutput {
        success: output.status.success(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    };

    debug!(
        program,
        success = result.success,
        stderr_len = result.stderr.len(),
        "Extractor finished"
    );
    Ok(result)
}

/// Everything an extractor left in its download directory
#[derive(Debug, Default)]
pub struct Loot {
    /// Media files, in path order
    pub assets: Vec<MediaAsset>,
    /// `*.info.json` metadata keyed by file stem, in path order
    pub infos: Vec<(String, Value)>,
}

impl Loot {
    /// Metadata for the file with the given stem
    #[must_use]
    pub fn info_for(&self, stem: &str) -> Option<&Value> {
        self.infos.iter().find(|(s, _)| s == stem).map(|(_, v)| v)
    }

    /// First metadata document found
    #[must_use]
    pub fn first_info(&self) -> Option<&Value> {
        self.infos.first().map(|(_, v)| v)
    }

    /// Number of binary assets
    #[must_use]
    pub fn binary_count(&self) -> usize {
        self.assets.iter().filter(|a| a.kind.is_binary()).count()
    }

    /// Remove text assets and return their contents joined by blank lines
    pub fn take_text(&mut self) -> Option<String> {
        let (texts, binaries): (Vec<_>, Vec<_>) = std::mem::take(&mut self.assets)
            .into_iter()
            .partition(|a| !a.kind.is_binary());
        self.assets = binaries;
        let joined = texts
            .iter()
            .filter_map(MediaAsset::text)
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n");
        (!joined.is_empty()).then_some(joined)
    }
}

/// First non-empty string among `keys` in a metadata document
#[must_use]
pub fn caption_from_info(info: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| info.get(*key).and_then(Value::as_str))
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(ToString::to_string)
}

/// Walk `dir` recursively and load every recognized file.
///
/// # Errors
///
/// Returns a `Transient` error if the directory can't be read.
pub async fn collect_loot(dir: &Path) -> Result<Loot, ExtractionError> {
    let mut files = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&current).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if entry.file_type().await?.is_dir() {
                pending.push(path);
            } else {
                files.push(path);
            }
        }
    }
    files.sort();

    let mut loot = Loot::default();
    for path in files {
        let Some(name) = path.file_name().and_then(OsStr::to_str).map(str::to_string) else {
            continue;
        };

        if let Some(stem) = name.strip_suffix(".info.json").or_else(|| {
            (name == "info.json").then_some("")
        }) {
            match read_json(&path).await {
                Some(value) => loot.infos.push((stem.to_string(), value)),
                None => warn!(file = %name, "Ignoring unreadable metadata file"),
            }
            continue;
        }

        let Some(kind) = MediaKind::from_path(&path) else {
            debug!(file = %name, "Ignoring unrecognized file");
            continue;
        };
        let payload = tokio::fs::read(&path).await?;
        if payload.is_empty() {
            continue;
        }
        loot.assets.push(MediaAsset::new(kind, name, payload));
    }

    attach_dimensions(&mut loot);
    Ok(loot)
}

async fn read_json(path: &Path) -> Option<Value> {
    let raw = tokio::fs::read(path).await.ok()?;
    serde_json::from_slice(&raw).ok()
}

/// Copy width/height/duration from matching metadata onto assets
fn attach_dimensions(loot: &mut Loot) {
    let infos = std::mem::take(&mut loot.infos);
    for asset in &mut loot.assets {
        let stem = Path::new(&asset.file_name)
            .file_stem()
            .and_then(OsStr::to_str)
            .unwrap_or_default();
        let Some((_, info)) = infos.iter().find(|(s, _)| s == stem) else {
            continue;
        };
        let dim = |key: &str| {
            info.get(key)
                .and_then(Value::as_u64)
                .and_then(|v| u32::try_from(v).ok())
        };
        asset.width = asset.width.or_else(|| dim("width"));
        asset.height = asset.height.or_else(|| dim("height"));
        asset.duration_secs = asset
            .duration_secs
            .or_else(|| info.get("duration").and_then(Value::as_f64));
    }
    loot.infos = infos;
}

/// Scratch directory for one extraction, removed on drop
///
/// # Errors
///
/// Returns a `Transient` error if the directory can't be created.
pub fn scratch_dir() -> Result<tempfile::TempDir, ExtractionError> {
    Ok(tempfile::Builder::new().prefix("loot-").tempdir()?)
}
