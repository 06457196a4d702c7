//! One-shot re-encoding of oversized assets with ffmpeg.

use crate::types::{MediaAsset, MediaKind};
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use thiserror::Error;
use tracing::{debug, info};

/// Audio bitrate kept for re-encoded video
const VIDEO_AUDIO_KBPS: u64 = 64;
/// Lowest video bitrate worth producing
const MIN_VIDEO_KBPS: u64 = 100;
/// Re-encoded video is scaled to at most this many lines
const MAX_VIDEO_HEIGHT: u32 = 720;
/// Re-encoded images are scaled to at most this width
const MAX_IMAGE_WIDTH: u32 = 1920;
/// Container overhead allowance, in percent of the target
const HEADROOM_PERCENT: u64 = 90;

#[derive(Debug, Error)]
pub enum TranscodeError {
    #[error("cannot re-encode {0:?} assets")]
    Unsupported(MediaKind),
    #[error("unknown media duration")]
    UnknownDuration,
    #[error("ffmpeg failed: {0}")]
    Failed(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Shrinks an asset towards a byte target
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Produce a smaller copy of `asset` aiming at `target_bytes`.
    ///
    /// The result may still exceed the target; callers check.
    ///
    /// # Errors
    ///
    /// Returns [`TranscodeError`] if the asset can't be re-encoded.
    async fn reencode(
        &self,
        asset: &MediaAsset,
        target_bytes: u64,
    ) -> Result<MediaAsset, TranscodeError>;
}

/// [`Transcoder`] backed by the `ffmpeg`/`ffprobe` executables
#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    ffmpeg: String,
    ffprobe: String,
}

impl Default for FfmpegTranscoder {
    fn default() -> Self {
        Self {
            ffmpeg: "ffmpeg".to_string(),
            ffprobe: "ffprobe".to_string(),
        }
    }
}

/// Total kbit/s that fits `target_bytes` over `duration_secs`
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn budget_kbps(target_bytes: u64, duration_secs: f64) -> u64 {
    let bits = target_bytes.saturating_mul(8) / 100 * HEADROOM_PERCENT;
    (bits as f64 / duration_secs.max(1.0) / 1000.0) as u64
}

/// Output name for a re-encoded asset
fn reencoded_name(file_name: &str, ext: &str) -> String {
    let stem = Path::new(file_name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("media");
    format!("{stem}.{ext}")
}

impl FfmpegTranscoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    async fn probe_duration(&self, input: &Path) -> Result<f64, TranscodeError> {
        let output = tokio::process::Command::new(&self.ffprobe)
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ])
            .arg(input)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await?;
        String::from_utf8_lossy(&output.stdout)
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|d| *d > 0.0)
            .ok_or(TranscodeError::UnknownDuration)
    }

    async fn ffmpeg(&self, args: &[String]) -> Result<(), TranscodeError> {
        let output = tokio::process::Command::new(&self.ffmpeg)
            .args(["-hide_banner", "-loglevel", "error", "-y"])
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await?;
        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(TranscodeError::Failed(
                stderr.lines().last().unwrap_or("unknown error").to_string(),
            ))
        }
    }

    async fn duration(&self, asset: &MediaAsset, input: &Path) -> Result<f64, TranscodeError> {
        match asset.duration_secs {
            Some(d) if d > 0.0 => Ok(d),
            _ => self.probe_duration(input).await,
        }
    }

    /// ffmpeg arguments for one asset kind
    async fn plan(
        &self,
        asset: &MediaAsset,
        input: &Path,
        output: &Path,
        target_bytes: u64,
    ) -> Result<Vec<String>, TranscodeError> {
        let input = input.display().to_string();
        let output = output.display().to_string();
        let args = match asset.kind {
            MediaKind::Video => {
                let duration = self.duration(asset, Path::new(&input)).await?;
                let video_kbps = budget_kbps(target_bytes, duration)
                    .saturating_sub(VIDEO_AUDIO_KBPS)
                    .max(MIN_VIDEO_KBPS);
                vec![
                    "-i".into(),
                    input,
                    "-vf".into(),
                    format!("scale=-2:'min({MAX_VIDEO_HEIGHT},ih)'"),
                    "-c:v".into(),
                    "libx264".into(),
                    "-preset".into(),
                    "veryfast".into(),
                    "-b:v".into(),
                    format!("{video_kbps}k"),
                    "-maxrate".into(),
                    format!("{video_kbps}k"),
                    "-bufsize".into(),
                    format!("{}k", video_kbps * 2),
                    "-c:a".into(),
                    "aac".into(),
                    "-b:a".into(),
                    format!("{VIDEO_AUDIO_KBPS}k"),
                    "-movflags".into(),
                    "+faststart".into(),
                    output,
                ]
            }
            MediaKind::Audio => {
                let duration = self.duration(asset, Path::new(&input)).await?;
                let kbps = budget_kbps(target_bytes, duration).clamp(32, 192);
                vec![
                    "-i".into(),
                    input,
                    "-vn".into(),
                    "-c:a".into(),
                    "libmp3lame".into(),
                    "-b:a".into(),
                    format!("{kbps}k"),
                    output,
                ]
            }
            MediaKind::Image => vec![
                "-i".into(),
                input,
                "-vf".into(),
                format!("scale='min({MAX_IMAGE_WIDTH},iw)':-2"),
                "-q:v".into(),
                "5".into(),
                output,
            ],
            MediaKind::Text => return Err(TranscodeError::Unsupported(asset.kind)),
        };
        Ok(args)
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn reencode(
        &self,
        asset: &MediaAsset,
        target_bytes: u64,
    ) -> Result<MediaAsset, TranscodeError> {
        let ext = match asset.kind {
            MediaKind::Video => "mp4",
            MediaKind::Audio => "mp3",
            MediaKind::Image => "jpg",
            MediaKind::Text => return Err(TranscodeError::Unsupported(asset.kind)),
        };

        let dir = tempfile::Builder::new().prefix("reencode-").tempdir()?;
        let input = dir.path().join(format!("in-{}", asset.file_name));
        let output = dir.path().join(format!("out.{ext}"));
        tokio::fs::write(&input, &asset.payload).await?;

        let args = self.plan(asset, &input, &output, target_bytes).await?;
        debug!(file = %asset.file_name, target_bytes, "Re-encoding");
        self.ffmpeg(&args).await?;

        let payload = tokio::fs::read(&output).await?;
        info!(
            file = %asset.file_name,
            before = asset.size(),
            after = payload.len(),
            "Re-encoded"
        );

        let mut result = MediaAsset::new(asset.kind, reencoded_name(&asset.file_name, ext), payload)
            .with_duration(asset.duration_secs);
        result.ordinal = asset.ordinal;
        Ok(result)
    }
}
