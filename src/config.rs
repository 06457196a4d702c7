//! Configuration and settings management
//!
//! Loads settings from config files and environment variables and turns them
//! into the immutable structures the pipeline is built from.

use crate::backends::{BackendRegistry, RouteError};
use crate::pipeline::{Limits, PipelineConfig, RetryPolicy};
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::time::Duration;

/// Bytes per configured megabyte (decimal, as upload limits are quoted)
pub const BYTES_PER_MEGABYTE: u64 = 1_000_000;

/// Telegram refuses text longer than this, counted after HTML entity parsing
pub const TELEGRAM_MESSAGE_LIMIT: usize = 4096;

/// Application settings loaded from environment variables
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    /// Telegram Bot API token
    pub telegram_token: String,

    /// Netscape-format cookie jar handed to the extractors
    pub cookies_file: Option<String>,
    /// instaloader session user
    pub insta_user: Option<String>,

    /// Largest single upload, in megabytes
    #[serde(default = "default_upload_megabytes")]
    pub max_upload_megabytes: u64,
    /// Largest cumulative upload per media group, in megabytes
    #[serde(default = "default_upload_megabytes")]
    pub max_group_megabytes: u64,
    /// Members per media group
    #[serde(default = "default_media_group_members")]
    pub max_media_group_members: usize,
    /// Caption length limit
    #[serde(default = "default_max_caption_chars")]
    pub max_caption_chars: usize,
    /// Longer text is shown as an expandable quote
    #[serde(default = "default_collapse_at_chars")]
    pub collapse_at_chars: usize,

    /// HTTP timeout for Bot API calls
    #[serde(default = "default_send_timeout_secs")]
    pub send_timeout_secs: u64,
    /// Upper bound on resolving one link, retries and fallbacks included
    #[serde(default = "default_link_timeout_secs")]
    pub link_timeout_secs: u64,
    /// Links resolved concurrently across all chats
    #[serde(default = "default_worker_pool_size")]
    pub worker_pool_size: usize,

    /// Transient-failure retries per backend
    #[serde(default = "default_retry_max_attempts")]
    pub retry_max_attempts: usize,
    #[serde(default = "default_retry_initial_backoff_ms")]
    pub retry_initial_backoff_ms: u64,
    #[serde(default = "default_retry_max_backoff_ms")]
    pub retry_max_backoff_ms: u64,

    /// Route overrides, e.g. `instagram=gallery-dl;x=gallery-dl,yt-dlp`
    pub backend_routes: Option<String>,

    /// `chat_id=identity` pairs; sends to that chat go out as the identity
    #[serde(rename = "send_as")]
    pub send_as_str: Option<String>,

    /// Comma-separated list of chat IDs the bot answers in; all chats when unset
    #[serde(rename = "allowed_chats")]
    pub allowed_chats_str: Option<String>,
}

const fn default_upload_megabytes() -> u64 {
    50
}

const fn default_media_group_members() -> usize {
    10
}

const fn default_max_caption_chars() -> usize {
    1024
}

const fn default_collapse_at_chars() -> usize {
    300
}

const fn default_send_timeout_secs() -> u64 {
    120
}

const fn default_link_timeout_secs() -> u64 {
    600
}

const fn default_worker_pool_size() -> usize {
    4
}

const fn default_retry_max_attempts() -> usize {
    3
}

const fn default_retry_initial_backoff_ms() -> u64 {
    500
}

const fn default_retry_max_backoff_ms() -> u64 {
    4000
}

/// Split on commas, semicolons and whitespace
fn list_tokens(s: &str) -> impl Iterator<Item = &str> {
    s.split(|c: char| c == ',' || c == ';' || c.is_whitespace())
        .filter(|token| !token.is_empty())
}

impl Settings {
    /// Create new settings by loading from environment and files
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use loot_courier::config::Settings;
    ///
    /// let settings = Settings::new().expect("Failed to load configuration");
    /// ```
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if loading fails.
    pub fn new() -> Result<Self, ConfigError> {
        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{run_mode}")).required(false))
            // Not checked into git
            .add_source(File::with_name("config/local").required(false))
            // `APP__MAX_UPLOAD_MEGABYTES=20` sets `max_upload_megabytes`
            .add_source(Environment::with_prefix("APP").separator("__"))
            // Unprefixed UPPER_SNAKE_CASE variables; empty ones count as unset
            .add_source(Environment::default().ignore_empty(true))
            .build()?;

        s.try_deserialize()
    }

    /// Returns the set of chat IDs the bot answers in; empty means every chat
    #[must_use]
    pub fn allowed_chats(&self) -> HashSet<i64> {
        self.allowed_chats_str
            .as_ref()
            .map(|s| {
                list_tokens(s)
                    .filter_map(|id| id.parse::<i64>().ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Parsed `send_as` pairs; malformed entries are ignored
    #[must_use]
    pub fn send_as(&self) -> HashMap<i64, String> {
        self.send_as_str
            .as_ref()
            .map(|s| {
                list_tokens(s)
                    .filter_map(|pair| pair.split_once('='))
                    .filter_map(|(chat, identity)| {
                        let identity = identity.trim();
                        let chat = chat.trim().parse::<i64>().ok()?;
                        (!identity.is_empty()).then(|| (chat, identity.to_string()))
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    #[must_use]
    pub fn cookies_path(&self) -> Option<PathBuf> {
        self.cookies_file
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
    }

    #[must_use]
    pub fn limits(&self) -> Limits {
        Limits {
            max_asset_bytes: self.max_upload_megabytes.saturating_mul(BYTES_PER_MEGABYTE),
            max_group_bytes: self.max_group_megabytes.saturating_mul(BYTES_PER_MEGABYTE),
            max_group_members: self.max_media_group_members.max(1),
            max_caption_chars: self.max_caption_chars,
            collapse_at_chars: self.collapse_at_chars,
        }
    }

    #[must_use]
    pub const fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.retry_max_attempts,
            initial_backoff_ms: self.retry_initial_backoff_ms,
            max_backoff_ms: self.retry_max_backoff_ms,
        }
    }

    /// Everything the pipeline needs, fixed for the life of the process
    #[must_use]
    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            limits: self.limits(),
            retry: self.retry_policy(),
            worker_pool_size: self.worker_pool_size.max(1),
            link_timeout: Duration::from_secs(self.link_timeout_secs),
            send_as: self.send_as(),
        }
    }

    /// The extractor backends with default routes plus configured overrides
    ///
    /// # Errors
    ///
    /// Returns a [`RouteError`] if `backend_routes` can't be parsed.
    pub fn backend_registry(&self) -> Result<BackendRegistry, RouteError> {
        let registry = BackendRegistry::standard(
            self.cookies_path(),
            self.insta_user.clone().filter(|u| !u.trim().is_empty()),
            self.limits().max_asset_bytes,
        );
        match self.backend_routes.as_deref() {
            Some(routes) => registry.with_overrides(routes),
            None => Ok(registry),
        }
    }
}
