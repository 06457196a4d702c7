//! Host patterns used to classify URLs into platforms.
//!
//! Patterns are anchored at the start of the normalized URL and matched
//! case-insensitively. When several patterns match, the longest match wins;
//! equal lengths go to the pattern registered first.

// lazy_regex! statics are validated at compile time
#![allow(clippy::non_std_lazy_statics)]

use crate::types::{Platform, Scope};
use lazy_regex::lazy_regex;
use regex::Regex;

static RE_TIKTOK: lazy_regex::Lazy<Regex> = lazy_regex!(
    r"(?i)^https://(www\.tiktok\.com/(t/[^/ ]+|@[^/]+/video/\d+|@[^\?]+[^/]+)|vm\.tiktok\.com/[^/]+)"
);
static RE_X: lazy_regex::Lazy<Regex> = lazy_regex!(
    r"(?i)^(https://(www\.)?(x|twitter)\.com/[^/]+/status/\d+|https://t\.co/[^/]+)"
);
static RE_BLUESKY: lazy_regex::Lazy<Regex> =
    lazy_regex!(r"(?i)^https://bsky\.app/profile/[^/]+/post/[^/]+");
static RE_INSTAGRAM: lazy_regex::Lazy<Regex> =
    lazy_regex!(r"(?i)^https://(www\.)?instagram\.com/([^/]+/)?(p|reel|reels)/[^/?#]+");
static RE_VREDDIT: lazy_regex::Lazy<Regex> = lazy_regex!(r"(?i)^https://v\.redd\.it/[^/]+");
static RE_REDDIT: lazy_regex::Lazy<Regex> = lazy_regex!(
    r"(?i)^https://(www\.|old\.)?reddit\.com/(r|user)/[^/]+/(comments|s)/[a-zA-Z0-9_/]+"
);
static RE_YOUTUBE: lazy_regex::Lazy<Regex> = lazy_regex!(
    r"(?i)^https://(youtu\.be/[^/]+|(www\.)?youtube\.com/shorts/[^/]+|(www\.|m\.)?youtube\.com/watch\?v=[^/]+)"
);
static RE_YOUTUBE_PLAYLIST: lazy_regex::Lazy<Regex> =
    lazy_regex!(r"(?i)^https://(www\.|m\.)?youtube\.com/playlist\?list=[^/&]+");
static RE_VIMEO: lazy_regex::Lazy<Regex> =
    lazy_regex!(r"(?i)^https://(player\.vimeo\.com/video/[^/]+|vimeo\.com/[0-9]+[^/]*)");
static RE_VIMEO_SHOWCASE: lazy_regex::Lazy<Regex> =
    lazy_regex!(r"(?i)^https://vimeo\.com/(showcase|album)/[0-9]+");
static RE_SOUNDCLOUD: lazy_regex::Lazy<Regex> =
    lazy_regex!(r"(?i)^https://soundcloud\.com/[^/]+/[^/?]+");
static RE_SOUNDCLOUD_SET: lazy_regex::Lazy<Regex> =
    lazy_regex!(r"(?i)^https://soundcloud\.com/[^/]+/sets/[^/?]+");
static RE_BANDCAMP_TRACK: lazy_regex::Lazy<Regex> =
    lazy_regex!(r"(?i)^https://[^\./]+\.bandcamp\.com/track/.*");
static RE_BANDCAMP_ALBUM: lazy_regex::Lazy<Regex> =
    lazy_regex!(r"(?i)^https://[^\./]+\.bandcamp\.com/album/.*");

/// One registered host pattern
#[derive(Debug, Clone)]
pub struct HostPattern {
    platform: Platform,
    scope: Scope,
    regex: Regex,
}

impl HostPattern {
    /// Compile a pattern. `^` and case-insensitivity are added when missing.
    ///
    /// # Errors
    ///
    /// Returns the regex compilation error for an invalid pattern.
    pub fn new(platform: Platform, scope: Scope, pattern: &str) -> Result<Self, regex::Error> {
        let anchored = if pattern.starts_with('^') || pattern.starts_with("(?i)^") {
            pattern.to_string()
        } else {
            format!("^(?:{pattern})")
        };
        let pattern = if anchored.starts_with("(?i)") {
            anchored
        } else {
            format!("(?i){anchored}")
        };
        Ok(Self::from_regex(platform, scope, Regex::new(&pattern)?))
    }

    /// Wrap an already compiled regex
    #[must_use]
    pub const fn from_regex(platform: Platform, scope: Scope, regex: Regex) -> Self {
        Self {
            platform,
            scope,
            regex,
        }
    }

    /// Platform this pattern classifies into
    #[must_use]
    pub const fn platform(&self) -> Platform {
        self.platform
    }

    /// Scope of links matching this pattern
    #[must_use]
    pub const fn scope(&self) -> Scope {
        self.scope
    }

    /// Length of the match at the start of `url`, if any
    #[must_use]
    pub fn match_len(&self, url: &str) -> Option<usize> {
        self.regex
            .find(url)
            .filter(|m| m.start() == 0)
            .map(|m| m.end())
    }
}

/// Built-in pattern set
#[must_use]
pub fn default_patterns() -> Vec<HostPattern> {
    vec![
        HostPattern::from_regex(Platform::TikTok, Scope::Item, RE_TIKTOK.clone()),
        HostPattern::from_regex(Platform::X, Scope::Item, RE_X.clone()),
        HostPattern::from_regex(Platform::Bluesky, Scope::Item, RE_BLUESKY.clone()),
        HostPattern::from_regex(Platform::Instagram, Scope::Item, RE_INSTAGRAM.clone()),
        HostPattern::from_regex(Platform::VReddit, Scope::Item, RE_VREDDIT.clone()),
        HostPattern::from_regex(Platform::Reddit, Scope::Item, RE_REDDIT.clone()),
        HostPattern::from_regex(Platform::YouTube, Scope::Item, RE_YOUTUBE.clone()),
        HostPattern::from_regex(
            Platform::YouTube,
            Scope::Collection,
            RE_YOUTUBE_PLAYLIST.clone(),
        ),
        HostPattern::from_regex(Platform::Vimeo, Scope::Item, RE_VIMEO.clone()),
        HostPattern::from_regex(
            Platform::Vimeo,
            Scope::Collection,
            RE_VIMEO_SHOWCASE.clone(),
        ),
        HostPattern::from_regex(Platform::SoundCloud, Scope::Item, RE_SOUNDCLOUD.clone()),
        HostPattern::from_regex(
            Platform::SoundCloud,
            Scope::Collection,
            RE_SOUNDCLOUD_SET.clone(),
        ),
        HostPattern::from_regex(Platform::Bandcamp, Scope::Item, RE_BANDCAMP_TRACK.clone()),
        HostPattern::from_regex(
            Platform::Bandcamp,
            Scope::Collection,
            RE_BANDCAMP_ALBUM.clone(),
        ),
    ]
}

/// Pick the most specific pattern for `url`
#[must_use]
pub fn best_match<'a>(patterns: &'a [HostPattern], url: &str) -> Option<&'a HostPattern> {
    let mut best: Option<(&HostPattern, usize)> = None;
    for pattern in patterns {
        if let Some(len) = pattern.match_len(url) {
            if best.map_or(true, |(_, best_len)| len > best_len) {
                best = Some((pattern, len));
            }
        }
    }
    best.map(|(pattern, _)| pattern)
}
