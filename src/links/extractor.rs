//! Link extraction and classification.

// lazy_regex! statics are validated at compile time
#![allow(clippy::non_std_lazy_statics)]

use super::patterns::{best_match, default_patterns, HostPattern};
use crate::types::{CandidateLink, Platform, Scope};
use lazy_regex::lazy_regex;
use regex::Regex;
use tracing::debug;
use url::Url;

/// Bare URLs in free text
static RE_URL: lazy_regex::Lazy<Regex> = lazy_regex!(r#"(?i)https?://[^\s<>"'`]+"#);

/// Characters never kept at the end of a scanned URL
const TRAILING_PUNCTUATION: &[char] = &['.', ',', ';', ':', '!', '?', '\'', '"'];

/// Finds links in message text and classifies them by platform.
#[derive(Debug, Clone)]
pub struct LinkExtractor {
    patterns: Vec<HostPattern>,
    mention_token: Option<String>,
}

impl Default for LinkExtractor {
    fn default() -> Self {
        Self::new(default_patterns())
    }
}

impl LinkExtractor {
    /// Create an extractor over an ordered pattern set
    #[must_use]
    pub const fn new(patterns: Vec<HostPattern>) -> Self {
        Self {
            patterns,
            mention_token: None,
        }
    }

    /// Set the bot's mention token (`@name` or `name`)
    #[must_use]
    pub fn with_mention(mut self, token: &str) -> Self {
        let token = token.trim().trim_start_matches('@').to_lowercase();
        self.mention_token = (!token.is_empty()).then(|| format!("@{token}"));
        self
    }

    /// Scan `text` for URLs and classify them, in order of appearance.
    #[must_use]
    pub fn extract(&self, text: &str) -> Vec<CandidateLink> {
        self.classify(text, scan_urls(text))
    }

    /// Classify URLs the transport already located (e.g. from message entities).
    ///
    /// `text` is only consulted for the bot mention; `urls` must be in message order.
    #[must_use]
    pub fn classify<I, S>(&self, text: &str, urls: I) -> Vec<CandidateLink>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let explicit = self.is_explicit(text);
        let mut links = Vec::new();

        for raw in urls {
            let raw = raw.as_ref().trim();
            let Some(base) = normalize_base(raw) else {
                debug!(url = %raw, "Skipping unparsable URL");
                continue;
            };

            if let Some(pattern) = best_match(&self.patterns, &base) {
                let normalized = if pattern.platform().is_video_host() {
                    strip_extra_params(&base)
                } else {
                    base
                };
                links.push(CandidateLink::new(
                    raw,
                    normalized,
                    pattern.platform(),
                    pattern.scope(),
                    explicit,
                    links.len(),
                ));
            } else if explicit {
                // The user addressed us with this link, so try it anyway
                links.push(CandidateLink::new(
                    raw,
                    base,
                    Platform::Generic,
                    Scope::Item,
                    true,
                    links.len(),
                ));
            } else {
                debug!(url = %raw, "No pattern matched; ignoring");
            }
        }

        links
    }

    /// True if the bot's mention token appears anywhere in `text`
    #[must_use]
    pub fn is_explicit(&self, text: &str) -> bool {
        let Some(token) = self.mention_token.as_deref() else {
            return false;
        };
        text.split_whitespace()
            .map(|word| word.trim_matches(|c: char| !(c.is_alphanumeric() || c == '@' || c == '_')))
            .any(|word| word.to_lowercase() == token)
    }
}

/// Find bare `http(s)://` URLs in text, in order, duplicates preserved.
#[must_use]
pub fn scan_urls(text: &str) -> Vec<String> {
    RE_URL
        .find_iter(text)
        .map(|m| trim_url_tail(m.as_str()).to_string())
        .filter(|url| url.contains("://") && !url.ends_with("://"))
        .collect()
}

/// Strip trailing punctuation and unbalanced closing brackets.
fn trim_url_tail(mut url: &str) -> &str {
    loop {
        let Some(last) = url.chars().last() else {
            return url;
        };
        let unbalanced = match last {
            ')' => url.matches('(').count() < url.matches(')').count(),
            ']' => url.matches('[').count() < url.matches(']').count(),
            '}' | '>' => true,
            _ => false,
        };
        if TRAILING_PUNCTUATION.contains(&last) || unbalanced {
            url = &url[..url.len() - last.len_utf8()];
        } else {
            return url;
        }
    }
}

/// Parse, lower-case scheme/host and drop the fragment.
fn normalize_base(raw: &str) -> Option<String> {
    let mut url = Url::parse(raw).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    url.set_fragment(None);
    Some(url.to_string())
}

/// Drop everything after the first `&` (tracking and timestamp parameters).
fn strip_extra_params(url: &str) -> String {
    url.split_once('&')
        .map_or_else(|| url.to_string(), |(head, _)| head.to_string())
}
