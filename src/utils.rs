//! Text helpers for captions and notices sent to Telegram.
//!
//! Telegram counts message and caption limits in UTF-16 code units of the
//! parsed text, so lengths here go through [`telegram_len`], never bytes.

use unicode_segmentation::UnicodeSegmentation;

/// Length of `text` as Telegram measures it.
///
/// ```
/// use loot_courier::utils::telegram_len;
/// assert_eq!(telegram_len("abc"), 3);
/// assert_eq!(telegram_len("🔥"), 2);
/// ```
#[must_use]
pub fn telegram_len(text: &str) -> usize {
    text.encode_utf16().count()
}

/// Splits text into parts of at most `max_chars` UTF-16 units.
///
/// Breaks on line boundaries where possible. A single line longer than the
/// limit is split between grapheme clusters so no emoji or combined character
/// is cut in half.
///
/// # Examples
///
/// ```
/// use loot_courier::utils::split_long_message;
/// let long_msg = "A very long description...\n".repeat(300);
/// let parts = split_long_message(&long_msg, 4000);
/// assert!(parts.len() > 1);
/// ```
#[must_use]
pub fn split_long_message(message: &str, max_chars: usize) -> Vec<String> {
    if message.is_empty() || max_chars == 0 {
        return Vec::new();
    }

    if telegram_len(message) <= max_chars {
        return vec![message.to_string()];
    }

    let mut parts = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for line in message.lines() {
        let line_len = telegram_len(line);

        if line_len > max_chars {
            if !current.is_empty() {
                parts.push(current.trim_end().to_string());
                current.clear();
                current_len = 0;
            }

            let mut chunk = String::new();
            let mut chunk_len = 0;
            for grapheme in line.graphemes(true) {
                let len = telegram_len(grapheme);
                if chunk_len + len > max_chars && !chunk.is_empty() {
                    parts.push(std::mem::take(&mut chunk));
                    chunk_len = 0;
                }
                chunk.push_str(grapheme);
                chunk_len += len;
            }
            if !chunk.is_empty() {
                current.push_str(&chunk);
                current.push('\n');
                current_len = chunk_len + 1;
            }
            continue;
        }

        // +1 for newline
        if current_len + line_len + 1 > max_chars && !current.is_empty() {
            parts.push(current.trim_end().to_string());
            current.clear();
            current_len = 0;
        }
        current.push_str(line);
        current.push('\n');
        current_len += line_len + 1;
    }

    let tail = current.trim_end();
    if !tail.is_empty() {
        parts.push(tail.to_string());
    }

    parts
}

/// Renders caption text as Telegram HTML.
///
/// Text longer than `collapse_at` goes into an expandable quote so a
/// long description doesn't bury the media above it.
///
/// # Examples
///
/// ```
/// use loot_courier::utils::caption_html;
/// assert_eq!(caption_html("a < b", 300), "a &lt; b");
/// assert!(caption_html(&"x".repeat(10), 5).starts_with("<blockquote expandable>"));
/// ```
#[must_use]
pub fn caption_html(text: &str, collapse_at: usize) -> String {
    let escaped = html_escape::encode_text(text.trim());
    if telegram_len(text.trim()) > collapse_at {
        format!("<blockquote expandable>{escaped}</blockquote>")
    } else {
        escaped.into_owned()
    }
}
