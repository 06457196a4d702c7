//! Link detection and platform classification
//!
//! Turns free-form message text into an ordered list of [`CandidateLink`]s.
//!
//! [`CandidateLink`]: crate::types::CandidateLink

mod extractor;
mod patterns;

pub use extractor::{scan_urls, LinkExtractor};
pub use patterns::{best_match, default_patterns, HostPattern};
