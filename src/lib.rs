//! Loot courier
//!
//! A Telegram bot that spots links to video, audio and social platforms in
//! chat messages, fetches the media through external extractors and posts it
//! back into the same conversation.

/// Extractor backends and platform routing
pub mod backends;
/// Telegram transport
pub mod bot;
/// Configuration management
pub mod config;
/// Link detection and classification
pub mod links;
/// Resolution, packing and ordered delivery
pub mod pipeline;
/// Shared domain types
pub mod types;
/// Text helpers
pub mod utils;
