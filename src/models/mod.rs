// src/models/mod.rs

//! Domain models for the bot.
//!
//! This module contains all data structures used throughout the application,
//! organized by their primary purpose.

mod config;
mod event;
mod post;

// Re-export all public types
pub use config::{
    BlueskyConfig, Config, DiscordConfig, FeedConfig, HttpConfig, LoggingConfig,
    MAX_POSTS_PER_HOUR_LIMIT, MIN_POLL_INTERVAL_MINUTES, PostingConfig, RenderConfig,
    StorageConfig,
};
pub use event::{Event, RarityTier};
pub use post::{LinkPreview, Media, Post};
