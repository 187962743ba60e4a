// src/error.rs

//! Unified error handling for the bot.

use std::fmt;

use thiserror::Error;

/// Result type alias for bot operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Unified application error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    /// Image decoding or encoding failed
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// CSS selector parsing failed
    #[error("Invalid selector '{selector}': {message}")]
    Selector { selector: String, message: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Upstream feed returned something unusable
    #[error("Feed error: {0}")]
    Feed(String),

    /// Card rendering failed
    #[error("Render error: {0}")]
    Render(String),

    /// A destination rejected a post
    #[error("Publish error for {destination}: {message}")]
    Publish {
        destination: String,
        message: String,
    },

    /// Persistent state could not be read or written
    #[error("Storage error: {0}")]
    Storage(String),
}

impl AppError {
    /// Create a selector parsing error.
    pub fn selector(selector: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Selector {
            selector: selector.into(),
            message: message.to_string(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a feed error.
    pub fn feed(message: impl Into<String>) -> Self {
        Self::Feed(message.into())
    }

    /// Create a render error.
    pub fn render(message: impl fmt::Display) -> Self {
        Self::Render(message.to_string())
    }

    /// Create a publish error with the destination name as context.
    pub fn publish(destination: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Publish {
            destination: destination.into(),
            message: message.to_string(),
        }
    }

    /// Create a storage error.
    pub fn storage(message: impl fmt::Display) -> Self {
        Self::Storage(message.to_string())
    }
}
