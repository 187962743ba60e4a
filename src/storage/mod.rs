//! Storage abstractions for bot state.
//!
//! Two narrow interfaces keep the pipeline independent of where state lives:
//! - [`CursorStore`]: the last processed event id and the hourly rate window
//! - [`CardCache`]: rendered cards keyed by content hash
//!
//! ## Directory Structure (local backend)
//!
//! ```text
//! {root}/
//! ├── cursor.txt            # Last processed event id (plain integer)
//! ├── rate_window.json      # Hourly post counter
//! └── cards/
//!     └── {sha256}.png      # Rendered cards
//! ```

pub mod local;
pub mod memory;

use async_trait::async_trait;

use crate::error::Result;
use crate::pipeline::RateWindow;

// Re-export for convenience
pub use local::LocalStorage;
pub use memory::MemoryStorage;

/// Durable home of the cursor and rate window.
///
/// Implementations never fail: unreadable state loads as the default and
/// failed writes are logged, accepting possible re-delivery after a restart.
#[async_trait]
pub trait CursorStore: Send + Sync {
    /// Last processed event id, `0` if absent or corrupt.
    async fn load(&self) -> u64;

    /// Persist the cursor. Saving the same id again is a no-op in effect.
    async fn save(&self, id: u64);

    /// Stored rate window, if a readable one exists.
    async fn load_window(&self) -> Option<RateWindow>;

    async fn save_window(&self, window: &RateWindow);
}

/// Content-addressed store for rendered cards.
#[async_trait]
pub trait CardCache: Send + Sync {
    /// Cached card bytes for a key.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store card bytes, returning their location.
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<String>;

    /// Location a key is (or would be) stored at.
    fn location(&self, key: &str) -> String;
}
