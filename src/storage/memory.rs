//! In-process storage, for dry runs and tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{AppError, Result};
use crate::pipeline::RateWindow;
use crate::storage::{CardCache, CursorStore};

/// Storage backend that keeps everything in memory.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    cursor: Mutex<Option<u64>>,
    window: Mutex<Option<RateWindow>>,
    cards: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing cursor.
    pub fn with_cursor(cursor: u64) -> Self {
        Self {
            cursor: Mutex::new(Some(cursor)),
            ..Self::default()
        }
    }

    /// Currently stored cursor, if any was saved.
    pub fn stored_cursor(&self) -> Option<u64> {
        self.cursor.lock().ok().and_then(|c| *c)
    }

    pub fn card_count(&self) -> usize {
        self.cards.lock().map(|cards| cards.len()).unwrap_or(0)
    }
}

#[async_trait]
impl CursorStore for MemoryStorage {
    async fn load(&self) -> u64 {
        self.stored_cursor().unwrap_or(0)
    }

    async fn save(&self, id: u64) {
        if let Ok(mut cursor) = self.cursor.lock() {
            *cursor = Some(id);
        }
    }

    async fn load_window(&self) -> Option<RateWindow> {
        self.window.lock().ok().and_then(|w| w.clone())
    }

    async fn save_window(&self, window: &RateWindow) {
        if let Ok(mut stored) = self.window.lock() {
            *stored = Some(window.clone());
        }
    }
}

#[async_trait]
impl CardCache for MemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let cards = self.cards.lock().map_err(AppError::storage)?;
        Ok(cards.get(key).cloned())
    }

    async fn put(&self, key: &str, bytes: &[u8]) -> Result<String> {
        let mut cards = self.cards.lock().map_err(AppError::storage)?;
        cards.insert(key.to_string(), bytes.to_vec());
        Ok(self.location(key))
    }

    fn location(&self, key: &str) -> String {
        format!("memory://cards/{key}.png")
    }
}
