//! Local filesystem storage implementation.
//!
//! Every write goes to a temporary file first and is then renamed over the
//! target, so a crash never leaves a half-written cursor or card behind.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};
use tokio::io::AsyncWriteExt;

use crate::error::{AppError, Result};
use crate::pipeline::RateWindow;
use crate::storage::{CardCache, CursorStore};

const CURSOR_KEY: &str = "cursor.txt";
const WINDOW_KEY: &str = "rate_window.json";
const CARDS_DIR: &str = "cards";

/// Local filesystem storage backend.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root_dir: PathBuf,
}

impl LocalStorage {
    /// Create a new LocalStorage rooted at the given directory.
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
        }
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    /// Get the full path for a relative key.
    fn path(&self, key: &str) -> PathBuf {
        self.root_dir.join(key)
    }

    fn card_key(key: &str) -> String {
        format!("{CARDS_DIR}/{key}.png")
    }

    /// Ensure parent directory exists.
    async fn ensure_dir(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    /// Write bytes atomically (write to temp, then rename).
    async fn write_bytes(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path(key);
        self.ensure_dir(&path).await?;

        let tmp = path.with_extension("tmp");
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        drop(file);

        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    /// Write JSON data.
    async fn write_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(value)?;
        self.write_bytes(key, &bytes).await
    }

    /// Read bytes, returning None if file doesn't exist.
    async fn read_bytes(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path(key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AppError::Io(e)),
        }
    }

    /// Read JSON data.
    async fn read_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.read_bytes(key).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn read_cursor(&self) -> Result<Option<u64>> {
        match self.read_bytes(CURSOR_KEY).await? {
            Some(bytes) => {
                let text = String::from_utf8_lossy(&bytes);
                let id = text
                    .trim()
                    .parse::<u64>()
                    .map_err(|e| AppError::storage(format!("corrupt cursor '{}': {}", text.trim(), e)))?;
                Ok(Some(id))
            }
            None => Ok(None),
        }
    }

    /// Number of cached cards on disk.
    pub async fn card_count(&self) -> Result<usize> {
        let dir = self.path(CARDS_DIR);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(AppError::Io(e)),
        };
        let mut count = 0;
        while let Some(entry) = entries.next_entry().await? {
            if entry.path().extension().is_some_and(|ext| ext == "png") {
                count += 1;
            }
        }
        Ok(count)
    }
}

#[async_trait]
impl CursorStore for LocalStorage {
    async fn load(&self) -> u64 {
        match self.read_cursor().await {
            Ok(Some(id)) => id,
            Ok(None) => {
                log::info!("No cursor found at {}, starting from 0", self.path(CURSOR_KEY).display());
                0
            }
            Err(e) => {
                log::warn!("Failed to read cursor, starting from 0: {}", e);
                0
            }
        }
    }

    async fn save(&self, id: u64) {
        if let Ok(Some(current)) = self.read_cursor().await {
            if current == id {
                return;
            }
        }
        if let Err(e) = self.write_bytes(CURSOR_KEY, id.to_string().as_bytes()).await {
            log::error!("Failed to persist cursor {}: {}", id, e);
        }
    }

    async fn load_window(&self) -> Option<RateWindow> {
        match self.read_json::<RateWindow>(WINDOW_KEY).await {
            Ok(window) => window,
            Err(e) => {
                log::warn!("Failed to read rate window, starting fresh: {}", e);
                None
            }
        }
    }

    async fn save_window(&self, window: &RateWindow) {
        if let Err(e) = self.write_json(WINDOW_KEY, window).await {
            log::error!("Failed to persist rate window: {}", e);
        }
    }
}

#[async_trait]
impl CardCache for LocalStorage {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.read_bytes(&Self::card_key(key)).await
    }

    async fn put(&self, key: &str, bytes: &[u8]) -> Result<String> {
        let card_key = Self::card_key(key);
        self.write_bytes(&card_key, bytes).await?;
        Ok(self.path(&card_key).display().to_string())
    }

    fn location(&self, key: &str) -> String {
        self.path(&Self::card_key(key)).display().to_string()
    }
}
