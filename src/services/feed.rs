// src/services/feed.rs

//! Upstream achievement feed client.
//!
//! Fetches recently earned achievements since the stored cursor. Every
//! failure degrades to an empty batch so a flaky upstream only delays the
//! pipeline.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::error::{AppError, Result};
use crate::models::Event;

/// Source of new achievement events.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Events with an id greater than `cursor`, at most `limit` of them, in
    /// no particular order. Never fails: errors yield an empty batch.
    async fn fetch_since(&self, cursor: u64, feed_ids: &[String], limit: usize) -> Vec<Event>;
}

#[derive(Debug, Deserialize)]
struct RecentResponse {
    #[serde(default)]
    achievements: Vec<serde_json::Value>,
}

/// HTTP client for `GET {api_base}/achievements/recent`.
pub struct FeedClient {
    client: Client,
    endpoint: String,
}

impl FeedClient {
    /// Create a feed client for the given API base.
    pub fn new(client: Client, api_base: &str) -> Result<Self> {
        let base = url::Url::parse(api_base)?;
        let endpoint = format!(
            "{}/achievements/recent",
            base.as_str().trim_end_matches('/')
        );
        Ok(Self { client, endpoint })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn request(&self, cursor: u64, feed_ids: &[String], limit: usize) -> Result<Vec<Event>> {
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("feed_ids", feed_ids.join(",")),
                ("since_id", cursor.to_string()),
                ("limit", limit.to_string()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::feed(format!("upstream returned HTTP {status}")));
        }

        let body: RecentResponse = response.json().await?;
        Ok(Self::parse_events(body.achievements, cursor))
    }

    /// Decode entries one by one, skipping malformed ones and anything at or
    /// below the cursor.
    fn parse_events(raw: Vec<serde_json::Value>, cursor: u64) -> Vec<Event> {
        raw.into_iter()
            .filter_map(|value| match serde_json::from_value::<Event>(value) {
                Ok(event) => Some(event),
                Err(e) => {
                    log::warn!("Skipping malformed achievement entry: {}", e);
                    None
                }
            })
            .filter(|event| {
                if event.id <= cursor {
                    log::debug!("Dropping already-seen achievement {}", event.id);
                    false
                } else {
                    true
                }
            })
            .collect()
    }
}

#[async_trait]
impl EventSource for FeedClient {
    async fn fetch_since(&self, cursor: u64, feed_ids: &[String], limit: usize) -> Vec<Event> {
        match self.request(cursor, feed_ids, limit).await {
            Ok(events) => {
                log::info!("Found {} new achievements since id {}", events.len(), cursor);
                events
            }
            Err(e) => {
                log::error!("Failed to fetch achievements: {}", e);
                Vec::new()
            }
        }
    }
}
