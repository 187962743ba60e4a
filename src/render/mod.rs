//! Achievement card rendering.
//!
//! A card is described by [`layout::describe`], drawn by
//! [`raster::rasterize`] and cached under a content hash of its inputs, so
//! the same user/achievement pair is only ever drawn once.

pub mod fonts;
pub mod layout;
pub mod raster;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use ab_glyph::FontArc;
use async_trait::async_trait;
use image::DynamicImage;
use reqwest::Client;
use sha2::{Digest, Sha256};

use crate::error::{AppError, Result};
use crate::models::{Event, RenderConfig};
use crate::storage::CardCache;
use crate::utils::http;

/// Bump whenever the drawing output changes, invalidating cached cards.
pub const RENDER_VERSION: u32 = 2;

/// Cache key for a card: SHA-256 hex of its visual inputs.
pub fn cache_key(avatar_url: Option<&str>, achievement_name: &str, user_name: &str) -> String {
    let mut hasher = Sha256::new();
    for part in [
        avatar_url.unwrap_or(""),
        achievement_name,
        user_name,
        RENDER_VERSION.to_string().as_str(),
    ] {
        hasher.update(part.as_bytes());
        // Unit separator keeps ("ab", "c") and ("a", "bc") apart.
        hasher.update([0x1f]);
    }
    hex::encode(hasher.finalize())
}

/// Alt text describing a card for screen readers.
pub fn alt_text(event: &Event) -> String {
    match event.rarity_tier {
        Some(tier) => format!(
            "{} earned the {} achievement ({} tier)",
            event.display_name(),
            event.achievement_name,
            tier
        ),
        None => format!(
            "{} earned the {} achievement",
            event.display_name(),
            event.achievement_name
        ),
    }
}

/// A card ready to attach to a post.
#[derive(Debug, Clone)]
pub struct RenderedCard {
    pub key: String,
    /// Where the card is stored in the cache
    pub location: String,
    pub png: Vec<u8>,
    /// True when served from the cache without drawing
    pub cached: bool,
}

/// Produces cards for events.
#[async_trait]
pub trait Renderer: Send + Sync {
    async fn render(&self, event: &Event) -> Result<RenderedCard>;
}

/// Renderer drawing cards locally and caching them in a [`CardCache`].
pub struct CardRenderer {
    client: Client,
    cache: Arc<dyn CardCache>,
    font: Option<FontArc>,
    brand_label: String,
    renders: AtomicUsize,
}

impl CardRenderer {
    /// Create a renderer, loading the first available font.
    pub fn new(client: Client, cache: Arc<dyn CardCache>, config: &RenderConfig) -> Self {
        let font = fonts::load_font(&config.font_candidates);
        Self::with_font(client, cache, font, &config.brand_label)
    }

    pub fn with_font(
        client: Client,
        cache: Arc<dyn CardCache>,
        font: Option<FontArc>,
        brand_label: &str,
    ) -> Self {
        Self {
            client,
            cache,
            font,
            brand_label: brand_label.to_string(),
            renders: AtomicUsize::new(0),
        }
    }

    /// Number of cards actually drawn (cache misses).
    pub fn render_count(&self) -> usize {
        self.renders.load(Ordering::Relaxed)
    }

    /// Download and decode the avatar. Any failure falls back to the
    /// placeholder disc.
    async fn fetch_avatar(&self, url: Option<&str>) -> Option<DynamicImage> {
        let url = url?;
        let bytes = match http::fetch_bytes(&self.client, url).await {
            Ok(bytes) => bytes,
            Err(e) => {
                log::warn!("Failed to download avatar {}: {}", url, e);
                return None;
            }
        };
        match image::load_from_memory(&bytes) {
            Ok(image) => Some(image),
            Err(e) => {
                log::warn!("Failed to decode avatar {}: {}", url, e);
                None
            }
        }
    }
}

#[async_trait]
impl Renderer for CardRenderer {
    async fn render(&self, event: &Event) -> Result<RenderedCard> {
        let avatar_url = event.avatar_url();
        let key = cache_key(avatar_url, &event.achievement_name, event.display_name());

        match self.cache.get(&key).await {
            Ok(Some(png)) => {
                log::debug!("Card cache hit for achievement {}", event.id);
                return Ok(RenderedCard {
                    location: self.cache.location(&key),
                    key,
                    png,
                    cached: true,
                });
            }
            Ok(None) => {}
            Err(e) => log::warn!("Card cache lookup failed for {}: {}", key, e),
        }

        let avatar = self.fetch_avatar(avatar_url).await;
        let card_layout = layout::describe(event, &self.brand_label);
        let font = self.font.clone();

        let png = tokio::task::spawn_blocking(move || {
            let canvas = raster::rasterize(&card_layout, avatar.as_ref(), font.as_ref());
            raster::encode_png(&canvas)
        })
        .await
        .map_err(AppError::render)??;
        self.renders.fetch_add(1, Ordering::Relaxed);

        let location = match self.cache.put(&key, &png).await {
            Ok(location) => location,
            Err(e) => {
                log::warn!("Failed to cache card {}: {}", key, e);
                self.cache.location(&key)
            }
        };
        log::info!("Rendered card for achievement {} -> {}", event.id, location);

        Ok(RenderedCard {
            key,
            location,
            png,
            cached: false,
        })
    }
}
