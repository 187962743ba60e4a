// src/publishers/discord.rs

//! Discord webhook publisher.

use async_trait::async_trait;
use reqwest::Client;
use reqwest::multipart::{Form, Part};
use serde_json::{Value, json};

use crate::error::{AppError, Result};
use crate::models::Post;
use crate::publishers::Publisher;
use crate::utils::truncate_chars;

const NAME: &str = "discord";
const CARD_FILENAME: &str = "card.png";

/// Discord limits, in characters.
const MAX_CONTENT_CHARS: usize = 2000;
const MAX_EMBED_TITLE_CHARS: usize = 256;
const MAX_EMBED_DESCRIPTION_CHARS: usize = 4096;

/// Embed accent color.
const EMBED_COLOR: u32 = 0x58_1C_87;

/// Publisher posting through a channel webhook.
pub struct DiscordPublisher {
    client: Client,
    webhook_url: String,
}

impl DiscordPublisher {
    pub fn new(client: Client, webhook_url: &str) -> Self {
        Self {
            client,
            webhook_url: webhook_url.to_string(),
        }
    }

    /// Webhook payload. The card, when attached, is referenced by filename.
    fn payload(post: &Post) -> Value {
        let mut embed = serde_json::Map::new();
        if let Some(link) = &post.link {
            embed.insert("title".into(), json!(truncate_chars(&link.title, MAX_EMBED_TITLE_CHARS)));
            embed.insert(
                "description".into(),
                json!(truncate_chars(&link.description, MAX_EMBED_DESCRIPTION_CHARS)),
            );
            embed.insert("url".into(), json!(link.url));
        }
        if post.media.is_some() {
            embed.insert(
                "image".into(),
                json!({"url": format!("attachment://{CARD_FILENAME}")}),
            );
        }

        let mut payload = json!({
            "content": truncate_chars(&post.message, MAX_CONTENT_CHARS),
        });
        if !embed.is_empty() {
            embed.insert("color".into(), json!(EMBED_COLOR));
            payload["embeds"] = json!([embed]);
        }
        if let Some(media) = &post.media {
            payload["attachments"] = json!([{
                "id": 0,
                "filename": CARD_FILENAME,
                "description": media.alt_text,
            }]);
        }
        payload
    }

    async fn send(&self, post: &Post) -> Result<()> {
        let payload = Self::payload(post);
        let request = self.client.post(&self.webhook_url);

        let request = match &post.media {
            Some(media) => {
                let file = Part::bytes(media.bytes.clone())
                    .file_name(CARD_FILENAME)
                    .mime_str(media.mime_type)?;
                let form = Form::new()
                    .text("payload_json", payload.to_string())
                    .part("files[0]", file);
                request.multipart(form)
            }
            None => request.json(&payload),
        };

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::publish(
                NAME,
                format!("webhook returned HTTP {status}: {}", truncate_chars(&body, 200)),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl Publisher for DiscordPublisher {
    fn name(&self) -> &str {
        NAME
    }

    async fn publish(&mut self, post: &Post) -> bool {
        match self.send(post).await {
            Ok(()) => {
                log::info!("Posted to Discord webhook");
                true
            }
            Err(e) => {
                log::error!("Failed to post to Discord: {}", e);
                false
            }
        }
    }
}
