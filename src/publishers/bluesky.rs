// src/publishers/bluesky.rs

//! Bluesky publisher over AT Protocol XRPC.
//!
//! Posts are `app.bsky.feed.post` records created with an app-password
//! session. URLs in the text become link facets, and the card is attached
//! either as an external link thumbnail or as an image embed.

use std::sync::OnceLock;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use regex::Regex;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};
use unicode_segmentation::UnicodeSegmentation;

use crate::error::{AppError, Result};
use crate::models::{BlueskyConfig, LinkPreview, Media, Post};
use crate::publishers::Publisher;
use crate::render::layout::{CANVAS_HEIGHT, CANVAS_WIDTH};

const NAME: &str = "bluesky";
const POST_COLLECTION: &str = "app.bsky.feed.post";

/// Longest post text Bluesky accepts, in graphemes.
pub const MAX_POST_GRAPHEMES: usize = 300;

/// Largest blob Bluesky accepts for an embed image.
pub const MAX_BLOB_BYTES: usize = 976_560;

static URL_PATTERN: OnceLock<Option<Regex>> = OnceLock::new();

fn url_pattern() -> Option<&'static Regex> {
    URL_PATTERN
        .get_or_init(|| Regex::new(r#"https?://[^\s<>"…]+"#).ok())
        .as_ref()
}

/// Failure of a single XRPC call.
#[derive(Debug, thiserror::Error)]
enum XrpcError {
    /// The access token is no longer accepted; re-authenticate and retry.
    #[error("session expired: {0}")]
    SessionExpired(String),

    #[error(transparent)]
    App(#[from] AppError),
}

impl From<reqwest::Error> for XrpcError {
    fn from(e: reqwest::Error) -> Self {
        Self::App(e.into())
    }
}

#[derive(Debug, Default, Deserialize)]
struct XrpcErrorBody {
    error: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Session {
    access_jwt: String,
    did: String,
}

/// Publisher posting to a Bluesky account.
pub struct BlueskyPublisher {
    client: Client,
    service: String,
    identifier: String,
    app_password: String,
    session: Option<Session>,
}

impl BlueskyPublisher {
    pub fn new(client: Client, config: &BlueskyConfig) -> Self {
        Self {
            client,
            service: config.service.trim_end_matches('/').to_string(),
            identifier: config.identifier.clone(),
            app_password: config.app_password.clone(),
            session: None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.session.is_some()
    }

    fn xrpc(&self, method: &str) -> String {
        format!("{}/xrpc/{}", self.service, method)
    }

    /// Decode a successful response, classifying failures.
    async fn check(response: Response) -> std::result::Result<Value, XrpcError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }

        let body: XrpcErrorBody = response.json().await.unwrap_or_default();
        let error = body.error.unwrap_or_default();
        let message = body.message.unwrap_or_default();
        let auth_status = status == StatusCode::BAD_REQUEST || status == StatusCode::UNAUTHORIZED;
        if auth_status && matches!(error.as_str(), "ExpiredToken" | "InvalidToken") {
            return Err(XrpcError::SessionExpired(message));
        }
        Err(AppError::publish(NAME, format!("HTTP {status}: {error} {message}")).into())
    }

    async fn upload_blob(
        &self,
        session: &Session,
        bytes: &[u8],
        mime_type: &str,
    ) -> std::result::Result<Value, XrpcError> {
        let response = self
            .client
            .post(self.xrpc("com.atproto.repo.uploadBlob"))
            .bearer_auth(&session.access_jwt)
            .header(reqwest::header::CONTENT_TYPE, mime_type)
            .body(bytes.to_vec())
            .send()
            .await?;
        let value = Self::check(response).await?;
        value
            .get("blob")
            .cloned()
            .ok_or_else(|| AppError::publish(NAME, "uploadBlob response has no blob").into())
    }

    async fn external_embed(
        &self,
        session: &Session,
        link: &LinkPreview,
        card: Option<&Media>,
    ) -> std::result::Result<Value, XrpcError> {
        let thumb_source = link
            .thumbnail
            .as_deref()
            .and_then(embeddable_image)
            .or_else(|| card.map(|m| (m.bytes.as_slice(), m.mime_type)))
            .filter(|(bytes, _)| bytes.len() <= MAX_BLOB_BYTES);

        let mut external = json!({
            "uri": link.url,
            "title": link.title,
            "description": link.description,
        });

        if let Some((bytes, mime_type)) = thumb_source {
            match self.upload_blob(session, bytes, mime_type).await {
                Ok(blob) => external["thumb"] = blob,
                Err(XrpcError::SessionExpired(msg)) => return Err(XrpcError::SessionExpired(msg)),
                Err(e) => log::warn!("Bluesky thumbnail upload failed, posting without: {}", e),
            }
        }

        Ok(json!({
            "$type": "app.bsky.embed.external",
            "external": external,
        }))
    }

    async fn images_embed(
        &self,
        session: &Session,
        media: &Media,
    ) -> std::result::Result<Value, XrpcError> {
        if media.bytes.len() > MAX_BLOB_BYTES {
            return Err(AppError::publish(
                NAME,
                format!("card is {} bytes, over the blob limit", media.bytes.len()),
            )
            .into());
        }
        let blob = self.upload_blob(session, &media.bytes, media.mime_type).await?;
        Ok(json!({
            "$type": "app.bsky.embed.images",
            "images": [{
                "alt": media.alt_text,
                "image": blob,
                "aspectRatio": {"width": CANVAS_WIDTH, "height": CANVAS_HEIGHT},
            }],
        }))
    }

    /// One attempt at creating the post record. Returns the record URI.
    async fn try_publish(&self, post: &Post) -> std::result::Result<String, XrpcError> {
        let session = self
            .session
            .as_ref()
            .ok_or_else(|| AppError::publish(NAME, "not authenticated"))?;

        let text = fit_post_text(&post.message, MAX_POST_GRAPHEMES);
        let mut record = json!({
            "$type": POST_COLLECTION,
            "text": text,
            "createdAt": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        });

        let facets = link_facets(&text);
        if !facets.is_empty() {
            record["facets"] = Value::Array(facets);
        }

        let embed = match (&post.link, &post.media) {
            (Some(link), card) => Some(self.external_embed(session, link, card.as_ref()).await?),
            (None, Some(media)) => Some(self.images_embed(session, media).await?),
            (None, None) => None,
        };
        if let Some(embed) = embed {
            record["embed"] = embed;
        }

        let response = self
            .client
            .post(self.xrpc("com.atproto.repo.createRecord"))
            .bearer_auth(&session.access_jwt)
            .json(&json!({
                "repo": session.did,
                "collection": POST_COLLECTION,
                "record": record,
            }))
            .send()
            .await?;
        let value = Self::check(response).await?;
        Ok(value
            .get("uri")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string())
    }
}

#[async_trait]
impl Publisher for BlueskyPublisher {
    fn name(&self) -> &str {
        NAME
    }

    async fn authenticate(&mut self) -> Result<()> {
        let response = self
            .client
            .post(self.xrpc("com.atproto.server.createSession"))
            .json(&json!({
                "identifier": self.identifier,
                "password": self.app_password,
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body: XrpcErrorBody = response.json().await.unwrap_or_default();
            self.session = None;
            return Err(AppError::publish(
                NAME,
                format!(
                    "login as {} failed with HTTP {}: {}",
                    self.identifier,
                    status,
                    body.message.or(body.error).unwrap_or_default()
                ),
            ));
        }

        let session: Session = response.json().await?;
        log::info!("Authenticated with Bluesky as {} ({})", self.identifier, session.did);
        self.session = Some(session);
        Ok(())
    }

    async fn publish(&mut self, post: &Post) -> bool {
        if self.session.is_none() {
            if let Err(e) = self.authenticate().await {
                log::error!("Bluesky authentication failed: {}", e);
                return false;
            }
        }

        let result = match self.try_publish(post).await {
            Err(XrpcError::SessionExpired(msg)) => {
                log::warn!("Bluesky session expired ({}), re-authenticating", msg);
                self.session = None;
                if let Err(e) = self.authenticate().await {
                    log::error!("Bluesky re-authentication failed: {}", e);
                    return false;
                }
                self.try_publish(post).await
            }
            other => other,
        };

        match result {
            Ok(uri) => {
                log::info!("Posted to Bluesky: {}", uri);
                true
            }
            Err(e) => {
                log::error!("Failed to post to Bluesky: {}", e);
                false
            }
        }
    }
}

/// Image bytes with a recognizable format, small enough to upload.
fn embeddable_image(bytes: &[u8]) -> Option<(&[u8], &'static str)> {
    if bytes.len() > MAX_BLOB_BYTES {
        log::debug!("Preview image of {} bytes is over the blob limit", bytes.len());
        return None;
    }
    image::guess_format(bytes)
        .ok()
        .map(|format| (bytes, format.to_mime_type()))
}

/// Truncate to at most `max` graphemes, ending with an ellipsis when cut.
pub fn truncate_graphemes(text: &str, max: usize) -> String {
    if text.graphemes(true).count() <= max {
        return text.to_string();
    }
    let head: String = text.graphemes(true).take(max.saturating_sub(1)).collect();
    format!("{}…", head.trim_end())
}

/// Fit post text into `max` graphemes. A URL closing the text is kept whole
/// and only the text before it is shortened.
pub fn fit_post_text(text: &str, max: usize) -> String {
    if text.graphemes(true).count() <= max {
        return text.to_string();
    }

    let trimmed = text.trim_end();
    let trailing = url_pattern()
        .and_then(|pattern| pattern.find_iter(trimmed).last())
        .filter(|m| m.end() == trimmed.len());

    if let Some(url) = trailing {
        let url_len = url.as_str().graphemes(true).count();
        // At least one grapheme of text, the ellipsis and a space.
        if url_len + 3 <= max {
            let head = truncate_graphemes(trimmed[..url.start()].trim_end(), max - url_len - 1);
            return format!("{head} {}", url.as_str());
        }
    }
    truncate_graphemes(text, max)
}

/// Link facets for every URL in `text`, indexed by UTF-8 byte offsets.
pub fn link_facets(text: &str) -> Vec<Value> {
    let Some(pattern) = url_pattern() else {
        return Vec::new();
    };

    pattern
        .find_iter(text)
        .filter_map(|m| {
            let uri = m.as_str().trim_end_matches(['.', ',', ';', ':', '!', '?', ')', '\'']);
            if uri.is_empty() {
                return None;
            }
            Some(json!({
                "index": {"byteStart": m.start(), "byteEnd": m.start() + uri.len()},
                "features": [{"$type": "app.bsky.richtext.facet#link", "uri": uri}],
            }))
        })
        .collect()
}
