// src/services/metadata.rs

//! Link preview metadata resolver.
//!
//! Fetches a share page and extracts its title, description and preview
//! image, preferring OpenGraph/Twitter tags over plain `<title>` and
//! `<meta name="description">`. Unreliable pages are retried with
//! exponential backoff.

use async_trait::async_trait;
use reqwest::Client;
use scraper::{Html, Selector};
use url::Url;

use crate::error::{AppError, Result};
use crate::models::LinkPreview;
use crate::utils::retry::RetryPolicy;
use crate::utils::{encode_url, http, normalize_whitespace, resolve_url, truncate_chars};

/// Title used when a page has none.
pub const DEFAULT_TITLE: &str = "Achievement Unlocked";

/// Description used when a page has none.
pub const DEFAULT_DESCRIPTION: &str = "View this achievement on Feedmaster";

/// Longest title or description handed to destinations.
pub const MAX_TEXT_CHARS: usize = 300;

const TITLE_SELECTORS: &[&str] = &[
    r#"meta[property="og:title"]"#,
    r#"meta[name="twitter:title"]"#,
];
const DESCRIPTION_SELECTORS: &[&str] = &[
    r#"meta[property="og:description"]"#,
    r#"meta[name="twitter:description"]"#,
    r#"meta[name="description"]"#,
];
const IMAGE_SELECTORS: &[&str] = &[
    r#"meta[property="og:image"]"#,
    r#"meta[property="og:image:url"]"#,
    r#"meta[name="twitter:image"]"#,
];

/// Resolves share URLs into link previews.
#[async_trait]
pub trait LinkResolver: Send + Sync {
    /// `None` once every attempt has failed; callers publish without a
    /// link preview.
    async fn resolve(&self, url: &str) -> Option<LinkPreview>;
}

/// Text metadata extracted from a page, before any image download.
#[derive(Debug, Clone, PartialEq)]
pub struct PageMetadata {
    pub title: String,
    pub description: String,
    /// Absolute preview image URL
    pub image_url: Option<String>,
}

/// HTTP-backed [`LinkResolver`].
pub struct MetadataResolver {
    client: Client,
    retry: RetryPolicy,
}

impl MetadataResolver {
    /// `client` should identify as a browser; many share pages refuse bots.
    pub fn new(client: Client) -> Self {
        Self::with_retry(client, RetryPolicy::default())
    }

    pub fn with_retry(client: Client, retry: RetryPolicy) -> Self {
        Self { client, retry }
    }

    async fn attempt(&self, url: &str) -> Result<LinkPreview> {
        let response = self.client.get(url).send().await?.error_for_status()?;
        let page_url = response.url().clone();
        let html = response.text().await?;
        let metadata = parse_page(&html, &page_url)?;

        let thumbnail = match &metadata.image_url {
            Some(image_url) => self.fetch_image(image_url).await,
            None => None,
        };

        Ok(LinkPreview {
            url: encode_url(url),
            title: metadata.title,
            description: metadata.description,
            thumbnail,
        })
    }

    /// Best-effort preview image download.
    async fn fetch_image(&self, image_url: &str) -> Option<Vec<u8>> {
        match http::fetch_bytes(&self.client, image_url).await {
            Ok(bytes) if !bytes.is_empty() => Some(bytes),
            Ok(_) => None,
            Err(e) => {
                log::warn!("Failed to fetch preview image {}: {}", image_url, e);
                None
            }
        }
    }
}

#[async_trait]
impl LinkResolver for MetadataResolver {
    async fn resolve(&self, url: &str) -> Option<LinkPreview> {
        let context = format!("Fetching link metadata for {url}");
        self.retry.run(&context, |_| self.attempt(url)).await
    }
}

/// Extract preview metadata from an HTML document.
///
/// Never returns an empty title or description: missing values fall back to
/// [`DEFAULT_TITLE`] and [`DEFAULT_DESCRIPTION`].
pub fn parse_page(html: &str, page_url: &Url) -> Result<PageMetadata> {
    let document = Html::parse_document(html);

    let title = first_meta_content(&document, TITLE_SELECTORS)?
        .or(title_tag(&document)?)
        .unwrap_or_else(|| DEFAULT_TITLE.to_string());
    let description = first_meta_content(&document, DESCRIPTION_SELECTORS)?
        .unwrap_or_else(|| DEFAULT_DESCRIPTION.to_string());
    let image_url = first_meta_content(&document, IMAGE_SELECTORS)?
        .map(|href| resolve_url(page_url, &href));

    Ok(PageMetadata {
        title: truncate_chars(&title, MAX_TEXT_CHARS),
        description: truncate_chars(&description, MAX_TEXT_CHARS),
        image_url,
    })
}

fn first_meta_content(document: &Html, selectors: &[&str]) -> Result<Option<String>> {
    for selector in selectors {
        let sel = parse_selector(selector)?;
        let content = document
            .select(&sel)
            .filter_map(|el| el.value().attr("content"))
            .map(normalize_whitespace)
            .find(|content| !content.is_empty());
        if content.is_some() {
            return Ok(content);
        }
    }
    Ok(None)
}

fn title_tag(document: &Html) -> Result<Option<String>> {
    let sel = parse_selector("title")?;
    Ok(document
        .select(&sel)
        .map(|el| normalize_whitespace(&el.text().collect::<String>()))
        .find(|title| !title.is_empty()))
}

fn parse_selector(s: &str) -> Result<Selector> {
    Selector::parse(s).map_err(|e| AppError::selector(s, format!("{e:?}")))
}
