//! Payloads handed to publishers.

/// Link preview metadata for a share URL.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkPreview {
    /// Percent-encoded page URL
    pub url: String,
    pub title: String,
    pub description: String,
    /// Raw bytes of the page's preview image, if one could be downloaded
    pub thumbnail: Option<Vec<u8>>,
}

/// A rendered image attached to a post.
#[derive(Debug, Clone, PartialEq)]
pub struct Media {
    pub bytes: Vec<u8>,
    pub mime_type: &'static str,
    pub alt_text: String,
}

impl Media {
    pub fn png(bytes: Vec<u8>, alt_text: impl Into<String>) -> Self {
        Self {
            bytes,
            mime_type: "image/png",
            alt_text: alt_text.into(),
        }
    }
}

/// Everything a destination needs to publish one achievement.
#[derive(Debug, Clone, PartialEq)]
pub struct Post {
    pub message: String,
    pub media: Option<Media>,
    pub link: Option<LinkPreview>,
}

impl Post {
    pub fn text(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            media: None,
            link: None,
        }
    }
}
