//! Utility functions and helpers.

pub mod http;
pub mod retry;

use url::Url;

/// Resolve a potentially relative URL against a base URL.
pub fn resolve_url(base: &Url, href: &str) -> String {
    base.join(href)
        .map(|u| u.to_string())
        .unwrap_or_else(|_| href.to_string())
}

/// Percent-encode a URL so that destinations accepting only RFC 3986 URLs
/// take it. Spaces and non-ASCII characters in the path become `%XX`;
/// already-encoded sequences are left alone. Unparseable input is returned
/// unchanged.
pub fn encode_url(raw: &str) -> String {
    Url::parse(raw.trim())
        .map(|u| u.to_string())
        .unwrap_or_else(|_| raw.to_string())
}

/// Collapse runs of whitespace into single spaces.
pub fn normalize_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Truncate to at most `max` characters (not bytes).
pub fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}
