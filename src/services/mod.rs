//! Remote data sources.
//!
//! - [`feed`]: recently earned achievements from the upstream API
//! - [`metadata`]: link preview metadata for share pages

pub mod feed;
pub mod metadata;

pub use feed::{EventSource, FeedClient};
pub use metadata::{LinkResolver, MetadataResolver};
