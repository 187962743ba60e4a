//! Destination publishers.
//!
//! Each destination sits behind [`Publisher`]; the pipeline iterates the
//! configured set without knowing which platforms are present.

pub mod bluesky;
pub mod discord;

use async_trait::async_trait;
use reqwest::Client;

use crate::error::Result;
use crate::models::{Config, Post};

pub use bluesky::BlueskyPublisher;
pub use discord::DiscordPublisher;

/// A single destination platform.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Establish a session. Destinations without sessions need not override.
    async fn authenticate(&mut self) -> Result<()> {
        Ok(())
    }

    /// Publish a post. Failures are logged and reported as `false`.
    async fn publish(&mut self, post: &Post) -> bool;
}

/// Build one publisher per configured destination.
pub fn from_config(config: &Config, client: &Client) -> Vec<Box<dyn Publisher>> {
    let mut publishers: Vec<Box<dyn Publisher>> = Vec::new();

    if let Some(bluesky) = &config.bluesky {
        publishers.push(Box::new(BlueskyPublisher::new(client.clone(), bluesky)));
    }
    if let Some(discord) = &config.discord {
        publishers.push(Box::new(DiscordPublisher::new(
            client.clone(),
            &discord.webhook_url,
        )));
    }

    log::info!(
        "Configured destinations: {}",
        publishers
            .iter()
            .map(|p| p.name())
            .collect::<Vec<_>>()
            .join(", ")
    );
    publishers
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BlueskyConfig, DiscordConfig};

    #[test]
    fn test_from_config_builds_configured_destinations() {
        let mut config = Config::default();
        assert!(from_config(&config, &Client::new()).is_empty());

        config.bluesky = Some(BlueskyConfig {
            identifier: "bot.bsky.social".to_string(),
            app_password: "xxxx-xxxx".to_string(),
            ..BlueskyConfig::default()
        });
        config.discord = Some(DiscordConfig {
            webhook_url: "https://discord.com/api/webhooks/1/abc".to_string(),
        });

        let names: Vec<String> = from_config(&config, &Client::new())
            .iter()
            .map(|p| p.name().to_string())
            .collect();
        assert_eq!(names, vec!["bluesky", "discord"]);
    }
}
