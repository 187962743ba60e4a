//! Application configuration structures.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::models::RarityTier;

/// Shortest poll interval the bot accepts, in minutes.
pub const MIN_POLL_INTERVAL_MINUTES: u64 = 10;

/// Highest hourly post cap the bot accepts.
pub const MAX_POSTS_PER_HOUR_LIMIT: u32 = 60;

/// Root application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Upstream achievement feed settings
    #[serde(default)]
    pub feed: FeedConfig,

    /// Rate budget and message settings
    #[serde(default)]
    pub posting: PostingConfig,

    /// HTTP client behavior
    #[serde(default)]
    pub http: HttpConfig,

    /// Persistent state location
    #[serde(default)]
    pub storage: StorageConfig,

    /// Card rendering settings
    #[serde(default)]
    pub render: RenderConfig,

    /// Bluesky destination (optional)
    #[serde(default)]
    pub bluesky: Option<BlueskyConfig>,

    /// Discord webhook destination (optional)
    #[serde(default)]
    pub discord: Option<DiscordConfig>,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load configuration or return default if loading fails.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(&path).unwrap_or_else(|e| {
            log::warn!(
                "Config load failed from {:?}: {}. Using defaults.",
                path.as_ref(),
                e
            );
            Self::default()
        })
    }

    /// Overlay destination credentials from environment-style lookups.
    ///
    /// Recognized keys: `BLUESKY_USERNAME`, `BLUESKY_DID`,
    /// `BLUESKY_APP_PASSWORD`, `DISCORD_WEBHOOK_URL`. Blank values are ignored.
    pub fn apply_credentials<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let identifier = get("BLUESKY_USERNAME").or_else(|| get("BLUESKY_DID"));
        let password = get("BLUESKY_APP_PASSWORD");
        if identifier.is_some() || password.is_some() {
            let bluesky = self.bluesky.get_or_insert_with(BlueskyConfig::default);
            if let Some(identifier) = identifier {
                bluesky.identifier = identifier;
            }
            if let Some(password) = password {
                bluesky.app_password = password;
            }
        }

        if let Some(webhook_url) = get("DISCORD_WEBHOOK_URL") {
            self.discord = Some(DiscordConfig { webhook_url });
        }
    }

    /// Validate configuration values. Any error here is fatal at startup.
    pub fn validate(&self) -> Result<()> {
        if self.feed.feed_ids.iter().all(|id| id.trim().is_empty()) {
            return Err(AppError::validation("feed.feed_ids is empty"));
        }
        url::Url::parse(&self.feed.api_base)
            .map_err(|e| AppError::validation(format!("feed.api_base is invalid: {e}")))?;
        if RarityTier::from_name(&self.feed.min_rarity_tier).is_none() {
            log::warn!(
                "feed.min_rarity_tier '{}' is not a known tier; using {}",
                self.feed.min_rarity_tier,
                RarityTier::Bronze
            );
        }
        if self.feed.batch_limit == 0 {
            return Err(AppError::validation("feed.batch_limit must be > 0"));
        }
        if self.posting.poll_interval_minutes < MIN_POLL_INTERVAL_MINUTES {
            return Err(AppError::validation(format!(
                "posting.poll_interval_minutes must be >= {MIN_POLL_INTERVAL_MINUTES} (got {})",
                self.posting.poll_interval_minutes
            )));
        }
        if self.posting.max_posts_per_hour == 0
            || self.posting.max_posts_per_hour > MAX_POSTS_PER_HOUR_LIMIT
        {
            return Err(AppError::validation(format!(
                "posting.max_posts_per_hour must be between 1 and {MAX_POSTS_PER_HOUR_LIMIT} (got {})",
                self.posting.max_posts_per_hour
            )));
        }
        if self.posting.message_template.trim().is_empty() {
            return Err(AppError::validation("posting.message_template is empty"));
        }
        if self.http.timeout_secs == 0 {
            return Err(AppError::validation("http.timeout_secs must be > 0"));
        }
        if self.bluesky.is_none() && self.discord.is_none() {
            return Err(AppError::validation(
                "No destination configured: set [bluesky] and/or [discord]",
            ));
        }
        if let Some(bluesky) = &self.bluesky {
            if bluesky.identifier.trim().is_empty() || bluesky.app_password.trim().is_empty() {
                return Err(AppError::validation(
                    "bluesky.identifier (handle or DID) and bluesky.app_password are required",
                ));
            }
        }
        if let Some(discord) = &self.discord {
            url::Url::parse(&discord.webhook_url)
                .map_err(|e| AppError::validation(format!("discord.webhook_url is invalid: {e}")))?;
        }
        Ok(())
    }

    /// Minimum tier to publish, defaulting to Bronze for unknown names.
    pub fn min_tier(&self) -> RarityTier {
        RarityTier::from_name(&self.feed.min_rarity_tier).unwrap_or(RarityTier::Bronze)
    }

    /// Feed ids with blanks removed.
    pub fn feed_ids(&self) -> Vec<String> {
        self.feed
            .feed_ids
            .iter()
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .collect()
    }
}

/// Upstream achievement feed settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    /// API base, e.g. `https://feedmaster.fema.monster/api/v1`
    #[serde(default = "defaults::api_base")]
    pub api_base: String,

    #[serde(default)]
    pub feed_ids: Vec<String>,

    /// Lowest tier worth publishing
    #[serde(default = "defaults::min_rarity_tier")]
    pub min_rarity_tier: String,

    /// Maximum events fetched per cycle
    #[serde(default = "defaults::batch_limit")]
    pub batch_limit: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            api_base: defaults::api_base(),
            feed_ids: Vec::new(),
            min_rarity_tier: defaults::min_rarity_tier(),
            batch_limit: defaults::batch_limit(),
        }
    }
}

/// Rate budget and message settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostingConfig {
    #[serde(default = "defaults::poll_interval")]
    pub poll_interval_minutes: u64,

    #[serde(default = "defaults::max_posts_per_hour")]
    pub max_posts_per_hour: u32,

    #[serde(default = "defaults::message_template")]
    pub message_template: String,

    /// Pause after each successful publish
    #[serde(default = "defaults::post_delay")]
    pub post_delay_secs: u64,

    /// Delay used instead of the poll interval after a failed cycle
    #[serde(default = "defaults::error_backoff")]
    pub error_backoff_secs: u64,
}

impl Default for PostingConfig {
    fn default() -> Self {
        Self {
            poll_interval_minutes: defaults::poll_interval(),
            max_posts_per_hour: defaults::max_posts_per_hour(),
            message_template: defaults::message_template(),
            post_delay_secs: defaults::post_delay(),
            error_backoff_secs: defaults::error_backoff(),
        }
    }
}

/// HTTP client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// User-Agent for API calls
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    /// User-Agent for fetching share pages, which often block bots
    #[serde(default = "defaults::browser_user_agent")]
    pub browser_user_agent: String,

    /// Per-request timeout in seconds
    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: defaults::user_agent(),
            browser_user_agent: defaults::browser_user_agent(),
            timeout_secs: defaults::timeout(),
        }
    }
}

/// Persistent state location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Holds `cursor.txt`, `rate_window.json` and `cards/`
    #[serde(default = "defaults::root_dir")]
    pub root_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root_dir: defaults::root_dir(),
        }
    }
}

/// Card rendering settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderConfig {
    /// Label drawn at the top of every card
    #[serde(default = "defaults::brand_label")]
    pub brand_label: String,

    /// Font files tried before the built-in system candidates
    #[serde(default)]
    pub font_candidates: Vec<PathBuf>,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            brand_label: defaults::brand_label(),
            font_candidates: Vec::new(),
        }
    }
}

/// Bluesky credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlueskyConfig {
    /// Handle or DID
    #[serde(default)]
    pub identifier: String,

    #[serde(default)]
    pub app_password: String,

    /// PDS / entryway base URL
    #[serde(default = "defaults::bluesky_service")]
    pub service: String,
}

impl Default for BlueskyConfig {
    fn default() -> Self {
        Self {
            identifier: String::new(),
            app_password: String::new(),
            service: defaults::bluesky_service(),
        }
    }
}

/// Discord webhook destination.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscordConfig {
    pub webhook_url: String,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "defaults::log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::log_level(),
        }
    }
}

mod defaults {
    use std::path::PathBuf;

    // Feed defaults
    pub fn api_base() -> String {
        "https://feedmaster.fema.monster/api/v1".into()
    }
    pub fn min_rarity_tier() -> String {
        "Bronze".into()
    }
    pub fn batch_limit() -> usize {
        50
    }

    // Posting defaults
    pub fn poll_interval() -> u64 {
        10
    }
    pub fn max_posts_per_hour() -> u32 {
        30
    }
    pub fn message_template() -> String {
        "🎉 Congratulations {display_name} on earning \"{achievement}\"! \
         Only {percentage}% of users have achieved this {rarity} rarity!"
            .into()
    }
    pub fn post_delay() -> u64 {
        2
    }
    pub fn error_backoff() -> u64 {
        60
    }

    // HTTP defaults
    pub fn user_agent() -> String {
        "Mozilla/5.0 (compatible; feedmaster-bot/0.1)".into()
    }
    pub fn browser_user_agent() -> String {
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
         (KHTML, like Gecko) Chrome/124.0 Safari/537.36"
            .into()
    }
    pub fn timeout() -> u64 {
        30
    }

    pub fn root_dir() -> PathBuf {
        PathBuf::from("data")
    }

    pub fn brand_label() -> String {
        "FEEDMASTER".into()
    }

    pub fn bluesky_service() -> String {
        "https://bsky.social".into()
    }

    pub fn log_level() -> String {
        "info".into()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn valid_config() -> Config {
        let mut config = Config::default();
        config.feed.feed_ids = vec!["feed-a".to_string()];
        config.discord = Some(DiscordConfig {
            webhook_url: "https://discord.com/api/webhooks/1/abc".to_string(),
        });
        config
    }

    #[test]
    fn validate_valid_config_ok() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn validate_rejects_short_interval() {
        let mut config = valid_config();
        config.posting.poll_interval_minutes = 5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_cap_above_sixty() {
        let mut config = valid_config();
        config.posting.max_posts_per_hour = 61;
        assert!(config.validate().is_err());
        config.posting.max_posts_per_hour = 60;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_requires_destination() {
        let mut config = valid_config();
        config.discord = None;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_requires_bluesky_password() {
        let mut config = valid_config();
        config.bluesky = Some(BlueskyConfig {
            identifier: "bot.bsky.social".to_string(),
            ..BlueskyConfig::default()
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_accepts_unknown_min_tier_as_bronze() {
        let mut config = valid_config();
        config.feed.min_rarity_tier = "Unobtainium".to_string();
        assert!(config.validate().is_ok());
        assert_eq!(config.min_tier(), RarityTier::Bronze);
    }

    #[test]
    fn parse_toml_with_defaults() {
        let config: Config = toml::from_str(
            r#"
            [feed]
            feed_ids = ["a", "b"]
            min_rarity_tier = "gold"

            [bluesky]
            identifier = "bot.bsky.social"
            app_password = "xxxx-xxxx"
            "#,
        )
        .unwrap();
        assert_eq!(config.feed_ids(), vec!["a", "b"]);
        assert_eq!(config.min_tier(), RarityTier::Gold);
        assert_eq!(config.posting.poll_interval_minutes, 10);
        assert_eq!(config.bluesky.unwrap().service, "https://bsky.social");
        assert!(config.discord.is_none());
    }

    #[test]
    fn apply_credentials_overlays_values() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("BLUESKY_DID", "did:plc:abc"),
            ("BLUESKY_APP_PASSWORD", "secret"),
            ("DISCORD_WEBHOOK_URL", "  "),
        ]);
        let mut config = Config::default();
        config.apply_credentials(|key| env.get(key).map(|v| v.to_string()));

        let bluesky = config.bluesky.unwrap();
        assert_eq!(bluesky.identifier, "did:plc:abc");
        assert_eq!(bluesky.app_password, "secret");
        assert_eq!(bluesky.service, "https://bsky.social");
        assert!(config.discord.is_none());
    }
}
