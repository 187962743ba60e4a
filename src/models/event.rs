//! Achievement event data structures.

use std::fmt;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

static PLACEHOLDER: OnceLock<Option<Regex>> = OnceLock::new();

fn placeholder_pattern() -> Option<&'static Regex> {
    PLACEHOLDER
        .get_or_init(|| Regex::new(r"\{(\w+)\}").ok())
        .as_ref()
}

/// Ordered rarity classification of an achievement.
///
/// Unknown names deserialize to [`RarityTier::Bronze`] so that a new upstream
/// tier never stops a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String")]
pub enum RarityTier {
    Bronze,
    Silver,
    Gold,
    Platinum,
    Diamond,
    Legendary,
    Mythic,
}

impl RarityTier {
    /// All tiers, rarest last.
    pub const ALL: [RarityTier; 7] = [
        RarityTier::Bronze,
        RarityTier::Silver,
        RarityTier::Gold,
        RarityTier::Platinum,
        RarityTier::Diamond,
        RarityTier::Legendary,
        RarityTier::Mythic,
    ];

    /// Parse a tier name case-insensitively, returning `None` for unknown names.
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim();
        Self::ALL
            .into_iter()
            .find(|tier| tier.as_str().eq_ignore_ascii_case(name))
    }

    /// Numeric rank, `Bronze` = 0.
    pub fn rank(self) -> u8 {
        self as u8
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RarityTier::Bronze => "Bronze",
            RarityTier::Silver => "Silver",
            RarityTier::Gold => "Gold",
            RarityTier::Platinum => "Platinum",
            RarityTier::Diamond => "Diamond",
            RarityTier::Legendary => "Legendary",
            RarityTier::Mythic => "Mythic",
        }
    }
}

impl From<String> for RarityTier {
    fn from(name: String) -> Self {
        Self::from_name(&name).unwrap_or_else(|| {
            log::debug!("Unknown rarity tier '{}', treating as Bronze", name);
            RarityTier::Bronze
        })
    }
}

impl fmt::Display for RarityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An achievement earned by a user, as delivered by the upstream feed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    /// Monotonically increasing identifier, used as the cursor key
    pub id: u64,

    #[serde(default = "defaults::user_handle")]
    pub user_handle: String,

    #[serde(default)]
    pub user_display_name: Option<String>,

    #[serde(default)]
    pub user_avatar_url: Option<String>,

    #[serde(default = "defaults::achievement_name")]
    pub achievement_name: String,

    /// `None` while the upstream has not computed rarity yet
    #[serde(default)]
    pub rarity_tier: Option<RarityTier>,

    /// Share of users holding the achievement, 0-100
    #[serde(default)]
    pub rarity_percentage: Option<f64>,

    #[serde(default)]
    pub share_url: Option<String>,

    pub earned_at: DateTime<Utc>,
}

impl Event {
    /// Display name, falling back to the handle when absent or blank.
    pub fn display_name(&self) -> &str {
        self.user_display_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or(&self.user_handle)
    }

    /// Share URL, ignoring blank values.
    pub fn share_url(&self) -> Option<&str> {
        self.share_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
    }

    /// Avatar URL, ignoring blank values.
    pub fn avatar_url(&self) -> Option<&str> {
        self.user_avatar_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
    }

    /// Rarity percentage used for ranking; missing counts as least rare.
    pub fn ranking_percentage(&self) -> f64 {
        self.rarity_percentage.unwrap_or(100.0)
    }

    /// Format the post text for this event using a template.
    ///
    /// Supported placeholders:
    /// - `{display_name}`, `{username}`, `{achievement}`
    /// - `{rarity}`, `{percentage}` (two decimals)
    ///
    /// Placeholders are filled in one pass, so substituted values are never
    /// expanded again. Unknown placeholders are left as written.
    ///
    /// The share URL, when present, is appended after a blank line.
    pub fn format(&self, template: &str) -> String {
        let rarity = self.rarity_tier.unwrap_or(RarityTier::Bronze);
        let percentage = format!("{:.2}", self.rarity_percentage.unwrap_or(0.0));

        let mut message = match placeholder_pattern() {
            Some(pattern) => pattern
                .replace_all(template, |caps: &Captures| match &caps[1] {
                    "display_name" => self.display_name().to_string(),
                    "username" => self.user_handle.clone(),
                    "achievement" => self.achievement_name.clone(),
                    "rarity" => rarity.as_str().to_string(),
                    "percentage" => percentage.clone(),
                    _ => caps[0].to_string(),
                })
                .into_owned(),
            None => template.to_string(),
        };

        if let Some(url) = self.share_url() {
            message.push_str("\n\n");
            message.push_str(url);
        }
        message
    }
}

mod defaults {
    pub fn user_handle() -> String {
        "unknown".into()
    }
    pub fn achievement_name() -> String {
        "Unknown Achievement".into()
    }
}
