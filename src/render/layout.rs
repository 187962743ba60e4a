//! Card layout description.
//!
//! Every coordinate, color and size used to draw a card lives here. The
//! rasterizer only follows the [`CardLayout`] produced by [`describe`], so
//! layout changes can be asserted on without decoding pixels.

use crate::models::{Event, RarityTier};

pub type Rgb = [u8; 3];

pub const CANVAS_WIDTH: u32 = 1200;
pub const CANVAS_HEIGHT: u32 = 630;

pub const GRADIENT_TOP: Rgb = [30, 27, 75];
pub const GRADIENT_BOTTOM: Rgb = [88, 28, 135];

pub const AVATAR_DIAMETER: u32 = 180;
pub const AVATAR_CENTER_Y: i32 = 160;
pub const AVATAR_BORDER: u32 = 6;
pub const AVATAR_BORDER_COLOR: Rgb = [255, 255, 255];
pub const FALLBACK_AVATAR_COLOR: Rgb = [99, 102, 241];
pub const FALLBACK_INITIAL_COLOR: Rgb = [255, 255, 255];
pub const FALLBACK_INITIAL_SIZE: f32 = 96.0;

pub const BRAND_SIZE: f32 = 30.0;
pub const BRAND_TOP: i32 = 280;
pub const BRAND_COLOR: Rgb = [196, 181, 253];

pub const ACHIEVEMENT_SIZE: f32 = 64.0;
pub const ACHIEVEMENT_TOP: i32 = 325;
pub const ACHIEVEMENT_COLOR: Rgb = [255, 255, 255];

pub const USER_SIZE: f32 = 36.0;
pub const USER_TOP: i32 = 410;
pub const USER_COLOR: Rgb = [226, 232, 240];

/// Horizontal space kept free on both sides of every text block
pub const TEXT_MARGIN: u32 = 60;
/// Text is shrunk down to this size before being ellipsized
pub const MIN_TEXT_SIZE: f32 = 24.0;

pub const BADGE_TOP: i32 = 490;
pub const BADGE_HEIGHT: u32 = 64;
pub const BADGE_PADDING_X: u32 = 40;
pub const BADGE_MIN_WIDTH: u32 = 200;
pub const BADGE_TEXT_SIZE: f32 = 32.0;
pub const BADGE_TEXT_COLOR: Rgb = [17, 24, 39];

/// Font files tried in order after any configured ones.
pub const SYSTEM_FONT_CANDIDATES: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans-Bold.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans-Bold.ttf",
    "/usr/share/fonts/TTF/DejaVuSans-Bold.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Bold.ttf",
    "/usr/share/fonts/liberation-sans/LiberationSans-Bold.ttf",
    "/usr/share/fonts/truetype/noto/NotoSans-Bold.ttf",
    "/usr/share/fonts/noto/NotoSans-Bold.ttf",
    "/System/Library/Fonts/Supplemental/Arial Bold.ttf",
    "/Library/Fonts/Arial Bold.ttf",
    "C:\\Windows\\Fonts\\arialbd.ttf",
];

/// Badge fill per tier.
pub fn tier_color(tier: RarityTier) -> Rgb {
    match tier {
        RarityTier::Bronze => [205, 127, 50],
        RarityTier::Silver => [192, 192, 192],
        RarityTier::Gold => [255, 215, 0],
        RarityTier::Platinum => [229, 228, 226],
        RarityTier::Diamond => [185, 242, 255],
        RarityTier::Legendary => [255, 140, 0],
        RarityTier::Mythic => [244, 114, 182],
    }
}

/// Full description of one card.
#[derive(Debug, Clone, PartialEq)]
pub struct CardLayout {
    pub width: u32,
    pub height: u32,
    pub gradient: (Rgb, Rgb),
    pub avatar: AvatarSpec,
    /// Brand label, achievement name and user name, top to bottom
    pub texts: Vec<TextBlock>,
    pub badge: BadgeSpec,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AvatarSpec {
    pub center: (i32, i32),
    pub diameter: u32,
    pub border: u32,
    pub border_color: Rgb,
    pub fallback_color: Rgb,
    /// Drawn on the fallback disc
    pub initial: String,
}

/// A line of text centered horizontally on the canvas.
#[derive(Debug, Clone, PartialEq)]
pub struct TextBlock {
    pub content: String,
    pub size: f32,
    pub top: i32,
    pub color: Rgb,
}

/// Rounded pill centered horizontally, sized to its label.
#[derive(Debug, Clone, PartialEq)]
pub struct BadgeSpec {
    pub label: String,
    pub top: i32,
    pub height: u32,
    pub padding_x: u32,
    pub min_width: u32,
    pub fill: Rgb,
    pub text_color: Rgb,
    pub text_size: f32,
}

/// Build the layout for an event's card.
pub fn describe(event: &Event, brand_label: &str) -> CardLayout {
    let user_name = event.display_name();
    let initial = user_name
        .chars()
        .find(|c| c.is_alphanumeric())
        .map(|c| c.to_uppercase().to_string())
        .unwrap_or_else(|| "?".to_string());

    let (label, fill) = match event.rarity_tier {
        Some(tier) => (tier.as_str().to_uppercase(), tier_color(tier)),
        None => ("UNRATED".to_string(), tier_color(RarityTier::Bronze)),
    };

    CardLayout {
        width: CANVAS_WIDTH,
        height: CANVAS_HEIGHT,
        gradient: (GRADIENT_TOP, GRADIENT_BOTTOM),
        avatar: AvatarSpec {
            center: ((CANVAS_WIDTH / 2) as i32, AVATAR_CENTER_Y),
            diameter: AVATAR_DIAMETER,
            border: AVATAR_BORDER,
            border_color: AVATAR_BORDER_COLOR,
            fallback_color: FALLBACK_AVATAR_COLOR,
            initial,
        },
        texts: vec![
            TextBlock {
                content: brand_label.to_string(),
                size: BRAND_SIZE,
                top: BRAND_TOP,
                color: BRAND_COLOR,
            },
            TextBlock {
                content: event.achievement_name.clone(),
                size: ACHIEVEMENT_SIZE,
                top: ACHIEVEMENT_TOP,
                color: ACHIEVEMENT_COLOR,
            },
            TextBlock {
                content: user_name.to_string(),
                size: USER_SIZE,
                top: USER_TOP,
                color: USER_COLOR,
            },
        ],
        badge: BadgeSpec {
            label,
            top: BADGE_TOP,
            height: BADGE_HEIGHT,
            padding_x: BADGE_PADDING_X,
            min_width: BADGE_MIN_WIDTH,
            fill,
            text_color: BADGE_TEXT_COLOR,
            text_size: BADGE_TEXT_SIZE,
        },
    }
}
