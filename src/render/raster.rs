//! Layout → raster.
//!
//! Draws a [`CardLayout`] onto an RGBA canvas. Without a font the card is
//! still produced; only the text is left out.

use std::io::Cursor;

use ab_glyph::FontArc;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_filled_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;

use crate::error::Result;
use crate::render::layout::{
    AvatarSpec, BadgeSpec, CardLayout, FALLBACK_INITIAL_COLOR, FALLBACK_INITIAL_SIZE,
    MIN_TEXT_SIZE, Rgb, TEXT_MARGIN, TextBlock,
};

fn rgba(color: Rgb) -> Rgba<u8> {
    Rgba([color[0], color[1], color[2], 255])
}

fn lerp(a: u8, b: u8, t: f32) -> u8 {
    (a as f32 + (b as f32 - a as f32) * t).round() as u8
}

/// Draw the full card.
pub fn rasterize(layout: &CardLayout, avatar: Option<&DynamicImage>, font: Option<&FontArc>) -> RgbaImage {
    let (top, bottom) = layout.gradient;
    let span = layout.height.saturating_sub(1).max(1) as f32;
    let mut canvas = RgbaImage::from_fn(layout.width, layout.height, |_, y| {
        let t = y as f32 / span;
        Rgba([
            lerp(top[0], bottom[0], t),
            lerp(top[1], bottom[1], t),
            lerp(top[2], bottom[2], t),
            255,
        ])
    });

    draw_avatar(&mut canvas, &layout.avatar, avatar, font);

    if let Some(font) = font {
        for block in &layout.texts {
            draw_centered_text(&mut canvas, block, font);
        }
    }

    draw_badge(&mut canvas, &layout.badge, font);
    canvas
}

/// Encode a canvas as PNG.
pub fn encode_png(canvas: &RgbaImage) -> Result<Vec<u8>> {
    let mut buf = Cursor::new(Vec::new());
    canvas.write_to(&mut buf, ImageFormat::Png)?;
    Ok(buf.into_inner())
}

fn draw_avatar(
    canvas: &mut RgbaImage,
    spec: &AvatarSpec,
    avatar: Option<&DynamicImage>,
    font: Option<&FontArc>,
) {
    let radius = (spec.diameter / 2) as i32;
    draw_filled_circle_mut(
        canvas,
        spec.center,
        radius + spec.border as i32,
        rgba(spec.border_color),
    );

    match avatar {
        Some(image) => {
            let resized = image
                .resize_to_fill(spec.diameter, spec.diameter, FilterType::Lanczos3)
                .to_rgba8();
            let left = spec.center.0 - radius;
            let top = spec.center.1 - radius;
            let r = spec.diameter as f32 / 2.0;

            for (x, y, src) in resized.enumerate_pixels() {
                let dx = x as f32 + 0.5 - r;
                let dy = y as f32 + 0.5 - r;
                if dx * dx + dy * dy > r * r {
                    continue;
                }
                let cx = left + x as i32;
                let cy = top + y as i32;
                if cx < 0 || cy < 0 || cx >= canvas.width() as i32 || cy >= canvas.height() as i32 {
                    continue;
                }
                blend(canvas.get_pixel_mut(cx as u32, cy as u32), src);
            }
        }
        None => {
            draw_filled_circle_mut(canvas, spec.center, radius, rgba(spec.fallback_color));
            if let Some(font) = font {
                let (w, h) = text_size(FALLBACK_INITIAL_SIZE, font, &spec.initial);
                draw_text_mut(
                    canvas,
                    rgba(FALLBACK_INITIAL_COLOR),
                    spec.center.0 - (w / 2) as i32,
                    spec.center.1 - (h / 2) as i32,
                    FALLBACK_INITIAL_SIZE,
                    font,
                    &spec.initial,
                );
            }
        }
    }
}

fn blend(dst: &mut Rgba<u8>, src: &Rgba<u8>) {
    let alpha = src[3] as f32 / 255.0;
    for c in 0..3 {
        dst[c] = (src[c] as f32 * alpha + dst[c] as f32 * (1.0 - alpha)).round() as u8;
    }
    dst[3] = 255;
}

/// Shrink `text` until it fits `max_width`, then ellipsize if it still does
/// not fit at the minimum size.
pub fn fit_text(font: &FontArc, text: &str, size: f32, max_width: u32) -> (String, f32) {
    let mut size = size;
    while size > MIN_TEXT_SIZE && text_size(size, font, text).0 > max_width {
        size = (size * 0.9).max(MIN_TEXT_SIZE);
    }
    if text_size(size, font, text).0 <= max_width {
        return (text.to_string(), size);
    }

    let mut chars: Vec<char> = text.chars().collect();
    while chars.pop().is_some() {
        let head: String = chars.iter().collect();
        let candidate = format!("{}…", head.trim_end());
        if text_size(size, font, &candidate).0 <= max_width {
            return (candidate, size);
        }
    }
    ("…".to_string(), size)
}

fn draw_centered_text(canvas: &mut RgbaImage, block: &TextBlock, font: &FontArc) {
    if block.content.trim().is_empty() {
        return;
    }
    let max_width = canvas.width().saturating_sub(2 * TEXT_MARGIN);
    let (text, size) = fit_text(font, &block.content, block.size, max_width);
    let (w, _) = text_size(size, font, &text);
    let x = (canvas.width() as i32 - w as i32) / 2;
    draw_text_mut(canvas, rgba(block.color), x, block.top, size, font, &text);
}

fn draw_rounded_rect(canvas: &mut RgbaImage, x: i32, y: i32, w: u32, h: u32, radius: u32, color: Rgba<u8>) {
    let r = radius.min(w / 2).min(h / 2);
    if w > 2 * r {
        draw_filled_rect_mut(canvas, Rect::at(x + r as i32, y).of_size(w - 2 * r, h), color);
    }
    if h > 2 * r {
        draw_filled_rect_mut(canvas, Rect::at(x, y + r as i32).of_size(w, h - 2 * r), color);
    }
    if r > 0 {
        let (ri, wi, hi) = (r as i32, w as i32, h as i32);
        for (cx, cy) in [
            (x + ri, y + ri),
            (x + wi - ri - 1, y + ri),
            (x + ri, y + hi - ri - 1),
            (x + wi - ri - 1, y + hi - ri - 1),
        ] {
            draw_filled_circle_mut(canvas, (cx, cy), ri, color);
        }
    }
}

fn draw_badge(canvas: &mut RgbaImage, spec: &BadgeSpec, font: Option<&FontArc>) {
    let max_width = canvas.width().saturating_sub(2 * TEXT_MARGIN);
    let label = font.map(|font| {
        let (text, size) = fit_text(font, &spec.label, spec.text_size, max_width - 2 * spec.padding_x);
        let (w, h) = text_size(size, font, &text);
        (font, text, size, w, h)
    });

    let text_width = label.as_ref().map_or(0, |(_, _, _, w, _)| *w);
    let width = (text_width + 2 * spec.padding_x).max(spec.min_width);
    let x = (canvas.width() as i32 - width as i32) / 2;
    draw_rounded_rect(canvas, x, spec.top, width, spec.height, spec.height / 2, rgba(spec.fill));

    if let Some((font, text, size, w, h)) = label {
        let tx = x + (width as i32 - w as i32) / 2;
        let ty = spec.top + (spec.height as i32 - h as i32) / 2;
        draw_text_mut(canvas, rgba(spec.text_color), tx, ty, size, font, &text);
    }
}
