// src/render/fonts.rs

//! Font discovery for card text.

use std::path::{Path, PathBuf};

use ab_glyph::FontArc;

use crate::render::layout::SYSTEM_FONT_CANDIDATES;

/// DejaVu Sans Bold, used when no configured or system font loads.
static BUNDLED_FONT: &[u8] = include_bytes!("../../assets/fonts/DejaVuSans-Bold.ttf");

/// Load the first usable font, trying `configured` paths, then the
/// well-known system locations, then the bundled font.
///
/// Returns `None` only if the bundled font fails to parse; cards are then
/// drawn without text.
pub fn load_font(configured: &[PathBuf]) -> Option<FontArc> {
    let candidates = configured
        .iter()
        .map(PathBuf::as_path)
        .chain(SYSTEM_FONT_CANDIDATES.iter().map(Path::new));

    for path in candidates {
        if let Some(font) = try_load(path) {
            log::info!("Using font {}", path.display());
            return Some(font);
        }
    }

    bundled_font()
}

/// The font compiled into the binary.
pub fn bundled_font() -> Option<FontArc> {
    match FontArc::try_from_slice(BUNDLED_FONT) {
        Ok(font) => {
            log::info!("Using bundled font");
            Some(font)
        }
        Err(e) => {
            log::warn!("Bundled font could not be parsed: {}; cards will be rendered without text", e);
            None
        }
    }
}

fn try_load(path: &Path) -> Option<FontArc> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) => {
            log::debug!("Font {} unavailable: {}", path.display(), e);
            return None;
        }
    };

    match FontArc::try_from_vec(bytes) {
        Ok(font) => Some(font),
        Err(e) => {
            log::warn!("Font {} could not be parsed: {}", path.display(), e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::layout::MIN_TEXT_SIZE;
    use crate::render::raster::fit_text;

    #[test]
    fn test_invalid_font_file_is_skipped() {
        let dir = tempfile::TempDir::new().unwrap();
        let bogus = dir.path().join("bogus.ttf");
        std::fs::write(&bogus, b"not a font").unwrap();

        assert!(try_load(&bogus).is_none());
        assert!(try_load(&dir.path().join("missing.ttf")).is_none());
    }

    #[test]
    fn test_font_always_available() {
        assert!(load_font(&[]).is_some());
        assert!(bundled_font().is_some());

        let dir = tempfile::TempDir::new().unwrap();
        assert!(load_font(&[dir.path().join("missing.ttf")]).is_some());
    }

    #[test]
    fn test_fit_text() {
        let font = bundled_font().unwrap();

        let (short, size) = fit_text(&font, "Hi", 40.0, 1000);
        assert_eq!((short.as_str(), size), ("Hi", 40.0));

        let long = "Extraordinarily Persistent Night Owl ".repeat(8);
        let (fitted, size) = fit_text(&font, &long, 64.0, 1080);
        assert!(size >= MIN_TEXT_SIZE);
        assert!(fitted.ends_with('…'));
        assert!(imageproc::drawing::text_size(size, &font, &fitted).0 <= 1080);
    }
}
