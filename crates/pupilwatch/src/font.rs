//! Bundled typeface for chart labels and frame status text.
//!
//! DejaVu Sans ships in `assets/` so rendering does not depend on the fonts
//! installed on the machine. Its license is in `assets/DejaVuSans-LICENSE.txt`.

use std::sync::OnceLock;

use ab_glyph::FontRef;
use plotters::style::{register_font, FontStyle};

use crate::error::{Error, Result};

/// DejaVu Sans, regular.
pub const DEJAVU_SANS: &[u8] = include_bytes!("../assets/DejaVuSans.ttf");

/// Family name charts are drawn with.
pub const CHART_FONT_FAMILY: &str = "sans-serif";

/// Parse the bundled font for direct glyph drawing.
///
/// # Errors
///
/// Returns [`Error::Font`] if the font data cannot be parsed.
pub fn load() -> Result<FontRef<'static>> {
    FontRef::try_from_slice(DEJAVU_SANS).map_err(|e| Error::Font(e.to_string()))
}

/// Register the bundled font with plotters under [`CHART_FONT_FAMILY`].
///
/// Only the first call registers; later calls return the first outcome.
///
/// # Errors
///
/// Returns [`Error::Font`] if plotters rejects the font data.
pub fn register_chart_font() -> Result<()> {
    static REGISTERED: OnceLock<std::result::Result<(), String>> = OnceLock::new();
    REGISTERED
        .get_or_init(|| {
            register_font(CHART_FONT_FAMILY, FontStyle::Normal, DEJAVU_SANS)
                .map_err(|_| "invalid font data".to_string())
        })
        .clone()
        .map_err(Error::Font)
}
