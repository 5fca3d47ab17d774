//! Dilation chart rendering.
//!
//! The radius series is downsampled and drawn as a line with point markers.
//! The output format follows the file extension: `.svg` is written as SVG,
//! anything else as a bitmap (PNG for `.png`). Text uses the bundled font
//! from [`crate::font`] on both backends.

use std::path::Path;

use plotters::coord::Shift;
use plotters::prelude::*;
use tracing::{debug, info};

use crate::config::PlotConfig;
use crate::error::{Error, Result};
use crate::font::{register_chart_font, CHART_FONT_FAMILY};
use crate::measurement::downsample;

/// Chart appearance.
#[derive(Debug, Clone, PartialEq)]
pub struct PlotOptions {
    /// Chart caption.
    pub title: String,
    /// X axis description.
    pub x_label: String,
    /// Y axis description.
    pub y_label: String,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Keep every n-th value.
    pub downsample_step: usize,
}

impl Default for PlotOptions {
    fn default() -> Self {
        Self {
            title: "Pupil Dilation Over Time".to_string(),
            x_label: "Time (Seconds)".to_string(),
            y_label: "Pupil Dilation (mm)".to_string(),
            width: 800,
            height: 600,
            downsample_step: 10,
        }
    }
}

impl From<&PlotConfig> for PlotOptions {
    fn from(config: &PlotConfig) -> Self {
        Self {
            title: config.title.clone(),
            width: config.width,
            height: config.height,
            downsample_step: config.downsample_step,
            ..Self::default()
        }
    }
}

/// Lower and upper bounds of the y axis for `values`.
///
/// Pads by 10% of the range, or 0.1 mm when all values are equal.
#[must_use]
pub fn y_range(values: &[f64]) -> (f64, f64) {
    let min = values.iter().copied().reduce(f64::min).unwrap_or(0.0);
    let max = values.iter().copied().reduce(f64::max).unwrap_or(0.0);
    let span = max - min;
    let pad = if span > f64::EPSILON { span * 0.1 } else { 0.1 };
    (min - pad, max + pad)
}

/// Render the radius series to `path`.
///
/// # Errors
///
/// Returns [`Error::EmptySeries`] if `radii_mm` is empty, [`Error::Font`] if
/// the chart font cannot be registered, or a render error if the chart cannot
/// be drawn or written.
pub fn render_chart(radii_mm: &[f64], options: &PlotOptions, path: &Path) -> Result<()> {
    let values = downsample(radii_mm, options.downsample_step);
    if values.is_empty() {
        return Err(Error::EmptySeries);
    }
    register_chart_font()?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|source| Error::DirectoryCreate {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    let points: Vec<(f64, f64)> = values
        .iter()
        .enumerate()
        .map(|(i, &v)| (i as f64, v))
        .collect();
    let size = (options.width, options.height);
    let is_svg = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("svg"));

    debug!(
        "Rendering {} of {} points to {}",
        points.len(),
        radii_mm.len(),
        path.display()
    );
    let drawn = if is_svg {
        let root = SVGBackend::new(path, size).into_drawing_area();
        draw(&root, &points, options).map_err(|e| e.to_string())
    } else {
        let root = BitMapBackend::new(path, size).into_drawing_area();
        draw(&root, &points, options).map_err(|e| e.to_string())
    };
    drawn.map_err(|message| Error::render(path, message))?;

    info!("Chart written to {}", path.display());
    Ok(())
}

fn draw<DB: DrawingBackend>(
    root: &DrawingArea<DB, Shift>,
    points: &[(f64, f64)],
    options: &PlotOptions,
) -> std::result::Result<(), DrawingAreaErrorKind<DB::ErrorType>> {
    root.fill(&WHITE)?;

    let values: Vec<f64> = points.iter().map(|&(_, v)| v).collect();
    let (y_min, y_max) = y_range(&values);
    let x_max = points.len().saturating_sub(1).max(1) as f64;

    let mut chart = ChartBuilder::on(root)
        .caption(&options.title, (CHART_FONT_FAMILY, 24))
        .margin(16)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .build_cartesian_2d(0f64..x_max, y_min..y_max)?;

    chart
        .configure_mesh()
        .x_desc(options.x_label.as_str())
        .y_desc(options.y_label.as_str())
        .draw()?;

    chart.draw_series(LineSeries::new(points.iter().copied(), &BLUE))?;
    chart.draw_series(
        points
            .iter()
            .map(|&(x, y)| Circle::new((x, y), 3, BLUE.filled())),
    )?;

    root.present()?;
    Ok(())
}
