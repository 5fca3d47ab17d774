//! Gradient Hough transform for circles.
//!
//! Edge pixels from a Canny pass vote for centers along their gradient
//! direction. Strong accumulator peaks are then given a radius by
//! histogramming the distances of all edge pixels from the candidate center.

use image::GrayImage;
use imageproc::edges::canny;
use imageproc::gradients::{horizontal_sobel, vertical_sobel};
use tracing::trace;

use super::Circle;
use crate::config::PupilConfig;

/// Parameters of the circle search.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HoughParams {
    /// Inverse accumulator resolution. 2 means half the image resolution.
    pub dp: f32,
    /// Minimum distance between accepted centers.
    pub min_dist: f32,
    /// Upper Canny threshold; the lower one is half of it.
    pub canny_high: f32,
    /// Votes (and radius support) a circle must exceed.
    pub accumulator_threshold: u32,
    /// Smallest radius searched, in pixels.
    pub min_radius: u32,
    /// Largest radius searched, in pixels.
    pub max_radius: u32,
}

impl Default for HoughParams {
    fn default() -> Self {
        Self {
            dp: 6.0,
            min_dist: 1000.0,
            canny_high: 50.0,
            accumulator_threshold: 30,
            min_radius: 1,
            max_radius: 40,
        }
    }
}

impl From<&PupilConfig> for HoughParams {
    fn from(config: &PupilConfig) -> Self {
        Self {
            dp: config.hough_dp,
            min_dist: config.hough_min_dist,
            canny_high: config.canny_high,
            accumulator_threshold: config.accumulator_threshold,
            min_radius: config.min_radius,
            max_radius: config.max_radius,
        }
    }
}

struct EdgePoint {
    x: f32,
    y: f32,
}

/// Find circles in `gray`, strongest first.
#[must_use]
pub fn hough_circles(gray: &GrayImage, params: &HoughParams) -> Vec<Circle> {
    let (width, height) = gray.dimensions();
    if width < 3 || height < 3 || params.dp <= 0.0 || params.min_radius > params.max_radius {
        return Vec::new();
    }

    let edges = canny(gray, params.canny_high / 2.0, params.canny_high);
    let gx = horizontal_sobel(gray);
    let gy = vertical_sobel(gray);

    let idp = 1.0 / params.dp;
    let acols = (width as f32 * idp).ceil() as usize;
    let arows = (height as f32 * idp).ceil() as usize;
    // One cell of padding on every side keeps the peak test branch-free
    let stride = acols + 2;
    let mut accum = vec![0u32; stride * (arows + 2)];
    let mut points = Vec::new();

    for (x, y, edge) in edges.enumerate_pixels() {
        if edge[0] == 0 {
            continue;
        }
        let vx = f32::from(gx.get_pixel(x, y)[0]);
        let vy = f32::from(gy.get_pixel(x, y)[0]);
        let mag = (vx * vx + vy * vy).sqrt();
        if mag < f32::EPSILON {
            continue;
        }
        let (ux, uy) = (vx / mag, vy / mag);
        let (px, py) = (x as f32, y as f32);
        points.push(EdgePoint { x: px, y: py });

        for sign in [1.0f32, -1.0] {
            for r in params.min_radius..=params.max_radius {
                let r = r as f32 * sign;
                let cx = (px + r * ux) * idp;
                let cy = (py + r * uy) * idp;
                if cx < 0.0 || cy < 0.0 || cx >= acols as f32 || cy >= arows as f32 {
                    break;
                }
                accum[(cy as usize + 1) * stride + cx as usize + 1] += 1;
            }
        }
    }

    if points.is_empty() {
        return Vec::new();
    }

    let mut centers = Vec::new();
    for row in 1..=arows {
        for col in 1..=acols {
            let i = row * stride + col;
            let v = accum[i];
            if v > params.accumulator_threshold
                && v > accum[i - 1]
                && v >= accum[i + 1]
                && v > accum[i - stride]
                && v >= accum[i + stride]
            {
                centers.push((v, col - 1, row - 1));
            }
        }
    }
    centers.sort_by(|a, b| b.0.cmp(&a.0));
    trace!(edges = points.len(), candidates = centers.len(), "Hough centers");

    let min_dist_sq = params.min_dist * params.min_dist;
    let (min_r, max_r) = (params.min_radius as f32, params.max_radius as f32);
    let mut circles: Vec<Circle> = Vec::new();
    let mut dists = Vec::with_capacity(points.len());

    for (_, col, row) in centers {
        let cx = (col as f32 + 0.5) * params.dp;
        let cy = (row as f32 + 0.5) * params.dp;

        let crowded = circles.iter().any(|c| {
            let (dx, dy) = (c.x - cx, c.y - cy);
            dx * dx + dy * dy < min_dist_sq
        });
        if crowded {
            continue;
        }

        dists.clear();
        dists.extend(
            points
                .iter()
                .map(|p| ((p.x - cx).powi(2) + (p.y - cy).powi(2)).sqrt())
                .filter(|d| (min_r..=max_r).contains(d)),
        );
        if dists.is_empty() {
            continue;
        }
        dists.sort_by(f32::total_cmp);

        if let Some((radius, support)) = best_radius(&dists, params.dp) {
            if support > params.accumulator_threshold {
                circles.push(Circle {
                    x: cx,
                    y: cy,
                    radius,
                    votes: support,
                });
            }
        }
    }

    circles
}

/// Split sorted distances into bands no wider than `band` and return the
/// median radius and size of the band with the most support per unit radius.
fn best_radius(sorted: &[f32], band: f32) -> Option<(f32, u32)> {
    let mut best: Option<(f32, u32)> = None;
    let mut start = 0;
    for end in 1..=sorted.len() {
        if end < sorted.len() && sorted[end] - sorted[start] <= band {
            continue;
        }
        let count = (end - start) as u32;
        let radius = sorted[(start + end - 1) / 2];
        let better = match best {
            None => true,
            Some((r, n)) => count as f32 * r >= n as f32 * radius,
        };
        if radius > 0.0 && better {
            best = Some((radius, count));
        }
        start = end;
    }
    best
}
