//! Pupil measurements and the eye-lost state.

use serde::{Deserialize, Serialize};

use crate::vision::{Circle, Rect};

/// Millimeters per pixel at 96 dpi.
pub const PIXELS_TO_MM: f64 = 0.264_583_333_3;

/// Convert a radius in pixels to millimeters.
#[must_use]
pub fn radius_px_to_mm(radius_px: u32, mm_per_pixel: f64) -> f64 {
    f64::from(radius_px) * mm_per_pixel
}

/// One accepted pupil circle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PupilMeasurement {
    /// Frame the pupil was found in.
    pub frame_index: u64,
    /// Position of the eye among the frame's detections.
    pub eye_index: u32,
    /// Eye region in frame coordinates.
    pub eye: Rect,
    /// Pupil center, frame coordinates.
    pub center_x: f32,
    /// Pupil center, frame coordinates.
    pub center_y: f32,
    /// Rounded radius in pixels.
    pub radius_px: u32,
    /// Radius in millimeters.
    pub radius_mm: f64,
    /// Share of the eye region that binarized dark.
    pub dark_fraction: f32,
}

/// Rules for turning a detected circle into a measurement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Acceptance {
    /// Rounded radii must be strictly greater than this.
    pub min_radius_px: u32,
    /// Millimeters per pixel.
    pub mm_per_pixel: f64,
}

impl Acceptance {
    /// Round the circle's radius and return it if it qualifies.
    #[must_use]
    pub fn accept(&self, circle: &Circle) -> Option<u32> {
        let rounded = circle.radius.round();
        if rounded <= 0.0 {
            return None;
        }
        let radius_px = rounded as u32;
        (radius_px > self.min_radius_px).then_some(radius_px)
    }

    /// Build a measurement for `circle`, found inside `eye`.
    ///
    /// Circle coordinates are relative to the eye region.
    #[must_use]
    pub fn measure(
        &self,
        frame_index: u64,
        eye_index: u32,
        eye: Rect,
        circle: &Circle,
        dark_fraction: f32,
    ) -> Option<PupilMeasurement> {
        let radius_px = self.accept(circle)?;
        Some(PupilMeasurement {
            frame_index,
            eye_index,
            eye,
            center_x: eye.x as f32 + circle.x,
            center_y: eye.y as f32 + circle.y,
            radius_px,
            radius_mm: radius_px_to_mm(radius_px, self.mm_per_pixel),
            dark_fraction,
        })
    }
}

/// Keep elements `0, step, 2 * step, ...`.
///
/// A step of 0 is treated as 1.
#[must_use]
pub fn downsample(values: &[f64], step: usize) -> Vec<f64> {
    values.iter().step_by(step.max(1)).copied().collect()
}

/// Change in eye visibility reported by [`EyeTracker::observe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EyeTransition {
    /// Eyes are visible again after being lost.
    Found,
    /// Eyes just disappeared.
    Lost,
    /// Nothing changed.
    Unchanged,
}

/// Tracks whether the eye is currently lost.
#[derive(Debug, Default, Clone)]
pub struct EyeTracker {
    lost: bool,
    lost_events: u64,
}

impl EyeTracker {
    /// Create a tracker. No frame has been observed yet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record whether the current frame had any eye detections.
    pub fn observe(&mut self, eyes_found: bool) -> EyeTransition {
        match (eyes_found, self.lost) {
            (true, true) => {
                self.lost = false;
                EyeTransition::Found
            }
            (false, false) => {
                self.lost = true;
                self.lost_events += 1;
                EyeTransition::Lost
            }
            (true, false) | (false, true) => EyeTransition::Unchanged,
        }
    }

    /// Whether the last observed frame had no eyes.
    #[must_use]
    pub fn is_lost(&self) -> bool {
        self.lost
    }

    /// Number of times the eyes went from visible (or unknown) to lost.
    #[must_use]
    pub fn lost_events(&self) -> u64 {
        self.lost_events
    }
}
