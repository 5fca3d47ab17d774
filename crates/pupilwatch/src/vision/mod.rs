//! Eye and pupil detection primitives.
//!
//! - [`cascade`]: Haar cascade eye detector (OpenCV cascade XML format)
//! - [`integral`]: summed-area tables backing the cascade
//! - [`preprocess`]: blur, erosion and Otsu binarization of an eye region
//! - [`hough`]: gradient Hough transform for the pupil circle

pub mod cascade;
pub mod hough;
pub mod integral;
pub mod preprocess;

use image::GrayImage;
use serde::{Deserialize, Serialize};

pub use cascade::{CascadeDetector, DetectParams, HaarCascade};
pub use hough::{hough_circles, HoughParams};
pub use preprocess::{prepare_eye_region, PreparedRegion};

/// Axis-aligned rectangle in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rect {
    /// Left edge.
    pub x: u32,
    /// Top edge.
    pub y: u32,
    /// Width.
    pub width: u32,
    /// Height.
    pub height: u32,
}

impl Rect {
    /// Create a rectangle.
    #[must_use]
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Area in pixels.
    #[must_use]
    pub fn area(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    /// Clip to an image of the given size. `None` if nothing is left.
    #[must_use]
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<Self> {
        if self.x >= width || self.y >= height {
            return None;
        }
        let w = self.width.min(width - self.x);
        let h = self.height.min(height - self.y);
        (w > 0 && h > 0).then_some(Self::new(self.x, self.y, w, h))
    }
}

/// Finds eye regions in a grayscale frame.
pub trait EyeDetector: Send {
    /// Eye rectangles in `gray`, in image coordinates.
    fn detect_eyes(&self, gray: &GrayImage) -> Vec<Rect>;
}

/// A detected circle. Coordinates are relative to the searched image.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Circle {
    /// Center x.
    pub x: f32,
    /// Center y.
    pub y: f32,
    /// Radius in pixels.
    pub radius: f32,
    /// Edge points supporting the radius.
    pub votes: u32,
}
