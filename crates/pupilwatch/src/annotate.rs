//! Annotated frame output.
//!
//! Draws the detected eye regions, accepted pupil circles and a status line
//! onto a copy of each frame and writes it to a directory, so a run can be
//! reviewed frame by frame after the fact.

use std::path::{Path, PathBuf};

use ab_glyph::{FontRef, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_circle_mut, draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect as DrawRect;
use tracing::debug;

use crate::error::{Error, Result};
use crate::font;
use crate::measurement::PupilMeasurement;
use crate::vision::Rect;

/// Eye rectangle color.
pub const EYE_COLOR: Rgb<u8> = Rgb([0, 255, 0]);

/// Pupil circle color.
pub const PUPIL_COLOR: Rgb<u8> = Rgb([255, 0, 0]);

/// Shown while eyes are visible.
pub const DETECTING_TEXT: &str = "Detecting for Dilation...";

/// Shown on the frame where the eyes are lost.
pub const EYE_LOST_TEXT: &str = "Eye not found";

const STATUS_SCALE: f32 = 20.0;

/// Writes annotated frames into a directory.
#[derive(Debug, Clone)]
pub struct Annotator {
    dir: PathBuf,
    font: FontRef<'static>,
}

impl Annotator {
    /// Create an annotator writing into `dir`, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the status
    /// font cannot be loaded.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir).map_err(|source| Error::DirectoryCreate {
            path: dir.clone(),
            source,
        })?;
        debug!("Writing annotated frames to {}", dir.display());
        Ok(Self {
            dir,
            font: font::load()?,
        })
    }

    /// Output directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Draw eyes (2 px green) and pupils (red) on a copy of `image`.
    ///
    /// Frames with eyes get a green [`DETECTING_TEXT`] line; `eye_lost`
    /// adds a red [`EYE_LOST_TEXT`] line below it.
    #[must_use]
    pub fn annotate(
        &self,
        image: &RgbImage,
        eyes: &[Rect],
        pupils: &[PupilMeasurement],
        eye_lost: bool,
    ) -> RgbImage {
        let mut out = image.clone();
        if !eyes.is_empty() {
            self.draw_status(&mut out, 10, DETECTING_TEXT, EYE_COLOR);
        }
        if eye_lost {
            self.draw_status(&mut out, 70, EYE_LOST_TEXT, PUPIL_COLOR);
        }
        for eye in eyes {
            draw_eye(&mut out, eye);
        }
        for pupil in pupils {
            draw_hollow_circle_mut(
                &mut out,
                (pupil.center_x.round() as i32, pupil.center_y.round() as i32),
                pupil.radius_px as i32,
                PUPIL_COLOR,
            );
        }
        out
    }

    fn draw_status(&self, image: &mut RgbImage, y: i32, text: &str, color: Rgb<u8>) {
        draw_text_mut(image, color, 10, y, PxScale::from(STATUS_SCALE), &self.font, text);
    }

    /// Path the frame with `index` is written to.
    #[must_use]
    pub fn frame_path(&self, index: u64) -> PathBuf {
        self.dir.join(format!("frame_{index:06}.png"))
    }

    /// Write an annotated frame as PNG.
    ///
    /// # Errors
    ///
    /// Returns an error if the image cannot be encoded or written.
    pub fn save(&self, index: u64, image: &RgbImage) -> Result<PathBuf> {
        let path = self.frame_path(index);
        image.save(&path)?;
        Ok(path)
    }
}

fn draw_eye(image: &mut RgbImage, eye: &Rect) {
    if eye.width == 0 || eye.height == 0 {
        return;
    }
    let (x, y) = (eye.x as i32, eye.y as i32);
    draw_hollow_rect_mut(image, DrawRect::at(x, y).of_size(eye.width, eye.height), EYE_COLOR);
    if eye.width > 2 && eye.height > 2 {
        draw_hollow_rect_mut(
            image,
            DrawRect::at(x + 1, y + 1).of_size(eye.width - 2, eye.height - 2),
            EYE_COLOR,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn pupil(cx: f32, cy: f32, r: u32) -> PupilMeasurement {
        PupilMeasurement {
            frame_index: 0,
            eye_index: 0,
            eye: Rect::new(0, 0, 40, 40),
            center_x: cx,
            center_y: cy,
            radius_px: r,
            radius_mm: 0.0,
            dark_fraction: 0.0,
        }
    }

    #[test]
    fn test_new_creates_directory() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("nested").join("frames");
        let annotator = Annotator::new(&dir).unwrap();
        assert!(dir.is_dir());
        assert_eq!(annotator.dir(), dir.as_path());
    }

    /// Pixels in rows `rows` that are close to `color`.
    fn count_near(img: &RgbImage, rows: std::ops::Range<u32>, color: Rgb<u8>) -> usize {
        img.enumerate_pixels()
            .filter(|(_, y, p)| {
                rows.contains(y) && p.0.iter().zip(color.0).all(|(&a, b)| a.abs_diff(b) < 60)
            })
            .count()
    }

    #[test]
    fn test_eye_border_is_two_pixels_green() {
        let tmp = TempDir::new().unwrap();
        let annotator = Annotator::new(tmp.path()).unwrap();
        let frame = RgbImage::from_pixel(120, 120, Rgb([10, 10, 10]));
        let out = annotator.annotate(&frame, &[Rect::new(10, 50, 20, 20)], &[], false);

        assert_eq!(*out.get_pixel(10, 60), EYE_COLOR);
        assert_eq!(*out.get_pixel(11, 60), EYE_COLOR);
        assert_eq!(*out.get_pixel(12, 60), Rgb([10, 10, 10]));
        assert_eq!(*out.get_pixel(29, 55), EYE_COLOR);
        // Source frame is untouched
        assert_eq!(*frame.get_pixel(10, 60), Rgb([10, 10, 10]));
    }

    #[test]
    fn test_status_text_when_eyes_visible() {
        let tmp = TempDir::new().unwrap();
        let annotator = Annotator::new(tmp.path()).unwrap();
        let frame = RgbImage::from_pixel(320, 120, Rgb([0, 0, 0]));
        let out = annotator.annotate(&frame, &[Rect::new(200, 80, 20, 20)], &[], false);

        assert!(count_near(&out, 0..40, EYE_COLOR) > 30);
        assert_eq!(count_near(&out, 60..100, PUPIL_COLOR), 0);
    }

    #[test]
    fn test_status_text_when_eye_lost() {
        let tmp = TempDir::new().unwrap();
        let annotator = Annotator::new(tmp.path()).unwrap();
        let frame = RgbImage::from_pixel(320, 120, Rgb([0, 0, 0]));
        let out = annotator.annotate(&frame, &[], &[], true);

        assert!(count_near(&out, 60..100, PUPIL_COLOR) > 30);
        assert_eq!(count_near(&out, 0..40, EYE_COLOR), 0);
    }

    #[test]
    fn test_no_eyes_no_status() {
        let tmp = TempDir::new().unwrap();
        let annotator = Annotator::new(tmp.path()).unwrap();
        let frame = RgbImage::from_pixel(64, 64, Rgb([5, 5, 5]));
        assert_eq!(annotator.annotate(&frame, &[], &[], false), frame);
    }

    #[test]
    fn test_pupil_circle_drawn_red() {
        let tmp = TempDir::new().unwrap();
        let annotator = Annotator::new(tmp.path()).unwrap();
        let frame = RgbImage::from_pixel(60, 60, Rgb([0, 0, 0]));
        let out = annotator.annotate(&frame, &[], &[pupil(30.0, 30.0, 10)], false);

        assert_eq!(*out.get_pixel(40, 30), PUPIL_COLOR);
        assert_eq!(*out.get_pixel(30, 20), PUPIL_COLOR);
        assert_eq!(*out.get_pixel(30, 30), Rgb([0, 0, 0]));
    }

    #[test]
    fn test_save_names_frames_by_index() {
        let tmp = TempDir::new().unwrap();
        let annotator = Annotator::new(tmp.path()).unwrap();
        let frame = RgbImage::new(8, 8);
        let path = annotator.save(42, &frame).unwrap();
        assert_eq!(path, tmp.path().join("frame_000042.png"));
        assert!(path.exists());
    }
}
