//! The dilation test loop.
//!
//! [`DilationTest`] pulls frames from a [`FrameSource`], finds the eyes,
//! searches each eye region for the pupil circle and collects accepted radii
//! into a [`SessionReport`]. A [`StopHandle`] ends the loop early.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use image::{imageops, GrayImage};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use crate::annotate::Annotator;
use crate::config::{Config, PupilConfig};
use crate::frames::{Frame, FrameSource};
use crate::measurement::{Acceptance, EyeTracker, EyeTransition, PupilMeasurement};
use crate::vision::{
    hough_circles, prepare_eye_region, CascadeDetector, DetectParams, EyeDetector, HaarCascade,
    HoughParams,
};

/// A handle to stop a running test.
///
/// This is a lightweight, cloneable handle; a signal handler keeps one clone
/// and the frame loop polls another between frames.
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    stop_signal: Arc<AtomicBool>,
}

impl StopHandle {
    /// Create a new stop handle.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal the test to stop after the current frame.
    pub fn stop(&self) {
        self.stop_signal.store(true, Ordering::SeqCst);
    }

    /// Check if the stop signal has been sent.
    #[must_use]
    pub fn should_stop(&self) -> bool {
        self.stop_signal.load(Ordering::SeqCst)
    }

    /// Reset the stop signal.
    pub fn reset(&self) {
        self.stop_signal.store(false, Ordering::SeqCst);
    }
}

/// Outcome of one test run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionReport {
    /// Identifier assigned by the storage layer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,

    /// When the loop started.
    pub started_at: DateTime<Utc>,

    /// When the loop ended.
    pub finished_at: DateTime<Utc>,

    /// Description of the frame source (usually its path).
    pub source: String,

    /// BLAKE3 digest of the source, when it could be read.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_digest: Option<String>,

    /// Frames pulled from the source.
    pub frames_processed: u64,

    /// Frames in which no eye was detected.
    pub frames_without_eyes: u64,

    /// Times the eyes went from visible to lost.
    pub eye_lost_events: u64,

    /// Whether the run was interrupted before the source ran out.
    pub stopped_early: bool,

    /// Source error that ended the run, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Accepted pupil measurements in frame order.
    pub measurements: Vec<PupilMeasurement>,
}

impl SessionReport {
    /// Start an empty report for `source`.
    #[must_use]
    pub fn new(source: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: None,
            started_at: now,
            finished_at: now,
            source: source.into(),
            source_digest: None,
            frames_processed: 0,
            frames_without_eyes: 0,
            eye_lost_events: 0,
            stopped_early: false,
            error: None,
            measurements: Vec::new(),
        }
    }

    /// Radii in millimeters, in measurement order.
    #[must_use]
    pub fn radii_mm(&self) -> Vec<f64> {
        self.measurements.iter().map(|m| m.radius_mm).collect()
    }

    /// Mean radius in millimeters.
    #[must_use]
    pub fn mean_radius_mm(&self) -> Option<f64> {
        if self.measurements.is_empty() {
            return None;
        }
        let total: f64 = self.measurements.iter().map(|m| m.radius_mm).sum();
        Some(total / self.measurements.len() as f64)
    }

    /// Smallest radius in millimeters.
    #[must_use]
    pub fn min_radius_mm(&self) -> Option<f64> {
        self.measurements.iter().map(|m| m.radius_mm).reduce(f64::min)
    }

    /// Largest radius in millimeters.
    #[must_use]
    pub fn max_radius_mm(&self) -> Option<f64> {
        self.measurements.iter().map(|m| m.radius_mm).reduce(f64::max)
    }

    /// Wall-clock duration of the run.
    #[must_use]
    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

/// The pupil dilation test.
pub struct DilationTest {
    detector: Box<dyn EyeDetector>,
    pupil: PupilConfig,
    hough: HoughParams,
    acceptance: Acceptance,
    max_frames: u64,
    annotator: Option<Annotator>,
}

impl std::fmt::Debug for DilationTest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DilationTest")
            .field("hough", &self.hough)
            .field("acceptance", &self.acceptance)
            .field("max_frames", &self.max_frames)
            .field("annotator", &self.annotator)
            .finish_non_exhaustive()
    }
}

impl DilationTest {
    /// Create a test that finds eyes with `cascade`.
    #[must_use]
    pub fn new(cascade: HaarCascade, config: &Config) -> Self {
        let detector = CascadeDetector::new(cascade, DetectParams::from(&config.eyes));
        Self::with_detector(Box::new(detector), config)
    }

    /// Create a test with a custom eye detector.
    #[must_use]
    pub fn with_detector(detector: Box<dyn EyeDetector>, config: &Config) -> Self {
        Self {
            detector,
            pupil: config.pupil.clone(),
            hough: HoughParams::from(&config.pupil),
            acceptance: Acceptance {
                min_radius_px: config.pupil.min_pupil_radius_px,
                mm_per_pixel: config.pupil.mm_per_pixel,
            },
            max_frames: config.input.max_frames,
            annotator: None,
        }
    }

    /// Also write annotated frames.
    #[must_use]
    pub fn with_annotator(mut self, annotator: Annotator) -> Self {
        self.annotator = Some(annotator);
        self
    }

    /// Run until the source is exhausted, `max_frames` is reached or `stop`
    /// is signalled.
    ///
    /// A source error ends the run and is recorded in the report.
    pub fn run(&mut self, source: &mut dyn FrameSource, stop: &StopHandle) -> SessionReport {
        let mut report = SessionReport::new(source.name());
        let mut tracker = EyeTracker::new();
        info!("Detecting for dilation in {}", source.name());

        loop {
            if stop.should_stop() {
                warn!("Please complete the test to show the results");
                report.stopped_early = true;
                break;
            }
            if self.max_frames > 0 && report.frames_processed >= self.max_frames {
                debug!("Reached frame limit of {}", self.max_frames);
                break;
            }

            let frame = match source.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => {
                    warn!("Frame source failed after {} frames: {e}", report.frames_processed);
                    report.error = Some(e.to_string());
                    break;
                }
            };

            self.process_frame(&frame, &mut tracker, &mut report);
            report.frames_processed += 1;
        }

        report.eye_lost_events = tracker.lost_events();
        report.finished_at = Utc::now();
        info!(
            "Processed {} frames, {} pupil measurements",
            report.frames_processed,
            report.measurements.len()
        );
        report
    }

    fn process_frame(&self, frame: &Frame, tracker: &mut EyeTracker, report: &mut SessionReport) {
        let gray = imageops::grayscale(&frame.image);
        let eyes = self.detector.detect_eyes(&gray);

        let transition = tracker.observe(!eyes.is_empty());
        match transition {
            EyeTransition::Lost => info!("Eye not found (frame {})", frame.index),
            EyeTransition::Found => debug!("Eye found again (frame {})", frame.index),
            EyeTransition::Unchanged => {}
        }
        if eyes.is_empty() {
            report.frames_without_eyes += 1;
        }
        trace!("Frame {}: {} eyes", frame.index, eyes.len());

        let first = report.measurements.len();
        for (eye_index, eye) in eyes.iter().enumerate() {
            let Some(eye) = eye.clamp_to(gray.width(), gray.height()) else {
                continue;
            };
            report
                .measurements
                .extend(self.measure_eye(&gray, frame.index, eye_index as u32, eye));
        }

        if let Some(annotator) = &self.annotator {
            let annotated = annotator.annotate(
                &frame.image,
                &eyes,
                &report.measurements[first..],
                transition == EyeTransition::Lost,
            );
            if let Err(e) = annotator.save(frame.index, &annotated) {
                warn!("Failed to write annotated frame {}: {e}", frame.index);
            }
        }
    }

    fn measure_eye(
        &self,
        gray: &GrayImage,
        frame_index: u64,
        eye_index: u32,
        eye: crate::vision::Rect,
    ) -> Vec<PupilMeasurement> {
        let region = imageops::crop_imm(gray, eye.x, eye.y, eye.width, eye.height).to_image();
        let prepared = prepare_eye_region(&region, &self.pupil);
        hough_circles(&region, &self.hough)
            .iter()
            .filter_map(|circle| {
                let m = self.acceptance.measure(
                    frame_index,
                    eye_index,
                    eye,
                    circle,
                    prepared.dark_fraction,
                );
                if m.is_none() {
                    trace!("Frame {frame_index}: rejected circle r={:.1}", circle.radius);
                }
                m
            })
            .inspect(|m| {
                trace!(
                    "Frame {frame_index}: pupil r={} px ({:.3} mm)",
                    m.radius_px,
                    m.radius_mm
                );
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, Result};
    use crate::logging::init_test_logging;
    use crate::measurement::PIXELS_TO_MM;
    use crate::vision::cascade::tests::DARK_CENTER_CASCADE;
    use crate::vision::Rect;
    use image::{Luma, Rgb, RgbImage};
    use std::collections::VecDeque;
    use tempfile::TempDir;

    const EYE: Rect = Rect::new(20, 20, 80, 80);

    /// Reports a fixed eye wherever the frame has dark pixels.
    struct FixedEyes;

    impl EyeDetector for FixedEyes {
        fn detect_eyes(&self, gray: &GrayImage) -> Vec<Rect> {
            if gray.pixels().any(|p| p[0] < 100) {
                vec![EYE]
            } else {
                Vec::new()
            }
        }
    }

    struct VecSource {
        frames: VecDeque<Result<RgbImage>>,
        next: u64,
    }

    impl VecSource {
        fn new(frames: Vec<Result<RgbImage>>) -> Self {
            Self {
                frames: frames.into(),
                next: 0,
            }
        }
    }

    impl FrameSource for VecSource {
        fn name(&self) -> &str {
            "memory"
        }

        fn next_frame(&mut self) -> Result<Option<Frame>> {
            let Some(image) = self.frames.pop_front() else {
                return Ok(None);
            };
            let index = self.next;
            self.next += 1;
            Ok(Some(Frame { index, image: image? }))
        }
    }

    /// 120×120 frame with a dark pupil of `radius` centered at (60, 60).
    fn eye_frame(radius: f32) -> RgbImage {
        RgbImage::from_fn(120, 120, |x, y| {
            let (dx, dy) = (x as f32 - 60.0, y as f32 - 60.0);
            if (dx * dx + dy * dy).sqrt() <= radius {
                Rgb([30, 30, 30])
            } else {
                Rgb([220, 220, 220])
            }
        })
    }

    fn blank_frame() -> RgbImage {
        RgbImage::from_pixel(120, 120, Rgb([220, 220, 220]))
    }

    fn test_with_fixed_eyes() -> DilationTest {
        DilationTest::with_detector(Box::new(FixedEyes), &Config::default())
    }

    #[test]
    fn test_stop_handle() {
        let handle = StopHandle::new();
        let clone = handle.clone();
        assert!(!handle.should_stop());
        clone.stop();
        assert!(handle.should_stop());
        handle.reset();
        assert!(!clone.should_stop());
    }

    #[test]
    fn test_measures_pupil_in_eye_region() {
        init_test_logging();
        let mut source = VecSource::new(vec![Ok(eye_frame(24.0))]);
        let report = test_with_fixed_eyes().run(&mut source, &StopHandle::new());

        assert_eq!(report.frames_processed, 1);
        assert_eq!(report.measurements.len(), 1);
        let m = &report.measurements[0];
        assert_eq!(m.frame_index, 0);
        assert_eq!(m.eye, EYE);
        assert!(m.radius_px.abs_diff(24) <= 2, "radius {}", m.radius_px);
        assert!((m.radius_mm - f64::from(m.radius_px) * PIXELS_TO_MM).abs() < 1e-9);
        assert!((m.center_x - 60.0).abs() <= 4.0);
        assert!((m.center_y - 60.0).abs() <= 4.0);
        assert!(m.dark_fraction > 0.0);
    }

    #[test]
    fn test_small_pupils_are_not_recorded() {
        let mut source = VecSource::new(vec![Ok(eye_frame(12.0))]);
        let report = test_with_fixed_eyes().run(&mut source, &StopHandle::new());
        assert_eq!(report.frames_processed, 1);
        assert_eq!(report.frames_without_eyes, 0);
        assert!(report.measurements.is_empty());
    }

    #[test]
    fn test_counts_frames_without_eyes() {
        let mut source = VecSource::new(vec![
            Ok(eye_frame(24.0)),
            Ok(blank_frame()),
            Ok(blank_frame()),
            Ok(eye_frame(24.0)),
            Ok(blank_frame()),
        ]);
        let report = test_with_fixed_eyes().run(&mut source, &StopHandle::new());

        assert_eq!(report.frames_processed, 5);
        assert_eq!(report.frames_without_eyes, 3);
        assert_eq!(report.eye_lost_events, 2);
        assert_eq!(report.measurements.len(), 2);
        assert_eq!(report.measurements[1].frame_index, 3);
        assert!(!report.stopped_early);
        assert!(report.error.is_none());
    }

    #[test]
    fn test_stop_before_start() {
        let stop = StopHandle::new();
        stop.stop();
        let mut source = VecSource::new(vec![Ok(eye_frame(24.0))]);
        let report = test_with_fixed_eyes().run(&mut source, &stop);
        assert!(report.stopped_early);
        assert_eq!(report.frames_processed, 0);
        assert!(report.measurements.is_empty());
    }

    #[test]
    fn test_max_frames_limit() {
        let mut config = Config::default();
        config.input.max_frames = 2;
        let mut test = DilationTest::with_detector(Box::new(FixedEyes), &config);
        let mut source = VecSource::new((0..5).map(|_| Ok(blank_frame())).collect());
        let report = test.run(&mut source, &StopHandle::new());
        assert_eq!(report.frames_processed, 2);
        assert!(!report.stopped_early);
    }

    #[test]
    fn test_source_error_is_recorded() {
        let mut source = VecSource::new(vec![
            Ok(eye_frame(24.0)),
            Err(Error::frame_source("memory", "truncated frame")),
            Ok(eye_frame(24.0)),
        ]);
        let report = test_with_fixed_eyes().run(&mut source, &StopHandle::new());
        assert_eq!(report.frames_processed, 1);
        assert_eq!(report.measurements.len(), 1);
        let error = report.error.unwrap();
        assert!(error.contains("truncated frame"));
    }

    #[test]
    fn test_writes_annotated_frames() {
        let tmp = TempDir::new().unwrap();
        let annotator = Annotator::new(tmp.path()).unwrap();
        let mut test = test_with_fixed_eyes().with_annotator(annotator);
        let mut source = VecSource::new(vec![Ok(eye_frame(24.0)), Ok(blank_frame())]);
        let report = test.run(&mut source, &StopHandle::new());

        assert_eq!(report.frames_processed, 2);
        assert!(tmp.path().join("frame_000000.png").exists());
        assert!(tmp.path().join("frame_000001.png").exists());
    }

    #[test]
    fn test_cascade_backed_test_runs() {
        let cascade = HaarCascade::from_xml(DARK_CENTER_CASCADE).unwrap();
        let mut test = DilationTest::new(cascade, &Config::default());
        let gray = GrayImage::from_pixel(30, 30, Luma([128]));
        let frame = image::DynamicImage::ImageLuma8(gray).to_rgb8();
        let mut source = VecSource::new(vec![Ok(frame)]);
        let report = test.run(&mut source, &StopHandle::new());

        assert_eq!(report.frames_processed, 1);
        assert_eq!(report.frames_without_eyes, 1);
        assert_eq!(report.eye_lost_events, 1);
    }

    #[test]
    fn test_cascade_finds_eye_and_measures_pupil() {
        init_test_logging();
        let cascade = HaarCascade::from_xml(DARK_CENTER_CASCADE).unwrap();
        let mut config = Config::default();
        // Only windows large enough to hold the whole pupil, every raw hit kept
        config.eyes.min_size = 90;
        config.eyes.min_neighbors = 0;
        let mut test = DilationTest::new(cascade, &config);
        let mut source = VecSource::new(vec![Ok(eye_frame(24.0)), Ok(blank_frame())]);
        let report = test.run(&mut source, &StopHandle::new());

        assert_eq!(report.frames_processed, 2);
        assert_eq!(report.frames_without_eyes, 1);
        assert!(!report.measurements.is_empty());
        for m in &report.measurements {
            assert_eq!(m.frame_index, 0);
            assert!(m.eye.width >= 90);
            assert!(m.radius_px > config.pupil.min_pupil_radius_px);
        }
        assert!(
            report
                .measurements
                .iter()
                .any(|m| m.radius_px.abs_diff(24) <= 3),
            "radii: {:?}",
            report.radii_mm()
        );
    }

    #[test]
    fn test_report_statistics() {
        let mut report = SessionReport::new("memory");
        assert_eq!(report.mean_radius_mm(), None);
        assert_eq!(report.min_radius_mm(), None);

        for (i, mm) in [5.0, 6.0, 7.0].into_iter().enumerate() {
            report.measurements.push(PupilMeasurement {
                frame_index: i as u64,
                eye_index: 0,
                eye: EYE,
                center_x: 0.0,
                center_y: 0.0,
                radius_px: 0,
                radius_mm: mm,
                dark_fraction: 0.0,
            });
        }
        assert_eq!(report.radii_mm(), vec![5.0, 6.0, 7.0]);
        assert!((report.mean_radius_mm().unwrap() - 6.0).abs() < 1e-12);
        assert_eq!(report.min_radius_mm(), Some(5.0));
        assert_eq!(report.max_radius_mm(), Some(7.0));
    }

    #[test]
    fn test_report_json_omits_empty_fields() {
        let report = SessionReport::new("clip.gif");
        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"source\":\"clip.gif\""));
        assert!(!json.contains("\"id\""));
        assert!(!json.contains("\"error\""));
    }
}
