//! End-to-end library flow: frames on disk, a dilation test, storage and the
//! chart.

use std::path::Path;

use image::{GrayImage, Rgb, RgbImage};
use pupilwatch::frames::source_digest;
use pupilwatch::plot::{render_chart, PlotOptions};
use pupilwatch::vision::EyeDetector;
use pupilwatch::{open_source, Config, DilationTest, Rect, StopHandle, Storage, PIXELS_TO_MM};
use tempfile::TempDir;

const EYE: Rect = Rect::new(20, 20, 80, 80);

/// Reports one eye wherever the frame has a dark pupil.
struct DarkPupilEyes;

impl EyeDetector for DarkPupilEyes {
    fn detect_eyes(&self, gray: &GrayImage) -> Vec<Rect> {
        if gray.pixels().any(|p| p[0] < 100) {
            vec![EYE]
        } else {
            Vec::new()
        }
    }
}

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

/// Pupil, closed eye, pupil, pupil.
fn write_recording(dir: &Path) {
    let frames = [
        eye_frame(24.0),
        RgbImage::from_pixel(120, 120, Rgb([220, 220, 220])),
        eye_frame(24.0),
        eye_frame(24.0),
    ];
    for (i, frame) in frames.iter().enumerate() {
        frame.save(dir.join(format!("frame_{i:03}.png"))).unwrap();
    }
}

#[test]
fn recorded_frames_to_saved_session_and_chart() {
    let tmp = TempDir::new().unwrap();
    let frames_dir = tmp.path().join("recording");
    std::fs::create_dir_all(&frames_dir).unwrap();
    write_recording(&frames_dir);

    let config = Config::default();
    let mut source = open_source(&frames_dir).unwrap();
    let mut test = DilationTest::with_detector(Box::new(DarkPupilEyes), &config);
    let mut report = test.run(source.as_mut(), &StopHandle::new());
    report.source_digest = Some(source_digest(&frames_dir).unwrap());

    assert_eq!(report.frames_processed, 4);
    assert_eq!(report.frames_without_eyes, 1);
    assert_eq!(report.eye_lost_events, 1);
    assert!(!report.stopped_early);
    assert!(report.error.is_none());

    let frame_indices: Vec<u64> = report.measurements.iter().map(|m| m.frame_index).collect();
    assert_eq!(frame_indices, vec![0, 2, 3]);
    for m in &report.measurements {
        assert!(m.radius_px > config.pupil.min_pupil_radius_px);
        assert!((m.radius_mm - f64::from(m.radius_px) * PIXELS_TO_MM).abs() < 1e-9);
    }

    let storage = Storage::open(tmp.path().join("db").join("sessions.db")).unwrap();
    let id = storage.save_session(&report).unwrap();
    let loaded = storage.get_session(id).unwrap().unwrap();
    assert_eq!(loaded.measurements, report.measurements);
    assert_eq!(loaded.source_digest, report.source_digest);
    assert_eq!(loaded.mean_radius_mm(), report.mean_radius_mm());

    let chart = tmp.path().join("charts").join("dilation.svg");
    let options = PlotOptions {
        downsample_step: 1,
        ..PlotOptions::default()
    };
    render_chart(&loaded.radii_mm(), &options, &chart).unwrap();
    let svg = std::fs::read_to_string(&chart).unwrap();
    assert!(svg.contains("Pupil Dilation (mm)"));
}

#[test]
fn interrupted_run_is_kept_with_partial_results() {
    let tmp = TempDir::new().unwrap();
    write_recording(tmp.path());

    let stop = StopHandle::new();
    stop.stop();
    let mut source = open_source(tmp.path()).unwrap();
    let mut test = DilationTest::with_detector(Box::new(DarkPupilEyes), &Config::default());
    let report = test.run(source.as_mut(), &stop);

    assert!(report.stopped_early);
    assert_eq!(report.frames_processed, 0);

    let storage = Storage::open(tmp.path().join("sessions.db")).unwrap();
    let id = storage.save_session(&report).unwrap();
    let summaries = storage.list_sessions(10).unwrap();
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].id, id);
    assert!(summaries[0].stopped_early);
    assert_eq!(summaries[0].measurement_count, 0);
    assert!(summaries[0].mean_radius_mm.is_none());
}

#[test]
fn digest_changes_with_recording_content() {
    let tmp = TempDir::new().unwrap();
    write_recording(tmp.path());
    let before = source_digest(tmp.path()).unwrap();
    assert_eq!(before, source_digest(tmp.path()).unwrap());

    eye_frame(30.0).save(tmp.path().join("frame_004.png")).unwrap();
    assert_ne!(before, source_digest(tmp.path()).unwrap());
}
