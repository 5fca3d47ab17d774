//! `pupilwatch` - Pupil dilation measurement from recorded eye video
//!
//! This library finds the eyes in each frame of a recorded test with a Haar
//! cascade, locates the pupil inside every eye region with a gradient Hough
//! circle search, and turns the accepted radii into a millimeter series that
//! can be stored, listed and charted.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod annotate;
pub mod cli;
pub mod config;
pub mod error;
pub mod font;
pub mod frames;
pub mod logging;
pub mod measurement;
pub mod plot;
pub mod session;
pub mod storage;
pub mod vision;

pub use annotate::Annotator;
pub use config::Config;
pub use error::{Error, Result};
pub use frames::{open_source, Frame, FrameSource};
pub use logging::init_logging;
pub use measurement::{PupilMeasurement, PIXELS_TO_MM};
pub use session::{DilationTest, SessionReport, StopHandle};
pub use storage::{Storage, StorageStats};
pub use vision::{HaarCascade, Rect};
