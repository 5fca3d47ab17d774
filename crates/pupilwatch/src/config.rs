//! Configuration management for pupilwatch.
//!
//! This module provides configuration loading and validation using figment,
//! supporting TOML config files, environment variables, and defaults.

use std::path::PathBuf;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::measurement::PIXELS_TO_MM;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Default data directory name.
const DATA_DIR_NAME: &str = "pupilwatch";

/// Default database file name.
const DATABASE_FILE_NAME: &str = "sessions.db";

/// Application configuration.
///
/// Configuration is loaded from (in order of precedence, highest first):
/// 1. Environment variables (prefixed with `PUPILWATCH_`, sections split on `__`)
/// 2. TOML config file at `~/.config/pupilwatch/config.toml`
/// 3. Default values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Input configuration.
    pub input: InputConfig,
    /// Eye detection configuration.
    pub eyes: EyeConfig,
    /// Pupil measurement configuration.
    pub pupil: PupilConfig,
    /// Chart configuration.
    pub plot: PlotConfig,
    /// Storage configuration.
    pub storage: StorageConfig,
}

/// Input-related configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    /// Recording to analyze when none is given on the command line.
    pub video_path: PathBuf,
    /// Haar cascade used for eye detection.
    pub cascade_path: PathBuf,
    /// Stop after this many frames. 0 reads the whole recording.
    pub max_frames: u64,
}

/// Eye detection (Haar cascade) configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EyeConfig {
    /// Pyramid step between detection scales.
    pub scale_factor: f64,
    /// Neighbouring hits a detection needs to be kept.
    pub min_neighbors: u32,
    /// Smallest eye window in pixels. 0 uses the cascade window size.
    pub min_size: u32,
    /// Largest eye window in pixels. 0 means no limit.
    pub max_size: u32,
}

/// Pupil measurement configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PupilConfig {
    /// Gaussian kernel size (odd).
    pub blur_kernel: u32,
    /// Gaussian sigma.
    pub blur_sigma: f32,
    /// Erosion kernel size (odd).
    pub erode_kernel: u32,
    /// Erosion passes.
    pub erode_iterations: u32,
    /// Inverse accumulator resolution of the Hough transform.
    pub hough_dp: f32,
    /// Minimum distance between detected pupil centers.
    pub hough_min_dist: f32,
    /// Upper Canny threshold; the lower one is half of it.
    pub canny_high: f32,
    /// Votes a circle center needs.
    pub accumulator_threshold: u32,
    /// Smallest radius searched, in pixels.
    pub min_radius: u32,
    /// Largest radius searched, in pixels.
    pub max_radius: u32,
    /// Rounded radii must exceed this to be recorded.
    pub min_pupil_radius_px: u32,
    /// Millimeters per pixel.
    pub mm_per_pixel: f64,
}

/// Chart configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlotConfig {
    /// Chart file written after a run. Extension picks SVG or PNG.
    pub output_path: PathBuf,
    /// Keep every n-th measurement.
    pub downsample_step: usize,
    /// Chart width in pixels.
    pub width: u32,
    /// Chart height in pixels.
    pub height: u32,
    /// Chart title.
    pub title: String,
}

/// Storage-related configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path to the database file.
    /// Defaults to `~/.local/share/pupilwatch/sessions.db`
    pub database_path: Option<PathBuf>,
    /// Maximum number of sessions to retain.
    /// Set to 0 for unlimited.
    pub max_sessions: usize,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            video_path: PathBuf::from("Video.mp4"),
            cascade_path: PathBuf::from("haarcascade_eye.xml"),
            max_frames: 0,
        }
    }
}

impl Default for EyeConfig {
    fn default() -> Self {
        Self {
            scale_factor: 1.1,
            min_neighbors: 3,
            min_size: 0,
            max_size: 0,
        }
    }
}

impl Default for PupilConfig {
    fn default() -> Self {
        Self {
            blur_kernel: 5,
            blur_sigma: 10.0,
            erode_kernel: 5,
            erode_iterations: 2,
            hough_dp: 6.0,
            hough_min_dist: 1000.0,
            canny_high: 50.0,
            accumulator_threshold: 30,
            min_radius: 1,
            max_radius: 40,
            min_pupil_radius_px: 20,
            mm_per_pixel: PIXELS_TO_MM,
        }
    }
}

impl Default for PlotConfig {
    fn default() -> Self {
        Self {
            output_path: PathBuf::from("dilation.svg"),
            downsample_step: 10,
            width: 800,
            height: 600,
            title: "Pupil Dilation Over Time".to_string(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: None, // Resolved at runtime
            max_sessions: 1_000,
        }
    }
}

fn is_odd_kernel(size: u32) -> bool {
    size % 2 == 1
}

impl Config {
    /// Load configuration, reading `config_path` instead of the default
    /// config file when given.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load_from(config_path: Option<PathBuf>) -> Result<Self> {
        let config_file = config_path.unwrap_or_else(Self::default_config_path);

        let figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_file))
            .merge(Env::prefixed("PUPILWATCH_").split("__"));

        let config: Config = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(DATA_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    /// Get the default data directory path.
    #[must_use]
    pub fn default_data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from(".local/share"))
            .join(DATA_DIR_NAME)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<()> {
        if self.eyes.scale_factor <= 1.0 || !self.eyes.scale_factor.is_finite() {
            return Err(Error::invalid_config(format!(
                "scale_factor must be greater than 1 (got {})",
                self.eyes.scale_factor
            )));
        }

        if self.eyes.max_size != 0 && self.eyes.min_size > self.eyes.max_size {
            return Err(Error::invalid_config(format!(
                "eyes.min_size ({}) cannot be greater than eyes.max_size ({})",
                self.eyes.min_size, self.eyes.max_size
            )));
        }

        let pupil = &self.pupil;
        if !is_odd_kernel(pupil.blur_kernel) {
            return Err(Error::invalid_config(format!(
                "blur_kernel must be odd (got {})",
                pupil.blur_kernel
            )));
        }
        if !is_odd_kernel(pupil.erode_kernel) {
            return Err(Error::invalid_config(format!(
                "erode_kernel must be odd (got {})",
                pupil.erode_kernel
            )));
        }
        if pupil.blur_sigma <= 0.0 {
            return Err(Error::invalid_config("blur_sigma must be positive"));
        }
        if pupil.hough_dp < 1.0 {
            return Err(Error::invalid_config(format!(
                "hough_dp must be at least 1 (got {})",
                pupil.hough_dp
            )));
        }
        if pupil.min_radius > pupil.max_radius {
            return Err(Error::invalid_config(format!(
                "min_radius ({}) cannot be greater than max_radius ({})",
                pupil.min_radius, pupil.max_radius
            )));
        }
        if pupil.canny_high <= 0.0 {
            return Err(Error::invalid_config("canny_high must be positive"));
        }
        if pupil.mm_per_pixel <= 0.0 {
            return Err(Error::invalid_config("mm_per_pixel must be positive"));
        }

        if self.plot.downsample_step == 0 {
            return Err(Error::invalid_config(
                "downsample_step must be greater than 0",
            ));
        }
        if self.plot.width == 0 || self.plot.height == 0 {
            return Err(Error::invalid_config(
                "plot width and height must be greater than 0",
            ));
        }

        Ok(())
    }

    /// Get the database path, resolving defaults if not set.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.storage
            .database_path
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join(DATABASE_FILE_NAME))
    }
}
