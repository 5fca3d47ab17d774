//! Error types for pupilwatch.
//!
//! This module defines all error types used throughout the pupilwatch crate,
//! providing detailed context for debugging and user-friendly error messages.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for pupilwatch operations.
#[derive(Error, Debug)]
pub enum Error {
    // === Storage Errors ===
    /// Failed to open or create the database.
    #[error("failed to open database at {path}: {source}")]
    DatabaseOpen {
        /// Path to the database file.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: rusqlite::Error,
    },

    /// A database query failed.
    #[error("database query failed: {0}")]
    DatabaseQuery(#[from] rusqlite::Error),

    /// Failed to run database migrations.
    #[error("database migration failed: {message}")]
    DatabaseMigration {
        /// Description of what went wrong.
        message: String,
    },

    /// No session exists with the requested id.
    #[error("session {id} not found")]
    SessionNotFound {
        /// The requested session id.
        id: i64,
    },

    // === Configuration Errors ===
    /// Failed to load configuration.
    #[error("failed to load configuration: {0}")]
    ConfigLoad(Box<figment::Error>),

    /// Configuration validation failed.
    #[error("invalid configuration: {message}")]
    ConfigValidation {
        /// Description of the validation failure.
        message: String,
    },

    // === Input Errors ===
    /// A frame source could not be opened or read.
    #[error("frame source '{path}': {message}")]
    FrameSource {
        /// Path of the source.
        path: PathBuf,
        /// Description of what went wrong.
        message: String,
    },

    /// The input kind needs a feature this build does not have.
    #[error("cannot read '{path}': {message}")]
    UnsupportedSource {
        /// Path of the source.
        path: PathBuf,
        /// Description of what is missing.
        message: String,
    },

    /// Image decoding or encoding failed.
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    // === Detection Errors ===
    /// The cascade classifier file could not be parsed.
    #[error("invalid cascade: {message}")]
    CascadeParse {
        /// Description of what went wrong.
        message: String,
    },

    /// The cascade classifier file could not be read.
    #[error("failed to read cascade {path}: {source}")]
    CascadeRead {
        /// Path of the cascade file.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    // === Rendering Errors ===
    /// There is nothing to plot.
    #[error("no pupil measurements to plot")]
    EmptySeries,

    /// Chart rendering failed.
    #[error("failed to render chart {path}: {message}")]
    Render {
        /// Output path of the chart.
        path: PathBuf,
        /// Description of what went wrong.
        message: String,
    },

    /// The bundled font could not be loaded.
    #[error("font error: {0}")]
    Font(String),

    // === I/O Errors ===
    /// File system operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to create a required directory.
    #[error("failed to create directory {path}: {source}")]
    DirectoryCreate {
        /// Path that couldn't be created.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },
}

/// A specialized Result type for pupilwatch operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::ConfigLoad(Box::new(err))
    }
}

impl Error {
    /// Create a frame source error.
    #[must_use]
    pub fn frame_source(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::FrameSource {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a cascade parse error.
    #[must_use]
    pub fn cascade(message: impl Into<String>) -> Self {
        Self::CascadeParse {
            message: message.into(),
        }
    }

    /// Create a configuration validation error.
    #[must_use]
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            message: message.into(),
        }
    }

    /// Create a chart rendering error.
    #[must_use]
    pub fn render(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Render {
            path: path.into(),
            message: message.into(),
        }
    }
}
