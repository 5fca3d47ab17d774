//! CLI command definitions.
//!
//! This module defines the structure of all CLI subcommands.

use std::path::PathBuf;

use clap::{Args, Subcommand};

/// Run command arguments.
#[derive(Debug, Args)]
pub struct RunCommand {
    /// Recorded test: a video file, an animated GIF or a directory of frames
    /// (defaults to `input.video_path`)
    pub video: Option<PathBuf>,

    /// Haar cascade XML used to find the eyes
    #[arg(long, value_name = "FILE")]
    pub cascade: Option<PathBuf>,

    /// Where to write the dilation chart (.svg or .png)
    #[arg(long, value_name = "FILE")]
    pub plot: Option<PathBuf>,

    /// Write annotated frames into this directory
    #[arg(long, value_name = "DIR")]
    pub annotate_dir: Option<PathBuf>,

    /// Stop after this many frames
    #[arg(long, value_name = "N")]
    pub max_frames: Option<u64>,

    /// Don't record the session in the database
    #[arg(long)]
    pub no_save: bool,

    /// Print the session report as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Stored session commands.
#[derive(Debug, Subcommand)]
pub enum SessionsCommand {
    /// List recorded sessions, newest first
    List {
        /// Maximum number of sessions to show
        #[arg(short, long, default_value = "20")]
        limit: usize,

        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Show one session and its measurements
    Show {
        /// Session id
        id: i64,

        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Delete a session
    Delete {
        /// Session id
        id: i64,
    },

    /// Delete all but the most recent sessions
    Prune {
        /// Number of sessions to keep
        #[arg(short, long)]
        keep: usize,
    },
}

/// Plot command arguments.
#[derive(Debug, Args)]
pub struct PlotCommand {
    /// Session id
    pub id: i64,

    /// Output file (.svg or .png), defaults to `plot.output_path`
    #[arg(short, long, value_name = "FILE")]
    pub out: Option<PathBuf>,
}

/// Status command arguments.
#[derive(Debug, Args)]
pub struct StatusCommand {
    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Configuration commands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Show the configuration file path
    Path,

    /// Validate configuration
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}
