//! Command-line interface for pupilwatch.
//!
//! This module provides the CLI structure for the `pupilwatch` binary.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub use commands::{ConfigCommand, PlotCommand, RunCommand, SessionsCommand, StatusCommand};

/// pupilwatch - Measure pupil dilation in recorded eye video
///
/// Finds the eyes in every frame with a Haar cascade, locates the pupil with
/// a Hough circle search and charts the pupil radius over the recording.
#[derive(Debug, Parser)]
#[command(name = "pupilwatch")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to custom configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run a dilation test on a recording
    Run(RunCommand),

    /// Manage recorded sessions
    #[command(subcommand)]
    Sessions(SessionsCommand),

    /// Chart a recorded session
    Plot(PlotCommand),

    /// Show database status
    Status(StatusCommand),

    /// View or validate configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

impl Cli {
    /// Get the verbosity level based on flags.
    #[must_use]
    pub fn verbosity(&self) -> crate::logging::Verbosity {
        if self.quiet {
            crate::logging::Verbosity::Quiet
        } else {
            match self.verbose {
                0 => crate::logging::Verbosity::Normal,
                1 => crate::logging::Verbosity::Verbose,
                _ => crate::logging::Verbosity::Trace,
            }
        }
    }
}
