//! Tracing setup for the `pupilwatch` binary.
//!
//! Frame-by-frame detection results are logged at trace level, and eye
//! loss or missing pupils at debug level. Logs go to stderr so `--json`
//! output on stdout stays parseable.

use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// How much the binary logs, chosen by `-q` and repeated `-v`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    /// `-q`: errors only.
    Quiet,
    /// Session start, summary and warnings.
    #[default]
    Normal,
    /// `-v`: eye loss, skipped frames and storage activity.
    Verbose,
    /// `-vv`: every detected eye and pupil.
    Trace,
}

impl Verbosity {
    /// Most detailed level emitted at this verbosity.
    #[must_use]
    pub fn max_level(&self) -> Level {
        match self {
            Self::Quiet => Level::ERROR,
            Self::Normal => Level::INFO,
            Self::Verbose => Level::DEBUG,
            Self::Trace => Level::TRACE,
        }
    }

    /// Filter directive used when `RUST_LOG` is unset. Dependencies stay
    /// silent so decoder and database chatter never mixes in.
    #[must_use]
    pub fn default_directive(&self) -> String {
        format!("pupilwatch={}", self.max_level())
    }
}

/// Install the stderr subscriber. `RUST_LOG` wins over `verbosity`.
///
/// ```no_run
/// use pupilwatch::{init_logging, logging::Verbosity};
///
/// init_logging(Verbosity::Verbose);
/// ```
pub fn init_logging(verbosity: Verbosity) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(verbosity.default_directive()));

    let subscriber = tracing_subscriber::registry().with(env_filter).with(
        fmt::layer()
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .with_writer(std::io::stderr),
    );

    // Tests and embedding applications may have installed one already
    let _ = subscriber.try_init();
}

/// Route warnings from code under test through the test harness output.
#[cfg(test)]
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("pupilwatch=warn")
        .with_test_writer()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quiet_keeps_only_errors() {
        assert_eq!(Verbosity::Quiet.max_level(), Level::ERROR);
        assert_eq!(Verbosity::Trace.max_level(), Level::TRACE);
        assert!(Verbosity::Verbose.max_level() > Verbosity::Normal.max_level());
    }

    #[test]
    fn test_default_is_normal() {
        assert_eq!(Verbosity::default(), Verbosity::Normal);
        assert_eq!(Verbosity::default().max_level(), Level::INFO);
    }

    #[test]
    fn test_default_directive_scopes_to_crate() {
        assert_eq!(Verbosity::Normal.default_directive(), "pupilwatch=INFO");
        assert_eq!(Verbosity::Trace.default_directive(), "pupilwatch=TRACE");
        assert!(EnvFilter::try_new(Verbosity::Quiet.default_directive()).is_ok());
    }

    #[test]
    fn test_repeated_init_is_harmless() {
        init_test_logging();
        init_logging(Verbosity::Quiet);
        init_logging(Verbosity::Trace);
    }
}
