//! Tracing subscriber set-up for the plugin binary.

use thiserror::Error;
use tracing_subscriber::EnvFilter;

/// Raised when the log filter or the global subscriber cannot be installed.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum LoggingError {
    /// The configured level is not a valid filter directive.
    #[error("invalid log filter '{level}': {message}")]
    Filter {
        /// Level that failed to parse.
        level: String,
        /// Parser error.
        message: String,
    },
    /// A global subscriber is already installed.
    #[error("failed to install log subscriber: {0}")]
    Install(String),
}

/// Builds the filter from `RUST_LOG`, falling back to `level`.
///
/// # Errors
///
/// Returns [`LoggingError::Filter`] when `RUST_LOG` is unset or invalid and
/// `level` does not parse either.
pub fn filter(level: &str) -> Result<EnvFilter, LoggingError> {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|err| LoggingError::Filter {
            level: level.to_owned(),
            message: err.to_string(),
        })
}

/// Installs a compact `fmt` subscriber writing to stderr.
///
/// # Errors
///
/// Returns [`LoggingError`] when the filter is invalid or a subscriber is
/// already installed.
pub fn init(level: &str) -> Result<(), LoggingError> {
    tracing_subscriber::fmt()
        .with_env_filter(filter(level)?)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .try_init()
        .map_err(|err| LoggingError::Install(err.to_string()))
}
