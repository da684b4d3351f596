//! Custom error types for the application.
//!
//! This module defines the primary error type, `DaqError`, for the whole crate.
//! Using the `thiserror` crate, it provides a centralized and consistent way to handle
//! the different kinds of errors that can occur, from configuration mistakes to
//! malformed device replies and failed bookkeeping inside an acquisition loop.
//!
//! ## Error Hierarchy
//!
//! - **`Config`**: Semantic errors in operator-supplied settings, such as an empty save
//!   directory or a malformed channel selector. Surfaced immediately, no state change.
//! - **`Connection`**: A device could not be reached. Fatal to `start`, the station stays idle.
//! - **`Protocol`** / **`Parse`**: Malformed or undersized device replies. Non-fatal while
//!   polling: the reading is substituted and the loop continues.
//! - **`Validation`** / **`BufferOrder`**: Invalid query arguments or a broken buffer invariant.
//! - **`LoopFatal`**: Anything else that escapes a poll cycle. Forces the station to stop.
//! - **`AlreadyRunning`** / **`Busy`**: Lifecycle guards.
//! - **`Io`**, **`Csv`**, **`Figment`**: Wrapped library errors.
//!
//! By using `#[from]`, `DaqError` can be created from the underlying error types,
//! simplifying error handling throughout the crate with the `?` operator.

use crate::station::StationId;
use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

/// Primary error type for the acquisition engine.
#[derive(Error, Debug)]
pub enum DaqError {
    /// Invalid operator-supplied settings
    #[error("Configuration error: {0}")]
    Config(String),

    /// Device unreachable or the session dropped
    #[error("Connection error: {0}")]
    Connection(String),

    /// Malformed, unexpected or missing binary reply
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Unparseable ASCII reply
    #[error("Parse error: {0}")]
    Parse(String),

    /// Invalid query arguments
    #[error("Validation error: {0}")]
    Validation(String),

    /// Append would break the buffer's time order
    #[error("Sample at {incoming} precedes buffer tail at {tail}")]
    BufferOrder {
        /// Timestamp of the current tail
        tail: String,
        /// Timestamp of the rejected sample
        incoming: String,
    },

    /// Error that ends an acquisition loop
    #[error("Acquisition loop failed: {0}")]
    LoopFatal(String),

    /// `start` on a collecting station
    #[error("{0} is already running")]
    AlreadyRunning(StationId),

    /// Shutdown refused while stations collect
    #[error("Stations still collecting data, stop them first: {}", format_stations(.0))]
    Busy(Vec<StationId>),

    /// File or socket error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Session file write error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Settings file could not be loaded
    #[error("Configuration load error: {0}")]
    Figment(#[from] Box<figment::Error>),
}

impl From<figment::Error> for DaqError {
    fn from(err: figment::Error) -> Self {
        DaqError::Figment(Box::new(err))
    }
}

fn format_stations(stations: &[StationId]) -> String {
    stations
        .iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Coarse classification handed to the operator surface alongside error messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// [`DaqError::Config`] and settings load failures
    Config,
    /// [`DaqError::Connection`]
    Connection,
    /// [`DaqError::Protocol`]
    Protocol,
    /// [`DaqError::Parse`]
    Parse,
    /// Bad query arguments and buffer order violations
    Validation,
    /// [`DaqError::LoopFatal`]
    LoopFatal,
    /// Lifecycle guards
    Busy,
    /// File and CSV errors
    Io,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ErrorKind::Config => "config",
            ErrorKind::Connection => "connection",
            ErrorKind::Protocol => "protocol",
            ErrorKind::Parse => "parse",
            ErrorKind::Validation => "validation",
            ErrorKind::LoopFatal => "loop_fatal",
            ErrorKind::Busy => "busy",
            ErrorKind::Io => "io",
        };
        write!(f, "{}", label)
    }
}

impl DaqError {
    /// Classify this error for event reporting.
    pub fn kind(&self) -> ErrorKind {
        match self {
            DaqError::Config(_) | DaqError::Figment(_) => ErrorKind::Config,
            DaqError::Connection(_) => ErrorKind::Connection,
            DaqError::Protocol(_) => ErrorKind::Protocol,
            DaqError::Parse(_) => ErrorKind::Parse,
            DaqError::Validation(_) | DaqError::BufferOrder { .. } => ErrorKind::Validation,
            DaqError::LoopFatal(_) => ErrorKind::LoopFatal,
            DaqError::AlreadyRunning(_) | DaqError::Busy(_) => ErrorKind::Busy,
            DaqError::Io(_) | DaqError::Csv(_) => ErrorKind::Io,
        }
    }

    /// Whether a poll cycle may continue after this error with a substituted reading.
    ///
    /// Only device-side failures qualify; bookkeeping failures escalate to a forced stop.
    pub fn is_device_fault(&self) -> bool {
        matches!(
            self,
            DaqError::Connection(_) | DaqError::Protocol(_) | DaqError::Parse(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn busy_lists_every_station() {
        let err = DaqError::Busy(vec![StationId::new(2).unwrap(), StationId::new(5).unwrap()]);
        assert_eq!(
            err.to_string(),
            "Stations still collecting data, stop them first: Station 2, Station 5"
        );
        assert_eq!(err.kind(), ErrorKind::Busy);
    }

    #[test]
    fn device_faults_are_recoverable() {
        assert!(DaqError::Protocol("short".into()).is_device_fault());
        assert!(DaqError::Parse("bad".into()).is_device_fault());
        assert!(!DaqError::LoopFatal("disk".into()).is_device_fault());
        assert!(!DaqError::Io(std::io::Error::other("disk full")).is_device_fault());
    }
}
