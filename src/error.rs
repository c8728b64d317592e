//! # Error Types
//!
//! Custom error types for the ground station using `thiserror`.
//!
//! Every failure in the ingest path is local and recoverable. The enums
//! below exist so that each stage can report *what* went wrong to the
//! pipeline, which logs it and emits a diagnostic event instead of
//! propagating it further.

use std::time::Duration;
use thiserror::Error;

/// Main error type for the ground station
#[derive(Debug, Error)]
pub enum GroundStationError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Link errors surfaced outside the reconnect loop
    #[error("Link error: {0}")]
    Link(#[from] LinkError),

    /// Durable log or record export errors
    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),
}

/// Failure to open or read from the sensor link.
///
/// Always recovered by the reconnect loop; never fatal.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LinkError {
    /// The device does not exist (unplugged, wrong path)
    #[error("Link device not found: {0}")]
    NotFound(String),

    /// The device exists but could not be opened
    #[error("Failed to open {address}: {reason}")]
    Open { address: String, reason: String },

    /// Read failed on an open link
    #[error("Link I/O error: {0}")]
    Io(String),

    /// No complete line arrived within the read timeout
    #[error("No data received for {0:?}")]
    Timeout(Duration),

    /// The remote end closed the stream
    #[error("Link closed by peer")]
    Closed,

    /// `read_line` was called without an open session
    #[error("Link is not open")]
    NotOpen,
}

/// Failure to turn a well-formed line into a [`TelemetryRecord`](crate::frame::TelemetryRecord).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("Expected {expected} fields, found {found}")]
    FieldCountMismatch { expected: usize, found: usize },

    #[error("Field {index} ({field}) is not a finite number: {value:?}")]
    NotNumeric {
        index: usize,
        field: &'static str,
        value: String,
    },
}

/// Failure to append to the durable log or the record export.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Violation of the store's append contract.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Record timestamp {record} precedes latest stored timestamp {latest}")]
    OutOfOrder { latest: String, record: String },
}

/// Result type alias for the ground station
pub type Result<T> = std::result::Result<T, GroundStationError>;
