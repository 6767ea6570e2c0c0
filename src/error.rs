//! Error types for lslrec
//!
//! Defines the recorder's error type using thiserror for clear error
//! propagation across the writer and the recording threads.

use thiserror::Error;

/// Main error type for the recorder
#[derive(Error, Debug)]
pub enum Error {
    /// File I/O errors on the output file(s)
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A bounded wait elapsed before the operation completed.
    ///
    /// Treated as transient by the recording threads: an inlet that is
    /// slow to subscribe is flagged delayed, and a slow time-correction
    /// query skips one measurement.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Errors reported by the stream source backend
    #[error("Stream source error: {0}")]
    Source(String),

    /// Sample values do not line up with the timestamp count
    #[error("Sample count mismatch: got {got} values, expected {expected}")]
    SampleMismatch { expected: usize, got: usize },

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid state for the requested operation
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

/// Convenience Result type using the lslrec Error
pub type Result<T> = std::result::Result<T, Error>;
