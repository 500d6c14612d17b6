//! Error types for IDEALEM

use thiserror::Error;

/// Result type alias for IDEALEM operations
pub type Result<T> = std::result::Result<T, IdealemError>;

/// IDEALEM error types
///
/// Too-short input is deliberately absent: `Encoder::compress` reports it
/// as `None` so callers can skip the series instead of failing.
#[derive(Error, Debug)]
pub enum IdealemError {
    /// IO operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Encoded stream cannot be replayed
    #[error("Malformed stream at token {position}: {reason}")]
    MalformedStream { position: usize, reason: String },

    /// Invalid data format
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    /// Checksum mismatch
    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    /// Data corruption detected
    #[error("Data corruption: {0}")]
    Corruption(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Input samples violate a precondition
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Timestamp or time range could not be parsed or represented
    #[error("Timestamp error: {0}")]
    Timestamp(String),

    /// No compressed record matches the request
    #[error("Record not found: {0}")]
    RecordNotFound(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl IdealemError {
    /// Build a `MalformedStream` error
    pub fn malformed(position: usize, reason: impl Into<String>) -> Self {
        IdealemError::MalformedStream {
            position,
            reason: reason.into(),
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, IdealemError::Io(_))
    }

    /// Check if error indicates corruption
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            IdealemError::MalformedStream { .. }
                | IdealemError::Corruption(_)
                | IdealemError::ChecksumMismatch { .. }
        )
    }
}
