// Error types for the ingestion pipeline

use std::time::Duration;
use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, IngestError>;

/// Failures of the external geolocation lookup
#[derive(Debug, Error)]
pub enum GeoLookupError {
    /// Lookup exceeded its deadline
    #[error("geolocation lookup timed out after {0:?}")]
    Timeout(Duration),

    /// Service could not be reached
    #[error("geolocation service unreachable: {0}")]
    Unreachable(String),

    /// Service answered with a non-success status
    #[error("geolocation service returned status {0}")]
    Status(u16),

    /// Response body was not a usable location record
    #[error("malformed geolocation response: {0}")]
    Malformed(String),

    /// Lookup address was not an IP address; no request was made
    #[error("not an IP address: {0:?}")]
    InvalidAddress(String),
}

/// Failures of the durable event store
#[derive(Debug, Error)]
pub enum StorageError {
    /// Waiting for a storage handle or lock exceeded its deadline
    #[error("storage operation timed out")]
    Timeout,

    /// Backend reported an error
    #[error("storage error: {0}")]
    Backend(String),

    /// A persisted row could not be read back
    #[error("corrupt stored record: {0}")]
    Corrupt(String),
}

impl StorageError {
    /// Create a backend error
    pub fn backend(msg: impl Into<String>) -> Self {
        StorageError::Backend(msg.into())
    }

    /// Create a corrupt-record error
    pub fn corrupt(msg: impl Into<String>) -> Self {
        StorageError::Corrupt(msg.into())
    }
}

/// Errors surfaced by `IngestPipeline::accept`
#[derive(Debug, Error)]
pub enum IngestError {
    /// Client supplied an event with missing fields or an undecodable payload
    #[error("invalid event: {0}")]
    Validation(String),

    /// Geolocation failed and the pipeline is configured to reject
    #[error(transparent)]
    GeoLookup(#[from] GeoLookupError),

    /// Durable write or read failed
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl IngestError {
    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        IngestError::Validation(msg.into())
    }
}
