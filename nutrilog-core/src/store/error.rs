//! Remote store error types.

use thiserror::Error;

/// Errors reported by a remote store, catalog or change feed.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    /// The store could not be reached.
    #[error("Connection error: {0}")]
    Connection(String),
    /// The store answered with a non-success status.
    #[error("Server returned status {status}: {message}")]
    Status { status: u16, message: String },
    /// The addressed record does not exist remotely.
    #[error("Record not found: {0}")]
    NotFound(String),
    /// The response body could not be decoded.
    #[error("Invalid response: {0}")]
    Decode(String),
    /// Change feed transport error.
    #[error("WebSocket error: {0}")]
    WebSocket(String),
    /// No response within the request timeout.
    #[error("Request timed out")]
    Timeout,
    /// The store refused the request.
    #[error("Rejected by store: {0}")]
    Rejected(String),
}

pub type StoreResult<T> = Result<T, StoreError>;
