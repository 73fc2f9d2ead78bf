//! Error types for data operations.

use crate::types::RecordKey;
use thiserror::Error;

/// Main error type for adapter and store operations.
///
/// Every variant maps onto one [`ErrorKind`] so consumers can branch on
/// the machine-checkable kind while showing the display message to users.
#[derive(Debug, Error)]
pub enum DataError {
    /// Transport-level failure: timeout, DNS, connection refused, or a
    /// response body that does not decode into the expected shape.
    #[error("network error: {0}")]
    Network(String),

    /// The remote endpoint answered with a non-2xx status.
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// Persistent store failure: I/O, lock contention, corruption, or a
    /// row payload that fails to decode.
    #[error("store error: {0}")]
    Store(String),

    /// A by-key lookup found no record.
    #[error("record not found: {0}")]
    NotFound(RecordKey),
}

impl DataError {
    /// The machine-checkable kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            DataError::Network(_) => ErrorKind::Network,
            DataError::Http { status, .. } => ErrorKind::Http(*status),
            DataError::Store(_) => ErrorKind::Store,
            DataError::NotFound(_) => ErrorKind::NotFound,
        }
    }
}

impl From<std::io::Error> for DataError {
    fn from(e: std::io::Error) -> Self {
        DataError::Store(format!("IO error: {}", e))
    }
}

impl From<rmp_serde::encode::Error> for DataError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        DataError::Store(format!("encode error: {}", e))
    }
}

impl From<rmp_serde::decode::Error> for DataError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        DataError::Store(format!("decode error: {}", e))
    }
}

/// Error taxonomy carried inside a failed result state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Network,
    Http(u16),
    Store,
    NotFound,
}

/// Result type for data operations.
pub type Result<T> = std::result::Result<T, DataError>;
