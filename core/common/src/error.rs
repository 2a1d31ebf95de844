//! Common error types for StockSync.

use thiserror::Error;

/// Top-level error type for StockSync operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Local persistence failed (quota, corruption, unavailable backend).
    #[error("Storage error: {0}")]
    Storage(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The server could not be reached (connect failure, timeout, broken body).
    #[error("Network error: {0}")]
    Network(String),

    /// The server answered with a non-success status.
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl Error {
    /// Transport failures are recoverable by queueing or by reading the cache.
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Network(_) | Error::Http { .. })
    }

    /// Failures of the local persistence layer.
    pub fn is_storage(&self) -> bool {
        matches!(
            self,
            Error::Storage(_) | Error::Io(_) | Error::Serialization(_)
        )
    }

    /// HTTP status carried by this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
