//! Error types for the record store.

use thiserror::Error;

/// Errors raised by the record store.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The backend could not be reached or an I/O operation failed.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The store target string or its credentials are invalid.
    #[error("invalid store target: {0}")]
    InvalidTarget(String),

    /// The store was created for a different grid.
    #[error("store grid mismatch: {0}")]
    GridMismatch(String),

    /// A record is already committed at the coordinate.
    #[error("record already committed at {0}")]
    AlreadyCommitted(String),

    /// No committed record at the coordinate.
    #[error("no record at {0}")]
    NotFound(String),

    /// Encoding or decoding a record failed.
    #[error("record encoding error: {0}")]
    Encoding(String),

    /// Stored metadata could not be parsed.
    #[error("corrupt store metadata: {0}")]
    Corrupt(String),
}

impl StorageError {
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    /// Whether this error means the backend itself is unusable.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

impl From<object_store::Error> for StorageError {
    fn from(err: object_store::Error) -> Self {
        Self::Unavailable(err.to_string())
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        Self::Unavailable(err.to_string())
    }
}

impl From<grid_processor::GridProcessorError> for StorageError {
    fn from(err: grid_processor::GridProcessorError) -> Self {
        Self::Encoding(err.to_string())
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StorageError>;
