//! Error types for grid processing.

use thiserror::Error;

/// Errors that can occur during resampling or Zarr encoding.
#[derive(Error, Debug)]
pub enum GridProcessorError {
    /// Failed to open a Zarr node.
    #[error("failed to open grid: {0}")]
    OpenFailed(String),

    /// Failed to read data from a Zarr array.
    #[error("failed to read grid data: {0}")]
    ReadFailed(String),

    /// Invalid or missing record metadata.
    #[error("invalid grid metadata: {0}")]
    InvalidMetadata(String),

    /// Storage/IO error while writing.
    #[error("storage error: {0}")]
    StorageError(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// The source swath cannot be mapped onto the target grid.
    #[error("projection error: {0}")]
    ProjectionError(String),
}

impl GridProcessorError {
    /// Create an OpenFailed error.
    pub fn open_failed(msg: impl Into<String>) -> Self {
        Self::OpenFailed(msg.into())
    }

    /// Create a ReadFailed error.
    pub fn read_failed(msg: impl Into<String>) -> Self {
        Self::ReadFailed(msg.into())
    }

    /// Create an InvalidMetadata error.
    pub fn invalid_metadata(msg: impl Into<String>) -> Self {
        Self::InvalidMetadata(msg.into())
    }

    /// Create a StorageError.
    pub fn storage_error(msg: impl Into<String>) -> Self {
        Self::StorageError(msg.into())
    }
}

impl From<std::io::Error> for GridProcessorError {
    fn from(err: std::io::Error) -> Self {
        Self::StorageError(err.to_string())
    }
}

impl From<serde_json::Error> for GridProcessorError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidMetadata(err.to_string())
    }
}

/// Result type for grid processor operations.
pub type Result<T> = std::result::Result<T, GridProcessorError>;
