//! Error types shared by the conversion crates.

use thiserror::Error;

/// Result type alias using CommonError.
pub type CommonResult<T> = Result<T, CommonError>;

/// Validation errors raised by the shared data model.
#[derive(Debug, Error)]
pub enum CommonError {
    #[error("Invalid grid definition: {0}")]
    InvalidGrid(String),

    #[error("Invalid time interval: {0}")]
    InvalidInterval(String),

    #[error("Invalid swath: {0}")]
    InvalidSwath(String),

    #[error("Shape mismatch for channel '{channel}': expected {expected_rows}x{expected_cols} ({expected_len} values), got {actual_len}")]
    ShapeMismatch {
        channel: String,
        expected_rows: usize,
        expected_cols: usize,
        expected_len: usize,
        actual_len: usize,
    },
}

impl CommonError {
    pub fn invalid_grid(msg: impl Into<String>) -> Self {
        Self::InvalidGrid(msg.into())
    }

    pub fn invalid_interval(msg: impl Into<String>) -> Self {
        Self::InvalidInterval(msg.into())
    }
}
