//! Error types for the conversion pipeline.

use chrono::{DateTime, Utc};
use thiserror::Error;

use storage::StorageError;

/// Errors raised by pipeline stages.
///
/// Per-file and per-timestep errors are absorbed into the run ledger; only
/// the variants for which [`ConversionError::is_fatal`] holds abort a run.
#[derive(Error, Debug)]
pub enum ConversionError {
    #[error("Catalog resolution failed: {0}")]
    CatalogResolution(String),

    #[error("Transient acquisition failure for {identifier}: {reason}")]
    TransientAcquisition { identifier: String, reason: String },

    #[error("Acquisition failed for {identifier}: {reason}")]
    AcquisitionFailed { identifier: String, reason: String },

    #[error("Failed to decode {identifier}: {reason}")]
    Decode { identifier: String, reason: String },

    #[error("Failed to resample {identifier}: {reason}")]
    Resample { identifier: String, reason: String },

    #[error("Insufficient coverage for {channel} at {timestamp}: {fraction:.4} < {minimum:.4}")]
    InsufficientCoverage {
        channel: String,
        timestamp: DateTime<Utc>,
        fraction: f64,
        minimum: f64,
    },

    #[error("Timestep {0} is already committed")]
    DuplicateTimestep(String),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),
}

impl ConversionError {
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfiguration(msg.into())
    }

    pub fn store_unavailable(msg: impl Into<String>) -> Self {
        Self::StoreUnavailable(msg.into())
    }

    /// Whether this error aborts the whole run.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::StoreUnavailable(_) | Self::InvalidConfiguration(_) | Self::ShapeMismatch(_)
        )
    }
}

impl From<StorageError> for ConversionError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::AlreadyCommitted(coordinate) => Self::DuplicateTimestep(coordinate),
            StorageError::InvalidTarget(msg) | StorageError::GridMismatch(msg) => {
                Self::InvalidConfiguration(msg)
            }
            other => Self::StoreUnavailable(other.to_string()),
        }
    }
}

impl From<sat_common::CommonError> for ConversionError {
    fn from(err: sat_common::CommonError) -> Self {
        match err {
            sat_common::CommonError::ShapeMismatch { .. } => Self::ShapeMismatch(err.to_string()),
            other => Self::InvalidConfiguration(other.to_string()),
        }
    }
}

/// Result type for conversion operations.
pub type Result<T> = std::result::Result<T, ConversionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(ConversionError::store_unavailable("down").is_fatal());
        assert!(ConversionError::invalid_config("bad grid").is_fatal());
        assert!(!ConversionError::DuplicateTimestep("t".into()).is_fatal());
        assert!(!ConversionError::AcquisitionFailed {
            identifier: "a".into(),
            reason: "404".into()
        }
        .is_fatal());
    }

    #[test]
    fn test_storage_error_mapping() {
        assert!(matches!(
            ConversionError::from(StorageError::AlreadyCommitted("t".into())),
            ConversionError::DuplicateTimestep(_)
        ));
        assert!(matches!(
            ConversionError::from(StorageError::GridMismatch("g".into())),
            ConversionError::InvalidConfiguration(_)
        ));
        assert!(matches!(
            ConversionError::from(StorageError::Unavailable("io".into())),
            ConversionError::StoreUnavailable(_)
        ));
    }
}
