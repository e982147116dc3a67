//! Decode stage: raw granule → calibrated channel imagery.

#[cfg(feature = "netcdf")]
mod goes;

use std::path::Path;

use sat_common::{scan_time_from_filename, DecodedChannelFrame, SourceFileRef};
use thiserror::Error;

use crate::error::{ConversionError, Result};

#[cfg(feature = "netcdf")]
pub use goes::GoesNetcdfDecoder;

/// Why a granule could not be decoded.
#[derive(Debug, Error)]
pub enum DecodeFailure {
    #[error("corrupt container: {0}")]
    Corrupt(String),
    #[error("missing channel: {0}")]
    MissingChannel(String),
    #[error("instrument mode mismatch: {0}")]
    ModeMismatch(String),
}

/// Instrument-specific granule decoder.
///
/// Decoding is CPU bound and runs on the blocking pool.
pub trait InstrumentDecoder: Send + Sync {
    /// Short name recorded in provenance.
    fn name(&self) -> &str;

    fn decode(
        &self,
        path: &Path,
        file: &SourceFileRef,
    ) -> std::result::Result<DecodedChannelFrame, DecodeFailure>;
}

/// Decode one granule and check the result belongs to the expected
/// (channel, timestamp) slot.
///
/// When the identifier carries a scan start time it must fall inside the
/// slot `[timestamp, timestamp + step)`.
pub fn decode_granule(
    decoder: &dyn InstrumentDecoder,
    path: &Path,
    file: &SourceFileRef,
    step: chrono::Duration,
) -> Result<DecodedChannelFrame> {
    let failed = |reason: String| ConversionError::Decode {
        identifier: file.identifier.clone(),
        reason,
    };

    if let Some(scan) = scan_time_from_filename(&file.identifier) {
        if scan < file.timestamp || scan >= file.timestamp + step {
            return Err(failed(format!(
                "scan started {} outside slot {} + {}s",
                scan,
                file.timestamp,
                step.num_seconds()
            )));
        }
    }

    let frame = decoder
        .decode(path, file)
        .map_err(|e| failed(e.to_string()))?;

    if frame.channel != file.channel {
        return Err(failed(format!(
            "decoded channel {} but expected {}",
            frame.channel, file.channel
        )));
    }
    if frame.timestamp != file.timestamp {
        return Err(failed(format!(
            "decoded timestamp {} but expected {}",
            frame.timestamp, file.timestamp
        )));
    }

    Ok(frame)
}
