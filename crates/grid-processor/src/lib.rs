//! Resampling and chunked encoding for satellite channel frames.
//!
//! This crate holds the CPU-bound halves of the conversion pipeline:
//!
//! - **Resampling**: map every target pixel centre back into a decoded
//!   swath and interpolate, marking uncovered pixels with NaN
//! - **Zarr V3 records**: write one timestep (one array per channel, chunked
//!   along the grid's natural tiling) and read channels back
//!
//! # Architecture
//!
//! ```text
//! DecodedChannelFrame ──► resample_frame(grid, method) ──► Vec<f32> (rows x cols)
//!
//! TimestepFrame ──► ZarrWriter::write_record ──► group "/" + array "/{channel}"
//!                                                 (chunks = grid tile)
//! ```

pub mod config;
pub mod error;
pub mod processor;
pub mod projection;
pub mod types;
pub mod writer;

// Re-export commonly used types at crate root
pub use config::{GridProcessorConfig, ZarrCompression};
pub use error::{GridProcessorError, Result};
pub use processor::ZarrRecordReader;
pub use projection::{bilinear_interpolate, cubic_interpolate, nearest_interpolate};
pub use projection::reproject::resample_frame;
pub use types::InterpolationMethod;
pub use writer::{RecordAttributes, ZarrWriteResult, ZarrWriter};
