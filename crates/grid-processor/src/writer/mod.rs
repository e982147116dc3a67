//! Zarr writer for timestep records.
//!
//! Used by the store backend to encode one timestep into a scratch
//! directory before it is uploaded and committed.

mod zarr_writer;

pub use zarr_writer::{RecordAttributes, ZarrWriteResult, ZarrWriter};
