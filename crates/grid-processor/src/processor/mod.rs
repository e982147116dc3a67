//! Readers for committed records.

mod zarr;

pub use zarr::ZarrRecordReader;
