//! Common types and utilities shared across the satellite conversion crates.

pub mod error;
pub mod frame;
pub mod grid;
pub mod time;

pub use error::{CommonError, CommonResult};
pub use frame::{
    ChannelProvenance, DecodedChannelFrame, NativeGeolocation, ResampledChannelFrame,
    SourceFileRef, Swath, TimestepFrame,
};
pub use grid::{GeostationaryView, GridDefinition, GridProjection, SweepAxis, TileShape};
pub use time::{coordinate_key, parse_coordinate_key, scan_time_from_filename, TimeInterval};
