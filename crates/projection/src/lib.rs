//! Coordinate transformations used by the resampling kernel.
//!
//! Implements the geostationary view geometry from scratch without external
//! dependencies.

pub mod geostationary;

pub use geostationary::{normalize_lon, FixedGrid, Geostationary};
