//! Projection utilities for grid processing.
//!
//! This module maps target pixels back into source swaths and interpolates
//! the swath values.

pub mod interpolation;
pub mod reproject;

pub use interpolation::{bilinear_interpolate, cubic_interpolate, nearest_interpolate};
