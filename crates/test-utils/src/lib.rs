//! Shared test utilities for the sat-convert workspace.
//!
//! This crate provides common testing infrastructure including:
//! - Test data path helpers and skip macros for optional granules
//! - Synthetic swath and grid generators
//! - Grid and timestamp fixtures
//!
//! # Usage
//!
//! ```toml
//! [dev-dependencies]
//! test-utils = { path = "../test-utils" }
//! ```

pub mod fixtures;
pub mod generators;
pub mod paths;

pub use fixtures::*;
pub use generators::*;
pub use paths::*;

/// Macro to skip a test if the required file is not found.
///
/// Real instrument granules are large and not checked in; tests that need
/// one print a skip message and return early when it is absent.
///
/// ```ignore
/// let path = require_test_file!("OR_ABI-L2-CMIPF-M6C13_G16_s20241211800214_e20241211809522_c20241211809591.nc");
/// ```
#[macro_export]
macro_rules! require_test_file {
    ($name:expr) => {{
        match $crate::find_test_file($name) {
            Some(path) => path,
            None => {
                eprintln!(
                    "SKIPPED: Test file '{}' not found. Download test data or set TEST_DATA_DIR.",
                    $name
                );
                return;
            }
        }
    }};
}

/// Macro for approximate floating-point equality assertions.
///
/// ```ignore
/// use test_utils::assert_approx_eq;
///
/// assert_approx_eq!(1.0001_f64, 1.0_f64, 0.001_f64); // passes
/// assert_approx_eq!(1.1_f32, 1.0_f32, 0.001_f32);    // fails
/// ```
#[macro_export]
macro_rules! assert_approx_eq {
    ($left:expr, $right:expr, $epsilon:expr) => {{
        let left: f64 = $left as f64;
        let right: f64 = $right as f64;
        let epsilon: f64 = $epsilon as f64;
        let diff = (left - right).abs();
        if !(diff <= epsilon) {
            panic!(
                "assertion failed: `(left ≈ right)`\n  left: `{:?}`,\n right: `{:?}`,\n  diff: `{:?}` > epsilon `{:?}`",
                left, right, diff, epsilon
            );
        }
    }};
}

/// Asserts two float slices are equal element-wise, treating NaN == NaN.
#[macro_export]
macro_rules! assert_grid_eq {
    ($left:expr, $right:expr) => {{
        let left: &[f32] = &$left;
        let right: &[f32] = &$right;
        assert_eq!(left.len(), right.len(), "grid lengths differ");
        for (idx, (a, b)) in left.iter().zip(right.iter()).enumerate() {
            if !((a.is_nan() && b.is_nan()) || a == b) {
                panic!("grids differ at index {}: {} vs {}", idx, a, b);
            }
        }
    }};
}
