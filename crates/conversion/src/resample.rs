//! Resample stage with the coverage quality gate.

use grid_processor::{resample_frame, InterpolationMethod};
use sat_common::{DecodedChannelFrame, GridDefinition, ResampledChannelFrame};
use tracing::debug;

use crate::error::{ConversionError, Result};

/// Maps a decoded swath onto the target grid.
///
/// Implementations must return exactly `grid.len()` values in row-major
/// order, with NaN wherever the source has no valid coverage.
pub trait Resampler: Send + Sync {
    /// Method name recorded in provenance.
    fn method(&self) -> &str;

    fn resample(&self, frame: &DecodedChannelFrame, grid: &GridDefinition) -> Result<Vec<f32>>;
}

/// Default resampler backed by the grid-processor interpolation kernels.
#[derive(Debug, Clone, Copy, Default)]
pub struct KernelResampler {
    method: InterpolationMethod,
}

impl KernelResampler {
    pub fn new(method: InterpolationMethod) -> Self {
        Self { method }
    }
}

impl Resampler for KernelResampler {
    fn method(&self) -> &str {
        self.method.as_str()
    }

    fn resample(&self, frame: &DecodedChannelFrame, grid: &GridDefinition) -> Result<Vec<f32>> {
        resample_frame(frame, grid, self.method).map_err(|e| ConversionError::Resample {
            identifier: frame.source.clone(),
            reason: e.to_string(),
        })
    }
}

/// Resample one decoded channel and apply the coverage gate.
///
/// A result shaped differently from the grid is a `ShapeMismatch` defect;
/// a valid fraction below `min_coverage` is `InsufficientCoverage`.
pub fn resample_channel(
    resampler: &dyn Resampler,
    frame: &DecodedChannelFrame,
    grid: &GridDefinition,
    min_coverage: f64,
) -> Result<ResampledChannelFrame> {
    let data = resampler.resample(frame, grid)?;

    let resampled = ResampledChannelFrame::new(
        frame.channel.clone(),
        frame.timestamp,
        grid,
        data,
        frame.source.clone(),
        frame.decoder.clone(),
        resampler.method(),
        frame.units.clone(),
    )?;

    let fraction = resampled.valid_fraction();
    debug!(
        channel = %frame.channel,
        timestamp = %frame.timestamp,
        coverage = fraction,
        "Resampled channel"
    );

    if fraction < min_coverage {
        return Err(ConversionError::InsufficientCoverage {
            channel: frame.channel.clone(),
            timestamp: frame.timestamp,
            fraction,
            minimum: min_coverage,
        });
    }

    Ok(resampled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sat_common::{NativeGeolocation, Swath};
    use test_utils::{aligned_latlon_frame, create_test_grid, nominal_time, small_geographic_grid};

    struct ShortResampler;

    impl Resampler for ShortResampler {
        fn method(&self) -> &str {
            "short"
        }

        fn resample(&self, _frame: &DecodedChannelFrame, grid: &GridDefinition) -> Result<Vec<f32>> {
            Ok(vec![0.0; grid.len() - 1])
        }
    }

    #[test]
    fn test_identical_grid_has_full_coverage() {
        let grid = small_geographic_grid();
        let frame = aligned_latlon_frame(&grid, "IR_108", nominal_time(12, 0));

        let resampled = resample_channel(
            &KernelResampler::new(InterpolationMethod::Nearest),
            &frame,
            &grid,
            1.0,
        )
        .unwrap();

        assert_eq!(resampled.shape(), grid.shape());
        assert_eq!(resampled.valid_fraction(), 1.0);
        assert_eq!(resampled.data(), create_test_grid(grid.cols, grid.rows).as_slice());
        assert_eq!(resampled.provenance().interpolation, "nearest");
    }

    #[test]
    fn test_sparse_coverage_is_rejected() {
        let grid = small_geographic_grid();
        let mut frame = aligned_latlon_frame(&grid, "IR_108", nominal_time(12, 0));
        // Source covers only the top-left 2 x 2 corner of the grid
        let (lon_origin, lat_origin) = grid.pixel_center(0, 0);
        frame.geolocation = NativeGeolocation::LatLon {
            lon_origin,
            lat_origin,
            dlon: grid.dx,
            dlat: grid.dy,
        };
        frame.swath = Swath::new(2, 2, vec![250.0; 4]).unwrap();

        let err = resample_channel(
            &KernelResampler::new(InterpolationMethod::Nearest),
            &frame,
            &grid,
            0.5,
        )
        .unwrap_err();

        match err {
            ConversionError::InsufficientCoverage {
                channel, fraction, ..
            } => {
                assert_eq!(channel, "IR_108");
                assert!((fraction - 4.0 / 96.0).abs() < 1e-9);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_wrong_shape_is_a_defect() {
        let grid = small_geographic_grid();
        let frame = aligned_latlon_frame(&grid, "IR_108", nominal_time(12, 0));
        let err = resample_channel(&ShortResampler, &frame, &grid, 0.0).unwrap_err();
        assert!(matches!(err, ConversionError::ShapeMismatch(_)));
        assert!(err.is_fatal());
    }
}
