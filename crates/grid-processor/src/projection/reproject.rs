//! Resampling of decoded swaths onto a target grid.
//!
//! Works backwards: every target pixel centre is converted to lon/lat, then
//! into fractional source indices, and the swath is interpolated there.
//! Target pixels that fall outside the source footprint, off the Earth disk,
//! or on missing source samples are NaN.

use projection::{FixedGrid, Geostationary};
use rayon::prelude::*;
use sat_common::{DecodedChannelFrame, GeostationaryView, GridDefinition, GridProjection, NativeGeolocation};
use tracing::debug;

use super::{bilinear_interpolate, cubic_interpolate, nearest_interpolate};
use crate::error::{GridProcessorError, Result};
use crate::types::InterpolationMethod;

/// Locates geographic points in the source swath's index space.
enum SourceSampler {
    LatLon {
        lon_origin: f64,
        lat_origin: f64,
        dlon: f64,
        dlat: f64,
    },
    Fixed {
        grid: FixedGrid,
        view: GeostationaryView,
    },
}

impl SourceSampler {
    fn from_frame(frame: &DecodedChannelFrame) -> Result<Self> {
        match frame.geolocation {
            NativeGeolocation::LatLon {
                lon_origin,
                lat_origin,
                dlon,
                dlat,
            } => {
                if dlon == 0.0 || dlat == 0.0 || !dlon.is_finite() || !dlat.is_finite() {
                    return Err(GridProcessorError::ProjectionError(format!(
                        "invalid lat/lon spacing ({}, {}) in {}",
                        dlon, dlat, frame.source
                    )));
                }
                Ok(Self::LatLon {
                    lon_origin,
                    lat_origin,
                    dlon,
                    dlat,
                })
            }
            NativeGeolocation::Geostationary {
                view,
                x_origin,
                y_origin,
                dx,
                dy,
            } => {
                if dx == 0.0 || dy == 0.0 || !dx.is_finite() || !dy.is_finite() {
                    return Err(GridProcessorError::ProjectionError(format!(
                        "invalid scan angle spacing ({}, {}) in {}",
                        dx, dy, frame.source
                    )));
                }
                Ok(Self::Fixed {
                    grid: FixedGrid {
                        projection: Geostationary::from_view(&view),
                        x_origin,
                        y_origin,
                        dx,
                        dy,
                        nx: frame.swath.cols(),
                        ny: frame.swath.rows(),
                    },
                    view,
                })
            }
        }
    }

    /// Fractional (col, row) of a geographic point.
    fn locate(&self, lon: f64, lat: f64, width: usize, height: usize) -> Option<(f64, f64)> {
        match self {
            Self::LatLon {
                lon_origin,
                lat_origin,
                dlon,
                dlat,
            } => {
                let row = (lat - lat_origin) / dlat;
                [lon, lon + 360.0, lon - 360.0]
                    .into_iter()
                    .map(|candidate| ((candidate - lon_origin) / dlon, row))
                    .find(|&(col, row)| in_footprint(col, row, width, height))
            }
            Self::Fixed { grid, .. } => grid.geo_to_grid(lon, lat),
        }
    }
}

/// Maps target pixel centres to geographic coordinates.
enum TargetMapper {
    Geographic,
    Geostationary {
        projection: Geostationary,
        view: GeostationaryView,
    },
}

/// Whether a fractional index lies inside the area covered by source pixels.
#[inline]
fn in_footprint(col: f64, row: f64, width: usize, height: usize) -> bool {
    col >= -0.5 && col < width as f64 - 0.5 && row >= -0.5 && row < height as f64 - 0.5
}

/// Resample a decoded frame onto `grid`.
///
/// The output always has exactly `grid.rows * grid.cols` values in row-major
/// order. Uncovered pixels are NaN.
pub fn resample_frame(
    frame: &DecodedChannelFrame,
    grid: &GridDefinition,
    method: InterpolationMethod,
) -> Result<Vec<f32>> {
    let sampler = SourceSampler::from_frame(frame)?;
    let target = match &grid.projection {
        GridProjection::Geographic => TargetMapper::Geographic,
        GridProjection::Geostationary(view) => TargetMapper::Geostationary {
            projection: Geostationary::from_view(view),
            view: *view,
        },
    };

    let width = frame.swath.cols();
    let height = frame.swath.rows();
    let data = frame.swath.data();

    // Same satellite on both sides: scan angles map directly
    let shared_view = match (&sampler, &target) {
        (SourceSampler::Fixed { grid: fixed, view: a }, TargetMapper::Geostationary { view: b, .. })
            if a == b =>
        {
            Some(*fixed)
        }
        _ => None,
    };

    let sample = |row: usize, col: usize| -> f32 {
        let (x, y) = grid.pixel_center(row, col);

        let position = if let Some(fixed) = &shared_view {
            Some(fixed.scan_to_grid(x, y))
        } else {
            let geo = match &target {
                TargetMapper::Geographic => Some((x, y)),
                TargetMapper::Geostationary { projection, .. } => projection.scan_to_geo(x, y),
            };
            geo.and_then(|(lon, lat)| sampler.locate(lon, lat, width, height))
        };

        match position {
            Some((i, j)) if in_footprint(i, j, width, height) => match method {
                InterpolationMethod::Nearest => nearest_interpolate(data, width, height, i, j),
                InterpolationMethod::Bilinear => bilinear_interpolate(data, width, height, i, j),
                InterpolationMethod::Cubic => cubic_interpolate(data, width, height, i, j),
            },
            _ => f32::NAN,
        }
    };

    let mut output = vec![f32::NAN; grid.len()];
    output
        .par_chunks_mut(grid.cols)
        .enumerate()
        .for_each(|(row, out_row)| {
            for (col, out) in out_row.iter_mut().enumerate() {
                *out = sample(row, col);
            }
        });

    debug!(
        channel = %frame.channel,
        source = %frame.source,
        method = %method,
        rows = grid.rows,
        cols = grid.cols,
        "Resampled frame"
    );

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sat_common::{GridDefinition, Swath};
    use test_utils::{aligned_latlon_frame, create_test_grid, fixed_grid_frame, nominal_time, small_geographic_grid};

    fn coverage(data: &[f32]) -> f64 {
        data.iter().filter(|v| v.is_finite()).count() as f64 / data.len() as f64
    }

    #[test]
    fn test_aligned_frame_full_coverage() {
        let grid = small_geographic_grid();
        let frame = aligned_latlon_frame(&grid, "IR_108", nominal_time(0, 0));

        for method in [
            InterpolationMethod::Nearest,
            InterpolationMethod::Bilinear,
            InterpolationMethod::Cubic,
        ] {
            let out = resample_frame(&frame, &grid, method).unwrap();
            assert_eq!(out.len(), grid.len());
            assert_eq!(coverage(&out), 1.0, "method {}", method);
            for (a, b) in out.iter().zip(frame.swath.data()) {
                assert!((a - b).abs() < 1e-3, "method {}: {} vs {}", method, a, b);
            }
        }
    }

    #[test]
    fn test_output_shape_independent_of_source() {
        let grid = small_geographic_grid();
        // 3 x 4 source at 0.5° covering only the north-west corner
        let mut frame = aligned_latlon_frame(&grid, "IR_108", nominal_time(0, 0));
        frame.swath = Swath::new(3, 4, create_test_grid(4, 3)).unwrap();

        let out = resample_frame(&frame, &grid, InterpolationMethod::Bilinear).unwrap();
        assert_eq!(out.len(), grid.len());
        assert!((coverage(&out) - 12.0 / 96.0).abs() < 1e-12);
        assert!(out[0].is_finite());
        assert!(out[grid.len() - 1].is_nan());
    }

    #[test]
    fn test_disjoint_source_is_all_fill() {
        let grid = small_geographic_grid();
        let mut frame = aligned_latlon_frame(&grid, "IR_108", nominal_time(0, 0));
        frame.geolocation = NativeGeolocation::LatLon {
            lon_origin: -120.0,
            lat_origin: 30.0,
            dlon: 0.5,
            dlat: -0.5,
        };

        let out = resample_frame(&frame, &grid, InterpolationMethod::Nearest).unwrap();
        assert!(out.iter().all(|v| v.is_nan()));
    }

    #[test]
    fn test_longitude_wrap() {
        // Source expressed in 0..360 longitudes, target in -180..180
        let grid = GridDefinition::geographic(-10.0, 10.0, 1.0, 4, 4);
        let mut frame = aligned_latlon_frame(&grid, "IR_108", nominal_time(0, 0));
        frame.geolocation = NativeGeolocation::LatLon {
            lon_origin: 349.5,
            lat_origin: 9.5,
            dlon: 1.0,
            dlat: -1.0,
        };

        let out = resample_frame(&frame, &grid, InterpolationMethod::Nearest).unwrap();
        assert_eq!(coverage(&out), 1.0);
    }

    #[test]
    fn test_geostationary_source_onto_geographic_grid() {
        // 0.0005 rad fixed grid around Meteosat nadir, covering about ±16°
        let view = GeostationaryView::meteosat_0deg();
        let frame = fixed_grid_frame(view, -0.04975, 0.04975, 0.0005, 200, 200, "IR_108", nominal_time(0, 0));
        let grid = GridDefinition::geographic(-5.0, 5.0, 0.5, 20, 20);

        let out = resample_frame(&frame, &grid, InterpolationMethod::Bilinear).unwrap();
        assert_eq!(out.len(), 400);
        assert_eq!(coverage(&out), 1.0);
        assert!(out.iter().all(|v| (200.0..300.0).contains(v)));
    }

    #[test]
    fn test_geographic_grid_beyond_disk_is_fill() {
        let view = GeostationaryView::meteosat_0deg();
        let frame = fixed_grid_frame(view, -0.04975, 0.04975, 0.0005, 200, 200, "IR_108", nominal_time(0, 0));
        // Pacific, on the far side of the Earth
        let grid = GridDefinition::geographic(170.0, 5.0, 0.5, 10, 10);

        let out = resample_frame(&frame, &grid, InterpolationMethod::Bilinear).unwrap();
        assert!(out.iter().all(|v| v.is_nan()));
    }

    #[test]
    fn test_same_view_scan_grid_is_identity() {
        let view = GeostationaryView::meteosat_0deg();
        let frame = fixed_grid_frame(view, -0.00975, 0.00975, 0.0005, 40, 40, "IR_108", nominal_time(0, 0));
        let grid = GridDefinition {
            projection: GridProjection::Geostationary(view),
            origin_x: -0.01,
            origin_y: 0.01,
            dx: 0.0005,
            dy: -0.0005,
            rows: 40,
            cols: 40,
            tile: None,
        };

        let out = resample_frame(&frame, &grid, InterpolationMethod::Nearest).unwrap();
        assert_eq!(coverage(&out), 1.0);
        for (a, b) in out.iter().zip(frame.swath.data()) {
            assert_eq!(a, b);
        }
    }

    #[test]
    fn test_zero_spacing_rejected() {
        let grid = small_geographic_grid();
        let mut frame = aligned_latlon_frame(&grid, "IR_108", nominal_time(0, 0));
        frame.geolocation = NativeGeolocation::LatLon {
            lon_origin: 0.0,
            lat_origin: 0.0,
            dlon: 0.0,
            dlat: -0.5,
        };
        assert!(matches!(
            resample_frame(&frame, &grid, InterpolationMethod::Nearest),
            Err(GridProcessorError::ProjectionError(_))
        ));
    }
}
