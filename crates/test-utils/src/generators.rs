//! Synthetic data generators.
//!
//! These create predictable, verifiable patterns so tests can check that a
//! value ends up exactly where it should after decode, resample and write.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use sat_common::{
    DecodedChannelFrame, GeostationaryView, GridDefinition, GridProjection, NativeGeolocation,
    ResampledChannelFrame, Swath, TimestepFrame,
};

/// Creates a test grid with predictable values.
///
/// Each cell value is `col * 1000 + row`, so `grid[row * width + col]` can be
/// checked directly.
///
/// ```
/// use test_utils::create_test_grid;
///
/// let grid = create_test_grid(10, 5);
/// assert_eq!(grid.len(), 50);
/// assert_eq!(grid[1], 1000.0);
/// assert_eq!(grid[10], 1.0);
/// ```
pub fn create_test_grid(width: usize, height: usize) -> Vec<f32> {
    let mut data = Vec::with_capacity(width * height);
    for row in 0..height {
        for col in 0..width {
            data.push((col * 1000 + row) as f32);
        }
    }
    data
}

/// Infrared brightness temperatures in Kelvin: a smooth gradient from 200 K
/// in the top-left corner to 300 K in the bottom-right.
pub fn brightness_temperature_field(rows: usize, cols: usize) -> Vec<f32> {
    let mut data = Vec::with_capacity(rows * cols);
    for row in 0..rows {
        for col in 0..cols {
            let x = col as f32 / cols.max(1) as f32;
            let y = row as f32 / rows.max(1) as f32;
            data.push(200.0 + 50.0 * x + 50.0 * y);
        }
    }
    data
}

/// Decoded frame sampled exactly on the pixel centres of a geographic grid.
///
/// Resampling it back onto `grid` must give 100 % coverage and, for
/// nearest-neighbour, the original values.
pub fn aligned_latlon_frame(
    grid: &GridDefinition,
    channel: &str,
    timestamp: DateTime<Utc>,
) -> DecodedChannelFrame {
    assert_eq!(
        grid.projection,
        GridProjection::Geographic,
        "aligned frames need a geographic grid"
    );
    let (lon_origin, lat_origin) = grid.pixel_center(0, 0);
    DecodedChannelFrame {
        channel: channel.to_string(),
        timestamp,
        source: format!("{}_{}", channel, timestamp.format("%Y%m%d%H%M%S")),
        decoder: "synthetic".to_string(),
        units: "K".to_string(),
        geolocation: NativeGeolocation::LatLon {
            lon_origin,
            lat_origin,
            dlon: grid.dx,
            dlat: grid.dy,
        },
        swath: Swath::new(grid.rows, grid.cols, create_test_grid(grid.cols, grid.rows))
            .expect("generator shape is consistent"),
    }
}

/// Decoded frame on a fixed scan-angle grid, filled with brightness
/// temperatures.
#[allow(clippy::too_many_arguments)]
pub fn fixed_grid_frame(
    view: GeostationaryView,
    x_origin: f64,
    y_origin: f64,
    spacing: f64,
    rows: usize,
    cols: usize,
    channel: &str,
    timestamp: DateTime<Utc>,
) -> DecodedChannelFrame {
    DecodedChannelFrame {
        channel: channel.to_string(),
        timestamp,
        source: format!("{}_{}", channel, timestamp.format("%Y%m%d%H%M%S")),
        decoder: "synthetic".to_string(),
        units: "K".to_string(),
        geolocation: NativeGeolocation::Geostationary {
            view,
            x_origin,
            y_origin,
            dx: spacing,
            dy: -spacing,
        },
        swath: Swath::new(rows, cols, brightness_temperature_field(rows, cols))
            .expect("generator shape is consistent"),
    }
}

/// A complete timestep with one resampled channel per name.
///
/// Channel `i` holds `create_test_grid` values plus `offset + i * 100_000`,
/// so records written with different offsets are distinguishable.
pub fn synthetic_timestep(
    grid: &GridDefinition,
    timestamp: DateTime<Utc>,
    channels: &[&str],
    offset: f32,
) -> TimestepFrame {
    let base = create_test_grid(grid.cols, grid.rows);
    let frames: BTreeMap<String, ResampledChannelFrame> = channels
        .iter()
        .enumerate()
        .map(|(i, name)| {
            let shift = offset + (i * 100_000) as f32;
            let data = base.iter().map(|v| v + shift).collect();
            let frame = ResampledChannelFrame::new(
                *name,
                timestamp,
                grid,
                data,
                format!("{}_{}", name, timestamp.format("%Y%m%d%H%M%S")),
                "synthetic",
                "nearest",
                "K",
            )
            .expect("generator shape is consistent");
            (name.to_string(), frame)
        })
        .collect();
    TimestepFrame::new(timestamp, frames, Vec::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{nominal_time, small_geographic_grid};

    #[test]
    fn test_create_test_grid_values() {
        let grid = create_test_grid(4, 3);
        assert_eq!(grid.len(), 12);
        assert_eq!(grid[0], 0.0);
        assert_eq!(grid[2 * 4 + 3], 3002.0);
    }

    #[test]
    fn test_brightness_range() {
        let data = brightness_temperature_field(10, 10);
        assert!(data.iter().all(|v| (200.0..300.0).contains(v)));
    }

    #[test]
    fn test_aligned_frame_matches_grid() {
        let grid = small_geographic_grid();
        let frame = aligned_latlon_frame(&grid, "IR_108", nominal_time(0, 0));
        assert_eq!(frame.swath.rows(), grid.rows);
        assert_eq!(frame.swath.cols(), grid.cols);
        match frame.geolocation {
            NativeGeolocation::LatLon { lon_origin, lat_origin, .. } => {
                assert_eq!((lon_origin, lat_origin), grid.pixel_center(0, 0));
            }
            other => panic!("unexpected geolocation {:?}", other),
        }
    }

    #[test]
    fn test_synthetic_timestep_offsets() {
        let grid = small_geographic_grid();
        let frame = synthetic_timestep(&grid, nominal_time(0, 0), &["A", "B"], 0.5);
        assert!(frame.is_complete());
        assert_eq!(frame.channel("A").unwrap().data()[0], 0.5);
        assert_eq!(frame.channel("B").unwrap().data()[0], 100_000.5);
    }
}
