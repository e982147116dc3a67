//! Target grid definitions.
//!
//! A [`GridDefinition`] fixes the spatial sampling every output frame is
//! resampled onto. It is created once per store and never changes for the
//! lifetime of that store; the store persists it and refuses to open with a
//! different one.

use serde::{Deserialize, Serialize};

use crate::error::{CommonError, CommonResult};

/// Tolerance used when checking geographic extents against the valid range.
const EXTENT_EPSILON: f64 = 1e-9;

/// Sweep angle axis of a geostationary imager.
///
/// GOES-R instruments sweep along x, Meteosat and Himawari along y.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SweepAxis {
    #[default]
    X,
    Y,
}

/// Viewing geometry of a geostationary satellite.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeostationaryView {
    /// Sub-satellite longitude (degrees, negative west).
    pub longitude_origin: f64,
    /// Satellite height above the ellipsoid surface (meters).
    pub perspective_point_height: f64,
    /// Equatorial radius (meters).
    pub semi_major_axis: f64,
    /// Polar radius (meters).
    pub semi_minor_axis: f64,
    #[serde(default)]
    pub sweep: SweepAxis,
}

impl GeostationaryView {
    /// GOES-East (GOES-16/19) at 75.2°W.
    pub fn goes_east() -> Self {
        Self {
            longitude_origin: -75.2,
            perspective_point_height: 35_786_023.0,
            semi_major_axis: 6_378_137.0,
            semi_minor_axis: 6_356_752.314_14,
            sweep: SweepAxis::X,
        }
    }

    /// Meteosat Second Generation prime service at 0°.
    pub fn meteosat_0deg() -> Self {
        Self {
            longitude_origin: 0.0,
            perspective_point_height: 35_785_831.0,
            semi_major_axis: 6_378_169.0,
            semi_minor_axis: 6_356_583.8,
            sweep: SweepAxis::Y,
        }
    }

    fn validate(&self) -> CommonResult<()> {
        if !self.longitude_origin.is_finite() || self.longitude_origin.abs() > 180.0 {
            return Err(CommonError::invalid_grid(format!(
                "longitude_origin {} outside [-180, 180]",
                self.longitude_origin
            )));
        }
        if !(self.perspective_point_height > 0.0) {
            return Err(CommonError::invalid_grid(
                "perspective_point_height must be > 0",
            ));
        }
        if !(self.semi_minor_axis > 0.0) || !(self.semi_major_axis >= self.semi_minor_axis) {
            return Err(CommonError::invalid_grid(
                "ellipsoid axes must satisfy 0 < semi_minor_axis <= semi_major_axis",
            ));
        }
        Ok(())
    }
}

/// Coordinate system of a grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GridProjection {
    /// Plate carrée in degrees (EPSG:4326).
    Geographic,
    /// Fixed-grid scan angles in radians.
    Geostationary(GeostationaryView),
}

impl GridProjection {
    /// Short identifier recorded in provenance metadata.
    pub fn identifier(&self) -> &'static str {
        match self {
            Self::Geographic => "EPSG:4326",
            Self::Geostationary(_) => "geostationary",
        }
    }
}

/// Chunk tiling of a grid, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileShape {
    pub rows: usize,
    pub cols: usize,
}

/// Immutable description of the target spatial grid.
///
/// `origin_x`/`origin_y` locate the outer upper-left corner of the first
/// pixel. `dy` is negative for north-up grids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridDefinition {
    pub projection: GridProjection,
    pub origin_x: f64,
    pub origin_y: f64,
    pub dx: f64,
    pub dy: f64,
    pub rows: usize,
    pub cols: usize,
    /// Natural chunk tiling; defaults to the whole grid as one chunk.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tile: Option<TileShape>,
}

impl GridDefinition {
    /// Create a north-up geographic grid from its upper-left corner and resolution.
    pub fn geographic(
        west: f64,
        north: f64,
        resolution: f64,
        rows: usize,
        cols: usize,
    ) -> Self {
        Self {
            projection: GridProjection::Geographic,
            origin_x: west,
            origin_y: north,
            dx: resolution,
            dy: -resolution,
            rows,
            cols,
            tile: None,
        }
    }

    /// Set the chunk tiling.
    pub fn with_tile(mut self, rows: usize, cols: usize) -> Self {
        self.tile = Some(TileShape { rows, cols });
        self
    }

    /// Validate the definition. Invalid grids are a fatal configuration error.
    pub fn validate(&self) -> CommonResult<()> {
        if self.rows == 0 || self.cols == 0 {
            return Err(CommonError::invalid_grid(format!(
                "grid must have at least one row and column, got {}x{}",
                self.rows, self.cols
            )));
        }

        for (name, value) in [
            ("origin_x", self.origin_x),
            ("origin_y", self.origin_y),
            ("dx", self.dx),
            ("dy", self.dy),
        ] {
            if !value.is_finite() {
                return Err(CommonError::invalid_grid(format!("{} must be finite", name)));
            }
        }
        if self.dx == 0.0 || self.dy == 0.0 {
            return Err(CommonError::invalid_grid("pixel size must be non-zero"));
        }

        if let Some(tile) = self.tile {
            if tile.rows == 0 || tile.rows > self.rows || tile.cols == 0 || tile.cols > self.cols {
                return Err(CommonError::invalid_grid(format!(
                    "tile {}x{} does not fit grid {}x{}",
                    tile.rows, tile.cols, self.rows, self.cols
                )));
            }
        }

        let (min_x, min_y, max_x, max_y) = self.extent();
        match &self.projection {
            GridProjection::Geographic => {
                if min_x < -180.0 - EXTENT_EPSILON
                    || max_x > 180.0 + EXTENT_EPSILON
                    || min_y < -90.0 - EXTENT_EPSILON
                    || max_y > 90.0 + EXTENT_EPSILON
                {
                    return Err(CommonError::invalid_grid(format!(
                        "geographic extent [{}, {}, {}, {}] exceeds [-180, -90, 180, 90]",
                        min_x, min_y, max_x, max_y
                    )));
                }
            }
            GridProjection::Geostationary(view) => {
                view.validate()?;
                let limit = std::f64::consts::FRAC_PI_2;
                if min_x <= -limit || max_x >= limit || min_y <= -limit || max_y >= limit {
                    return Err(CommonError::invalid_grid(
                        "scan angle extent must lie within (-pi/2, pi/2)",
                    ));
                }
            }
        }

        Ok(())
    }

    /// Grid shape as (rows, cols).
    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    /// Total number of pixels.
    pub fn len(&self) -> usize {
        self.rows * self.cols
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0 || self.cols == 0
    }

    /// Projected coordinates of a pixel centre.
    #[inline]
    pub fn pixel_center(&self, row: usize, col: usize) -> (f64, f64) {
        (
            self.origin_x + (col as f64 + 0.5) * self.dx,
            self.origin_y + (row as f64 + 0.5) * self.dy,
        )
    }

    /// Outer extent as (min_x, min_y, max_x, max_y).
    pub fn extent(&self) -> (f64, f64, f64, f64) {
        let far_x = self.origin_x + self.cols as f64 * self.dx;
        let far_y = self.origin_y + self.rows as f64 * self.dy;
        (
            self.origin_x.min(far_x),
            self.origin_y.min(far_y),
            self.origin_x.max(far_x),
            self.origin_y.max(far_y),
        )
    }

    /// Chunk shape (rows, cols) used by the store.
    pub fn chunk_shape(&self) -> (usize, usize) {
        match self.tile {
            Some(tile) => (tile.rows, tile.cols),
            None => (self.rows, self.cols),
        }
    }

    /// Number of chunks along (rows, cols).
    pub fn num_chunks(&self) -> (usize, usize) {
        let (chunk_rows, chunk_cols) = self.chunk_shape();
        (
            (self.rows + chunk_rows - 1) / chunk_rows,
            (self.cols + chunk_cols - 1) / chunk_cols,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn europe() -> GridDefinition {
        GridDefinition::geographic(-10.0, 60.0, 0.25, 80, 120).with_tile(40, 60)
    }

    #[test]
    fn test_valid_geographic_grid() {
        let grid = europe();
        assert!(grid.validate().is_ok());
        assert_eq!(grid.shape(), (80, 120));
        assert_eq!(grid.len(), 9600);
        assert_eq!(grid.extent(), (-10.0, 40.0, 20.0, 60.0));
    }

    #[test]
    fn test_pixel_center() {
        let grid = europe();
        let (x, y) = grid.pixel_center(0, 0);
        assert!((x - -9.875).abs() < 1e-12);
        assert!((y - 59.875).abs() < 1e-12);

        let (x, y) = grid.pixel_center(79, 119);
        assert!((x - 19.875).abs() < 1e-12);
        assert!((y - 40.125).abs() < 1e-12);
    }

    #[test]
    fn test_chunks() {
        let grid = europe();
        assert_eq!(grid.chunk_shape(), (40, 60));
        assert_eq!(grid.num_chunks(), (2, 2));

        let uneven = GridDefinition::geographic(0.0, 10.0, 1.0, 10, 10).with_tile(3, 4);
        assert_eq!(uneven.num_chunks(), (4, 3));

        let whole = GridDefinition::geographic(0.0, 10.0, 1.0, 10, 10);
        assert_eq!(whole.chunk_shape(), (10, 10));
        assert_eq!(whole.num_chunks(), (1, 1));
    }

    #[test]
    fn test_invalid_grids() {
        let mut grid = europe();
        grid.rows = 0;
        assert!(grid.validate().is_err());

        let mut grid = europe();
        grid.dx = 0.0;
        assert!(grid.validate().is_err());

        let mut grid = europe();
        grid.dy = f64::NAN;
        assert!(grid.validate().is_err());

        let grid = europe().with_tile(81, 10);
        assert!(grid.validate().is_err());

        let grid = GridDefinition::geographic(170.0, 10.0, 1.0, 10, 20);
        assert!(grid.validate().is_err());

        let grid = GridDefinition::geographic(0.0, 95.0, 1.0, 10, 10);
        assert!(grid.validate().is_err());
    }

    #[test]
    fn test_geostationary_grid() {
        let mut grid = GridDefinition {
            projection: GridProjection::Geostationary(GeostationaryView::goes_east()),
            origin_x: -0.10136,
            origin_y: 0.128226,
            dx: 0.000056,
            dy: -0.000056,
            rows: 1500,
            cols: 2500,
            tile: Some(TileShape { rows: 500, cols: 500 }),
        };
        assert!(grid.validate().is_ok());
        assert_eq!(grid.projection.identifier(), "geostationary");

        grid.projection = GridProjection::Geostationary(GeostationaryView {
            semi_minor_axis: 7_000_000.0,
            ..GeostationaryView::goes_east()
        });
        assert!(grid.validate().is_err());
    }

    #[test]
    fn test_serde_roundtrip_preserves_equality() {
        let grid = GridDefinition {
            projection: GridProjection::Geostationary(GeostationaryView::meteosat_0deg()),
            origin_x: -0.1,
            origin_y: 0.1,
            dx: 0.0001,
            dy: -0.0001,
            rows: 10,
            cols: 10,
            tile: None,
        };
        let json = serde_json::to_string(&grid).unwrap();
        assert!(json.contains("\"kind\":\"geostationary\""));
        let back: GridDefinition = serde_json::from_str(&json).unwrap();
        assert_eq!(grid, back);
    }
}
