//! Geostationary satellite projection.
//!
//! The satellite views Earth from a fixed position above the equator, and
//! coordinates are expressed as scan angles in radians from nadir. Both sweep
//! conventions are supported: GOES-R sweeps along x, Meteosat and Himawari
//! along y.
//!
//! Reference: GOES-R Product Definition and Users' Guide (PUG) Volume 4,
//! and the CGMS LRIT/HRIT Global Specification for the y-sweep form.

use sat_common::{GeostationaryView, SweepAxis};

/// Geostationary projection parameters.
#[derive(Debug, Clone, Copy)]
pub struct Geostationary {
    /// Satellite distance from the Earth centre (meters).
    pub h: f64,
    /// Semi-major axis of the ellipsoid (meters).
    pub req: f64,
    /// Semi-minor axis of the ellipsoid (meters).
    pub rpol: f64,
    /// Longitude of the sub-satellite point (radians).
    pub lambda_0: f64,
    pub sweep: SweepAxis,
}

impl Geostationary {
    pub fn from_view(view: &GeostationaryView) -> Self {
        Self {
            h: view.perspective_point_height + view.semi_major_axis,
            req: view.semi_major_axis,
            rpol: view.semi_minor_axis,
            lambda_0: view.longitude_origin.to_radians(),
            sweep: view.sweep,
        }
    }

    /// (req / rpol)^2
    #[inline]
    fn flattening_ratio(&self) -> f64 {
        (self.req / self.rpol).powi(2)
    }

    /// Convert scan angles (radians) to geographic coordinates (lon, lat degrees).
    ///
    /// Returns None if the line of sight misses the Earth.
    pub fn scan_to_geo(&self, x_rad: f64, y_rad: f64) -> Option<(f64, f64)> {
        let (sin_x, cos_x) = x_rad.sin_cos();
        let (sin_y, cos_y) = y_rad.sin_cos();

        // Unit line of sight in the satellite frame (x towards Earth centre)
        let (dx, dy, dz) = match self.sweep {
            SweepAxis::X => (cos_x * cos_y, -sin_x, cos_x * sin_y),
            SweepAxis::Y => (cos_x * cos_y, -sin_x * cos_y, sin_y),
        };

        let k2 = self.flattening_ratio();
        let a = dx * dx + dy * dy + k2 * dz * dz;
        let b = -2.0 * self.h * dx;
        let c = self.h.powi(2) - self.req.powi(2);

        let discriminant = b * b - 4.0 * a * c;
        if discriminant < 0.0 {
            return None;
        }

        let rs = (-b - discriminant.sqrt()) / (2.0 * a);
        if rs <= 0.0 {
            return None;
        }

        let sx = rs * dx;
        let sy = rs * dy;
        let sz = rs * dz;

        let lat = (k2 * sz / (self.h - sx).hypot(sy)).atan();
        let lon = self.lambda_0 - sy.atan2(self.h - sx);

        Some((normalize_lon(lon.to_degrees()), lat.to_degrees()))
    }

    /// Convert geographic coordinates (lon, lat degrees) to scan angles (radians).
    ///
    /// Returns None if the point is not visible from the satellite.
    pub fn geo_to_scan(&self, lon_deg: f64, lat_deg: f64) -> Option<(f64, f64)> {
        if !lat_deg.is_finite() || !lon_deg.is_finite() || lat_deg.abs() > 90.0 {
            return None;
        }

        let lat_rad = lat_deg.to_radians();
        let dlon = lon_deg.to_radians() - self.lambda_0;

        // Geocentric latitude and radius
        let phi_c = ((self.rpol / self.req).powi(2) * lat_rad.tan()).atan();
        let e2 = 1.0 - (self.rpol / self.req).powi(2);
        let rc = self.rpol / (1.0 - e2 * phi_c.cos().powi(2)).sqrt();

        let sx = self.h - rc * phi_c.cos() * dlon.cos();
        let sy = -rc * phi_c.cos() * dlon.sin();
        let sz = rc * phi_c.sin();

        // Surface normal must face the satellite
        if sx * (self.h - sx) < sy * sy + self.flattening_ratio() * sz * sz {
            return None;
        }

        let (x_rad, y_rad) = match self.sweep {
            SweepAxis::X => ((-sy).atan2(sx.hypot(sz)), sz.atan2(sx)),
            SweepAxis::Y => ((-sy).atan2(sx), sz.atan2(sx.hypot(sy))),
        };

        Some((x_rad, y_rad))
    }

    /// Whether a geographic point is visible from the satellite.
    pub fn is_visible(&self, lon_deg: f64, lat_deg: f64) -> bool {
        self.geo_to_scan(lon_deg, lat_deg).is_some()
    }
}

/// A regular raster of scan angles: the native sampling of a full-disk or
/// sector image.
#[derive(Debug, Clone, Copy)]
pub struct FixedGrid {
    pub projection: Geostationary,
    /// X scan angle of the first column centre (radians).
    pub x_origin: f64,
    /// Y scan angle of the first row centre (radians).
    pub y_origin: f64,
    /// Column spacing (radians).
    pub dx: f64,
    /// Row spacing (radians, negative for north-up).
    pub dy: f64,
    pub nx: usize,
    pub ny: usize,
}

impl FixedGrid {
    /// Convert fractional grid indices (col, row) to scan angles.
    #[inline]
    pub fn grid_to_scan(&self, i: f64, j: f64) -> (f64, f64) {
        (self.x_origin + i * self.dx, self.y_origin + j * self.dy)
    }

    /// Convert scan angles to fractional grid indices (col, row).
    #[inline]
    pub fn scan_to_grid(&self, x: f64, y: f64) -> (f64, f64) {
        ((x - self.x_origin) / self.dx, (y - self.y_origin) / self.dy)
    }

    /// Convert a geographic point to fractional grid indices (col, row).
    pub fn geo_to_grid(&self, lon_deg: f64, lat_deg: f64) -> Option<(f64, f64)> {
        let (x, y) = self.projection.geo_to_scan(lon_deg, lat_deg)?;
        Some(self.scan_to_grid(x, y))
    }

    /// Convert fractional grid indices (col, row) to a geographic point (lon, lat).
    pub fn grid_to_geo(&self, i: f64, j: f64) -> Option<(f64, f64)> {
        let (x, y) = self.grid_to_scan(i, j);
        self.projection.scan_to_geo(x, y)
    }

    /// Approximate geographic bounds (min_lon, min_lat, max_lon, max_lat).
    ///
    /// Samples along the grid edges since geostationary edges are curved.
    /// Off-disk samples are skipped.
    pub fn geographic_bounds(&self) -> Option<(f64, f64, f64, f64)> {
        let mut bounds: Option<(f64, f64, f64, f64)> = None;

        let samples = 50;
        let last_i = self.nx.saturating_sub(1) as f64;
        let last_j = self.ny.saturating_sub(1) as f64;
        for t in 0..=samples {
            let frac = t as f64 / samples as f64;
            let edges = [
                (frac * last_i, 0.0),
                (frac * last_i, last_j),
                (0.0, frac * last_j),
                (last_i, frac * last_j),
            ];

            for (i, j) in edges {
                if let Some((lon, lat)) = self.grid_to_geo(i, j) {
                    bounds = Some(match bounds {
                        None => (lon, lat, lon, lat),
                        Some((a, b, c, d)) => (a.min(lon), b.min(lat), c.max(lon), d.max(lat)),
                    });
                }
            }
        }

        bounds
    }
}

/// Wrap a longitude into [-180, 180).
pub fn normalize_lon(lon: f64) -> f64 {
    let wrapped = (lon + 180.0).rem_euclid(360.0) - 180.0;
    if wrapped.is_finite() {
        wrapped
    } else {
        lon
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_utils::assert_approx_eq;

    fn goes16() -> Geostationary {
        Geostationary::from_view(&GeostationaryView {
            longitude_origin: -75.0,
            perspective_point_height: 35_786_023.0,
            semi_major_axis: 6_378_137.0,
            semi_minor_axis: 6_356_752.314_14,
            sweep: SweepAxis::X,
        })
    }

    fn msg() -> Geostationary {
        Geostationary::from_view(&GeostationaryView::meteosat_0deg())
    }

    #[test]
    fn test_pug_reference_point() {
        // Worked example from the GOES-R PUG
        let proj = goes16();
        let (x, y) = proj.geo_to_scan(-84.690932, 33.846162).unwrap();
        assert_approx_eq!(x, -0.024052, 1e-5);
        assert_approx_eq!(y, 0.095340, 1e-5);

        let (lon, lat) = proj.scan_to_geo(-0.024052, 0.095340).unwrap();
        assert_approx_eq!(lon, -84.690932, 1e-3);
        assert_approx_eq!(lat, 33.846162, 1e-3);
    }

    #[test]
    fn test_nadir() {
        for proj in [goes16(), msg()] {
            let (lon, lat) = proj.scan_to_geo(0.0, 0.0).unwrap();
            assert_approx_eq!(lon, proj.lambda_0.to_degrees(), 1e-9);
            assert_approx_eq!(lat, 0.0, 1e-9);

            let (x, y) = proj.geo_to_scan(lon, lat).unwrap();
            assert_approx_eq!(x, 0.0, 1e-12);
            assert_approx_eq!(y, 0.0, 1e-12);
        }
    }

    #[test]
    fn test_roundtrip_both_sweeps() {
        let points = [(10.0, 50.0), (-20.0, -35.0), (45.0, 10.0), (-5.0, 65.0)];
        for (lon, lat) in points {
            let proj = msg();
            let (x, y) = proj.geo_to_scan(lon, lat).unwrap();
            let (lon2, lat2) = proj.scan_to_geo(x, y).unwrap();
            assert_approx_eq!(lon, lon2, 1e-7);
            assert_approx_eq!(lat, lat2, 1e-7);

            let proj = Geostationary { sweep: SweepAxis::X, ..msg() };
            let (x, y) = proj.geo_to_scan(lon, lat).unwrap();
            let (lon2, lat2) = proj.scan_to_geo(x, y).unwrap();
            assert_approx_eq!(lon, lon2, 1e-7);
            assert_approx_eq!(lat, lat2, 1e-7);
        }
    }

    #[test]
    fn test_sweep_axes_differ_off_axis() {
        let y_sweep = msg();
        let x_sweep = Geostationary { sweep: SweepAxis::X, ..msg() };
        let (xa, ya) = y_sweep.geo_to_scan(30.0, 40.0).unwrap();
        let (xb, yb) = x_sweep.geo_to_scan(30.0, 40.0).unwrap();
        assert!((xa - xb).abs() > 1e-4 || (ya - yb).abs() > 1e-4);
    }

    #[test]
    fn test_off_earth() {
        let proj = goes16();
        assert!(proj.scan_to_geo(0.5, 0.5).is_none());
        assert!(proj.scan_to_geo(0.16, 0.0).is_none());
    }

    #[test]
    fn test_far_side_not_visible() {
        let proj = goes16();
        assert!(!proj.is_visible(105.0, 0.0));
        assert!(!proj.is_visible(-75.0, 89.0));
        assert!(proj.is_visible(-75.0, 45.0));
        assert!(proj.geo_to_scan(-75.0, 95.0).is_none());
    }

    #[test]
    fn test_fixed_grid_roundtrip() {
        let grid = FixedGrid {
            projection: goes16(),
            x_origin: -0.101332,
            y_origin: 0.128212,
            dx: 0.000056,
            dy: -0.000056,
            nx: 2500,
            ny: 1500,
        };

        let (i, j) = grid.geo_to_grid(-95.0, 39.0).unwrap();
        assert!((0.0..2500.0).contains(&i), "col {} outside grid", i);
        assert!((0.0..1500.0).contains(&j), "row {} outside grid", j);

        let (lon, lat) = grid.grid_to_geo(i, j).unwrap();
        assert_approx_eq!(lon, -95.0, 1e-6);
        assert_approx_eq!(lat, 39.0, 1e-6);

        let (min_lon, min_lat, max_lon, max_lat) = grid.geographic_bounds().unwrap();
        assert!(min_lon < -95.0 && max_lon > -95.0);
        assert!(min_lat < 39.0 && max_lat > 39.0);
    }

    #[test]
    fn test_normalize_lon() {
        assert_approx_eq!(normalize_lon(190.0), -170.0, 1e-12);
        assert_approx_eq!(normalize_lon(-190.0), 170.0, 1e-12);
        assert_approx_eq!(normalize_lon(45.0), 45.0, 1e-12);
    }
}
