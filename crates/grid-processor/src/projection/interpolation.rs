//! Interpolation methods for swath sampling.
//!
//! Coordinates are fractional (col, row) indices of source pixel centres.
//! Positions outside `[0, n-1]` are clamped to the edge; callers decide
//! beforehand whether a position lies inside the source footprint.

/// Nearest neighbor interpolation.
///
/// Returns the value of the nearest grid point.
pub fn nearest_interpolate(data: &[f32], width: usize, height: usize, x: f64, y: f64) -> f32 {
    if width == 0 || height == 0 || !x.is_finite() || !y.is_finite() {
        return f32::NAN;
    }

    let col = x.round().clamp(0.0, (width - 1) as f64) as usize;
    let row = y.round().clamp(0.0, (height - 1) as f64) as usize;

    data[row * width + col]
}

/// Bilinear interpolation.
///
/// Smoothly interpolates between the four nearest grid points. A NaN corner
/// that carries non-zero weight makes the result NaN.
pub fn bilinear_interpolate(data: &[f32], width: usize, height: usize, x: f64, y: f64) -> f32 {
    if width == 0 || height == 0 || !x.is_finite() || !y.is_finite() {
        return f32::NAN;
    }

    let x = x.clamp(0.0, (width - 1) as f64);
    let y = y.clamp(0.0, (height - 1) as f64);

    let x0 = x.floor() as usize;
    let y0 = y.floor() as usize;
    let x1 = (x0 + 1).min(width - 1);
    let y1 = (y0 + 1).min(height - 1);

    let xf = x - x0 as f64;
    let yf = y - y0 as f64;

    let corners = [
        (data[y0 * width + x0], (1.0 - xf) * (1.0 - yf)),
        (data[y0 * width + x1], xf * (1.0 - yf)),
        (data[y1 * width + x0], (1.0 - xf) * yf),
        (data[y1 * width + x1], xf * yf),
    ];

    let mut sum = 0.0f64;
    for (value, weight) in corners {
        if weight == 0.0 {
            continue;
        }
        if value.is_nan() {
            return f32::NAN;
        }
        sum += value as f64 * weight;
    }

    sum as f32
}

/// Bicubic interpolation.
///
/// Uses 16 surrounding points (Catmull-Rom). Falls back to bilinear when any
/// of them is NaN.
pub fn cubic_interpolate(data: &[f32], width: usize, height: usize, x: f64, y: f64) -> f32 {
    if width == 0 || height == 0 || !x.is_finite() || !y.is_finite() {
        return f32::NAN;
    }

    let x = x.clamp(0.0, (width - 1) as f64);
    let y = y.clamp(0.0, (height - 1) as f64);

    let xi = x.floor() as i64;
    let yi = y.floor() as i64;

    let xf = (x - xi as f64) as f32;
    let yf = (y - yi as f64) as f32;

    let mut values = [[0.0f32; 4]; 4];
    for (j, row_values) in values.iter_mut().enumerate() {
        for (i, value) in row_values.iter_mut().enumerate() {
            let px = (xi + i as i64 - 1).clamp(0, width as i64 - 1) as usize;
            let py = (yi + j as i64 - 1).clamp(0, height as i64 - 1) as usize;
            *value = data[py * width + px];

            if value.is_nan() {
                return bilinear_interpolate(data, width, height, x, y);
            }
        }
    }

    let mut row_values = [0.0f32; 4];
    for (j, out) in row_values.iter_mut().enumerate() {
        *out = cubic_1d(values[j][0], values[j][1], values[j][2], values[j][3], xf);
    }

    cubic_1d(row_values[0], row_values[1], row_values[2], row_values[3], yf)
}

/// 1D cubic interpolation using Catmull-Rom spline.
fn cubic_1d(p0: f32, p1: f32, p2: f32, p3: f32, t: f32) -> f32 {
    let t2 = t * t;
    let t3 = t2 * t;

    let a = -0.5 * p0 + 1.5 * p1 - 1.5 * p2 + 0.5 * p3;
    let b = p0 - 2.5 * p1 + 2.0 * p2 - 0.5 * p3;
    let c = -0.5 * p0 + 0.5 * p2;
    let d = p1;

    a * t3 + b * t2 + c * t + d
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nearest_interpolate() {
        let data: Vec<f32> = vec![
            1.0, 2.0, 3.0,
            4.0, 5.0, 6.0,
            7.0, 8.0, 9.0,
        ];

        assert_eq!(nearest_interpolate(&data, 3, 3, 0.0, 0.0), 1.0);
        assert_eq!(nearest_interpolate(&data, 3, 3, 1.0, 1.0), 5.0);
        assert_eq!(nearest_interpolate(&data, 3, 3, 0.4, 0.4), 1.0);
        assert_eq!(nearest_interpolate(&data, 3, 3, 0.6, 0.6), 5.0);
        // Half a pixel outside the last centre clamps to the edge
        assert_eq!(nearest_interpolate(&data, 3, 3, 2.4, -0.4), 3.0);
    }

    #[test]
    fn test_bilinear_interpolate() {
        let data: Vec<f32> = vec![
            1.0, 2.0,
            3.0, 4.0,
        ];

        assert_eq!(bilinear_interpolate(&data, 2, 2, 0.0, 0.0), 1.0);
        assert_eq!(bilinear_interpolate(&data, 2, 2, 1.0, 0.0), 2.0);
        assert_eq!(bilinear_interpolate(&data, 2, 2, 0.0, 1.0), 3.0);
        assert_eq!(bilinear_interpolate(&data, 2, 2, 1.0, 1.0), 4.0);
        assert!((bilinear_interpolate(&data, 2, 2, 0.5, 0.5) - 2.5).abs() < 1e-6);
        assert!((bilinear_interpolate(&data, 2, 2, -0.3, 0.5) - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_bilinear_ignores_nan_with_zero_weight() {
        let data: Vec<f32> = vec![
            1.0, f32::NAN,
            3.0, 4.0,
        ];

        assert_eq!(bilinear_interpolate(&data, 2, 2, 0.0, 0.0), 1.0);
        assert_eq!(bilinear_interpolate(&data, 2, 2, 0.0, 1.0), 3.0);
        assert!(bilinear_interpolate(&data, 2, 2, 0.5, 0.5).is_nan());
    }

    #[test]
    fn test_cubic_matches_grid_points() {
        let data: Vec<f32> = (0..16).map(|v| v as f32).collect();
        for row in 0..4 {
            for col in 0..4 {
                let v = cubic_interpolate(&data, 4, 4, col as f64, row as f64);
                assert!((v - (row * 4 + col) as f32).abs() < 1e-5);
            }
        }
    }

    #[test]
    fn test_cubic_linear_field_is_exact() {
        // Catmull-Rom reproduces linear functions away from the edges
        let data: Vec<f32> = (0..25).map(|i| (i % 5) as f32 * 2.0).collect();
        let v = cubic_interpolate(&data, 5, 5, 2.25, 2.0);
        assert!((v - 4.5).abs() < 1e-5);
    }

    #[test]
    fn test_non_finite_position() {
        let data = vec![1.0f32; 4];
        assert!(nearest_interpolate(&data, 2, 2, f64::NAN, 0.0).is_nan());
        assert!(bilinear_interpolate(&data, 2, 2, 0.0, f64::INFINITY).is_nan());
        assert!(cubic_interpolate(&data, 2, 2, f64::NAN, f64::NAN).is_nan());
    }
}
