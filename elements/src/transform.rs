// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

// Affine transforms between detector pixel coordinates (x, y) and CSU
// physical coordinates (bar position in mm, slit number).
//
// Points are treated as row vectors padded with a trailing 1, so a single
// 3x3 matrix A maps [x, y, 1] * A = [u, v, 1] and carries both the linear
// part (upper 2x2) and the translation (bottom row).

use std::fs;
use std::path::Path;

use log::{debug, info};
use nalgebra::{DMatrix, Matrix3, RowVector3};
use serde::{Deserialize, Serialize};

use crate::errors::{invalid_input_error, CsuError};

// Coefficients smaller than this are numerical noise from the least squares
// solve and are zeroed.
const NOISE_FLOOR: f64 = 1e-10;

#[derive(Clone, Debug, PartialEq)]
pub struct CoordinateTransform {
    pixel_to_physical: Matrix3<f64>,
    physical_to_pixel: Matrix3<f64>,
}

// On-disk form. Matrices are stored row by row.
#[derive(Serialize, Deserialize)]
struct TransformFile {
    physical_to_pixel: [[f64; 3]; 3],
    pixel_to_physical: [[f64; 3]; 3],
}

impl CoordinateTransform {
    pub fn new(pixel_to_physical: Matrix3<f64>,
               physical_to_pixel: Matrix3<f64>) -> Self {
        CoordinateTransform{pixel_to_physical, physical_to_pixel}
    }

    /// Fits both directions from corresponding point sets.
    ///
    /// The two matrices are solved as independent least squares problems,
    /// `X * A ~= Y` and `Y * Ainv ~= X`. They are therefore not exact
    /// inverses of each other; each minimizes the residual in its own
    /// direction. Calibration data downstream is tuned against this.
    ///
    /// `pixel_points` and `physical_points` must have equal length of at
    /// least 3, and must not be collinear.
    pub fn fit(pixel_points: &[[f64; 2]], physical_points: &[[f64; 2]])
               -> Result<Self, CsuError> {
        if pixel_points.len() != physical_points.len() {
            return Err(invalid_input_error(&format!(
                "Got {} pixel points but {} physical points",
                pixel_points.len(), physical_points.len())));
        }
        if pixel_points.len() < 3 {
            return Err(invalid_input_error(&format!(
                "Affine fit needs at least 3 points, got {}", pixel_points.len())));
        }
        let x = pad(pixel_points);
        let y = pad(physical_points);

        let pixel_to_physical = solve_least_squares(&x, &y)?;
        let physical_to_pixel = solve_least_squares(&y, &x)?;
        debug!("Fit pixel_to_physical {} physical_to_pixel {}",
               pixel_to_physical, physical_to_pixel);
        Ok(CoordinateTransform{pixel_to_physical, physical_to_pixel})
    }

    pub fn pixel_to_physical_matrix(&self) -> &Matrix3<f64> {
        &self.pixel_to_physical
    }

    pub fn physical_to_pixel_matrix(&self) -> &Matrix3<f64> {
        &self.physical_to_pixel
    }

    /// Maps pixel (x, y) to physical (mm, slit).
    pub fn to_physical(&self, x: f64, y: f64) -> (f64, f64) {
        let p = apply_one(&self.pixel_to_physical, [x, y]);
        (p[0], p[1])
    }

    /// Maps physical (mm, slit) to pixel (x, y).
    pub fn to_pixel(&self, mm: f64, slit: f64) -> (f64, f64) {
        let p = apply_one(&self.physical_to_pixel, [mm, slit]);
        (p[0], p[1])
    }

    pub fn pixels_to_physical(&self, points: &[[f64; 2]]) -> Vec<[f64; 2]> {
        apply(&self.pixel_to_physical, points)
    }

    pub fn physical_to_pixels(&self, points: &[[f64; 2]]) -> Vec<[f64; 2]> {
        apply(&self.physical_to_pixel, points)
    }

    // RMS distance (pixels) between `pixel_points` and the physical->pixel
    // image of `physical_points`.
    pub fn rms_residual(&self, pixel_points: &[[f64; 2]],
                        physical_points: &[[f64; 2]]) -> f64 {
        if pixel_points.is_empty() {
            return 0.0;
        }
        let predicted = self.physical_to_pixels(physical_points);
        let sum_sq: f64 = predicted.iter().zip(pixel_points.iter())
            .map(|(p, q)| (p[0] - q[0]).powi(2) + (p[1] - q[1]).powi(2))
            .sum();
        (sum_sq / pixel_points.len() as f64).sqrt()
    }

    pub fn from_json_str(json: &str) -> Result<Self, CsuError> {
        let file: TransformFile = serde_json::from_str(json)?;
        Ok(CoordinateTransform{
            pixel_to_physical: from_rows(&file.pixel_to_physical),
            physical_to_pixel: from_rows(&file.physical_to_pixel),
        })
    }

    pub fn to_json_string(&self) -> Result<String, CsuError> {
        let file = TransformFile{
            physical_to_pixel: to_rows(&self.physical_to_pixel),
            pixel_to_physical: to_rows(&self.pixel_to_physical),
        };
        Ok(serde_json::to_string_pretty(&file)?)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, CsuError> {
        let json = fs::read_to_string(&path)?;
        let transform = Self::from_json_str(&json)?;
        info!("Loaded CSU transform from {}", path.as_ref().display());
        Ok(transform)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), CsuError> {
        fs::write(&path, self.to_json_string()?)?;
        info!("Saved CSU transform to {}", path.as_ref().display());
        Ok(())
    }
}

/// Pads each point with a trailing 1, applies `matrix`, and strips the
/// homogeneous column.
pub fn apply(matrix: &Matrix3<f64>, points: &[[f64; 2]]) -> Vec<[f64; 2]> {
    points.iter().map(|p| apply_one(matrix, *p)).collect()
}

fn apply_one(matrix: &Matrix3<f64>, point: [f64; 2]) -> [f64; 2] {
    let padded = RowVector3::new(point[0], point[1], 1.0);
    let out = padded * matrix;
    [out[0], out[1]]
}

fn pad(points: &[[f64; 2]]) -> DMatrix<f64> {
    DMatrix::from_fn(points.len(), 3, |r, c| {
        if c < 2 { points[r][c] } else { 1.0 }
    })
}

// Solves a * m ~= b in the least squares sense for 3x3 `m`.
fn solve_least_squares(a: &DMatrix<f64>, b: &DMatrix<f64>)
                       -> Result<Matrix3<f64>, CsuError> {
    let svd = a.clone().svd(true, true);
    if svd.rank(1e-9) < 3 {
        return Err(invalid_input_error(
            "Correspondence points are degenerate (collinear or repeated)"));
    }
    let solution = svd.solve(b, 1e-12).map_err(|e| invalid_input_error(e))?;
    let mut m = Matrix3::from_fn(|r, c| solution[(r, c)]);
    for v in m.iter_mut() {
        if v.abs() < NOISE_FLOOR {
            *v = 0.0;
        }
    }
    Ok(m)
}

fn from_rows(rows: &[[f64; 3]; 3]) -> Matrix3<f64> {
    Matrix3::from_fn(|r, c| rows[r][c])
}

fn to_rows(m: &Matrix3<f64>) -> [[f64; 3]; 3] {
    let mut rows = [[0.0; 3]; 3];
    for (r, row) in rows.iter_mut().enumerate() {
        for (c, v) in row.iter_mut().enumerate() {
            *v = m[(r, c)];
        }
    }
    rows
}

#[cfg(test)]
mod tests {
    extern crate approx;
    use approx::assert_abs_diff_eq;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use super::*;

    // Nominal CSU geometry: x falls with bar position, y rises with slit.
    fn nominal_pixel(mm: f64, slit: f64) -> [f64; 2] {
        [2047.0 - 7.6 * mm + 0.3 * slit, 44.2 * slit - 0.02 * mm + 3.0]
    }

    fn grid() -> (Vec<[f64; 2]>, Vec<[f64; 2]>) {
        let mut pixels = Vec::new();
        let mut physical = Vec::new();
        for mm in [4.0, 70.0, 137.2, 200.0, 270.4] {
            for slit in [1.0, 12.0, 23.0, 35.0, 46.0] {
                pixels.push(nominal_pixel(mm, slit));
                physical.push([mm, slit]);
            }
        }
        (pixels, physical)
    }

    #[test]
    fn test_fit_exact_data() {
        let (pixels, physical) = grid();
        let transform = CoordinateTransform::fit(&pixels, &physical).unwrap();
        let (x, y) = transform.to_pixel(137.2, 23.0);
        let expected = nominal_pixel(137.2, 23.0);
        assert_abs_diff_eq!(x, expected[0], epsilon = 1e-6);
        assert_abs_diff_eq!(y, expected[1], epsilon = 1e-6);

        let (mm, slit) = transform.to_physical(expected[0], expected[1]);
        assert_abs_diff_eq!(mm, 137.2, epsilon = 1e-6);
        assert_abs_diff_eq!(slit, 23.0, epsilon = 1e-6);

        // Translation lives in the bottom row.
        let m = transform.physical_to_pixel_matrix();
        assert_abs_diff_eq!(m[(2, 0)], 2047.0, epsilon = 1e-6);
        assert_abs_diff_eq!(m[(0, 0)], -7.6, epsilon = 1e-9);
        assert_abs_diff_eq!(transform.rms_residual(&pixels, &physical), 0.0,
                            epsilon = 1e-6);
    }

    #[test]
    fn test_noise_floor_zeroes_cross_terms() {
        // Axis-aligned data: the off-diagonal linear terms must be exactly 0.
        let physical = vec![[10.0, 1.0], [200.0, 1.0], [10.0, 40.0], [200.0, 40.0]];
        let pixels: Vec<[f64; 2]> = physical.iter()
            .map(|p| [1000.0 - 2.5 * p[0], 22.0 * p[1] - 10.0]).collect();
        let transform = CoordinateTransform::fit(&pixels, &physical).unwrap();
        let m = transform.physical_to_pixel_matrix();
        assert_eq!(m[(0, 1)], 0.0);
        assert_eq!(m[(1, 0)], 0.0);
        assert_eq!(m[(0, 2)], 0.0);
        assert_eq!(m[(1, 2)], 0.0);
        assert_abs_diff_eq!(m[(2, 2)], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_round_trip_with_noise() {
        let mut rng = StdRng::seed_from_u64(42);
        let (clean_pixels, physical) = grid();
        let pixels: Vec<[f64; 2]> = clean_pixels.iter()
            .map(|p| [p[0] + rng.gen_range(-0.3..0.3),
                      p[1] + rng.gen_range(-0.3..0.3)])
            .collect();
        let transform = CoordinateTransform::fit(&pixels, &physical).unwrap();

        let there = transform.pixels_to_physical(&pixels);
        let back = transform.physical_to_pixels(&there);
        let mut max_err = 0.0_f64;
        for (orig, round_trip) in pixels.iter().zip(back.iter()) {
            let err = ((orig[0] - round_trip[0]).powi(2) +
                       (orig[1] - round_trip[1]).powi(2)).sqrt();
            max_err = max_err.max(err);
        }
        assert!(max_err < 0.5, "round trip error {}", max_err);
        // Independent fits: not an exact inverse.
        assert!(max_err > 0.0);

        let product = transform.pixel_to_physical_matrix() *
            transform.physical_to_pixel_matrix();
        assert!((product - Matrix3::identity()).abs().max() > 0.0);
    }

    #[test]
    fn test_fit_rejects_bad_input() {
        let (pixels, physical) = grid();
        assert!(matches!(CoordinateTransform::fit(&pixels[..2], &physical[..2]),
                         Err(CsuError::InvalidInput(_))));
        assert!(matches!(CoordinateTransform::fit(&pixels, &physical[..4]),
                         Err(CsuError::InvalidInput(_))));

        let collinear_pixels = vec![[0.0, 0.0], [1.0, 1.0], [2.0, 2.0], [3.0, 3.0]];
        let collinear_physical = vec![[0.0, 1.0], [1.0, 2.0], [2.0, 3.0], [3.0, 4.0]];
        assert!(matches!(CoordinateTransform::fit(&collinear_pixels,
                                                  &collinear_physical),
                         Err(CsuError::InvalidInput(_))));
    }

    #[test]
    fn test_save_and_load() {
        let (pixels, physical) = grid();
        let transform = CoordinateTransform::fit(&pixels, &physical).unwrap();
        let path = std::env::temp_dir().join(
            format!("csu_transform_test_{}.json", std::process::id()));
        transform.save(&path).unwrap();
        let loaded = CoordinateTransform::load(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(loaded, transform);

        assert!(matches!(CoordinateTransform::from_json_str("{\"physical_to_pixel\": 3}"),
                         Err(CsuError::TransformFile(_))));
    }

}  // mod tests.
