// Copyright (c) 2024 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::path::{Path, PathBuf};

use image::{GrayImage, Luma, Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_line_segment_mut};
use imageproc::rect::Rect;
use log::debug;
use nalgebra::DMatrix;

use crate::errors::{invalid_input_error, CsuError};
use crate::fits_io::{is_fits_path, read_fits_image};

/// A detector frame: raw counts indexed (y, x), with y the row.
#[derive(Debug, Clone)]
pub struct DetectorImage {
    pixels: DMatrix<f64>,
    source: Option<PathBuf>,
    // Value of the INSTRUME header, when known.
    instrument: Option<String>,
}

impl DetectorImage {
    /// Reads a FITS frame (see `fits_io`), or any format the `image` crate
    /// decodes as 16-bit luminance. Only FITS frames carry an instrument.
    pub fn open(path: &Path) -> Result<Self, CsuError> {
        if is_fits_path(path) {
            return read_fits_image(path);
        }
        let gray = image::open(path)?.into_luma16();
        let (width, height) = gray.dimensions();
        debug!("Read {}x{} image from {:?}", width, height, path);
        let pixels = DMatrix::from_fn(height as usize, width as usize, |y, x| {
            gray.get_pixel(x as u32, y as u32).0[0] as f64
        });
        Ok(DetectorImage{pixels, source: Some(path.to_path_buf()), instrument: None})
    }

    /// `f` is called with (x, y).
    pub fn from_fn<F>(width: usize, height: usize, mut f: F) -> Self
    where F: FnMut(usize, usize) -> f64 {
        DetectorImage{pixels: DMatrix::from_fn(height, width, |y, x| f(x, y)),
                      source: None, instrument: None}
    }

    pub fn from_matrix(pixels: DMatrix<f64>) -> Self {
        DetectorImage{pixels, source: None, instrument: None}
    }

    pub fn with_source(mut self, path: &Path) -> Self {
        self.source = Some(path.to_path_buf());
        self
    }

    pub fn with_instrument(mut self, instrument: &str) -> Self {
        self.instrument = Some(instrument.to_string());
        self
    }

    pub fn width(&self) -> usize { self.pixels.ncols() }
    pub fn height(&self) -> usize { self.pixels.nrows() }
    pub fn pixels(&self) -> &DMatrix<f64> { &self.pixels }
    pub fn source(&self) -> Option<&Path> { self.source.as_deref() }
    pub fn instrument(&self) -> Option<&str> { self.instrument.as_deref() }

    pub fn is_empty(&self) -> bool {
        self.pixels.nrows() == 0 || self.pixels.ncols() == 0
    }
}

// Maps an out-of-range index into 0..len by mirroring about the edges,
// repeating the edge sample (d c b a | a b c d | d c b a).
fn reflect_index(i: isize, len: usize) -> usize {
    let period = 2 * len as isize;
    let m = i.rem_euclid(period);
    if m < len as isize { m as usize } else { (period - 1 - m) as usize }
}

/// Median filter of each row of `rows` along X only, with a window of
/// `size` samples and reflected boundaries. A window of 0 or 1 is identity.
pub fn median_filter_rows(rows: &DMatrix<f64>, size: usize) -> DMatrix<f64> {
    if size <= 1 || rows.ncols() == 0 {
        return rows.clone();
    }
    let width = rows.ncols();
    let half = (size / 2) as isize;
    let mut window = Vec::with_capacity(size);
    let mut out = DMatrix::zeros(rows.nrows(), width);
    for y in 0..rows.nrows() {
        for x in 0..width {
            window.clear();
            for k in 0..size as isize {
                let src = reflect_index(x as isize - half + k, width);
                window.push(rows[(y, src)]);
            }
            let mid = size / 2;
            let (_, median, _) = window.select_nth_unstable_by(mid, |a, b| a.total_cmp(b));
            out[(y, x)] = *median;
        }
    }
    out
}

/// Derivative along X: central differences in the interior, one-sided
/// differences at the first and last column.
pub fn x_gradient(rows: &DMatrix<f64>) -> DMatrix<f64> {
    let width = rows.ncols();
    let mut out = DMatrix::zeros(rows.nrows(), width);
    if width < 2 {
        return out;
    }
    for y in 0..rows.nrows() {
        out[(y, 0)] = rows[(y, 1)] - rows[(y, 0)];
        out[(y, width - 1)] = rows[(y, width - 1)] - rows[(y, width - 2)];
        for x in 1..width - 1 {
            out[(y, x)] = 0.5 * (rows[(y, x + 1)] - rows[(y, x - 1)]);
        }
    }
    out
}

/// Sums each column over all rows.
pub fn collapse_rows(rows: &DMatrix<f64>) -> Vec<f64> {
    rows.row_sum().iter().copied().collect()
}

/// Edge profile of the rows `y_begin..y_end` of `image`: median filtered
/// along X, differentiated along X, then summed over the rows.
pub fn edge_profile(image: &DetectorImage, y_begin: usize, y_end: usize,
                    filter_size: usize) -> Result<Vec<f64>, CsuError> {
    if y_begin >= y_end || y_end > image.height() {
        return Err(invalid_input_error(&format!(
            "bad row range {}..{} for image height {}",
            y_begin, y_end, image.height())));
    }
    let band = image.pixels().rows(y_begin, y_end - y_begin).into_owned();
    let filtered = median_filter_rows(&band, filter_size);
    Ok(collapse_rows(&x_gradient(&filtered)))
}

// Gamma curve over the full 8-bit range.
fn compute_lut(gamma: f32) -> [u8; 256] {
    let mut lut: [u8; 256] = [0; 256];
    for (n, entry) in lut.iter_mut().enumerate() {
        let scaled = 255.0 * (n as f32 / 255.0).powf(gamma);
        *entry = scaled.round().clamp(0.0, 255.0) as u8;
    }
    lut
}

/// Renders `image` for display. Counts between `low` and `high` (exclusive)
/// are mapped onto 0..255 through a gamma curve; counts outside are clipped.
pub fn to_display_image(image: &DetectorImage, low: f64, high: f64,
                        gamma: f32) -> GrayImage {
    let span = if high > low { high - low } else { 1.0 };
    let lut = compute_lut(gamma);
    let pixels = image.pixels();
    GrayImage::from_fn(image.width() as u32, image.height() as u32, |x, y| {
        let v = (pixels[(y as usize, x as usize)] - low) / span * 255.0;
        Luma([lut[v.clamp(0.0, 255.0) as usize]])
    })
}

/// Display scaling using the frame's own minimum and maximum.
pub fn to_display_image_auto(image: &DetectorImage, gamma: f32) -> GrayImage {
    let pixels = image.pixels();
    if pixels.is_empty() {
        return GrayImage::new(0, 0);
    }
    to_display_image(image, pixels.min(), pixels.max(), gamma)
}

/// Colored canvas for annotations.
pub fn to_rgb(gray: &GrayImage) -> RgbImage {
    RgbImage::from_fn(gray.width(), gray.height(), |x, y| {
        let v = gray.get_pixel(x, y).0[0];
        Rgb([v, v, v])
    })
}

/// Outlines rows `y_begin..y_end` across the full canvas width.
pub fn draw_band(canvas: &mut RgbImage, y_begin: u32, y_end: u32, color: Rgb<u8>) {
    if y_end <= y_begin || canvas.width() == 0 {
        return;
    }
    draw_hollow_rect_mut(canvas,
                         Rect::at(0, y_begin as i32).of_size(canvas.width(),
                                                              y_end - y_begin),
                         color);
}

/// Vertical tick at the column nearest `x`, spanning rows `y_begin..y_end`.
pub fn draw_edge_marker(canvas: &mut RgbImage, x: f64, y_begin: u32, y_end: u32,
                        color: Rgb<u8>) {
    let x = x.round() as f32;
    draw_line_segment_mut(canvas,
                          (x, y_begin as f32),
                          (x, y_end.saturating_sub(1) as f32),
                          color);
}

// mod tests.
