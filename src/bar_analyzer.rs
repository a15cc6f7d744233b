// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

//! Measures where the CSU bars actually are, from an image of the mask.
//!
//! Each slit occupies a horizontal band of the detector. Within the band the
//! slit shows as a bright gap between two dark bars. The band is median
//! filtered along X, differentiated along X and summed over its rows; the two
//! extrema of the resulting edge profile are the bar edges, located by a
//! dual-Gaussian fit.

use std::collections::BTreeMap;

use image::{Rgb, RgbImage};
use log::{debug, info, warn};
use serde::Serialize;

use csu_elements::errors::{invalid_input_error, CsuError};
use csu_elements::image_utils::{draw_band, draw_edge_marker, edge_profile,
                                to_display_image_auto, to_rgb, DetectorImage};
use csu_elements::profile_fit::{fit_edge_pair, LMConfig};
use csu_elements::transform::CoordinateTransform;

use crate::bars::{self, MAX_TRAVEL_MM, MIN_TRAVEL_MM, NUM_SLITS};

#[derive(Debug, Clone)]
pub struct AnalysisConfig {
    /// Median filter window along X, pixels.
    pub filter_size: usize,

    /// Rows trimmed from each side of a slit band so that light from the
    /// neighboring slits is excluded.
    pub pixel_shim: usize,

    /// Produce a diagnostic image with the bands and measured edges.
    pub render_overlay: bool,

    pub fit: LMConfig,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        AnalysisConfig{
            filter_size: 7,
            pixel_shim: 5,
            render_overlay: false,
            fit: LMConfig::default(),
        }
    }
}

/// Rows `y_begin..y_end` of the image that belong to one slit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PixelBand {
    pub slit: u32,
    pub y_begin: usize,
    pub y_end: usize,
}

impl PixelBand {
    pub fn mid_y(&self) -> f64 {
        0.5 * (self.y_begin + self.y_end - 1) as f64
    }

    pub fn rows(&self) -> usize {
        self.y_end - self.y_begin
    }
}

/// Where one bar was found. Both positions are None when the bar could not
/// be located.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BarMeasurement {
    pub bar: u32,
    pub pixel_x: Option<f64>,
    pub mm: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct BarPositions {
    /// One entry per bar, 1 through 92.
    measurements: BTreeMap<u32, BarMeasurement>,
    /// Band used for each slit, if the slit falls on the image.
    bands: BTreeMap<u32, PixelBand>,
    overlay: Option<RgbImage>,
}

impl BarPositions {
    /// Assembles measurements, e.g. from an earlier analysis. Bars not
    /// present in `pixel_x` are undetermined.
    pub fn from_pixel_positions(pixel_x: &BTreeMap<u32, f64>,
                                transform: &CoordinateTransform) -> Self {
        let measurements = (1..=bars::NUM_BARS).map(|bar| {
            let x = pixel_x.get(&bar).copied();
            let slit = bars::bar_to_slit(bar) as f64;
            // Without a band, use the row of the slit center.
            let mm = x.map(|x| {
                let y = transform.to_pixel(bars::CSU_CENTER_MM, slit).1;
                transform.to_physical(x, y).0
            });
            (bar, BarMeasurement{bar, pixel_x: x, mm})
        }).collect();
        BarPositions{measurements, bands: BTreeMap::new(), overlay: None}
    }

    pub fn measurement(&self, bar: u32) -> Option<&BarMeasurement> {
        self.measurements.get(&bar)
    }

    pub fn measurements(&self) -> impl Iterator<Item = &BarMeasurement> {
        self.measurements.values()
    }

    pub fn pixel_x(&self, bar: u32) -> Option<f64> {
        self.measurements.get(&bar).and_then(|m| m.pixel_x)
    }

    pub fn mm(&self, bar: u32) -> Option<f64> {
        self.measurements.get(&bar).and_then(|m| m.mm)
    }

    /// Pixel X of every bar; None for undetermined bars.
    pub fn pixel_positions(&self) -> BTreeMap<u32, Option<f64>> {
        self.measurements.iter().map(|(b, m)| (*b, m.pixel_x)).collect()
    }

    pub fn mm_positions(&self) -> BTreeMap<u32, Option<f64>> {
        self.measurements.iter().map(|(b, m)| (*b, m.mm)).collect()
    }

    pub fn undetermined_bars(&self) -> Vec<u32> {
        self.measurements.values()
            .filter(|m| m.pixel_x.is_none())
            .map(|m| m.bar)
            .collect()
    }

    pub fn band(&self, slit: u32) -> Option<&PixelBand> {
        self.bands.get(&slit)
    }

    pub fn overlay(&self) -> Option<&RgbImage> {
        self.overlay.as_ref()
    }
}

/// Returns the rows of an image of `height` that see only `slit`, or None if
/// no such rows remain.
///
/// The slit's boundaries (slit number +/- 0.5) are mapped to pixels at both
/// ends of the bar travel. The band is the region inside all four boundary
/// rows, less `pixel_shim` rows on each side.
pub fn slit_pixel_band(transform: &CoordinateTransform, slit: u32,
                       pixel_shim: usize, height: usize) -> Option<PixelBand> {
    let boundary_rows = |s: f64| [transform.to_pixel(MIN_TRAVEL_MM, s).1,
                                  transform.to_pixel(MAX_TRAVEL_MM, s).1];
    let low = boundary_rows(slit as f64 - 0.5);
    let high = boundary_rows(slit as f64 + 0.5);
    // Y may increase or decrease with slit number.
    let (first, second) = if low[0] + low[1] <= high[0] + high[1] {
        (low, high)
    } else {
        (high, low)
    };
    let top = first[0].max(first[1]).ceil() + pixel_shim as f64;
    let bottom = second[0].min(second[1]).floor() - pixel_shim as f64;
    if !top.is_finite() || !bottom.is_finite() || height == 0 {
        return None;
    }
    let y_begin = top.max(0.0);
    let y_last = bottom.min(height as f64 - 1.0);
    if y_last < y_begin {
        return None;
    }
    Some(PixelBand{slit, y_begin: y_begin as usize, y_end: y_last as usize + 1})
}

// Fits the edges of one slit. Returns (falling edge x, rising edge x).
fn measure_slit(image: &DetectorImage, band: &PixelBand, config: &AnalysisConfig)
                -> Result<Option<(f64, f64)>, CsuError> {
    let profile = edge_profile(image, band.y_begin, band.y_end, config.filter_size)?;
    let Some(fit) = fit_edge_pair(&profile, &config.fit) else {
        return Ok(None);
    };
    debug!("Slit {} rows {}..{}: {:?}", band.slit, band.y_begin, band.y_end, fit);
    if !fit.passes_validity_gate() {
        return Ok(None);
    }
    Ok(Some((fit.negative.mean, fit.positive.mean)))
}

/// Locates both bars of every slit in `image`.
///
/// The rising edge (dark to bright with increasing X) is the left bar, the
/// falling edge the right bar. Slits whose fit fails the validity gate, or
/// that fall off the image, leave both bars undetermined.
pub fn find_bar_positions_from_image(image: &DetectorImage,
                                     transform: &CoordinateTransform,
                                     config: &AnalysisConfig)
                                     -> Result<BarPositions, CsuError> {
    if image.is_empty() {
        return Err(invalid_input_error("image has no pixels"));
    }
    let mut measurements = BTreeMap::new();
    let mut bands = BTreeMap::new();
    for slit in 1..=NUM_SLITS {
        let (right_bar, left_bar) = bars::slit_to_bars(slit);
        let mut left = BarMeasurement{bar: left_bar, pixel_x: None, mm: None};
        let mut right = BarMeasurement{bar: right_bar, pixel_x: None, mm: None};

        match slit_pixel_band(transform, slit, config.pixel_shim, image.height()) {
            None => warn!("Slit {} has no usable rows in the image", slit),
            Some(band) => {
                if let Some((falling, rising)) = measure_slit(image, &band, config)? {
                    let y = band.mid_y();
                    left.pixel_x = Some(rising);
                    left.mm = Some(transform.to_physical(rising, y).0);
                    right.pixel_x = Some(falling);
                    right.mm = Some(transform.to_physical(falling, y).0);
                } else {
                    debug!("Slit {}: bars undetermined", slit);
                }
                bands.insert(slit, band);
            },
        }
        measurements.insert(left_bar, left);
        measurements.insert(right_bar, right);
    }

    let mut positions = BarPositions{measurements, bands, overlay: None};
    let undetermined = positions.undetermined_bars();
    info!("Located {} of {} bars{}", bars::NUM_BARS as usize - undetermined.len(),
          bars::NUM_BARS,
          if undetermined.is_empty() { String::new() }
          else { format!("; undetermined: {:?}", undetermined) });
    if config.render_overlay {
        positions.overlay = Some(render_overlay(image, &positions));
    }
    Ok(positions)
}

const BAND_COLOR: Rgb<u8> = Rgb([0, 160, 255]);
const LEFT_EDGE_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const RIGHT_EDGE_COLOR: Rgb<u8> = Rgb([255, 0, 0]);

/// Draws the slit bands and located edges over a display rendering of
/// `image`.
pub fn render_overlay(image: &DetectorImage, positions: &BarPositions) -> RgbImage {
    let mut canvas = to_rgb(&to_display_image_auto(image, 0.5));
    for band in positions.bands.values() {
        draw_band(&mut canvas, band.y_begin as u32, band.y_end as u32, BAND_COLOR);
        let (right_bar, left_bar) = bars::slit_to_bars(band.slit);
        for (bar, color) in [(left_bar, LEFT_EDGE_COLOR), (right_bar, RIGHT_EDGE_COLOR)] {
            if let Some(x) = positions.pixel_x(bar) {
                draw_edge_marker(&mut canvas, x, band.y_begin as u32,
                                 band.y_end as u32, color);
            }
        }
    }
    canvas
}

#[cfg(test)]
mod tests {
    extern crate approx;
    use approx::assert_abs_diff_eq;

    use super::*;
    use crate::mask::Mask;
    use crate::test_util::{render_mask_image, synthetic_transform};

    #[test]
    fn test_slit_pixel_band() {
        let transform = synthetic_transform();
        // Slit 1 spans y 0..20.
        let band = slit_pixel_band(&transform, 1, 5, 920).unwrap();
        assert_eq!(band, PixelBand{slit: 1, y_begin: 5, y_end: 16});
        assert_eq!(band.rows(), 11);
        assert_abs_diff_eq!(band.mid_y(), 10.0);
        assert_abs_diff_eq!(transform.to_physical(0.0, band.mid_y()).1, 1.0,
                            epsilon = 1e-9);

        let band = slit_pixel_band(&transform, 46, 0, 920).unwrap();
        assert_eq!(band, PixelBand{slit: 46, y_begin: 900, y_end: 920});

        // Clamped to a short image, then off it entirely.
        let band = slit_pixel_band(&transform, 2, 0, 30).unwrap();
        assert_eq!(band, PixelBand{slit: 2, y_begin: 20, y_end: 30});
        assert_eq!(slit_pixel_band(&transform, 3, 0, 30), None);
        // Shim wider than the slit.
        assert_eq!(slit_pixel_band(&transform, 1, 11, 920), None);
    }

    #[test]
    fn test_find_open_mask_bars() {
        let transform = synthetic_transform();
        let mask = Mask::open();
        let image = render_mask_image(&mask, &transform, &BTreeMap::new());
        let config = AnalysisConfig{render_overlay: true, ..Default::default()};
        let positions = find_bar_positions_from_image(&image, &transform, &config)
            .unwrap();

        assert!(positions.undetermined_bars().is_empty());
        for slit in 1..=NUM_SLITS {
            let (right_bar, left_bar) = bars::slit_to_bars(slit);
            assert_abs_diff_eq!(positions.pixel_x(left_bar).unwrap(), 24.0,
                                epsilon = 1e-4);
            assert_abs_diff_eq!(positions.pixel_x(right_bar).unwrap(), 690.0,
                                epsilon = 1e-4);
            assert_abs_diff_eq!(positions.mm(left_bar).unwrap(), MAX_TRAVEL_MM,
                                epsilon = 1e-4);
            assert_abs_diff_eq!(positions.mm(right_bar).unwrap(), MIN_TRAVEL_MM,
                                epsilon = 1e-4);
        }
        let overlay = positions.overlay().unwrap();
        assert_eq!(overlay.dimensions(), (720, 920));
        assert_eq!(overlay.get_pixel(24, 10), &LEFT_EDGE_COLOR);
    }

    #[test]
    fn test_dark_slit_is_undetermined() {
        let transform = synthetic_transform();
        let mask = Mask::open();
        let image = render_mask_image(&mask, &transform, &BTreeMap::new());
        // Blank out slit 5 (rows 80..100).
        let image = DetectorImage::from_fn(image.width(), image.height(), |x, y| {
            if (80..100).contains(&y) { 0.0 } else { image.pixels()[(y, x)] }
        });
        let positions = find_bar_positions_from_image(
            &image, &transform, &AnalysisConfig::default()).unwrap();
        assert_eq!(positions.undetermined_bars(), vec![9, 10]);
        assert_eq!(positions.mm(9), None);
        assert!(positions.band(5).is_some());
        assert!(positions.overlay().is_none());
    }

    #[test]
    fn test_empty_image_is_rejected() {
        let image = DetectorImage::from_fn(0, 0, |_, _| 0.0);
        assert!(matches!(
            find_bar_positions_from_image(&image, &synthetic_transform(),
                                          &AnalysisConfig::default()),
            Err(CsuError::InvalidInput(_))));
    }

    #[test]
    fn test_from_pixel_positions() {
        let transform = synthetic_transform();
        let pixel_x: BTreeMap<u32, f64> = [(1, 690.0), (2, 24.0)].into_iter().collect();
        let positions = BarPositions::from_pixel_positions(&pixel_x, &transform);
        assert_abs_diff_eq!(positions.mm(1).unwrap(), MIN_TRAVEL_MM, epsilon = 1e-9);
        assert_abs_diff_eq!(positions.mm(2).unwrap(), MAX_TRAVEL_MM, epsilon = 1e-9);
        assert_eq!(positions.undetermined_bars().len(), 90);
        assert_eq!(positions.pixel_positions().len(), 92);
    }

}  // mod tests.
