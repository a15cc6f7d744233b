// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

//! Compares measured bar positions with the positions commanded by a mask.
//!
//! The comparison is made in pixels: each commanded position is mapped onto
//! the detector with the physical-to-pixel transform and subtracted from the
//! measured edge. A failed verification is reported, not raised; the caller
//! decides whether to hold off further observing.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::Serialize;

use csu_elements::errors::CsuError;
use csu_elements::image_utils::DetectorImage;
use csu_elements::transform::CoordinateTransform;
use csu_elements::value_stats::{DescriptiveStats, ValueStatsAccumulator};

use crate::bar_analyzer::{find_bar_positions_from_image, AnalysisConfig, BarPositions};
use crate::bars::{self, NUM_BARS};
use crate::mask::Mask;

pub const DEFAULT_TOLERANCE_PIXELS: f64 = 2.0;

/// Settings for one verification run.
#[derive(Debug, Clone)]
pub struct VerificationRules {
    /// Largest accepted |measured - expected|, pixels.
    pub tolerance_pixels: f64,
    pub analysis: AnalysisConfig,
}

impl Default for VerificationRules {
    fn default() -> Self {
        VerificationRules{tolerance_pixels: DEFAULT_TOLERANCE_PIXELS,
                          analysis: AnalysisConfig::default()}
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BarCheck {
    pub bar: u32,
    pub slit: u32,
    pub commanded_mm: f64,
    pub expected_pixel_x: f64,
    pub measured_pixel_x: Option<f64>,
    /// measured - expected; None when the bar was not located.
    pub difference: Option<f64>,
    pub passed: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct VerificationReport {
    pub mask_name: String,
    pub tolerance_pixels: f64,
    /// All 92 bars, in bar order.
    pub checks: Vec<BarCheck>,
    pub passed: bool,
    /// Statistics of the differences of located bars.
    pub residual_stats: Option<DescriptiveStats>,
    pub timestamp: DateTime<Utc>,
}

impl VerificationReport {
    pub fn check(&self, bar: u32) -> Option<&BarCheck> {
        self.checks.iter().find(|c| c.bar == bar)
    }

    /// Difference for every bar; None where the bar was not located.
    pub fn differences(&self) -> BTreeMap<u32, Option<f64>> {
        self.checks.iter().map(|c| (c.bar, c.difference)).collect()
    }

    pub fn failed_bars(&self) -> Vec<u32> {
        self.checks.iter().filter(|c| !c.passed).map(|c| c.bar).collect()
    }
}

/// A missing measurement never passes. The comparison is inclusive.
pub fn within_tolerance(difference: Option<f64>, tolerance_pixels: f64) -> bool {
    match difference {
        Some(d) => d.abs() <= tolerance_pixels,
        None => false,
    }
}

/// Expected pixel X of every bar of `mask`.
pub fn expected_pixel_positions(mask: &Mask, transform: &CoordinateTransform)
                                -> BTreeMap<u32, f64> {
    mask.bar_positions_mm().into_iter().map(|(bar, mm)| {
        (bar, transform.to_pixel(mm, bars::bar_to_slit(bar) as f64).0)
    }).collect()
}

pub fn verify_measurements(mask: &Mask, positions: &BarPositions,
                           transform: &CoordinateTransform,
                           tolerance_pixels: f64) -> VerificationReport {
    let expected = expected_pixel_positions(mask, transform);
    let commanded = mask.bar_positions_mm();
    let mut accumulator = ValueStatsAccumulator::new();
    let mut checks = Vec::with_capacity(NUM_BARS as usize);
    for bar in 1..=NUM_BARS {
        let expected_pixel_x = expected[&bar];
        let measured_pixel_x = positions.pixel_x(bar);
        let difference = measured_pixel_x.map(|m| m - expected_pixel_x);
        if let Some(d) = difference {
            accumulator.add_value(d);
        }
        checks.push(BarCheck{
            bar,
            slit: bars::bar_to_slit(bar),
            commanded_mm: commanded[&bar],
            expected_pixel_x,
            measured_pixel_x,
            difference,
            passed: within_tolerance(difference, tolerance_pixels),
        });
    }
    let passed = checks.iter().all(|c| c.passed);
    let report = VerificationReport{
        mask_name: mask.name().to_string(),
        tolerance_pixels,
        checks,
        passed,
        residual_stats: accumulator.stats(),
        timestamp: Utc::now(),
    };

    if let Some(stats) = &report.residual_stats {
        info!("Mask {}: {} bars located, difference rms {:.3} px, max |d| {:.3} px",
              report.mask_name, stats.count, stats.rms,
              stats.min.abs().max(stats.max.abs()));
    }
    if report.passed {
        info!("Mask {} verified within {} px", report.mask_name, tolerance_pixels);
    } else {
        let failed = report.failed_bars();
        warn!("Mask {} FAILED verification: {} bars outside {} px: {:?}",
              report.mask_name, failed.len(), tolerance_pixels, failed);
    }
    report
}

/// Locates the bars in `image` and checks them against `mask`.
pub fn verify_mask_with_image(mask: &Mask, image: &DetectorImage,
                              transform: &CoordinateTransform,
                              rules: &VerificationRules)
                              -> Result<VerificationReport, CsuError> {
    let positions = find_bar_positions_from_image(image, transform, &rules.analysis)?;
    Ok(verify_measurements(mask, &positions, transform, rules.tolerance_pixels))
}

#[cfg(test)]
mod tests {
    extern crate approx;
    use approx::assert_abs_diff_eq;

    use super::*;
    use crate::test_util::{render_mask_image, synthetic_transform};

    #[test]
    fn test_within_tolerance() {
        assert!(within_tolerance(Some(2.0), 2.0));
        assert!(within_tolerance(Some(-2.0), 2.0));
        assert!(within_tolerance(Some(0.0), 2.0));
        assert!(!within_tolerance(Some(3.0), 2.0));
        assert!(!within_tolerance(Some(-3.0), 2.0));
        assert!(!within_tolerance(None, 2.0));
        assert!(!within_tolerance(None, f64::INFINITY));
    }

    #[test]
    fn test_tolerance_boundary() {
        let transform = synthetic_transform();
        let mask = Mask::open();
        let mut pixel_x = expected_pixel_positions(&mask, &transform);
        *pixel_x.get_mut(&7).unwrap() += 2.0;
        *pixel_x.get_mut(&8).unwrap() -= 3.0;
        let positions = BarPositions::from_pixel_positions(&pixel_x, &transform);
        let report = verify_measurements(&mask, &positions, &transform, 2.0);
        assert!(report.check(7).unwrap().passed);
        assert!(!report.check(8).unwrap().passed);
        assert_eq!(report.failed_bars(), vec![8]);
        assert!(!report.passed);
    }

    #[test]
    fn test_undetermined_bar_fails() {
        let transform = synthetic_transform();
        let mask = Mask::open();
        let mut pixel_x = expected_pixel_positions(&mask, &transform);
        pixel_x.remove(&40);
        let positions = BarPositions::from_pixel_positions(&pixel_x, &transform);
        let report = verify_measurements(&mask, &positions, &transform, 1000.0);
        assert_eq!(report.failed_bars(), vec![40]);
        assert_eq!(report.differences().len(), 92);
        assert_eq!(report.differences()[&40], None);
        assert_eq!(report.residual_stats.as_ref().unwrap().count, 91);
    }

    #[test]
    fn test_perfect_mask() {
        let transform = synthetic_transform();
        let mask = Mask::open();
        let image = render_mask_image(&mask, &transform, &BTreeMap::new());
        let report = verify_mask_with_image(
            &mask, &image, &transform, &VerificationRules::default()).unwrap();
        assert!(report.passed);
        let differences = report.differences();
        assert_eq!(differences.len(), 92);
        for (_, difference) in differences {
            assert_abs_diff_eq!(difference.unwrap(), 0.0, epsilon = 1e-4);
        }
        assert_eq!(report.mask_name, "OPEN");
    }

    #[test]
    fn test_one_bar_off() {
        let transform = synthetic_transform();
        let mask = Mask::open();
        let shifts: BTreeMap<u32, f64> = [(31, 5.0)].into_iter().collect();
        let image = render_mask_image(&mask, &transform, &shifts);
        let report = verify_mask_with_image(
            &mask, &image, &transform, &VerificationRules::default()).unwrap();
        assert!(!report.passed);
        assert_eq!(report.failed_bars(), vec![31]);
        for (bar, difference) in report.differences() {
            if bar == 31 {
                assert_abs_diff_eq!(difference.unwrap(), 5.0, epsilon = 1e-3);
            } else {
                assert_abs_diff_eq!(difference.unwrap(), 0.0, epsilon = 1e-4);
            }
        }
    }

    #[test]
    fn test_long_slit_mask() {
        let transform = synthetic_transform();
        let mask = Mask::long_slit(20.0, 46).unwrap();
        let image = render_mask_image(&mask, &transform, &BTreeMap::new());
        let report = verify_mask_with_image(
            &mask, &image, &transform, &VerificationRules::default()).unwrap();
        assert!(report.checks.iter().all(|c| c.measured_pixel_x.is_some()));
        assert!(report.passed, "failed bars {:?}", report.failed_bars());
    }

    #[test]
    fn test_short_long_slit_fails_on_closed_slits() {
        let transform = synthetic_transform();
        let mask = Mask::long_slit(20.0, 7).unwrap();
        let image = render_mask_image(&mask, &transform, &BTreeMap::new());
        let report = verify_mask_with_image(
            &mask, &image, &transform, &VerificationRules::default()).unwrap();
        assert!(!report.passed);
        let failed = report.failed_bars();
        assert_eq!(failed.len(), 2 * (46 - 7));
        for bar in failed {
            let slit = mask.slit(bars::bar_to_slit(bar)).unwrap();
            assert!(slit.is_closed(), "bar {} of open slit {} failed",
                    bar, slit.slit_number());
        }
    }

}  // mod tests.
