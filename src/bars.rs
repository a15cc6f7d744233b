// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

//! Geometry constants of the MOSFIRE Configurable Slit Unit and the mapping
//! between slit numbers and bar numbers.
//!
//! Each of the 46 slits is formed by two bars. The odd bar (2s - 1) is the
//! right bar and the even bar (2s) is the left bar of slit s. Bar positions
//! are millimeters along the bar travel; the left bar of an open slit sits
//! at a larger position than its right bar.

use serde::{Deserialize, Serialize};

pub const NUM_SLITS: u32 = 46;
pub const NUM_BARS: u32 = 2 * NUM_SLITS;

pub const ARCSEC_PER_MM: f64 = 1.37896;

pub const MIN_TRAVEL_MM: f64 = 4.0;
pub const MAX_TRAVEL_MM: f64 = 270.4;
/// Midpoint of the bar travel; slit centers are measured from here.
pub const CSU_CENTER_MM: f64 = 0.5 * (MIN_TRAVEL_MM + MAX_TRAVEL_MM);

// Long slit bar placement. A 0.7 arcsec slit has its left bar at
// LEFT_BASE + SLOPE * bar and its right bar at RIGHT_BASE + SLOPE * bar; the
// slope follows the tilt of the slit across the field.
pub const LONGSLIT_REFERENCE_WIDTH_ARCSEC: f64 = 0.7;
pub const LONGSLIT_SLOPE_MM_PER_BAR: f64 = -0.0773;
pub const LONGSLIT_LEFT_BASE_MM: f64 = 140.987;
pub const LONGSLIT_RIGHT_BASE_MM: f64 =
    LONGSLIT_LEFT_BASE_MM + LONGSLIT_SLOPE_MM_PER_BAR -
    LONGSLIT_REFERENCE_WIDTH_ARCSEC / ARCSEC_PER_MM;

/// Slit at the middle of the mask, where long slits and alignment boxes are
/// centered.
pub const CENTER_SLIT: u32 = 23;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BarSide {
    Left,
    Right,
}

pub fn is_valid_slit(slit: u32) -> bool {
    (1..=NUM_SLITS).contains(&slit)
}

pub fn is_valid_bar(bar: u32) -> bool {
    (1..=NUM_BARS).contains(&bar)
}

/// Returns (right bar, left bar) of `slit`.
pub fn slit_to_bars(slit: u32) -> (u32, u32) {
    (right_bar(slit), left_bar(slit))
}

pub fn left_bar(slit: u32) -> u32 {
    2 * slit
}

pub fn right_bar(slit: u32) -> u32 {
    2 * slit - 1
}

pub fn bar_to_slit(bar: u32) -> u32 {
    (bar + 1) / 2
}

pub fn bar_side(bar: u32) -> BarSide {
    if bar % 2 == 0 { BarSide::Left } else { BarSide::Right }
}

pub fn in_travel(mm: f64) -> bool {
    (MIN_TRAVEL_MM..=MAX_TRAVEL_MM).contains(&mm)
}

/// Offset of the slit center from the CSU center, arcsec.
pub fn center_position_arcsec(left_mm: f64, right_mm: f64) -> f64 {
    (0.5 * (left_mm + right_mm) - CSU_CENTER_MM) * ARCSEC_PER_MM
}

pub fn slit_width_arcsec(left_mm: f64, right_mm: f64) -> f64 {
    (left_mm - right_mm) * ARCSEC_PER_MM
}

pub fn arcsec_to_mm(arcsec: f64) -> f64 {
    arcsec / ARCSEC_PER_MM
}

/// Reference (left, right) positions of a 0.7 arcsec long slit at `slit`.
pub fn longslit_reference_mm(slit: u32) -> (f64, f64) {
    (LONGSLIT_LEFT_BASE_MM + LONGSLIT_SLOPE_MM_PER_BAR * left_bar(slit) as f64,
     LONGSLIT_RIGHT_BASE_MM + LONGSLIT_SLOPE_MM_PER_BAR * right_bar(slit) as f64)
}

// mod tests.
