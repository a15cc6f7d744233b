// Copyright (c) 2024 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

//! Sky coordinates of mask centers and slit targets.
//!
//! Mask descriptions carry right ascension as hours/minutes/seconds and
//! declination as degrees/minutes/seconds. These are held as decimal degrees.

use serde::{Deserialize, Serialize};

use crate::errors::{invalid_input_error, CsuError};

/// ICRS position in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CelestialCoord {
    /// 0..360.
    pub ra: f64,
    /// -90..90.
    pub dec: f64,
}

impl CelestialCoord {
    pub fn new(ra: f64, dec: f64) -> Result<Self, CsuError> {
        if !(0.0..360.0).contains(&ra) || !(-90.0..=90.0).contains(&dec) {
            return Err(invalid_input_error(&format!(
                "coordinate out of range: ra {} dec {}", ra, dec)));
        }
        Ok(CelestialCoord{ra, dec})
    }

    pub fn from_sexagesimal(ra_h: f64, ra_m: f64, ra_s: f64,
                            dec_d: f64, dec_m: f64, dec_s: f64,
                            dec_negative: bool)
                            -> Result<Self, CsuError> {
        Self::new(deg_from_hms(ra_h, ra_m, ra_s),
                  deg_from_dms(dec_negative, dec_d, dec_m, dec_s))
    }

    /// "HH:MM:SS.SS +DD:MM:SS.S".
    pub fn to_sexagesimal_string(&self) -> String {
        let (h, m, s) = hms_from_deg(self.ra, 2);
        let (negative, d, dm, ds) = dms_from_deg(self.dec, 1);
        format!("{:02}:{:02}:{:05.2} {}{:02}:{:02}:{:04.1}",
                h, m, s, if negative { '-' } else { '+' }, d, dm, ds)
    }
}

pub fn deg_from_hms(h: f64, m: f64, s: f64) -> f64 {
    15.0 * (h + m / 60.0 + s / 3600.0)
}

/// The sign is passed separately so that declinations between -1 and 0
/// degrees (written "-00 ...") keep their sign.
pub fn deg_from_dms(negative: bool, d: f64, m: f64, s: f64) -> f64 {
    let magnitude = d.abs() + m / 60.0 + s / 3600.0;
    if negative || d < 0.0 { -magnitude } else { magnitude }
}

/// Splits right ascension degrees into (hours, minutes, seconds), with the
/// seconds rounded to `decimals` places.
pub fn hms_from_deg(ra: f64, decimals: i32) -> (u32, u32, f64) {
    let total_seconds = ra.rem_euclid(360.0) / 15.0 * 3600.0;
    let (h, m, s) = split_sexagesimal(total_seconds, decimals);
    (h % 24, m, s)
}

/// Splits declination degrees into (negative, degrees, arcmin, arcsec), with
/// the arcseconds rounded to `decimals` places.
pub fn dms_from_deg(dec: f64, decimals: i32) -> (bool, u32, u32, f64) {
    let (d, m, s) = split_sexagesimal(dec.abs() * 3600.0, decimals);
    (dec < 0.0, d, m, s)
}

// Rounds before splitting so that e.g. 59.996s carries into the minutes
// instead of printing as 60.00.
fn split_sexagesimal(total_seconds: f64, decimals: i32) -> (u32, u32, f64) {
    let scale = 10_f64.powi(decimals);
    let total_seconds = (total_seconds * scale).round() / scale;
    let whole = total_seconds.floor() as u64;
    let units = (whole / 3600) as u32;
    let minutes = ((whole % 3600) / 60) as u32;
    let seconds = total_seconds - (units as f64 * 3600.0 + minutes as f64 * 60.0);
    (units, minutes, seconds)
}

// mod tests.
