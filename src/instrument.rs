// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::fmt;

use log::info;

use csu_elements::errors::CsuError;
use csu_elements::image_utils::DetectorImage;
use csu_elements::transform::CoordinateTransform;

use crate::bar_analyzer::AnalysisConfig;
use crate::mask::Mask;
use crate::verifier::{verify_mask_with_image, VerificationReport, VerificationRules,
                      DEFAULT_TOLERANCE_PIXELS};

/// Instruments whose frames may reach the verifier. Selected from the
/// INSTRUME header value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstrumentKind {
    Mosfire,
    Hires,
    Nirspec,
    Unknown,
}

impl InstrumentKind {
    pub fn from_header(instrume: &str) -> Self {
        let name = instrume.trim().to_ascii_uppercase();
        if name.starts_with("MOSFIRE") {
            InstrumentKind::Mosfire
        } else if name.starts_with("HIRES") {
            InstrumentKind::Hires
        } else if name.starts_with("NIRSPEC") {
            InstrumentKind::Nirspec
        } else {
            InstrumentKind::Unknown
        }
    }

    /// Frames with no INSTRUME value are Unknown.
    pub fn from_image(image: &DetectorImage) -> Self {
        image.instrument().map_or(InstrumentKind::Unknown, Self::from_header)
    }

    pub fn name(&self) -> &'static str {
        match self {
            InstrumentKind::Mosfire => "MOSFIRE",
            InstrumentKind::Hires => "HIRES",
            InstrumentKind::Nirspec => "NIRSPEC",
            InstrumentKind::Unknown => "unknown",
        }
    }

    /// Only MOSFIRE has a CSU.
    pub fn verification_rules(&self) -> Option<VerificationRules> {
        match self {
            InstrumentKind::Mosfire => Some(VerificationRules{
                tolerance_pixels: DEFAULT_TOLERANCE_PIXELS,
                analysis: AnalysisConfig{filter_size: 7, pixel_shim: 5,
                                         ..Default::default()},
            }),
            InstrumentKind::Hires | InstrumentKind::Nirspec |
            InstrumentKind::Unknown => None,
        }
    }
}

impl fmt::Display for InstrumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Verifies `mask` against a frame from an instrument of `kind`.
pub fn verify_frame(kind: InstrumentKind, mask: &Mask, image: &DetectorImage,
                    transform: &CoordinateTransform)
                    -> Result<VerificationReport, CsuError> {
    let Some(rules) = kind.verification_rules() else {
        return Err(CsuError::Unsupported(
            format!("{} frames have no CSU verification", kind)));
    };
    info!("Verifying {} frame {:?} against mask {}",
          kind, image.source(), mask.name());
    verify_mask_with_image(mask, image, transform, &rules)
}

// mod tests.
