// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use log::{debug, info};
use rand::Rng;
use serde::{Deserialize, Serialize};

use csu_elements::astro_util::CelestialCoord;
use csu_elements::errors::{mask_parse_error, CsuError};
use csu_elements::fits_io::{is_fits_path, FitsHeader};

use crate::bars::{self, BarSide, CENTER_SLIT, MAX_TRAVEL_MM, MIN_TRAVEL_MM,
                  NUM_BARS, NUM_SLITS};

/// Width of the alignment box synthesized for long slit masks.
pub const ALIGNMENT_BOX_WIDTH_ARCSEC: f64 = 4.0;

// Random masks place slit centers on this grid.
const RANDOM_MIN_CENTER_MM: f64 = 60.0;
const RANDOM_MAX_CENTER_MM: f64 = 210.0;
const RANDOM_GRID_MM: f64 = 0.5;
const RANDOM_WIDTH_ARCSEC: f64 = 0.7;

/// One slit: a pair of bars and the aperture between them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Slit {
    slit_number: u32,
    left_bar_position_mm: f64,
    right_bar_position_mm: f64,
    center_position_arcsec: f64,
    slit_width_arcsec: f64,
    target: String,
}

impl Slit {
    /// Fails if the slit number is out of range, a bar is outside its
    /// travel, or the bars cross. Equal positions give a closed slit.
    pub fn new(slit_number: u32, left_mm: f64, right_mm: f64)
               -> Result<Self, CsuError> {
        if !bars::is_valid_slit(slit_number) {
            return Err(mask_parse_error(
                &format!("slit number {} not in 1..={}", slit_number, NUM_SLITS)));
        }
        for (side, mm) in [("left", left_mm), ("right", right_mm)] {
            if !mm.is_finite() || !bars::in_travel(mm) {
                return Err(mask_parse_error(&format!(
                    "slit {} {} bar position {} mm outside travel {}..{}",
                    slit_number, side, mm, MIN_TRAVEL_MM, MAX_TRAVEL_MM)));
            }
        }
        if left_mm < right_mm {
            return Err(mask_parse_error(&format!(
                "slit {} bars cross: left {} mm < right {} mm",
                slit_number, left_mm, right_mm)));
        }
        Ok(Slit{
            slit_number,
            left_bar_position_mm: left_mm,
            right_bar_position_mm: right_mm,
            center_position_arcsec: bars::center_position_arcsec(left_mm, right_mm),
            slit_width_arcsec: bars::slit_width_arcsec(left_mm, right_mm),
            target: String::new(),
        })
    }

    pub fn with_target(mut self, target: &str) -> Self {
        self.target = target.to_string();
        self
    }

    /// Replaces the derived center and width with values from a mask
    /// description.
    pub(crate) fn with_arcsec(mut self, center_arcsec: Option<f64>,
                              width_arcsec: Option<f64>) -> Result<Self, CsuError> {
        if let Some(width) = width_arcsec {
            if width < 0.0 {
                return Err(mask_parse_error(&format!(
                    "slit {} has negative width {}", self.slit_number, width)));
            }
            self.slit_width_arcsec = width;
        }
        if let Some(center) = center_arcsec {
            self.center_position_arcsec = center;
        }
        Ok(self)
    }

    pub fn slit_number(&self) -> u32 { self.slit_number }
    pub fn left_bar_number(&self) -> u32 { bars::left_bar(self.slit_number) }
    pub fn right_bar_number(&self) -> u32 { bars::right_bar(self.slit_number) }
    pub fn left_bar_position_mm(&self) -> f64 { self.left_bar_position_mm }
    pub fn right_bar_position_mm(&self) -> f64 { self.right_bar_position_mm }
    pub fn center_position_arcsec(&self) -> f64 { self.center_position_arcsec }
    pub fn slit_width_arcsec(&self) -> f64 { self.slit_width_arcsec }
    pub fn target(&self) -> &str { &self.target }

    pub fn center_mm(&self) -> f64 {
        0.5 * (self.left_bar_position_mm + self.right_bar_position_mm)
    }

    pub fn is_closed(&self) -> bool {
        self.left_bar_position_mm == self.right_bar_position_mm
    }

    /// Position of `bar` if it belongs to this slit.
    pub fn bar_position_mm(&self, bar: u32) -> Option<f64> {
        if bars::bar_to_slit(bar) != self.slit_number {
            return None;
        }
        Some(match bars::bar_side(bar) {
            BarSide::Left => self.left_bar_position_mm,
            BarSide::Right => self.right_bar_position_mm,
        })
    }
}

/// A science target or alignment star listed in a mask description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetSlit {
    pub slit_number: u32,
    pub target: String,
    pub priority: Option<f64>,
    pub magnitude: Option<f64>,
    pub position: Option<CelestialCoord>,
    pub slit_width_arcsec: Option<f64>,
    pub slit_length_arcsec: Option<f64>,
}

/// How a mask was built.
#[derive(Debug, Clone, PartialEq)]
pub enum MaskKind {
    Xml,
    LongSlit { width_arcsec: f64, length: u32 },
    Open,
    Random,
    Telemetry,
}

/// Identifying metadata of a mask.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MaskHeader {
    pub name: String,
    pub priority: Option<f64>,
    /// Degrees.
    pub position_angle: Option<f64>,
    pub center: Option<CelestialCoord>,
}

impl MaskHeader {
    pub fn named(name: &str) -> Self {
        MaskHeader{name: name.to_string(), ..Default::default()}
    }
}

/// A complete CSU configuration: all 46 slits, ordered by slit number.
#[derive(Debug, Clone)]
pub struct Mask {
    header: MaskHeader,
    slits: Vec<Slit>,
    science_targets: Vec<TargetSlit>,
    alignment_stars: Vec<TargetSlit>,
    alignment_boxes: Vec<Slit>,
    kind: MaskKind,
}

impl Mask {
    /// Checks that `slits` holds each slit number exactly once.
    pub fn assemble(header: MaskHeader, mut slits: Vec<Slit>, kind: MaskKind)
                    -> Result<Self, CsuError> {
        if header.name.trim().is_empty() {
            return Err(mask_parse_error("mask has no name"));
        }
        slits.sort_by_key(|s| s.slit_number);
        for pair in slits.windows(2) {
            if pair[0].slit_number == pair[1].slit_number {
                return Err(mask_parse_error(&format!(
                    "slit {} appears more than once", pair[0].slit_number)));
            }
        }
        if slits.len() != NUM_SLITS as usize {
            let missing: Vec<u32> = (1..=NUM_SLITS)
                .filter(|n| slits.binary_search_by_key(n, |s| s.slit_number).is_err())
                .collect();
            return Err(mask_parse_error(&format!(
                "mask {} is missing slits {:?}", header.name, missing)));
        }
        Ok(Mask{header, slits, science_targets: Vec::new(),
                alignment_stars: Vec::new(), alignment_boxes: Vec::new(), kind})
    }

    pub(crate) fn with_targets(mut self, science_targets: Vec<TargetSlit>,
                               alignment_stars: Vec<TargetSlit>) -> Self {
        self.science_targets = science_targets;
        self.alignment_stars = alignment_stars;
        self
    }

    /// Fully retracted bars: widest possible aperture on every slit.
    pub fn open() -> Self {
        let slits = (1..=NUM_SLITS).map(|n| Slit{
            slit_number: n,
            left_bar_position_mm: MAX_TRAVEL_MM,
            right_bar_position_mm: MIN_TRAVEL_MM,
            center_position_arcsec: bars::center_position_arcsec(MAX_TRAVEL_MM,
                                                                  MIN_TRAVEL_MM),
            slit_width_arcsec: bars::slit_width_arcsec(MAX_TRAVEL_MM, MIN_TRAVEL_MM),
            target: String::new(),
        }).collect();
        Mask{header: MaskHeader::named("OPEN"), slits,
             science_targets: Vec::new(), alignment_stars: Vec::new(),
             alignment_boxes: Vec::new(), kind: MaskKind::Open}
    }

    /// A contiguous slit `length` bars long and `width_arcsec` wide,
    /// centered on the middle of the mask. Slits outside the run are
    /// closed.
    ///
    /// A closed slit shows no edges in an image, so its bars cannot be
    /// located. Verifying any long slit shorter than the full mask
    /// therefore fails on every bar of the closed slits.
    pub fn long_slit(width_arcsec: f64, length: u32) -> Result<Self, CsuError> {
        if !width_arcsec.is_finite() || width_arcsec <= 0.0 {
            return Err(mask_parse_error(
                &format!("long slit width {} must be positive", width_arcsec)));
        }
        if !(1..=NUM_SLITS).contains(&length) {
            return Err(mask_parse_error(
                &format!("long slit length {} not in 1..={}", length, NUM_SLITS)));
        }
        let run = longslit_run(length);
        // Each bar moves out by half the extra width.
        let push = 0.5 * bars::arcsec_to_mm(
            width_arcsec - bars::LONGSLIT_REFERENCE_WIDTH_ARCSEC);

        let mut slits = Vec::with_capacity(NUM_SLITS as usize);
        for n in 1..=NUM_SLITS {
            let (left, right) = bars::longslit_reference_mm(n);
            let slit = if run.contains(&n) {
                Slit::new(n, left + push, right - push)?
            } else {
                let center = 0.5 * (left + right);
                Slit::new(n, center, center)?
            };
            slits.push(slit);
        }

        let (left, right) = bars::longslit_reference_mm(CENTER_SLIT);
        let center = 0.5 * (left + right);
        let half_box = 0.5 * bars::arcsec_to_mm(ALIGNMENT_BOX_WIDTH_ARCSEC);
        let alignment_box = Slit::new(CENTER_SLIT, center + half_box,
                                      center - half_box)?
            .with_target("alignment box");

        let name = format!("LONGSLIT-{}x{}", length, width_arcsec);
        info!("Built {} from slits {:?}", name, run);
        let mut mask = Mask::assemble(MaskHeader::named(&name), slits,
                                      MaskKind::LongSlit{width_arcsec, length})?;
        mask.alignment_boxes.push(alignment_box);
        Ok(mask)
    }

    pub fn random() -> Self {
        Self::random_with_rng(&mut rand::thread_rng())
    }

    /// Diagnostic mask with 0.7 arcsec slits at random centers. Adjacent
    /// slits never share a center.
    pub fn random_with_rng<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let steps = ((RANDOM_MAX_CENTER_MM - RANDOM_MIN_CENTER_MM) / RANDOM_GRID_MM)
            .round() as u32;
        let half_width = 0.5 * bars::arcsec_to_mm(RANDOM_WIDTH_ARCSEC);
        let mut previous: Option<u32> = None;
        let mut slits = Vec::with_capacity(NUM_SLITS as usize);
        for n in 1..=NUM_SLITS {
            let mut step = rng.gen_range(0..=steps);
            while previous == Some(step) {
                step = rng.gen_range(0..=steps);
            }
            previous = Some(step);
            let center = RANDOM_MIN_CENTER_MM + RANDOM_GRID_MM * step as f64;
            let left = center + half_width;
            let right = center - half_width;
            slits.push(Slit{
                slit_number: n,
                left_bar_position_mm: left,
                right_bar_position_mm: right,
                center_position_arcsec: bars::center_position_arcsec(left, right),
                slit_width_arcsec: bars::slit_width_arcsec(left, right),
                target: String::new(),
            });
        }
        Mask{header: MaskHeader::named("RANDOM"), slits,
             science_targets: Vec::new(), alignment_stars: Vec::new(),
             alignment_boxes: Vec::new(), kind: MaskKind::Random}
    }

    /// Rebuilds the mask currently in the CSU from reported bar positions,
    /// keyed by bar number. Every bar must be present.
    pub fn from_bar_positions(name: &str, positions: &BTreeMap<u32, f64>)
                              -> Result<Self, CsuError> {
        let missing: Vec<u32> =
            (1..=NUM_BARS).filter(|b| !positions.contains_key(b)).collect();
        if !missing.is_empty() {
            return Err(mask_parse_error(
                &format!("no position reported for bars {:?}", missing)));
        }
        let mut slits = Vec::with_capacity(NUM_SLITS as usize);
        for n in 1..=NUM_SLITS {
            let (right_bar, left_bar) = bars::slit_to_bars(n);
            slits.push(Slit::new(n, positions[&left_bar], positions[&right_bar])?);
        }
        Mask::assemble(MaskHeader::named(name), slits, MaskKind::Telemetry)
    }

    /// Rebuilds the mask in the CSU when a frame was taken, from the frame's
    /// MASKNAME and B01POS..B92POS keywords. A frame without MASKNAME is
    /// named after its file.
    pub fn from_fits_file(path: &Path) -> Result<Self, CsuError> {
        let mut header = FitsHeader::open(path)?;
        let mut positions = BTreeMap::new();
        for bar in 1..=NUM_BARS {
            if let Some(mm) = header.float(&bar_position_keyword(bar)) {
                positions.insert(bar, mm);
            }
        }
        let name = header.string("MASKNAME")
            .or_else(|| path.file_stem().map(|s| s.to_string_lossy().into_owned()))
            .unwrap_or_else(|| "UNNAMED".to_string());
        debug!("Read {} bar positions for {} from {:?}", positions.len(), name, path);
        Mask::from_bar_positions(&name, &positions)
    }

    /// Resolves a user supplied mask designation. In order of precedence:
    /// the path of an existing XML mask description or FITS frame (whose
    /// header gives the bar positions); OPEN or OPEN MASK;
    /// RAND or RANDOM; a long slit written as `<width>x<length>`, e.g.
    /// "0.7x46".
    pub fn from_input(input: &str) -> Result<Self, CsuError> {
        let path = Path::new(input);
        if path.is_file() {
            if is_fits_path(path) {
                return Mask::from_fits_file(path);
            }
            let is_xml = path.extension()
                .map(|e| e.eq_ignore_ascii_case("xml"))
                .unwrap_or(false);
            if !is_xml {
                return Err(mask_parse_error(
                    &format!("{} is not an XML mask description or FITS frame",
                             input)));
            }
            return Mask::from_xml_file(path);
        }
        let trimmed = input.trim();
        match trimmed.to_ascii_uppercase().as_str() {
            "OPEN" | "OPEN MASK" => return Ok(Mask::open()),
            "RAND" | "RANDOM" => return Ok(Mask::random()),
            _ => (),
        }
        match parse_long_slit(trimmed) {
            Some((width, length)) => {
                debug!("Interpreting {:?} as a {}\" x {} long slit",
                       input, width, length);
                Mask::long_slit(width, length)
            },
            None => Err(mask_parse_error(
                &format!("cannot interpret {:?} as a mask", input))),
        }
    }

    pub fn header(&self) -> &MaskHeader { &self.header }
    pub fn name(&self) -> &str { &self.header.name }
    pub fn priority(&self) -> Option<f64> { self.header.priority }
    pub fn position_angle(&self) -> Option<f64> { self.header.position_angle }
    pub fn center(&self) -> Option<CelestialCoord> { self.header.center }
    pub fn kind(&self) -> &MaskKind { &self.kind }

    /// All slits, ordered by slit number.
    pub fn slits(&self) -> &[Slit] { &self.slits }
    pub fn science_targets(&self) -> &[TargetSlit] { &self.science_targets }
    pub fn alignment_stars(&self) -> &[TargetSlit] { &self.alignment_stars }
    pub fn alignment_boxes(&self) -> &[Slit] { &self.alignment_boxes }

    pub fn slit(&self, slit_number: u32) -> Option<&Slit> {
        if !bars::is_valid_slit(slit_number) {
            return None;
        }
        self.slits.get(slit_number as usize - 1)
    }

    /// Commanded position of `bar`, mm.
    pub fn bar_position_mm(&self, bar: u32) -> Option<f64> {
        if !bars::is_valid_bar(bar) {
            return None;
        }
        self.slit(bars::bar_to_slit(bar))?.bar_position_mm(bar)
    }

    /// Commanded positions of all 92 bars.
    pub fn bar_positions_mm(&self) -> BTreeMap<u32, f64> {
        self.slits.iter()
            .flat_map(|s| [(s.right_bar_number(), s.right_bar_position_mm),
                           (s.left_bar_number(), s.left_bar_position_mm)])
            .collect()
    }
}

impl fmt::Display for Mask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Mask {} ({:?})", self.header.name, self.kind)?;
        if let Some(center) = &self.header.center {
            writeln!(f, "  center {}", center.to_sexagesimal_string())?;
        }
        if let Some(pa) = self.header.position_angle {
            writeln!(f, "  PA {:.2} deg", pa)?;
        }
        writeln!(f, "  slit  left_bar  left_mm  right_bar  right_mm  \
                     center\"  width\"  target")?;
        for s in &self.slits {
            writeln!(f, "  {:4}  {:8}  {:7.3}  {:9}  {:8.3}  {:7.2}  {:6.2}  {}",
                     s.slit_number, s.left_bar_number(), s.left_bar_position_mm,
                     s.right_bar_number(), s.right_bar_position_mm,
                     s.center_position_arcsec, s.slit_width_arcsec, s.target)?;
        }
        Ok(())
    }
}

// Slits of a long slit of `length`, growing outward from the center slit:
// 23, 24, 22, 25, 21, ...
/// FITS keyword reporting the position of `bar`, e.g. B07POS.
pub fn bar_position_keyword(bar: u32) -> String {
    format!("B{:02}POS", bar)
}

fn longslit_run(length: u32) -> Vec<u32> {
    let mut run = vec![CENTER_SLIT];
    let mut step = 1_i64;
    while run.len() < length as usize {
        let offset = if step % 2 == 1 { (step + 1) / 2 } else { -(step / 2) };
        let slit = CENTER_SLIT as i64 + offset;
        if slit >= 1 && slit <= NUM_SLITS as i64 {
            run.push(slit as u32);
        }
        step += 1;
    }
    run
}

// "<width>x<length>", either case of x.
fn parse_long_slit(input: &str) -> Option<(f64, u32)> {
    let (width, length) = input.split_once(['x', 'X'])?;
    let width = width.trim().parse::<f64>().ok()?;
    let length = length.trim().parse::<u32>().ok()?;
    Some((width, length))
}

#[cfg(test)]
mod tests {
    extern crate approx;
    use approx::assert_abs_diff_eq;
    use nalgebra::DMatrix;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use csu_elements::fits_io::write_fits_image;

    use super::*;

    #[test]
    fn test_slit_validation() {
        let slit = Slit::new(3, 140.0, 139.0).unwrap().with_target("NGC 1068");
        assert_eq!(slit.left_bar_number(), 6);
        assert_eq!(slit.right_bar_number(), 5);
        assert_eq!(slit.bar_position_mm(6), Some(140.0));
        assert_eq!(slit.bar_position_mm(5), Some(139.0));
        assert_eq!(slit.bar_position_mm(7), None);
        assert_eq!(slit.target(), "NGC 1068");
        assert_abs_diff_eq!(slit.slit_width_arcsec(), bars::ARCSEC_PER_MM,
                            epsilon = 1e-12);

        assert!(Slit::new(3, 139.0, 140.0).is_err());
        assert!(Slit::new(0, 140.0, 139.0).is_err());
        assert!(Slit::new(47, 140.0, 139.0).is_err());
        assert!(Slit::new(3, 271.0, 139.0).is_err());
        assert!(Slit::new(3, 140.0, f64::NAN).is_err());
        assert!(Slit::new(3, 140.0, 140.0).unwrap().is_closed());
    }

    #[test]
    fn test_open_mask() {
        let mask = Mask::open();
        assert_eq!(mask.slits().len(), 46);
        for slit in mask.slits() {
            assert_eq!(slit.left_bar_position_mm(), MAX_TRAVEL_MM);
            assert_eq!(slit.right_bar_position_mm(), MIN_TRAVEL_MM);
            assert_abs_diff_eq!(slit.center_position_arcsec(), 0.0, epsilon = 1e-9);
        }
        let positions = mask.bar_positions_mm();
        assert_eq!(positions.len(), 92);
        assert_eq!(positions[&1], MIN_TRAVEL_MM);
        assert_eq!(positions[&92], MAX_TRAVEL_MM);
        assert_eq!(mask.bar_position_mm(0), None);
        assert_eq!(mask.bar_position_mm(93), None);
    }

    #[test]
    fn test_longslit_run() {
        assert_eq!(longslit_run(1), vec![23]);
        assert_eq!(longslit_run(5), vec![23, 24, 22, 25, 21]);
        let mut all = longslit_run(46);
        all.sort();
        assert_eq!(all, (1..=46).collect::<Vec<u32>>());
    }

    #[test]
    fn test_long_slit() {
        let mask = Mask::long_slit(1.0, 7).unwrap();
        assert_eq!(mask.name(), "LONGSLIT-7x1");
        assert_eq!(mask.kind(), &MaskKind::LongSlit{width_arcsec: 1.0, length: 7});

        let run: Vec<&Slit> = mask.slits().iter().filter(|s| !s.is_closed()).collect();
        let numbers: Vec<u32> = run.iter().map(|s| s.slit_number()).collect();
        assert_eq!(numbers, vec![20, 21, 22, 23, 24, 25, 26]);
        for slit in &run {
            assert_abs_diff_eq!(slit.slit_width_arcsec(), 1.0, epsilon = 1e-9);
        }
        // Strictly monotonic along each side of the run.
        for pair in run.windows(2) {
            assert!(pair[1].left_bar_position_mm() < pair[0].left_bar_position_mm());
            assert!(pair[1].right_bar_position_mm() < pair[0].right_bar_position_mm());
        }
        assert_eq!(mask.slit(1).unwrap().slit_width_arcsec(), 0.0);

        let boxes = mask.alignment_boxes();
        assert_eq!(boxes.len(), 1);
        assert_eq!(boxes[0].slit_number(), 23);
        assert_abs_diff_eq!(boxes[0].slit_width_arcsec(), 4.0, epsilon = 1e-9);
        assert_abs_diff_eq!(boxes[0].center_mm(), mask.slit(23).unwrap().center_mm(),
                            epsilon = 1e-9);

        let full = Mask::long_slit(0.7, 46).unwrap();
        assert!(full.slits().iter().all(|s| !s.is_closed()));

        assert!(Mask::long_slit(0.7, 0).is_err());
        assert!(Mask::long_slit(0.7, 47).is_err());
        assert!(Mask::long_slit(-1.0, 10).is_err());
        // Wider than the travel allows.
        assert!(Mask::long_slit(400.0, 10).is_err());
    }

    #[test]
    fn test_random_mask() {
        let mut rng = StdRng::seed_from_u64(42);
        let mask = Mask::random_with_rng(&mut rng);
        assert_eq!(mask.slits().len(), 46);
        for pair in mask.slits().windows(2) {
            assert_ne!(pair[0].center_mm(), pair[1].center_mm());
        }
        for slit in mask.slits() {
            assert!(slit.center_mm() >= 60.0 && slit.center_mm() <= 210.0);
            assert_abs_diff_eq!(slit.slit_width_arcsec(), 0.7, epsilon = 1e-9);
            let grid = (slit.center_mm() - 60.0) / 0.5;
            assert_abs_diff_eq!(grid, grid.round(), epsilon = 1e-9);
        }
    }

    #[test]
    fn test_from_bar_positions() {
        let open = Mask::open();
        let mask = Mask::from_bar_positions("current", &open.bar_positions_mm()).unwrap();
        assert_eq!(mask.kind(), &MaskKind::Telemetry);
        assert_eq!(mask.bar_positions_mm(), open.bar_positions_mm());

        let mut partial = open.bar_positions_mm();
        partial.remove(&17);
        assert!(matches!(Mask::from_bar_positions("current", &partial),
                         Err(CsuError::MaskParse(_))));
    }

    #[test]
    fn test_assemble_rejects_bad_slit_tables() {
        let slits: Vec<Slit> = Mask::open().slits().to_vec();
        let mut missing = slits.clone();
        missing.remove(4);
        assert!(Mask::assemble(MaskHeader::named("m"), missing, MaskKind::Xml).is_err());

        let mut duplicated = slits.clone();
        duplicated[4] = duplicated[3].clone();
        assert!(Mask::assemble(MaskHeader::named("m"), duplicated, MaskKind::Xml).is_err());

        assert!(Mask::assemble(MaskHeader::named(" "), slits, MaskKind::Xml).is_err());
    }

    #[test]
    fn test_bar_position_keyword() {
        assert_eq!(bar_position_keyword(1), "B01POS");
        assert_eq!(bar_position_keyword(92), "B92POS");
    }

    #[test]
    fn test_from_fits_file() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("csu_frame_{}.fits", std::process::id()));
        let source = Mask::long_slit(0.7, 46).unwrap();
        let keywords: Vec<(String, f64)> = source.bar_positions_mm().iter()
            .map(|(bar, mm)| (bar_position_keyword(*bar), *mm))
            .collect();
        let float_keys: Vec<(&str, f64)> =
            keywords.iter().map(|(k, v)| (k.as_str(), *v)).collect();
        write_fits_image(&path, &DMatrix::zeros(4, 4),
                         &[("INSTRUME", "MOSFIRE"), ("MASKNAME", "LONGSLIT-46x0.7")],
                         &float_keys).unwrap();

        let mask = Mask::from_fits_file(&path).unwrap();
        assert_eq!(mask.name(), "LONGSLIT-46x0.7");
        assert_eq!(mask.kind(), &MaskKind::Telemetry);
        for (bar, mm) in source.bar_positions_mm() {
            assert_abs_diff_eq!(mask.bar_position_mm(bar).unwrap(), mm, epsilon = 1e-6);
        }

        // A FITS path resolves through the header, not the XML parser.
        let mask = Mask::from_input(path.to_str().unwrap()).unwrap();
        assert_eq!(mask.kind(), &MaskKind::Telemetry);

        // Without MASKNAME the file name stands in; a missing bar fails.
        write_fits_image(&path, &DMatrix::zeros(4, 4), &[],
                         &float_keys[..NUM_BARS as usize - 1]).unwrap();
        assert!(matches!(Mask::from_fits_file(&path),
                         Err(CsuError::MaskParse(msg)) if msg.contains("92")));
        write_fits_image(&path, &DMatrix::zeros(4, 4), &[], &float_keys).unwrap();
        let stem = path.file_stem().unwrap().to_string_lossy().into_owned();
        assert_eq!(Mask::from_fits_file(&path).unwrap().name(), stem);

        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_from_input() {
        assert_eq!(Mask::from_input("open").unwrap().kind(), &MaskKind::Open);
        assert_eq!(Mask::from_input("Open Mask").unwrap().kind(), &MaskKind::Open);
        assert_eq!(Mask::from_input("RAND").unwrap().kind(), &MaskKind::Random);
        assert_eq!(Mask::from_input("random").unwrap().kind(), &MaskKind::Random);
        assert_eq!(Mask::from_input("0.7x46").unwrap().kind(),
                   &MaskKind::LongSlit{width_arcsec: 0.7, length: 46});
        assert_eq!(Mask::from_input("1.5X3").unwrap().kind(),
                   &MaskKind::LongSlit{width_arcsec: 1.5, length: 3});
        assert!(matches!(Mask::from_input("not a mask"),
                         Err(CsuError::MaskParse(_))));
        assert!(matches!(Mask::from_input("0.7x"), Err(CsuError::MaskParse(_))));
    }

}  // mod tests.
