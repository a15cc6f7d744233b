// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

//! Reading and writing MAGMA mask descriptions.
//!
//! A description looks like:
//!
//! ```xml
//! <slitConfiguration>
//!   <maskDescription maskName="COSMOS-1" totalPriority="1250" maskPA="32.5"
//!       centerRaH="10" centerRaM="0" centerRaS="28.6"
//!       centerDecD="2" centerDecM="12" centerDecS="21.0"/>
//!   <mechanicalSlitConfig>
//!     <mechanicalSlit slitNumber="1" leftBarNumber="2" rightBarNumber="1"
//!         leftBarPositionMM="140.53" rightBarPositionMM="140.02"
//!         centerPositionArcsec="4.38" slitWidthArcsec="0.7" target="1234"/>
//!     ...
//!   </mechanicalSlitConfig>
//!   <scienceSlitConfig>
//!     <scienceSlit slitNumber="1" target="1234" targetPriority="100" .../>
//!   </scienceSlitConfig>
//!   <alignment>
//!     <alignSlit slitNumber="30" target="star7" targetMag="17.2" .../>
//!   </alignment>
//! </slitConfiguration>
//! ```

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use log::{debug, info};
use quick_xml::events::{BytesDecl, BytesStart, Event};
use quick_xml::reader::Reader;
use quick_xml::writer::Writer;

use csu_elements::astro_util::{dms_from_deg, hms_from_deg, CelestialCoord};
use csu_elements::errors::{mask_parse_error, CsuError};

use crate::bars;
use crate::mask::{Mask, MaskHeader, MaskKind, Slit, TargetSlit};

impl Mask {
    pub fn from_xml_str(xml: &str) -> Result<Self, CsuError> {
        parse_mask_xml(xml)
    }

    pub fn from_xml_file(path: &Path) -> Result<Self, CsuError> {
        let xml = fs::read_to_string(path)?;
        let mask = parse_mask_xml(&xml)?;
        info!("Loaded mask {} from {:?}", mask.name(), path);
        Ok(mask)
    }

    pub fn to_xml_string(&self) -> Result<String, CsuError> {
        write_mask_xml(self)
    }
}

// Attributes of one element, unescaped.
struct Attributes {
    element: String,
    values: HashMap<String, String>,
}

impl Attributes {
    fn from_start(start: &BytesStart) -> Result<Self, CsuError> {
        let element = String::from_utf8_lossy(start.local_name().as_ref()).to_string();
        let mut values = HashMap::new();
        for attr in start.attributes() {
            let attr = attr.map_err(|e| mask_parse_error(
                &format!("bad attribute in <{}>: {}", element, e)))?;
            let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).to_string();
            let value = attr.unescape_value().map_err(|e| mask_parse_error(
                &format!("bad value for {} in <{}>: {}", key, element, e)))?;
            values.insert(key, value.trim().to_string());
        }
        Ok(Attributes{element, values})
    }

    // Empty values count as absent.
    fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str).filter(|v| !v.is_empty())
    }

    fn required(&self, key: &str) -> Result<&str, CsuError> {
        self.get(key).ok_or_else(|| mask_parse_error(
            &format!("<{}> lacks required attribute {}", self.element, key)))
    }

    fn parse<T: std::str::FromStr>(&self, key: &str, value: &str) -> Result<T, CsuError> {
        value.parse::<T>().map_err(|_| mask_parse_error(&format!(
            "<{}> attribute {}={:?} is not a valid number", self.element, key, value)))
    }

    fn required_f64(&self, key: &str) -> Result<f64, CsuError> {
        self.parse(key, self.required(key)?)
    }

    fn required_u32(&self, key: &str) -> Result<u32, CsuError> {
        self.parse(key, self.required(key)?)
    }

    fn optional_f64(&self, key: &str) -> Result<Option<f64>, CsuError> {
        self.get(key).map(|v| self.parse(key, v)).transpose()
    }

    // Six sexagesimal attributes `<prefix>RaH` ... `<prefix>DecS`. All
    // absent gives None; a partial set is an error.
    fn sky_position(&self, prefix: &str) -> Result<Option<CelestialCoord>, CsuError> {
        let keys = ["RaH", "RaM", "RaS", "DecD", "DecM", "DecS"]
            .map(|suffix| format!("{}{}", prefix, suffix));
        let present = keys.iter().filter(|k| self.get(k).is_some()).count();
        if present == 0 {
            return Ok(None);
        }
        let mut parts = [0.0; 6];
        for (part, key) in parts.iter_mut().zip(keys.iter()) {
            *part = self.required_f64(key)?;
        }
        // "-00" degrees still carries the sign.
        let dec_negative = self.required(&keys[3])?.starts_with('-');
        let coord = CelestialCoord::from_sexagesimal(
            parts[0], parts[1], parts[2], parts[3], parts[4], parts[5], dec_negative)
            .map_err(|e| mask_parse_error(&format!("<{}>: {}", self.element, e)))?;
        Ok(Some(coord))
    }
}

fn parse_header(attrs: &Attributes) -> Result<MaskHeader, CsuError> {
    Ok(MaskHeader{
        name: attrs.required("maskName")?.to_string(),
        priority: attrs.optional_f64("totalPriority")?,
        position_angle: attrs.optional_f64("maskPA")?,
        center: attrs.sky_position("center")?,
    })
}

fn parse_mechanical_slit(attrs: &Attributes) -> Result<Slit, CsuError> {
    let slit_number = attrs.required_u32("slitNumber")?;
    if !bars::is_valid_slit(slit_number) {
        return Err(mask_parse_error(&format!("slit number {} out of range",
                                             slit_number)));
    }
    let left_bar = attrs.required_u32("leftBarNumber")?;
    let right_bar = attrs.required_u32("rightBarNumber")?;
    if left_bar != bars::left_bar(slit_number) || right_bar != bars::right_bar(slit_number) {
        return Err(mask_parse_error(&format!(
            "slit {} has bars left {} right {}; expected left {} right {}",
            slit_number, left_bar, right_bar,
            bars::left_bar(slit_number), bars::right_bar(slit_number))));
    }
    let slit = Slit::new(slit_number,
                         attrs.required_f64("leftBarPositionMM")?,
                         attrs.required_f64("rightBarPositionMM")?)?
        .with_arcsec(attrs.optional_f64("centerPositionArcsec")?,
                     attrs.optional_f64("slitWidthArcsec")?)?
        .with_target(attrs.get("target").unwrap_or(""));
    Ok(slit)
}

fn parse_target_slit(attrs: &Attributes) -> Result<TargetSlit, CsuError> {
    Ok(TargetSlit{
        slit_number: attrs.required_u32("slitNumber")?,
        target: attrs.get("target").unwrap_or("").to_string(),
        priority: attrs.optional_f64("targetPriority")?,
        magnitude: attrs.optional_f64("targetMag")?,
        position: attrs.sky_position("slit")?,
        slit_width_arcsec: attrs.optional_f64("slitWidthArcsec")?,
        slit_length_arcsec: attrs.optional_f64("slitLengthArcsec")?,
    })
}

pub fn parse_mask_xml(xml: &str) -> Result<Mask, CsuError> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut header: Option<MaskHeader> = None;
    let mut slits = Vec::new();
    let mut science_targets = Vec::new();
    let mut alignment_stars = Vec::new();
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                match e.local_name().as_ref() {
                    b"maskDescription" => {
                        header = Some(parse_header(&Attributes::from_start(&e)?)?);
                    },
                    b"mechanicalSlit" => {
                        slits.push(parse_mechanical_slit(&Attributes::from_start(&e)?)?);
                    },
                    b"scienceSlit" => {
                        science_targets.push(
                            parse_target_slit(&Attributes::from_start(&e)?)?);
                    },
                    b"alignSlit" => {
                        alignment_stars.push(
                            parse_target_slit(&Attributes::from_start(&e)?)?);
                    },
                    _ => (),
                }
            },
            Ok(Event::Eof) => break,
            Ok(_) => (),
            Err(e) => {
                return Err(mask_parse_error(&format!(
                    "malformed XML at byte {}: {}", reader.buffer_position(), e)));
            },
        }
    }
    let header = header.ok_or_else(|| mask_parse_error("no <maskDescription> element"))?;
    debug!("Parsed mask {}: {} slits, {} science targets, {} alignment stars",
           header.name, slits.len(), science_targets.len(), alignment_stars.len());
    Ok(Mask::assemble(header, slits, MaskKind::Xml)?
       .with_targets(science_targets, alignment_stars))
}

fn xml_write_error(e: quick_xml::Error) -> CsuError {
    mask_parse_error(&format!("cannot write mask XML: {}", e))
}

fn sky_position_attributes(prefix: &str, coord: &CelestialCoord)
                           -> Vec<(String, String)> {
    let (h, m, s) = hms_from_deg(coord.ra, 3);
    let (negative, d, dm, ds) = dms_from_deg(coord.dec, 2);
    vec![(format!("{}RaH", prefix), h.to_string()),
         (format!("{}RaM", prefix), m.to_string()),
         (format!("{}RaS", prefix), format!("{:.3}", s)),
         (format!("{}DecD", prefix),
          format!("{}{:02}", if negative { "-" } else { "" }, d)),
         (format!("{}DecM", prefix), dm.to_string()),
         (format!("{}DecS", prefix), format!("{:.2}", ds))]
}

fn target_attributes(t: &TargetSlit) -> Vec<(String, String)> {
    let mut attrs = vec![("slitNumber".to_string(), t.slit_number.to_string()),
                         ("target".to_string(), t.target.clone())];
    let optional = [("targetPriority", t.priority),
                    ("targetMag", t.magnitude),
                    ("slitWidthArcsec", t.slit_width_arcsec),
                    ("slitLengthArcsec", t.slit_length_arcsec)];
    for (key, value) in optional {
        if let Some(v) = value {
            attrs.push((key.to_string(), v.to_string()));
        }
    }
    if let Some(position) = &t.position {
        attrs.extend(sky_position_attributes("slit", position));
    }
    attrs
}

fn as_pairs(attrs: &[(String, String)]) -> impl Iterator<Item = (&str, &str)> {
    attrs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
}

/// Serializes `mask` as a MAGMA description. Bar positions are written at
/// full precision so that reading the result back gives the same slits.
pub fn write_mask_xml(mask: &Mask) -> Result<String, CsuError> {
    let mut description = vec![("maskName".to_string(), mask.name().to_string())];
    if let Some(priority) = mask.priority() {
        description.push(("totalPriority".to_string(), priority.to_string()));
    }
    if let Some(pa) = mask.position_angle() {
        description.push(("maskPA".to_string(), pa.to_string()));
    }
    if let Some(center) = mask.center() {
        description.extend(sky_position_attributes("center", &center));
    }

    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .map_err(xml_write_error)?;
    writer.create_element("slitConfiguration")
        .write_inner_content(|w| {
            w.create_element("maskDescription")
                .with_attributes(as_pairs(&description))
                .write_empty()?;
            w.create_element("mechanicalSlitConfig")
                .write_inner_content(|w| {
                    for slit in mask.slits() {
                        let attrs = vec![
                            ("slitNumber".to_string(), slit.slit_number().to_string()),
                            ("leftBarNumber".to_string(),
                             slit.left_bar_number().to_string()),
                            ("rightBarNumber".to_string(),
                             slit.right_bar_number().to_string()),
                            ("leftBarPositionMM".to_string(),
                             slit.left_bar_position_mm().to_string()),
                            ("rightBarPositionMM".to_string(),
                             slit.right_bar_position_mm().to_string()),
                            ("centerPositionArcsec".to_string(),
                             slit.center_position_arcsec().to_string()),
                            ("slitWidthArcsec".to_string(),
                             slit.slit_width_arcsec().to_string()),
                            ("target".to_string(), slit.target().to_string()),
                        ];
                        w.create_element("mechanicalSlit")
                            .with_attributes(as_pairs(&attrs))
                            .write_empty()?;
                    }
                    Ok::<(), quick_xml::Error>(())
                })?;
            w.create_element("scienceSlitConfig")
                .write_inner_content(|w| {
                    for target in mask.science_targets() {
                        w.create_element("scienceSlit")
                            .with_attributes(as_pairs(&target_attributes(target)))
                            .write_empty()?;
                    }
                    Ok::<(), quick_xml::Error>(())
                })?;
            w.create_element("alignment")
                .write_inner_content(|w| {
                    for star in mask.alignment_stars() {
                        w.create_element("alignSlit")
                            .with_attributes(as_pairs(&target_attributes(star)))
                            .write_empty()?;
                    }
                    Ok::<(), quick_xml::Error>(())
                })?;
            Ok::<(), quick_xml::Error>(())
        })
        .map_err(xml_write_error)?;

    String::from_utf8(writer.into_inner())
        .map_err(|e| mask_parse_error(&format!("mask XML is not UTF-8: {}", e)))
}

// mod tests.
