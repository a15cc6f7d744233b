// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

//! FITS frames and headers as written by the Keck data acquisition system.
//!
//! Pixel rows keep FITS storage order: matrix row 0 is the first NAXIS2 row
//! in the file. No flip is applied, so pixel coordinates match those of the
//! frame as displayed by ds9 with y counted from the first row.

use std::path::Path;

use fitsio::hdu::{FitsHdu, HduInfo};
use fitsio::headers::ReadsKey;
use fitsio::images::{ImageDescription, ImageType};
use fitsio::FitsFile;
use log::debug;
use nalgebra::DMatrix;

use crate::errors::CsuError;
use crate::image_utils::DetectorImage;

/// True for the file extensions FITS frames are stored under.
pub fn is_fits_path(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| ["fits", "fit", "fts"].iter().any(|f| e.eq_ignore_ascii_case(f)))
        .unwrap_or(false)
}

/// Header keywords of the primary HDU of a FITS file.
pub struct FitsHeader {
    fptr: FitsFile,
    hdu: FitsHdu,
}

impl FitsHeader {
    pub fn open(path: &Path) -> Result<Self, CsuError> {
        let mut fptr = FitsFile::open(path)?;
        let hdu = fptr.primary_hdu()?;
        Ok(FitsHeader{fptr, hdu})
    }

    fn read<T: ReadsKey>(&mut self, key: &str) -> Option<T> {
        self.hdu.read_key(&mut self.fptr, key).ok()
    }

    /// Trimmed value of a string keyword; None if absent or blank.
    pub fn string(&mut self, key: &str) -> Option<String> {
        self.read::<String>(key)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    /// Value of a numeric keyword. Some writers store numbers as strings,
    /// so those are parsed too.
    pub fn float(&mut self, key: &str) -> Option<f64> {
        self.read::<f64>(key)
            .or_else(|| self.string(key).and_then(|s| s.parse().ok()))
    }
}

/// Reads the primary image of a FITS file. The INSTRUME keyword, when
/// present, becomes the image's instrument.
pub fn read_fits_image(path: &Path) -> Result<DetectorImage, CsuError> {
    let mut header = FitsHeader::open(path)?;
    let (height, width) = match &header.hdu.info {
        HduInfo::ImageInfo{shape, ..} if shape.len() == 2 => (shape[0], shape[1]),
        HduInfo::ImageInfo{shape, ..} => {
            return Err(CsuError::Unsupported(format!(
                "{:?}: primary image has {} axes, expected 2",
                path, shape.len())));
        },
        _ => {
            return Err(CsuError::Unsupported(
                format!("{:?}: primary HDU is not an image", path)));
        },
    };
    let pixels: Vec<f64> = header.hdu.read_image(&mut header.fptr)?;
    if pixels.len() != width * height {
        return Err(CsuError::Unsupported(format!(
            "{:?}: read {} pixels for a {}x{} image",
            path, pixels.len(), width, height)));
    }
    debug!("Read {}x{} FITS image from {:?}", width, height, path);

    // FITS data is row-major with X varying fastest.
    let mut image = DetectorImage::from_matrix(
        DMatrix::from_row_slice(height, width, &pixels))
        .with_source(path);
    if let Some(instrument) = header.string("INSTRUME") {
        image = image.with_instrument(&instrument);
    }
    Ok(image)
}

/// Writes `pixels` as a double precision primary image, replacing any
/// existing file, followed by the given header keywords.
pub fn write_fits_image(path: &Path, pixels: &DMatrix<f64>,
                        string_keys: &[(&str, &str)],
                        float_keys: &[(&str, f64)]) -> Result<(), CsuError> {
    let description = ImageDescription {
        data_type: ImageType::Double,
        dimensions: &[pixels.nrows(), pixels.ncols()],
    };
    let mut fptr = FitsFile::create(path)
        .with_custom_primary(&description)
        .overwrite()
        .open()?;
    let hdu = fptr.primary_hdu()?;
    // Column-major transpose is the row-major original.
    let data: Vec<f64> = pixels.transpose().iter().copied().collect();
    hdu.write_image(&mut fptr, &data)?;
    for (key, value) in string_keys {
        hdu.write_key(&mut fptr, key, *value)?;
    }
    for (key, value) in float_keys {
        hdu.write_key(&mut fptr, key, *value)?;
    }
    Ok(())
}

// mod tests.
