// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use thiserror::Error;

/// Errors raised by CSU geometry fitting, mask construction and image I/O.
///
/// Per-bar measurement failures are not errors; they are reported as `None`
/// positions so that one bad slit does not abort analysis of the others.
#[derive(Error, Debug)]
pub enum CsuError {
    /// Malformed or under-determined arguments (transform fitting, empty
    /// images).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The mask description could not be resolved to a mask.
    #[error("mask parse error: {0}")]
    MaskParse(String),

    /// The persisted transform could not be read or written as JSON.
    #[error("transform file error: {0}")]
    TransformFile(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    /// FITS frame or header could not be read or written.
    #[error("FITS error: {0}")]
    Fits(#[from] fitsio::errors::Error),

    /// The instrument has no CSU verification rules, or a frame's layout
    /// is not one the analysis handles.
    #[error("unsupported: {0}")]
    Unsupported(String),
}

pub fn invalid_input_error(msg: &str) -> CsuError {
    CsuError::InvalidInput(msg.to_string())
}

pub fn mask_parse_error(msg: &str) -> CsuError {
    CsuError::MaskParse(msg.to_string())
}
