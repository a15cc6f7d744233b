// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

pub mod astro_util;
pub mod errors;
pub mod fits_io;
pub mod image_utils;
pub mod profile_fit;
pub mod transform;
pub mod value_stats;
