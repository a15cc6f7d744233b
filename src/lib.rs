// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

pub mod bars;
pub mod mask;
pub mod mask_xml;
pub mod bar_analyzer;
pub mod verifier;
pub mod instrument;

#[cfg(test)]
mod test_util;
