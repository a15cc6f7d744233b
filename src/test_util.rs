// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

// Synthetic detector geometry and mask images for tests.

use std::collections::BTreeMap;

use nalgebra::Matrix3;

use csu_elements::image_utils::DetectorImage;
use csu_elements::transform::CoordinateTransform;

use crate::bars::{self, NUM_SLITS};
use crate::mask::Mask;

pub const IMAGE_WIDTH: usize = 720;
pub const IMAGE_HEIGHT: usize = 920;
const SLIT_BRIGHTNESS: f64 = 1000.0;

/// x = 700 - 2.5 mm, y = 20 slit - 10. Slit s covers rows 20(s-1)..20s and
/// the bar travel covers columns 24..690.
pub fn synthetic_transform() -> CoordinateTransform {
    let physical_to_pixel = Matrix3::new(-2.5, 0.0, 0.0,
                                         0.0, 20.0, 0.0,
                                         700.0, -10.0, 1.0);
    let pixel_to_physical = Matrix3::new(-0.4, 0.0, 0.0,
                                         0.0, 0.05, 0.0,
                                         280.0, 0.5, 1.0);
    CoordinateTransform::new(pixel_to_physical, physical_to_pixel)
}

/// Image of `mask` as seen through `transform`: each slit is a bright gap
/// between dark bars, with one-pixel ramps centered on the bar edges.
/// `shifts` moves individual bar edges by the given number of pixels.
pub fn render_mask_image(mask: &Mask, transform: &CoordinateTransform,
                         shifts: &BTreeMap<u32, f64>) -> DetectorImage {
    let edges: Vec<(f64, f64)> = mask.slits().iter().map(|slit| {
        let s = slit.slit_number() as f64;
        let shift = |bar: u32| shifts.get(&bar).copied().unwrap_or(0.0);
        let left = transform.to_pixel(slit.left_bar_position_mm(), s).0 +
            shift(slit.left_bar_number());
        let right = transform.to_pixel(slit.right_bar_position_mm(), s).0 +
            shift(slit.right_bar_number());
        (left, right)
    }).collect();

    DetectorImage::from_fn(IMAGE_WIDTH, IMAGE_HEIGHT, |x, y| {
        let slit = transform.to_physical(x as f64, y as f64).1.round()
            .clamp(1.0, NUM_SLITS as f64) as usize;
        let (left, right) = edges[slit - 1];
        let x = x as f64;
        let rise = (x - left + 0.5).clamp(0.0, 1.0);
        let fall = (right - x + 0.5).clamp(0.0, 1.0);
        SLIT_BRIGHTNESS * rise.min(fall)
    })
}

#[test]
fn test_synthetic_geometry() {
    let transform = synthetic_transform();
    let (x, y) = transform.to_pixel(bars::MAX_TRAVEL_MM, 1.0);
    assert!((x - 24.0).abs() < 1e-9 && (y - 10.0).abs() < 1e-9);
    let (mm, slit) = transform.to_physical(690.0, 910.0);
    assert!((mm - bars::MIN_TRAVEL_MM).abs() < 1e-9 && (slit - 46.0).abs() < 1e-9);

    let image = render_mask_image(&Mask::open(), &transform, &BTreeMap::new());
    let row = 10;
    let expected = [(23, 0.0), (24, 500.0), (25, 1000.0), (690, 500.0), (691, 0.0)];
    for (x, value) in expected {
        assert!((image.pixels()[(row, x)] - value).abs() < 1e-6);
    }
}
