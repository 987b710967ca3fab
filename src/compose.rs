//! # Side-by-side compositing
//!
//! This module packs a stereo pair into a single frame for the encoder. Two layouts are
//! supported: full-width (plain horizontal concatenation, double width, what spatial-video
//! packaging tools expect) and half-width (each eye squeezed to half width so the composite
//! keeps the source frame's dimensions, the anamorphic convention most players understand).

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use std::fmt;
use std::str::FromStr;

use image::imageops::{self, FilterType};
use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::error::*;

// -----------------------------------------------------------------------------------------------
// ENUMERATIONS
// -----------------------------------------------------------------------------------------------

/// Packing layout for the composite frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SbsLayout {
    /// Concatenate both eyes at full resolution; composite width is twice the source width.
    FullWidth,
    /// Squeeze each eye to half width first; composite width equals the source width.
    HalfWidth,
}

// -----------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// -----------------------------------------------------------------------------------------------

impl SbsLayout {
    /// Composite dimensions for a given eye size.
    pub fn composite_dimensions(&self, width: u32, height: u32) -> (u32, u32) {
        match self {
            SbsLayout::FullWidth => (width * 2, height),
            SbsLayout::HalfWidth => (width, height),
        }
    }
}

impl Default for SbsLayout {
    fn default() -> Self {
        SbsLayout::FullWidth
    }
}

impl fmt::Display for SbsLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SbsLayout::FullWidth => write!(f, "full-width"),
            SbsLayout::HalfWidth => write!(f, "half-width"),
        }
    }
}

impl FromStr for SbsLayout {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "full" | "full-width" | "fullwidth" => Ok(SbsLayout::FullWidth),
            "half" | "half-width" | "halfwidth" => Ok(SbsLayout::HalfWidth),
            _ => Err(format!(
                "Unknown layout: '{}'. Use: full-width, half-width",
                s
            )),
        }
    }
}

// -----------------------------------------------------------------------------------------------
// FUNCTIONS
// -----------------------------------------------------------------------------------------------

/// Packs the left and right eye views into one frame. The eyes must share dimensions.
///
/// Deterministic: the same inputs always produce the same composite. Height is never
/// resampled in either layout.
pub fn composite(left: &RgbImage, right: &RgbImage, layout: SbsLayout) -> Result<RgbImage> {
    if left.dimensions() != right.dimensions() {
        return Err(Error::ShapeMismatch {
            what: "right eye",
            expected: format!("{}x{}", left.width(), left.height()),
            actual: format!("{}x{}", right.width(), right.height()),
        });
    }

    let (width, height) = left.dimensions();

    match layout {
        SbsLayout::FullWidth => {
            let mut combined = RgbImage::new(width * 2, height);
            imageops::overlay(&mut combined, left, 0, 0);
            imageops::overlay(&mut combined, right, width, 0);
            Ok(combined)
        }
        SbsLayout::HalfWidth => {
            // For odd widths the right eye takes the spare column so the composite width
            // comes out at exactly the source width.
            let left_w = width / 2;
            let right_w = width - left_w;

            let left_half = imageops::resize(left, left_w, height, FilterType::Triangle);
            let right_half = imageops::resize(right, right_w, height, FilterType::Triangle);

            let mut combined = RgbImage::new(width, height);
            imageops::overlay(&mut combined, &left_half, 0, 0);
            imageops::overlay(&mut combined, &right_half, left_w, 0);
            Ok(combined)
        }
    }
}

// -----------------------------------------------------------------------------------------------
// TESTS
// -----------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn solid(width: u32, height: u32, value: u8) -> RgbImage {
        RgbImage::from_pixel(width, height, Rgb([value, value, value]))
    }

    #[test]
    fn full_width_doubles_the_width() {
        let out = composite(&solid(100, 50, 10), &solid(100, 50, 200), SbsLayout::FullWidth)
            .unwrap();
        assert_eq!(out.dimensions(), (200, 50));
        assert_eq!(out.get_pixel(0, 0)[0], 10);
        assert_eq!(out.get_pixel(99, 49)[0], 10);
        assert_eq!(out.get_pixel(100, 0)[0], 200);
        assert_eq!(out.get_pixel(199, 49)[0], 200);
    }

    #[test]
    fn half_width_keeps_the_source_dimensions() {
        let out = composite(&solid(100, 50, 10), &solid(100, 50, 200), SbsLayout::HalfWidth)
            .unwrap();
        assert_eq!(out.dimensions(), (100, 50));
        assert_eq!(out.get_pixel(0, 0)[0], 10);
        assert_eq!(out.get_pixel(49, 0)[0], 10);
        assert_eq!(out.get_pixel(50, 0)[0], 200);
        assert_eq!(out.get_pixel(99, 49)[0], 200);
    }

    #[test]
    fn half_width_handles_odd_widths_exactly() {
        let out = composite(&solid(101, 20, 1), &solid(101, 20, 2), SbsLayout::HalfWidth)
            .unwrap();
        assert_eq!(out.dimensions(), (101, 20));
    }

    #[test]
    fn mismatched_eyes_are_rejected() {
        let result = composite(&solid(64, 32, 0), &solid(32, 32, 0), SbsLayout::FullWidth);
        assert!(matches!(result, Err(Error::ShapeMismatch { .. })));
    }

    #[test]
    fn layout_parses_from_strings() {
        assert_eq!("full".parse::<SbsLayout>().unwrap(), SbsLayout::FullWidth);
        assert_eq!(
            "half-width".parse::<SbsLayout>().unwrap(),
            SbsLayout::HalfWidth
        );
        assert!("interleaved".parse::<SbsLayout>().is_err());
    }
}
