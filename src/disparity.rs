//! # Disparity maps
//!
//! This module provides the per-pixel horizontal shift field derived from normalised depth.
//! Disparity is measured in output pixels: higher value = closer object = larger shift.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use crate::depth::DepthField;

// -----------------------------------------------------------------------------------------------
// DATA STRUCTURES
// -----------------------------------------------------------------------------------------------

/// A generic floating point disparity map.
#[derive(Clone, Debug)]
pub struct DisparityMap {
    data: Vec<f32>,
    width: u32,
    height: u32,
    pub max_disp: Option<f32>,
    pub min_disp: Option<f32>,
}

// -----------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// -----------------------------------------------------------------------------------------------

impl DisparityMap {
    pub fn new(width: u32, height: u32) -> Self {
        DisparityMap {
            data: vec![0.0; (width * height) as usize],
            width,
            height,
            min_disp: None,
            max_disp: None,
        }
    }

    /// Scales a normalised depth field into pixel-unit disparity.
    ///
    /// `max_disparity` is the shift ceiling applied to the closest content and is the
    /// operator's sole control over stereo strength. Sensible values for 1080p-class content
    /// sit around 20-50; the conventional default is 30.
    pub fn from_depth(depth: &DepthField, max_disparity: f32) -> Self {
        let (width, height) = depth.dimensions();

        let mut min = f32::INFINITY;
        let mut max = f32::NEG_INFINITY;
        let data: Vec<f32> = depth
            .as_slice()
            .iter()
            .map(|&v| {
                let d = v * max_disparity;
                if d < min {
                    min = d;
                }
                if d > max {
                    max = d;
                }
                d
            })
            .collect();

        DisparityMap {
            data,
            width,
            height,
            min_disp: if min.is_finite() { Some(min) } else { None },
            max_disp: if max.is_finite() { Some(max) } else { None },
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn get(&self, x: u32, y: u32) -> f32 {
        self.data[(y * self.width + x) as usize]
    }

    pub fn put(&mut self, x: u32, y: u32, val: f32) {
        self.data[(y * self.width + x) as usize] = val;
    }
}

// -----------------------------------------------------------------------------------------------
// TESTS
// -----------------------------------------------------------------------------------------------
