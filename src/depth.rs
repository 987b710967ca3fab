//! # Depth fields
//!
//! This module provides the scalar per-pixel depth field, its per-frame normalisation, and the
//! seam to an external depth estimator. The estimator itself is opaque: anything that can turn a
//! colour frame into a [`DepthField`] satisfies [`DepthEstimator`], including the scripted
//! estimators in [`crate::testing`].

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use image::RgbImage;
use log::debug;

use crate::error::*;

// -----------------------------------------------------------------------------------------------
// CONSTANTS
// -----------------------------------------------------------------------------------------------

/// Value ranges narrower than this are treated as flat fields during normalisation.
const FLAT_FIELD_EPSILON: f32 = 1e-6;

// -----------------------------------------------------------------------------------------------
// DATA STRUCTURES
// -----------------------------------------------------------------------------------------------

/// A dense scalar depth estimate for one frame, row-major, arbitrary numeric range.
///
/// Interpretation follows the proximity convention: higher value = closer content.
#[derive(Clone, Debug)]
pub struct DepthField {
    data: Vec<f32>,
    width: u32,
    height: u32,
}

// -----------------------------------------------------------------------------------------------
// TRAITS
// -----------------------------------------------------------------------------------------------

pub trait DepthEstimator {
    /// Prepare any expensive backing resource. Called once before the first inference; the
    /// default is a no-op for estimators with nothing to load.
    fn load(&mut self) -> Result<()> {
        Ok(())
    }

    /// Produce a depth field for the given colour frame. The field does not have to match the
    /// frame's resolution; the streaming caller reconciles dimensions before reprojection.
    fn infer(&mut self, frame: &RgbImage) -> Result<DepthField>;
}

// -----------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// -----------------------------------------------------------------------------------------------

impl DepthField {
    pub fn new(width: u32, height: u32) -> Self {
        DepthField {
            data: vec![0.0; (width * height) as usize],
            width,
            height,
        }
    }

    /// Wraps a row-major value buffer. Returns `None` if the buffer length does not match the
    /// given dimensions.
    pub fn from_raw(width: u32, height: u32, data: Vec<f32>) -> Option<Self> {
        if data.len() != (width * height) as usize {
            return None;
        }
        Some(DepthField {
            data,
            width,
            height,
        })
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

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Minimum and maximum value over the whole field.
    pub fn min_max(&self) -> (f32, f32) {
        let mut min = f32::INFINITY;
        let mut max = f32::NEG_INFINITY;
        for &v in &self.data {
            if v < min {
                min = v;
            }
            if v > max {
                max = v;
            }
        }
        (min, max)
    }

    /// Rescales the field so that min maps to 0.0 and max to 1.0, using this frame's values
    /// only. A flat field (max == min) normalises to all zeros, which downstream becomes a
    /// zero-disparity frame rather than a division by zero.
    pub fn normalised(&self) -> DepthField {
        let (min, max) = self.min_max();
        let range = max - min;

        if !range.is_finite() || range < FLAT_FIELD_EPSILON {
            debug!(
                "flat depth field ({}x{}, value {}), emitting zero disparity",
                self.width, self.height, min
            );
            return DepthField::new(self.width, self.height);
        }

        let data = self.data.iter().map(|&v| (v - min) / range).collect();
        DepthField {
            data,
            width: self.width,
            height: self.height,
        }
    }

    /// Bilinearly resamples the field to the given dimensions, replicating edges.
    pub fn resized(&self, width: u32, height: u32) -> DepthField {
        if width == self.width && height == self.height {
            return self.clone();
        }

        let mut out = DepthField::new(width, height);
        if width == 0 || height == 0 || self.width == 0 || self.height == 0 {
            return out;
        }

        // Map the destination lattice onto the source lattice corner-to-corner.
        let sx = if width > 1 {
            (self.width - 1) as f32 / (width - 1) as f32
        } else {
            0.0
        };
        let sy = if height > 1 {
            (self.height - 1) as f32 / (height - 1) as f32
        } else {
            0.0
        };

        for y in 0..height {
            let fy = y as f32 * sy;
            let y0 = fy.floor() as u32;
            let y1 = (y0 + 1).min(self.height - 1);
            let dy = fy - y0 as f32;

            for x in 0..width {
                let fx = x as f32 * sx;
                let x0 = fx.floor() as u32;
                let x1 = (x0 + 1).min(self.width - 1);
                let dx = fx - x0 as f32;

                let v00 = self.get(x0, y0);
                let v10 = self.get(x1, y0);
                let v01 = self.get(x0, y1);
                let v11 = self.get(x1, y1);

                let top = v00 + dx * (v10 - v00);
                let bot = v01 + dx * (v11 - v01);
                out.put(x, y, top + dy * (bot - top));
            }
        }

        out
    }

    /// Applies a separable Gaussian blur with the given sigma, replicating edges. A sigma of
    /// zero or less returns the field unchanged.
    pub fn blurred(&self, sigma: f32) -> DepthField {
        if sigma <= 0.0 {
            return self.clone();
        }

        let radius = (sigma * 3.0).ceil() as i32;
        let kernel_size = (2 * radius + 1) as usize;
        let coeff = -0.5 / (sigma * sigma);

        let mut kernel = vec![0.0f32; kernel_size];
        for (i, k) in kernel.iter_mut().enumerate() {
            let d = i as f32 - radius as f32;
            *k = (d * d * coeff).exp();
        }
        let ksum: f32 = kernel.iter().sum();
        for k in &mut kernel {
            *k /= ksum;
        }

        let (w, h) = (self.width as i32, self.height as i32);

        // Horizontal pass
        let mut temp = DepthField::new(self.width, self.height);
        for y in 0..h {
            for x in 0..w {
                let mut acc = 0.0f32;
                for (i, k) in kernel.iter().enumerate() {
                    let nx = (x + i as i32 - radius).max(0).min(w - 1);
                    acc += self.get(nx as u32, y as u32) * k;
                }
                temp.put(x as u32, y as u32, acc);
            }
        }

        // Vertical pass
        let mut out = DepthField::new(self.width, self.height);
        for y in 0..h {
            for x in 0..w {
                let mut acc = 0.0f32;
                for (i, k) in kernel.iter().enumerate() {
                    let ny = (y + i as i32 - radius).max(0).min(h - 1);
                    acc += temp.get(x as u32, ny as u32) * k;
                }
                out.put(x as u32, y as u32, acc);
            }
        }

        out
    }
}

/// Cache of constructed estimators keyed by their configuration.
///
/// Loading a depth model is expensive, so batch callers reuse one estimator across many
/// conversions. The cache is passed explicitly through the session constructor rather than
/// living in a global; entries are loaded once on insertion and treated as read-only state
/// afterwards.
pub struct EstimatorCache {
    entries: HashMap<String, Box<dyn DepthEstimator>>,
}

impl EstimatorCache {
    pub fn new() -> Self {
        EstimatorCache {
            entries: HashMap::new(),
        }
    }

    /// Returns the estimator for `key`, building and loading it first if absent.
    pub fn get_or_insert_with<F>(&mut self, key: &str, build: F) -> Result<&mut dyn DepthEstimator>
    where
        F: FnOnce() -> Result<Box<dyn DepthEstimator>>,
    {
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(entry) => Ok(entry.into_mut().as_mut()),
            Entry::Vacant(slot) => {
                let mut estimator = build()?;
                estimator.load()?;
                Ok(slot.insert(estimator).as_mut())
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for EstimatorCache {
    fn default() -> Self {
        Self::new()
    }
}

// -----------------------------------------------------------------------------------------------
// TESTS
// -----------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn normalised_spans_unit_interval() {
        let field = DepthField::from_raw(2, 2, vec![10.0, 20.0, 30.0, 50.0]).unwrap();
        let norm = field.normalised();

        assert_relative_eq!(norm.get(0, 0), 0.0);
        assert_relative_eq!(norm.get(1, 1), 1.0);
        assert_relative_eq!(norm.get(1, 0), 0.25);
        for &v in norm.as_slice() {
            assert!((0.0..=1.0).contains(&v));
        }
    }

    #[test]
    fn flat_field_normalises_to_zeros() {
        let field = DepthField::from_raw(3, 2, vec![128.0; 6]).unwrap();
        let norm = field.normalised();
        assert!(norm.as_slice().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn from_raw_rejects_wrong_length() {
        assert!(DepthField::from_raw(3, 3, vec![0.0; 8]).is_none());
    }

    #[test]
    fn resized_preserves_corners() {
        let field = DepthField::from_raw(2, 2, vec![0.0, 1.0, 2.0, 3.0]).unwrap();
        let up = field.resized(5, 5);

        assert_eq!(up.dimensions(), (5, 5));
        assert_relative_eq!(up.get(0, 0), 0.0);
        assert_relative_eq!(up.get(4, 0), 1.0);
        assert_relative_eq!(up.get(0, 4), 2.0);
        assert_relative_eq!(up.get(4, 4), 3.0);
        // Centre is the mean of all four corners
        assert_relative_eq!(up.get(2, 2), 1.5);
    }

    #[test]
    fn blur_preserves_constant_field() {
        let field = DepthField::from_raw(8, 8, vec![0.25; 64]).unwrap();
        let blurred = field.blurred(1.5);
        for &v in blurred.as_slice() {
            assert_relative_eq!(v, 0.25, epsilon = 1e-5);
        }
    }

    #[test]
    fn cache_builds_each_key_once() {
        struct Nop;
        impl DepthEstimator for Nop {
            fn infer(&mut self, _frame: &RgbImage) -> Result<DepthField> {
                Ok(DepthField::new(1, 1))
            }
        }

        let mut cache = EstimatorCache::new();
        let mut builds = 0;
        for _ in 0..3 {
            cache
                .get_or_insert_with("vits", || {
                    builds += 1;
                    Ok(Box::new(Nop))
                })
                .unwrap();
        }
        assert_eq!(builds, 1);
        assert_eq!(cache.len(), 1);
    }
}
