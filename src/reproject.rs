//! # Stereo reprojection
//!
//! This module provides the view synthesis core: given a colour frame and a disparity map of
//! identical dimensions, it resamples the frame into left and right eye views.
//!
//! The disparity is split half-and-half between the eyes (left samples at `x + d/2`, right at
//! `x - d/2`, y untouched) so the zero-disparity plane sits at scene-average depth, which keeps
//! window violation to a minimum. Sampling is bilinear; coordinates pushed off-canvas are
//! resolved by replicating the nearest border pixel. Edge replication visibly stretches frame
//! borders where disparity is large; that is the accepted trade against black disoccluded bands.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use image::{Rgb, RgbImage};

use crate::disparity::DisparityMap;
use crate::error::*;

// -----------------------------------------------------------------------------------------------
// FUNCTIONS
// -----------------------------------------------------------------------------------------------

/// Synthesises the (left, right) eye pair for one frame.
///
/// The disparity map must already match the frame's dimensions exactly; resizing a
/// foreign-resolution depth field is the streaming caller's job, not this function's.
pub fn reproject(frame: &RgbImage, disparity: &DisparityMap) -> Result<(RgbImage, RgbImage)> {
    let (width, height) = frame.dimensions();

    if disparity.dimensions() != (width, height) {
        return Err(Error::ShapeMismatch {
            what: "disparity map",
            expected: format!("{}x{}", width, height),
            actual: format!("{}x{}", disparity.width(), disparity.height()),
        });
    }

    let left = remap_horizontal(frame, disparity, 0.5);
    let right = remap_horizontal(frame, disparity, -0.5);

    Ok((left, right))
}

/// Resamples the frame with a per-pixel horizontal offset of `disparity * shift_factor`.
fn remap_horizontal(frame: &RgbImage, disparity: &DisparityMap, shift_factor: f32) -> RgbImage {
    let (width, height) = frame.dimensions();
    let mut output = RgbImage::new(width, height);

    for y in 0..height {
        for x in 0..width {
            let src_x = x as f32 + disparity.get(x, y) * shift_factor;
            output.put_pixel(x, y, sample_bilinear(frame, src_x, y as f32));
        }
    }

    output
}

/// Samples the image at a fractional coordinate with bilinear weighting, clamping
/// out-of-bounds coordinates to the nearest border pixel.
fn sample_bilinear(image: &RgbImage, x: f32, y: f32) -> Rgb<u8> {
    let (width, height) = image.dimensions();

    let x = x.max(0.0).min((width - 1) as f32);
    let y = y.max(0.0).min((height - 1) as f32);

    let x0 = x.floor() as u32;
    let y0 = y.floor() as u32;
    let x1 = (x0 + 1).min(width - 1);
    let y1 = (y0 + 1).min(height - 1);

    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let p00 = image.get_pixel(x0, y0);
    let p10 = image.get_pixel(x1, y0);
    let p01 = image.get_pixel(x0, y1);
    let p11 = image.get_pixel(x1, y1);

    let mut out = [0u8; 3];
    for c in 0..3 {
        let top = p00[c] as f32 * (1.0 - fx) + p10[c] as f32 * fx;
        let bot = p01[c] as f32 * (1.0 - fx) + p11[c] as f32 * fx;
        let v = top * (1.0 - fy) + bot * fy;
        out[c] = v.round().max(0.0).min(255.0) as u8;
    }

    Rgb(out)
}

// -----------------------------------------------------------------------------------------------
// TESTS
// -----------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient_frame(width: u32, height: u32) -> RgbImage {
        let mut frame = RgbImage::new(width, height);
        for y in 0..height {
            for x in 0..width {
                let v = (x * 255 / (width - 1).max(1)) as u8;
                frame.put_pixel(x, y, Rgb([v, v, v]));
            }
        }
        frame
    }

    #[test]
    fn zero_disparity_is_identity_for_both_eyes() {
        let frame = gradient_frame(16, 8);
        let disparity = DisparityMap::new(16, 8);

        let (left, right) = reproject(&frame, &disparity).unwrap();
        assert_eq!(left.as_raw(), frame.as_raw());
        assert_eq!(right.as_raw(), frame.as_raw());
    }

    #[test]
    fn eyes_shift_in_opposite_directions() {
        // Black frame with a single white column at x = 5.
        let mut frame = RgbImage::new(12, 2);
        for y in 0..2 {
            frame.put_pixel(5, y, Rgb([255, 255, 255]));
        }

        let mut disparity = DisparityMap::new(12, 2);
        for y in 0..2 {
            for x in 0..12 {
                disparity.put(x, y, 4.0);
            }
        }

        let (left, right) = reproject(&frame, &disparity).unwrap();

        // Left eye samples at x + 2, so the marker lands two pixels to the left;
        // the right eye mirrors it two pixels to the right.
        assert_eq!(left.get_pixel(3, 0)[0], 255);
        assert_eq!(left.get_pixel(5, 0)[0], 0);
        assert_eq!(right.get_pixel(7, 0)[0], 255);
        assert_eq!(right.get_pixel(5, 0)[0], 0);
    }

    #[test]
    fn fractional_disparity_blends_neighbours() {
        let mut frame = RgbImage::new(4, 1);
        frame.put_pixel(1, 0, Rgb([100, 100, 100]));
        frame.put_pixel(2, 0, Rgb([200, 200, 200]));

        let mut disparity = DisparityMap::new(4, 1);
        for x in 0..4 {
            disparity.put(x, 0, 1.0);
        }

        // Left eye at x = 1 samples source 1.5, halfway between 100 and 200.
        let (left, _right) = reproject(&frame, &disparity).unwrap();
        assert_eq!(left.get_pixel(1, 0)[0], 150);
    }

    #[test]
    fn off_canvas_samples_replicate_the_border() {
        let frame = gradient_frame(8, 2);

        let mut disparity = DisparityMap::new(8, 2);
        for y in 0..2 {
            for x in 0..8 {
                disparity.put(x, y, 40.0);
            }
        }

        let (left, right) = reproject(&frame, &disparity).unwrap();
        // Left eye samples far past the right edge everywhere near it, so the rightmost
        // source column bleeds across; the right eye mirrors with the leftmost column.
        assert_eq!(left.get_pixel(7, 0)[0], frame.get_pixel(7, 0)[0]);
        assert_eq!(right.get_pixel(0, 0)[0], frame.get_pixel(0, 0)[0]);
        assert_eq!(right.get_pixel(5, 0)[0], frame.get_pixel(0, 0)[0]);
    }

    #[test]
    fn mismatched_dimensions_are_rejected() {
        let frame = gradient_frame(8, 4);
        let disparity = DisparityMap::new(4, 2);

        match reproject(&frame, &disparity) {
            Err(Error::ShapeMismatch { .. }) => {}
            other => panic!("expected shape mismatch, got {:?}", other.map(|_| ())),
        }
    }
}
