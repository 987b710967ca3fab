//! # Test doubles
//!
//! This module provides in-memory stand-ins for the pipeline's external collaborators: a
//! recording sink in place of the encoder process, scripted depth estimators in place of a
//! depth network, and a canned frame source in place of a decoder. They let the full streaming
//! path run headless, without ffmpeg on the machine, in both the crate's own tests and
//! downstream ones.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use std::cell::RefCell;
use std::rc::Rc;

use image::{Rgb, RgbImage};

use crate::depth::{DepthEstimator, DepthField};
use crate::error::*;
use crate::sink::FrameSink;
use crate::video::FrameSource;

// -----------------------------------------------------------------------------------------------
// DATA STRUCTURES
// -----------------------------------------------------------------------------------------------

/// Frame sink that records every written frame and counts `finish` calls.
///
/// With `fail_after_frames` set, the write of frame N+1 fails with an encoder error, which is
/// how tests exercise the mid-stream failure path.
#[derive(Default)]
pub struct MemorySink {
    pub frames: Vec<Vec<u8>>,
    pub finish_calls: u32,
    pub fail_after_frames: Option<usize>,
}

/// Estimator returning the same value everywhere: the degenerate flat-field case.
pub struct FlatDepth {
    pub value: f32,
}

/// Estimator returning a left-to-right ramp over an arbitrary value range, at an arbitrary
/// resolution (to exercise the resize reconciliation when it differs from the frame's).
pub struct RampDepth {
    pub width: u32,
    pub height: u32,
    pub min: f32,
    pub max: f32,
}

/// Estimator returning a two-level field: `low` on the left half, `high` on the right half.
pub struct StepDepth {
    pub low: f32,
    pub high: f32,
}

/// Frame source that plays back a canned list of frames.
pub struct FrameScript {
    frames: std::vec::IntoIter<RgbImage>,
    total: u64,
}

/// Cloneable handle over a [`MemorySink`], for tests that need to hand the sink to a session
/// (which takes ownership) and still inspect what was written afterwards.
#[derive(Clone, Default)]
pub struct SharedSink {
    inner: Rc<RefCell<MemorySink>>,
}

// -----------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// -----------------------------------------------------------------------------------------------

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_after(frames: usize) -> Self {
        MemorySink {
            fail_after_frames: Some(frames),
            ..Self::default()
        }
    }
}

impl FrameSink for MemorySink {
    fn write_frame(&mut self, frame: &[u8]) -> Result<()> {
        if let Some(cap) = self.fail_after_frames {
            if self.frames.len() >= cap {
                return Err(Error::EncoderFailure {
                    status: None,
                    diagnostic: "simulated channel write failure".to_string(),
                });
            }
        }
        self.frames.push(frame.to_vec());
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.finish_calls += 1;
        Ok(())
    }
}

impl DepthEstimator for FlatDepth {
    fn infer(&mut self, frame: &RgbImage) -> Result<DepthField> {
        let (w, h) = frame.dimensions();
        let field = DepthField::from_raw(w, h, vec![self.value; (w * h) as usize]);
        field.ok_or_else(|| Error::ShapeMismatch {
            what: "depth field",
            expected: format!("{}x{}", w, h),
            actual: "empty".to_string(),
        })
    }
}

impl DepthEstimator for RampDepth {
    fn infer(&mut self, _frame: &RgbImage) -> Result<DepthField> {
        let mut field = DepthField::new(self.width, self.height);
        let span = (self.width - 1).max(1) as f32;
        for y in 0..self.height {
            for x in 0..self.width {
                let t = x as f32 / span;
                field.put(x, y, self.min + t * (self.max - self.min));
            }
        }
        Ok(field)
    }
}

impl DepthEstimator for StepDepth {
    fn infer(&mut self, frame: &RgbImage) -> Result<DepthField> {
        let (w, h) = frame.dimensions();
        let mut field = DepthField::new(w, h);
        for y in 0..h {
            for x in 0..w {
                field.put(x, y, if x < w / 2 { self.low } else { self.high });
            }
        }
        Ok(field)
    }
}

impl SharedSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_after(frames: usize) -> Self {
        SharedSink {
            inner: Rc::new(RefCell::new(MemorySink::failing_after(frames))),
        }
    }

    pub fn frames_written(&self) -> usize {
        self.inner.borrow().frames.len()
    }

    pub fn frame(&self, index: usize) -> Vec<u8> {
        self.inner.borrow().frames[index].clone()
    }

    pub fn finish_calls(&self) -> u32 {
        self.inner.borrow().finish_calls
    }
}

impl FrameSink for SharedSink {
    fn write_frame(&mut self, frame: &[u8]) -> Result<()> {
        self.inner.borrow_mut().write_frame(frame)
    }

    fn finish(&mut self) -> Result<()> {
        self.inner.borrow_mut().finish()
    }
}

impl FrameScript {
    pub fn new(frames: Vec<RgbImage>) -> Self {
        let total = frames.len() as u64;
        FrameScript {
            frames: frames.into_iter(),
            total,
        }
    }

    /// A script repeating one frame `count` times.
    pub fn repeated(frame: RgbImage, count: usize) -> Self {
        Self::new(vec![frame; count])
    }
}

impl FrameSource for FrameScript {
    fn read_frame(&mut self) -> Result<Option<RgbImage>> {
        Ok(self.frames.next())
    }

    fn total_frames(&self) -> Option<u64> {
        Some(self.total)
    }
}

// -----------------------------------------------------------------------------------------------
// FUNCTIONS
// -----------------------------------------------------------------------------------------------

/// A solid-colour frame.
pub fn uniform_frame(width: u32, height: u32, value: u8) -> RgbImage {
    RgbImage::from_pixel(width, height, Rgb([value, value, value]))
}

/// A black frame with one white column, handy for tracking horizontal shifts.
pub fn marker_frame(width: u32, height: u32, marker_x: u32) -> RgbImage {
    let mut frame = RgbImage::new(width, height);
    for y in 0..height {
        frame.put_pixel(marker_x, y, Rgb([255, 255, 255]));
    }
    frame
}
