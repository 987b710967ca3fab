//! # Streaming pipeline scenarios
//!
//! End-to-end runs of the conversion loop against in-memory collaborators: canned frame
//! scripts, scripted depth estimators and a recording sink instead of an encoder process.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use std::cell::RefCell;
use std::path::Path;
use std::rc::Rc;

use cv_dibr::prelude::*;
use cv_dibr::testing::{
    marker_frame, uniform_frame, FlatDepth, FrameScript, RampDepth, SharedSink, StepDepth,
};
use image::RgbImage;

// -----------------------------------------------------------------------------------------------
// HELPERS
// -----------------------------------------------------------------------------------------------

fn run_session(
    source: &mut FrameScript,
    estimator: &mut dyn DepthEstimator,
    sink: &SharedSink,
    params: SessionParams,
) -> Result<ConversionSummary> {
    let session = StreamSession::new(Path::new("script"), Path::new("out.mp4"), params);
    let handle = sink.clone();
    session.run(
        source,
        estimator,
        move |_| -> Result<Box<dyn FrameSink>> { Ok(Box::new(handle)) },
        None,
    )
}

// -----------------------------------------------------------------------------------------------
// TESTS
// -----------------------------------------------------------------------------------------------

/// A flat mid-range depth field carries no depth cue, so both synthesised eyes must be the
/// source frame untouched and the composite is just the frame duplicated.
#[test]
fn flat_depth_passes_the_frame_through() {
    let frame = uniform_frame(4, 4, 128);
    let mut source = FrameScript::repeated(frame.clone(), 3);
    let mut estimator = FlatDepth { value: 128.0 };
    let sink = SharedSink::new();

    let params = SessionParams {
        max_disparity: 10.0,
        ..SessionParams::default()
    };
    let summary = run_session(&mut source, &mut estimator, &sink, params).unwrap();

    assert_eq!(summary.frames_processed, 3);
    assert_eq!(summary.dimensions, "8x4");
    assert_eq!(sink.frames_written(), 3);
    assert_eq!(sink.finish_calls(), 1);

    let expected = composite(&frame, &frame, SbsLayout::FullWidth).unwrap();
    assert_eq!(sink.frame(0), expected.as_raw().as_slice());
    assert_eq!(sink.frame(2), expected.as_raw().as_slice());
}

/// A full-range depth step shifts near content by half the disparity ceiling in each eye, in
/// opposite directions: a marker column at x=7 lands at x=5 in the left eye and x=9 in the
/// right eye for a ceiling of 4.
#[test]
fn depth_step_displaces_eyes_symmetrically() {
    let mut source = FrameScript::new(vec![marker_frame(10, 2, 7)]);
    let mut estimator = StepDepth {
        low: 0.0,
        high: 255.0,
    };
    let sink = SharedSink::new();

    let params = SessionParams {
        max_disparity: 4.0,
        ..SessionParams::default()
    };
    let summary = run_session(&mut source, &mut estimator, &sink, params).unwrap();
    assert_eq!(summary.dimensions, "20x2");

    let sbs = RgbImage::from_raw(20, 2, sink.frame(0)).unwrap();

    // Left eye occupies columns 0..10 of the composite, right eye columns 10..20.
    assert_eq!(sbs.get_pixel(5, 0)[0], 255);
    assert_eq!(sbs.get_pixel(7, 0)[0], 0);
    assert_eq!(sbs.get_pixel(19, 0)[0], 255);
    assert_eq!(sbs.get_pixel(17, 0)[0], 0);
}

/// Cropping the left half of a half-width composite and stretching it back out approximately
/// reconstructs the left eye; resampling loss stays within interpolation tolerance.
#[test]
fn half_width_composite_roundtrips_the_left_eye() {
    let mut left = RgbImage::new(100, 50);
    for y in 0..50 {
        for x in 0..100 {
            let v = (x * 255 / 99) as u8;
            left.put_pixel(x, y, image::Rgb([v, v, v]));
        }
    }
    let right = uniform_frame(100, 50, 40);

    let sbs = composite(&left, &right, SbsLayout::HalfWidth).unwrap();
    assert_eq!(sbs.dimensions(), (100, 50));

    let cropped = RgbImage::from_fn(50, 50, |x, y| *sbs.get_pixel(x, y));
    let restored =
        image::imageops::resize(&cropped, 100, 50, image::imageops::FilterType::Triangle);

    let mut max_diff = 0i32;
    for (p, q) in restored.pixels().zip(left.pixels()) {
        max_diff = max_diff.max((p[0] as i32 - q[0] as i32).abs());
    }
    assert!(max_diff <= 8, "reconstruction error too large: {}", max_diff);
}

/// Full-width output doubles the width, half-width keeps the source geometry exactly.
#[test]
fn composite_dimensions_follow_the_layout() {
    let left = uniform_frame(100, 50, 10);
    let right = uniform_frame(100, 50, 20);

    let full = composite(&left, &right, SbsLayout::FullWidth).unwrap();
    assert_eq!(full.dimensions(), (200, 50));

    let half = composite(&left, &right, SbsLayout::HalfWidth).unwrap();
    assert_eq!(half.dimensions(), (100, 50));
}

/// The frame budget caps how much of the stream is consumed, and the channel still closes
/// exactly once.
#[test]
fn frame_budget_stops_the_stream_early() {
    let mut source = FrameScript::repeated(uniform_frame(6, 4, 90), 10);
    let mut estimator = RampDepth {
        width: 6,
        height: 4,
        min: 0.0,
        max: 255.0,
    };
    let sink = SharedSink::new();

    let params = SessionParams {
        max_frames: Some(4),
        ..SessionParams::default()
    };
    let summary = run_session(&mut source, &mut estimator, &sink, params).unwrap();

    assert_eq!(summary.frames_processed, 4);
    assert_eq!(sink.frames_written(), 4);
    assert_eq!(sink.finish_calls(), 1);
}

/// A depth field at a different resolution than the frame is reconciled by resize inside the
/// streaming loop rather than rejected.
#[test]
fn foreign_resolution_depth_is_reconciled() {
    let mut source = FrameScript::repeated(uniform_frame(16, 8, 60), 2);
    let mut estimator = RampDepth {
        width: 5,
        height: 3,
        min: -4.0,
        max: 12.5,
    };
    let sink = SharedSink::new();

    let summary =
        run_session(&mut source, &mut estimator, &sink, SessionParams::default()).unwrap();
    assert_eq!(summary.frames_processed, 2);
    assert_eq!(summary.dimensions, "32x8");
    assert_eq!(sink.frame(0).len(), 32 * 8 * 3);
}

/// A write failure mid-stream surfaces as an encoder failure, after the close ran anyway.
#[test]
fn write_failure_still_closes_the_channel() {
    let mut source = FrameScript::repeated(uniform_frame(8, 8, 200), 10);
    let mut estimator = RampDepth {
        width: 8,
        height: 8,
        min: 0.0,
        max: 1.0,
    };
    let sink = SharedSink::failing_after(3);

    let result = run_session(&mut source, &mut estimator, &sink, SessionParams::default());

    assert!(matches!(result, Err(Error::EncoderFailure { .. })));
    assert_eq!(sink.frames_written(), 3);
    assert_eq!(sink.finish_calls(), 1);
}

/// An empty stream is reported as unreadable input, and no sink is ever constructed.
#[test]
fn empty_stream_aborts_before_the_encoder_starts() {
    let mut source = FrameScript::new(Vec::new());
    let mut estimator = FlatDepth { value: 1.0 };
    let sink = SharedSink::new();

    let result = run_session(&mut source, &mut estimator, &sink, SessionParams::default());

    assert!(matches!(result, Err(Error::InputUnreadable { .. })));
    assert_eq!(sink.frames_written(), 0);
    assert_eq!(sink.finish_calls(), 0);
}

/// Progress reports arrive once per frame and honour the budget-capped total hint.
#[test]
fn progress_reports_track_the_budget() {
    let mut source = FrameScript::repeated(uniform_frame(4, 4, 30), 9);
    let mut estimator = FlatDepth { value: 5.0 };
    let sink = SharedSink::new();

    let calls: Rc<RefCell<Vec<(u64, Option<u64>)>>> = Rc::new(RefCell::new(Vec::new()));
    let recorder = calls.clone();

    let params = SessionParams {
        max_frames: Some(5),
        ..SessionParams::default()
    };
    let session = StreamSession::new(Path::new("script"), Path::new("out.mp4"), params);
    let handle = sink.clone();
    session
        .run(
            &mut source,
            &mut estimator,
            move |_| -> Result<Box<dyn FrameSink>> { Ok(Box::new(handle)) },
            Some(Box::new(move |frame, total| {
                recorder.borrow_mut().push((frame, total));
            })),
        )
        .unwrap();

    let calls = calls.borrow();
    assert_eq!(calls.len(), 5);
    assert_eq!(calls[0], (1, Some(5)));
    assert_eq!(calls[4], (5, Some(5)));
}
