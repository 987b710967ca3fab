//! # Stream sessions
//!
//! This module ties the pipeline together: frames are read, depth-estimated, reprojected,
//! composited and written to the encoder strictly in order, one at a time. A session owns its
//! encoder sink exclusively for its whole lifetime and tears it down exactly once on every exit
//! path, so no conversion can leave a dangling subprocess or an open channel behind. Sessions
//! share nothing; batch callers run one session per video.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::compose::{composite, SbsLayout};
use crate::depth::DepthEstimator;
use crate::disparity::DisparityMap;
use crate::error::*;
use crate::reproject::reproject;
use crate::sink::{FfmpegEncoderSink, FrameSink, RawFrameContract};
use crate::video::{FrameSource, VideoSource};

#[cfg(feature = "statistics")]
use plotters::prelude::*;

// -----------------------------------------------------------------------------------------------
// TYPES
// -----------------------------------------------------------------------------------------------

/// Per-frame progress callback: (frames processed so far, total frame hint if known).
pub type ProgressFn = Box<dyn FnMut(u64, Option<u64>)>;

// -----------------------------------------------------------------------------------------------
// DATA STRUCTURES
// -----------------------------------------------------------------------------------------------

/// Tunables for one conversion.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct SessionParams {
    /// Pixel-shift ceiling for the closest content. The sole stereo-strength control.
    pub max_disparity: f32,
    /// Composite packing layout.
    pub layout: SbsLayout,
    /// Output frame rate declared to the encoder.
    pub fps: f64,
    /// Stop after this many frames. `None` runs to end of stream.
    pub max_frames: Option<u64>,
    /// Gaussian sigma for smoothing the normalised depth field; 0 disables.
    pub depth_blur_sigma: f32,
}

/// What one finished conversion reports back.
#[derive(Clone, Debug, Serialize)]
pub struct ConversionSummary {
    pub frames_processed: u64,
    pub output_path: PathBuf,
    /// Composite geometry as "WxH", e.g. "3840x1080".
    pub dimensions: String,
}

/// One video conversion, bound to a single encoder sink.
pub struct StreamSession {
    input_path: PathBuf,
    output_path: PathBuf,
    params: SessionParams,
}

// -----------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// -----------------------------------------------------------------------------------------------

impl Default for SessionParams {
    fn default() -> Self {
        SessionParams {
            max_disparity: 30.0,
            layout: SbsLayout::FullWidth,
            fps: 24.0,
            max_frames: None,
            depth_blur_sigma: 0.0,
        }
    }
}

impl StreamSession {
    pub fn new(input_path: &Path, output_path: &Path, params: SessionParams) -> Self {
        StreamSession {
            input_path: input_path.to_path_buf(),
            output_path: output_path.to_path_buf(),
            params,
        }
    }

    /// Runs the conversion to completion.
    ///
    /// The sink is constructed lazily by `make_sink` once the first frame has fixed the
    /// composite geometry, so a stream that yields nothing never starts an encoder. Whatever
    /// happens mid-stream, a constructed sink gets exactly one `finish` call before this
    /// function returns.
    pub fn run<F>(
        &self,
        source: &mut dyn FrameSource,
        estimator: &mut dyn DepthEstimator,
        make_sink: F,
        mut progress: Option<ProgressFn>,
    ) -> Result<ConversionSummary>
    where
        F: FnOnce(&RawFrameContract) -> Result<Box<dyn FrameSink>>,
    {
        let mut sink: Option<Box<dyn FrameSink>> = None;
        let mut make_sink = Some(make_sink);
        let mut frames_processed: u64 = 0;
        let mut dimensions = String::new();

        let total_hint = source.total_frames().map(|t| match self.params.max_frames {
            Some(cap) => t.min(cap),
            None => t,
        });

        #[cfg(feature = "statistics")]
        let mut depth_range_history: Vec<(f32, f32)> = Vec::new();

        let pump = (|| -> Result<()> {
            loop {
                if let Some(cap) = self.params.max_frames {
                    if frames_processed >= cap {
                        break;
                    }
                }

                let frame = match source.read_frame()? {
                    Some(frame) => frame,
                    None => break,
                };
                let (width, height) = frame.dimensions();

                // The first decoded frame fixes the raw-stream contract for the whole
                // session; the encoder is started here and nowhere else.
                if sink.is_none() {
                    let (cw, ch) = self.params.layout.composite_dimensions(width, height);
                    let contract = RawFrameContract {
                        width: cw,
                        height: ch,
                        fps: self.params.fps,
                    };
                    dimensions = contract.dimensions_string();
                    if let Some(make) = make_sink.take() {
                        sink = Some(make(&contract)?);
                    }
                }

                let depth = estimator.infer(&frame)?;

                #[cfg(feature = "statistics")]
                depth_range_history.push(depth.min_max());

                let mut norm = depth.normalised();
                if self.params.depth_blur_sigma > 0.0 {
                    norm = norm.blurred(self.params.depth_blur_sigma);
                }
                if norm.dimensions() != (width, height) {
                    norm = norm.resized(width, height);
                }

                let disp = DisparityMap::from_depth(&norm, self.params.max_disparity);
                let (left, right) = reproject(&frame, &disp)?;
                let sbs = composite(&left, &right, self.params.layout)?;

                if let Some(sink) = sink.as_mut() {
                    sink.write_frame(sbs.as_raw())?;
                }
                frames_processed += 1;

                if let Some(cb) = progress.as_mut() {
                    cb(frames_processed, total_hint);
                }
            }
            Ok(())
        })();

        // Shutdown runs on every path out of the loop, success and failure alike.
        let close = match sink.as_mut() {
            Some(sink) => sink.finish(),
            None => Ok(()),
        };

        match (pump, close) {
            (Ok(()), Ok(())) => {
                if frames_processed == 0 {
                    return Err(Error::InputUnreadable {
                        path: self.input_path.clone(),
                        reason: "stream yielded no frames".to_string(),
                    });
                }

                #[cfg(feature = "statistics")]
                self.plot_depth_range(&depth_range_history);

                Ok(ConversionSummary {
                    frames_processed,
                    output_path: self.output_path.clone(),
                    dimensions,
                })
            }
            // When the write and the exit status both report encoder trouble, the exit-side
            // error carries the captured stderr and is the one worth surfacing.
            (Err(Error::EncoderFailure { .. }), Err(close_err @ Error::EncoderFailure { .. })) => {
                Err(close_err)
            }
            (Err(pump_err), _) => Err(pump_err),
            (Ok(()), Err(close_err)) => Err(close_err),
        }
    }

    #[cfg(feature = "statistics")]
    fn plot_depth_range(&self, history: &[(f32, f32)]) {
        if history.is_empty() {
            return;
        }

        let y_min = history.iter().map(|&(mn, _)| mn).fold(f32::INFINITY, f32::min);
        let y_max = history
            .iter()
            .map(|&(_, mx)| mx)
            .fold(f32::NEG_INFINITY, f32::max);

        let root = BitMapBackend::new("plots/depth_range.png", (800, 600)).into_drawing_area();
        root.fill(&WHITE).unwrap();

        let mut chart = ChartBuilder::on(&root)
            .caption("Raw depth range per frame", ("sans-serif", 20).into_font())
            .margin(5)
            .x_label_area_size(30)
            .y_label_area_size(30)
            .build_ranged(0..history.len(), y_min..y_max)
            .unwrap();

        chart.configure_mesh().draw().unwrap();

        chart
            .draw_series(LineSeries::new(
                history.iter().enumerate().map(|(i, &(mn, _))| (i, mn)),
                &RED,
            ))
            .unwrap()
            .label("Min depth")
            .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], &RED));
        chart
            .draw_series(LineSeries::new(
                history.iter().enumerate().map(|(i, &(_, mx))| (i, mx)),
                &BLUE,
            ))
            .unwrap()
            .label("Max depth")
            .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], &BLUE));

        chart
            .configure_series_labels()
            .background_style(&WHITE.mix(0.8))
            .border_style(&BLACK)
            .draw()
            .unwrap();
    }
}

// -----------------------------------------------------------------------------------------------
// FUNCTIONS
// -----------------------------------------------------------------------------------------------

/// Converts one video file to a side-by-side stereo file in a single streaming pass.
///
/// Opens the input with the ffmpeg decoder, runs a [`StreamSession`] against an
/// [`FfmpegEncoderSink`], and returns the conversion summary.
pub fn convert_video(
    input_path: &Path,
    output_path: &Path,
    estimator: &mut dyn DepthEstimator,
    params: &SessionParams,
    progress: Option<ProgressFn>,
) -> Result<ConversionSummary> {
    let mut source = VideoSource::open(input_path)?;
    let session = StreamSession::new(input_path, output_path, params.clone());

    let output = output_path.to_path_buf();
    session.run(
        &mut source,
        estimator,
        move |contract| -> Result<Box<dyn FrameSink>> {
            Ok(Box::new(FfmpegEncoderSink::spawn(&output, contract)?))
        },
        progress,
    )
}
