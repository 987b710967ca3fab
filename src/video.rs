//! # Video frame acquisition
//!
//! This module provides the input side of the pipeline: an ffprobe-based metadata probe and a
//! frame source that decodes any container ffmpeg understands into a stream of rgb24 frames
//! over a pipe. One frame is held in memory at a time; nothing touches disk.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use std::collections::HashMap;
use std::io::Read;
use std::path::Path;
use std::process::{Child, ChildStdout, Command, Stdio};

use image::RgbImage;
use log::{debug, warn};

use crate::error::*;

// -----------------------------------------------------------------------------------------------
// DATA STRUCTURES
// -----------------------------------------------------------------------------------------------

/// Geometry and timing of a video stream, as reported by ffprobe.
#[derive(Clone, Debug)]
pub struct VideoMetadata {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    /// Container frame count where declared, otherwise estimated from duration and rate.
    pub total_frames: u64,
    pub duration: f64,
}

/// Streaming rgb24 frame decoder backed by an ffmpeg subprocess.
pub struct VideoSource {
    child: Option<Child>,
    stdout: Option<ChildStdout>,
    metadata: VideoMetadata,
    buf: Vec<u8>,
}

// -----------------------------------------------------------------------------------------------
// TRAITS
// -----------------------------------------------------------------------------------------------

pub trait FrameSource {
    /// Next frame in stream order, or `None` at end of stream.
    fn read_frame(&mut self) -> Result<Option<RgbImage>>;

    /// Total frame count if known up front. A progress hint only; the stream may end earlier.
    fn total_frames(&self) -> Option<u64> {
        None
    }
}

// -----------------------------------------------------------------------------------------------
// FUNCTIONS
// -----------------------------------------------------------------------------------------------

/// Probes a video file with ffprobe.
pub fn probe_metadata(path: &Path) -> Result<VideoMetadata> {
    let output = Command::new("ffprobe")
        .args(&[
            "-v",
            "error",
            "-select_streams",
            "v:0",
            "-show_entries",
            "stream=width,height,r_frame_rate,nb_frames,duration",
            "-show_entries",
            "format=duration",
            "-of",
            "default=noprint_wrappers=1",
        ])
        .arg(path)
        .output()
        .map_err(|e| unreadable(path, format!("could not run ffprobe: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(unreadable(
            path,
            format!("ffprobe failed: {}", stderr.trim()),
        ));
    }

    let text = String::from_utf8_lossy(&output.stdout);
    parse_probe_output(&text).ok_or_else(|| unreadable(path, "no video stream found".to_string()))
}

fn unreadable(path: &Path, reason: String) -> Error {
    Error::InputUnreadable {
        path: path.to_path_buf(),
        reason,
    }
}

/// Parses ffprobe's key=value output into metadata. Returns `None` when the geometry keys are
/// missing, which is what ffprobe prints for a file with no video stream.
fn parse_probe_output(text: &str) -> Option<VideoMetadata> {
    let mut fields: HashMap<&str, &str> = HashMap::new();
    for line in text.lines() {
        if let Some(idx) = line.find('=') {
            let (key, value) = (&line[..idx], &line[idx + 1..]);
            // The stream section prints before the format section; keep the first usable
            // value for each key so stream-level duration wins when present.
            let slot = fields.entry(key).or_insert(value);
            if *slot == "N/A" {
                *slot = value;
            }
        }
    }

    let width: u32 = fields.get("width")?.parse().ok()?;
    let height: u32 = fields.get("height")?.parse().ok()?;

    let fps = fields
        .get("r_frame_rate")
        .map(|s| parse_rational(s))
        .unwrap_or(30.0);

    let duration = fields
        .get("duration")
        .and_then(|s| s.parse::<f64>().ok())
        .unwrap_or(0.0);

    let total_frames = fields
        .get("nb_frames")
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or_else(|| (duration * fps).round() as u64);

    Some(VideoMetadata {
        width,
        height,
        fps,
        total_frames,
        duration,
    })
}

/// Parses an ffprobe rational such as "30000/1001" (or a plain number) into frames per second.
fn parse_rational(s: &str) -> f64 {
    if let Some((num, den)) = s.split_once('/') {
        let n: f64 = num.parse().unwrap_or(30.0);
        let d: f64 = den.parse().unwrap_or(1.0);
        if d != 0.0 {
            n / d
        } else {
            30.0
        }
    } else {
        s.parse().unwrap_or(30.0)
    }
}

// -----------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// -----------------------------------------------------------------------------------------------

impl VideoSource {
    /// Probes the file and starts an ffmpeg decoder streaming rgb24 frames over a pipe.
    pub fn open(path: &Path) -> Result<Self> {
        let metadata = probe_metadata(path)?;
        Self::open_with_metadata(path, metadata)
    }

    /// As [`VideoSource::open`] but reusing an already-probed metadata record.
    pub fn open_with_metadata(path: &Path, metadata: VideoMetadata) -> Result<Self> {
        let mut child = Command::new("ffmpeg")
            .arg("-hide_banner")
            .arg("-loglevel")
            .arg("error")
            .arg("-i")
            .arg(path)
            .arg("-f")
            .arg("rawvideo")
            .arg("-pix_fmt")
            .arg("rgb24")
            .arg("-vsync")
            .arg("0")
            .arg("-")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| unreadable(path, format!("could not run ffmpeg: {}", e)))?;

        let stdout = child.stdout.take();
        let frame_bytes = metadata.width as usize * metadata.height as usize * 3;

        debug!(
            "decoding {:?}: {}x{} @ {} fps, ~{} frames",
            path, metadata.width, metadata.height, metadata.fps, metadata.total_frames
        );

        Ok(VideoSource {
            child: Some(child),
            stdout,
            metadata,
            buf: vec![0u8; frame_bytes],
        })
    }

    pub fn metadata(&self) -> &VideoMetadata {
        &self.metadata
    }

    fn reap(&mut self) {
        self.stdout = None;
        if let Some(mut child) = self.child.take() {
            match child.wait() {
                Ok(status) if !status.success() => {
                    warn!("decoder exited with {:?}", status.code());
                }
                Err(e) => warn!("could not await decoder exit: {}", e),
                _ => {}
            }
        }
    }
}

impl FrameSource for VideoSource {
    fn read_frame(&mut self) -> Result<Option<RgbImage>> {
        let stdout = match self.stdout.as_mut() {
            Some(stdout) => stdout,
            None => return Ok(None),
        };

        match stdout.read_exact(&mut self.buf) {
            Ok(()) => {
                let frame = RgbImage::from_raw(
                    self.metadata.width,
                    self.metadata.height,
                    self.buf.clone(),
                )
                .ok_or_else(|| Error::ShapeMismatch {
                    what: "decoded frame",
                    expected: format!("{}x{}", self.metadata.width, self.metadata.height),
                    actual: format!("{} bytes", self.buf.len()),
                })?;
                Ok(Some(frame))
            }
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                self.reap();
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn total_frames(&self) -> Option<u64> {
        Some(self.metadata.total_frames)
    }
}

impl Drop for VideoSource {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
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
    fn rational_rates_parse() {
        assert_relative_eq!(parse_rational("30000/1001"), 29.97, epsilon = 0.01);
        assert_relative_eq!(parse_rational("24/1"), 24.0);
        assert_relative_eq!(parse_rational("25"), 25.0);
        assert_relative_eq!(parse_rational("garbage"), 30.0);
    }

    #[test]
    fn probe_output_parses_declared_frame_count() {
        let text = "width=1920\nheight=1080\nr_frame_rate=24/1\nnb_frames=240\nduration=10.0\nduration=10.0\n";
        let meta = parse_probe_output(text).unwrap();
        assert_eq!((meta.width, meta.height), (1920, 1080));
        assert_relative_eq!(meta.fps, 24.0);
        assert_eq!(meta.total_frames, 240);
    }

    #[test]
    fn probe_output_estimates_missing_frame_count() {
        let text = "width=640\nheight=480\nr_frame_rate=30000/1001\nnb_frames=N/A\nduration=N/A\nduration=2.0\n";
        let meta = parse_probe_output(text).unwrap();
        assert_eq!(meta.total_frames, 60);
        assert_relative_eq!(meta.duration, 2.0);
    }

    #[test]
    fn probe_output_without_video_stream_is_rejected() {
        assert!(parse_probe_output("duration=3.0\n").is_none());
    }
}
