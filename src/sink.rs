//! # Streaming encoder sink
//!
//! This module provides the channel between the pipeline and the external encoder process.
//! Composite frames are serialised as raw rgb24 bytes and written synchronously, in strict
//! frame order, to the encoder's stdin; the only buffering is the current frame, so memory use
//! stays flat however long the video is. If the encoder stops draining, the write blocks and
//! the whole pipeline blocks with it.
//!
//! The sink is a trait so tests can swap the subprocess for an in-memory recorder
//! ([`crate::testing::MemorySink`]).

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::thread::{self, JoinHandle};

use log::debug;

use crate::error::*;

// -----------------------------------------------------------------------------------------------
// DATA STRUCTURES
// -----------------------------------------------------------------------------------------------

/// The raw-stream contract declared to the encoder once, up front.
///
/// The encoder consumes an unframed byte stream, so this must match every frame exactly:
/// rgb24 pixels, row-major, `width * height * 3` bytes per frame, at `fps` frames per second.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RawFrameContract {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
}

/// Long-lived ffmpeg encoder process consuming the raw frame stream on stdin.
pub struct FfmpegEncoderSink {
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    stderr_thread: Option<JoinHandle<String>>,
    contract: RawFrameContract,
    output_path: PathBuf,
}

// -----------------------------------------------------------------------------------------------
// TRAITS
// -----------------------------------------------------------------------------------------------

pub trait FrameSink {
    /// Write one serialised composite frame. Blocks until the sink has accepted all bytes;
    /// never reorders or drops frames. A failed write is terminal for the session.
    fn write_frame(&mut self, frame: &[u8]) -> Result<()>;

    /// Close the channel and observe the consumer's exit. Must be called exactly once per
    /// session, on success and failure paths alike; later calls are no-ops.
    fn finish(&mut self) -> Result<()>;
}

// -----------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// -----------------------------------------------------------------------------------------------

impl RawFrameContract {
    /// Serialised size of one frame in bytes.
    pub fn frame_bytes(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }

    /// Geometry as the conventional "WxH" string, e.g. "3840x1080".
    pub fn dimensions_string(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }
}

impl FfmpegEncoderSink {
    /// Spawns the encoder process with the given contract, encoding to `output_path`.
    pub fn spawn(output_path: &Path, contract: &RawFrameContract) -> Result<Self> {
        if let Some(parent) = output_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut cmd = Command::new("ffmpeg");
        cmd.arg("-hide_banner")
            .arg("-loglevel")
            .arg("error")
            .arg("-y")
            .arg("-f")
            .arg("rawvideo")
            .arg("-pix_fmt")
            .arg("rgb24")
            .arg("-s")
            .arg(contract.dimensions_string())
            .arg("-r")
            .arg(contract.fps.to_string())
            .arg("-i")
            .arg("-")
            .arg("-c:v")
            .arg("libx264")
            .arg("-preset")
            .arg("medium")
            .arg("-crf")
            .arg("23")
            .arg("-pix_fmt")
            .arg("yuv420p")
            .arg(output_path);

        cmd.stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        debug!(
            "starting encoder: {} @ {} fps -> {:?}",
            contract.dimensions_string(),
            contract.fps,
            output_path
        );

        let mut child = cmd.spawn().map_err(Error::EncoderUnavailable)?;

        let stdin = child.stdin.take();
        let stderr = child.stderr.take();

        // Drain stderr on its own thread so a chatty encoder can never fill the pipe and
        // deadlock against our frame writes. The captured text becomes the failure
        // diagnostic.
        let stderr_thread = stderr.map(|mut pipe| {
            thread::spawn(move || {
                let mut text = String::new();
                let _ = pipe.read_to_string(&mut text);
                text
            })
        });

        Ok(FfmpegEncoderSink {
            child: Some(child),
            stdin,
            stderr_thread,
            contract: *contract,
            output_path: output_path.to_path_buf(),
        })
    }

    pub fn contract(&self) -> &RawFrameContract {
        &self.contract
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }
}

impl FrameSink for FfmpegEncoderSink {
    fn write_frame(&mut self, frame: &[u8]) -> Result<()> {
        if frame.len() != self.contract.frame_bytes() {
            return Err(Error::ShapeMismatch {
                what: "raw frame",
                expected: format!("{} bytes", self.contract.frame_bytes()),
                actual: format!("{} bytes", frame.len()),
            });
        }

        let stdin = self.stdin.as_mut().ok_or_else(|| Error::EncoderFailure {
            status: None,
            diagnostic: "encoder channel already closed".to_string(),
        })?;

        stdin.write_all(frame).map_err(|e| Error::EncoderFailure {
            status: None,
            diagnostic: format!("frame write failed: {}", e),
        })
    }

    fn finish(&mut self) -> Result<()> {
        let mut child = match self.child.take() {
            Some(child) => child,
            None => return Ok(()),
        };

        // Closing stdin is the encoder's end-of-stream signal.
        drop(self.stdin.take());

        let diagnostic = self
            .stderr_thread
            .take()
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default();

        let status = child.wait().map_err(|e| Error::EncoderFailure {
            status: None,
            diagnostic: format!("could not await encoder exit: {}", e),
        })?;

        debug!("encoder exited with {:?}", status.code());

        if status.success() {
            Ok(())
        } else {
            Err(Error::EncoderFailure {
                status: status.code(),
                diagnostic: diagnostic.trim().to_string(),
            })
        }
    }
}

impl Drop for FfmpegEncoderSink {
    fn drop(&mut self) {
        // Abandoned without finish(), e.g. a panic upstream: do not leave the process behind.
        if let Some(mut child) = self.child.take() {
            drop(self.stdin.take());
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}
