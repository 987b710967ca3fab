//! # Error standards
//!
//! This module provides a standardised error enum and result type for this crate.
//!
//! A degenerate (flat) depth field is deliberately not represented here: it is recovered locally
//! by the normaliser with a zero-disparity fallback and never surfaces to the caller. Every
//! variant below is terminal for the session it occurs in. A session that fails mid-stream still
//! runs its full shutdown sequence (encoder channel closed, process exit observed) before the
//! error propagates.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use std::path::PathBuf;

// -----------------------------------------------------------------------------------------------
// TYPES
// -----------------------------------------------------------------------------------------------

/// Standard result type used in the dibr crate.
pub type Result<T> = std::result::Result<T, Error>;

// -----------------------------------------------------------------------------------------------
// ENUMERATIONS
// -----------------------------------------------------------------------------------------------

#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The input stream could not be opened, probed, or yielded no frames at all.
    #[error("could not read input {path:?}: {reason}")]
    InputUnreadable { path: PathBuf, reason: String },

    /// Two buffers that must share dimensions do not, and the mismatch cannot be reconciled
    /// at this point in the pipeline.
    #[error("{what} dimension mismatch: expected {expected}, got {actual}")]
    ShapeMismatch {
        what: &'static str,
        expected: String,
        actual: String,
    },

    /// The external encoder process could not be started.
    #[error("could not start encoder process: {0}")]
    EncoderUnavailable(#[source] std::io::Error),

    /// The encoder process rejected a frame write or exited abnormally.
    #[error("encoder process failed (status {status:?}): {diagnostic}")]
    EncoderFailure {
        status: Option<i32>,
        diagnostic: String,
    },

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
