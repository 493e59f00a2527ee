//! Error types for the `quiltweave` crate.
//!
//! This module defines [`QuiltError`], the unified error type returned by all
//! fallible operations, and [`JobStatus`], the distinct result code a
//! finished conversion reports to its caller.

use std::{io::Error as IoError, path::PathBuf};

use ffmpeg_next::Error as FfmpegError;
use image::ImageError;
use thiserror::Error;

/// The unified error type for all `quiltweave` operations.
///
/// Variants carry enough context (paths, captured encoder output) to
/// diagnose the problem without additional logging at the call site.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum QuiltError {
    /// The source video or calibration record is missing or unreadable.
    #[error("Input error for {path}: {reason}")]
    Input {
        /// Offending path.
        path: PathBuf,
        /// Underlying reason.
        reason: String,
    },

    /// The calibration record is malformed or a required field is unusable.
    #[error("Calibration error: {0}")]
    Calibration(String),

    /// The source video exists but could not be opened as a video.
    #[error("Failed to open source video at {path}: {reason}")]
    SourceOpen {
        /// Path passed to the frame source.
        path: PathBuf,
        /// Underlying reason the open failed.
        reason: String,
    },

    /// The direct muxer could not be opened for this job.
    ///
    /// The pipeline recovers from this by switching to the staged backend.
    #[error("Direct muxer unavailable: {0}")]
    MuxerOpenFailure(String),

    /// The encoder (external process or in-process muxer) failed or timed out.
    #[error("Encode error: {detail}")]
    Encode {
        /// Human-readable detail, including captured encoder diagnostics.
        detail: String,
    },

    /// The job was cancelled through a [`CancellationToken`](crate::CancellationToken).
    #[error("Conversion cancelled")]
    Cancelled,

    /// The scratch directory could not be created or removed.
    #[error("Scratch directory error at {path}: {reason}")]
    InternalIo {
        /// Scratch directory path (or its intended parent).
        path: PathBuf,
        /// Underlying reason.
        reason: String,
    },

    /// A second job was started while one is still running.
    #[error("A conversion is already in progress")]
    JobInProgress,

    /// A video frame could not be decoded.
    #[error("Failed to decode video frame: {0}")]
    VideoDecode(String),

    /// A frame handed to the mapper or a backend has the wrong dimensions.
    #[error("Frame is {actual_width}x{actual_height}, expected {expected_width}x{expected_height}")]
    FrameSize {
        /// Width the consumer was configured for.
        expected_width: u32,
        /// Height the consumer was configured for.
        expected_height: u32,
        /// Width of the frame actually received.
        actual_width: u32,
        /// Height of the frame actually received.
        actual_height: u32,
    },

    /// An error originating from the FFmpeg libraries.
    #[error("FFmpeg error: {0}")]
    Ffmpeg(String),

    /// An I/O error occurred while reading or writing files.
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    /// An error from the `image` crate while writing a still frame.
    #[error("Image processing error: {0}")]
    Image(#[from] ImageError),
}

impl From<FfmpegError> for QuiltError {
    fn from(error: FfmpegError) -> Self {
        QuiltError::Ffmpeg(error.to_string())
    }
}

impl QuiltError {
    pub(crate) fn encode(detail: impl Into<String>) -> Self {
        QuiltError::Encode {
            detail: detail.into(),
        }
    }

    /// The result code a job failing with this error reports.
    pub fn status(&self) -> JobStatus {
        match self {
            QuiltError::Input { .. } | QuiltError::SourceOpen { .. } | QuiltError::VideoDecode(_) => {
                JobStatus::InputError
            }
            QuiltError::Calibration(_) => JobStatus::CalibrationError,
            QuiltError::Encode { .. } | QuiltError::MuxerOpenFailure(_) => JobStatus::EncodeError,
            QuiltError::Cancelled => JobStatus::Cancelled,
            _ => JobStatus::InternalError,
        }
    }
}

/// Distinct outcome codes for a finished job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobStatus {
    /// The output file was written successfully.
    Success,
    /// The source video or calibration path was missing or unreadable.
    InputError,
    /// The calibration record could not be used.
    CalibrationError,
    /// Encoding failed or timed out.
    EncodeError,
    /// The job was cancelled.
    Cancelled,
    /// Anything else (scratch-directory I/O, unexpected FFmpeg failures).
    InternalError,
}

impl JobStatus {
    /// Process exit code for headless callers.
    pub fn exit_code(self) -> i32 {
        match self {
            JobStatus::Success => 0,
            JobStatus::InternalError => 1,
            JobStatus::InputError => 2,
            JobStatus::CalibrationError => 3,
            JobStatus::EncodeError => 4,
            JobStatus::Cancelled => 5,
        }
    }
}
