//! Conversion configuration.
//!
//! [`ConversionOptions`] is a builder that threads the progress stride,
//! cancellation token, external encoder settings, and scratch location
//! through a conversion without widening every function signature.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//!
//! use quiltweave::{CancellationToken, ConversionOptions};
//!
//! let token = CancellationToken::new();
//! let options = ConversionOptions::new()
//!     .with_progress_stride(5)
//!     .with_cancellation(token.clone())
//!     .with_encoder_timeout(Duration::from_secs(600));
//! ```

use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::path::PathBuf;
use std::time::Duration;

use crate::progress::CancellationToken;

/// Default number of frames between progress events.
pub const DEFAULT_PROGRESS_STRIDE: u64 = 10;

/// Default time budget for the external encoder.
pub const DEFAULT_ENCODER_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Default external encoder program, resolved through `PATH`.
pub const DEFAULT_ENCODER_PROGRAM: &str = "ffmpeg";

/// Operational settings for a conversion.
///
/// A default-constructed value reports every 10th frame, is never
/// cancelled, runs `ffmpeg` from `PATH` with a one-hour budget, and places
/// scratch directories under the system temp directory.
#[derive(Clone)]
pub struct ConversionOptions {
    pub(crate) progress_stride: u64,
    pub(crate) cancellation: Option<CancellationToken>,
    pub(crate) encoder_program: PathBuf,
    pub(crate) encoder_timeout: Duration,
    pub(crate) scratch_root: Option<PathBuf>,
    pub(crate) threads: Option<usize>,
}

impl Debug for ConversionOptions {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("ConversionOptions")
            .field("progress_stride", &self.progress_stride)
            .field("has_cancellation", &self.cancellation.is_some())
            .field("encoder_program", &self.encoder_program)
            .field("encoder_timeout", &self.encoder_timeout)
            .field("scratch_root", &self.scratch_root)
            .field("threads", &self.threads)
            .finish()
    }
}

impl Default for ConversionOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversionOptions {
    /// Create options with default settings.
    pub fn new() -> Self {
        Self {
            progress_stride: DEFAULT_PROGRESS_STRIDE,
            cancellation: None,
            encoder_program: PathBuf::from(DEFAULT_ENCODER_PROGRAM),
            encoder_timeout: DEFAULT_ENCODER_TIMEOUT,
            scratch_root: None,
            threads: None,
        }
    }

    /// Emit a progress event every `stride` frames (plus the first and
    /// last). Clamped to a minimum of 1.
    #[must_use]
    pub fn with_progress_stride(mut self, stride: u64) -> Self {
        self.progress_stride = stride.max(1);
        self
    }

    /// Attach a cancellation token.
    ///
    /// When the token is cancelled the job stops at the next frame boundary
    /// and finishes with [`JobStatus::Cancelled`](crate::JobStatus::Cancelled).
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Use a different external encoder executable.
    #[must_use]
    pub fn with_encoder_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.encoder_program = program.into();
        self
    }

    /// Set the hard time limit for the external encoder.
    #[must_use]
    pub fn with_encoder_timeout(mut self, timeout: Duration) -> Self {
        self.encoder_timeout = timeout;
        self
    }

    /// Create scratch directories under `root` instead of the system temp
    /// directory.
    #[must_use]
    pub fn with_scratch_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.scratch_root = Some(root.into());
        self
    }

    /// Cap the number of worker threads used for the pixel transform.
    ///
    /// `0` or `None` means one per available core.
    #[must_use]
    pub fn with_threads(mut self, threads: Option<usize>) -> Self {
        self.threads = threads.filter(|&count| count > 0);
        self
    }

    /// Frames between progress events.
    pub fn progress_stride(&self) -> u64 {
        self.progress_stride
    }

    /// Time budget for the external encoder.
    pub fn encoder_timeout(&self) -> Duration {
        self.encoder_timeout
    }

    /// Returns `true` if cancellation has been requested.
    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancellation
            .as_ref()
            .is_some_and(|token| token.is_cancelled())
    }
}
