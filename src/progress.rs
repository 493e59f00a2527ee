//! Progress events and cancellation.
//!
//! A running conversion talks to its caller only through
//! [`ConversionEvent`]s delivered on an async channel (see
//! [`ConversionHandle`](crate::ConversionHandle)). Cancellation flows the
//! other way through a shared [`CancellationToken`].

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use std::time::{Duration, Instant};

use tokio::sync::mpsc::UnboundedSender;

use crate::error::JobStatus;
use crate::pipeline::PipelineState;

/// A snapshot of conversion progress.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressEvent {
    /// Completion percentage in `[0, 100]`. Never decreases within a job and
    /// is exactly 100 once the output has been written.
    pub percentage: f32,
    /// Human-readable status line.
    pub message: String,
    /// Frames transformed so far.
    pub frames_done: u64,
    /// Total frames expected, if the source reported a count.
    pub total_frames: Option<u64>,
    /// Wall-clock time since streaming started.
    pub elapsed: Duration,
}

/// Final outcome of a conversion job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionResult {
    /// `true` if the output file was written.
    pub success: bool,
    /// Human-readable failure detail; `None` on success.
    pub error_detail: Option<String>,
    /// Distinct outcome code.
    pub status: JobStatus,
}

impl ConversionResult {
    pub(crate) fn succeeded() -> Self {
        Self {
            success: true,
            error_detail: None,
            status: JobStatus::Success,
        }
    }

    pub(crate) fn failed(status: JobStatus, detail: String) -> Self {
        Self {
            success: false,
            error_detail: Some(detail),
            status,
        }
    }
}

/// Everything a running job reports to its caller.
#[derive(Debug, Clone, PartialEq)]
pub enum ConversionEvent {
    /// The pipeline entered a new state.
    StateChanged(PipelineState),
    /// Periodic progress.
    Progress(ProgressEvent),
    /// A recovered, non-fatal condition (defaulted geometry, backend downgrade).
    Warning(String),
    /// The job ended. Always the last event.
    Finished(ConversionResult),
}

/// Cooperative cancellation token backed by an [`AtomicBool`].
///
/// Clones share state. The pipeline checks the token between frames and
/// while waiting on the external encoder; a frame already being transformed
/// is always finished first.
///
/// # Example
///
/// ```
/// use quiltweave::CancellationToken;
///
/// let token = CancellationToken::new();
/// let observer = token.clone();
/// token.cancel();
/// assert!(observer.is_cancelled());
/// ```
#[derive(Debug, Clone)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a new, non-cancelled token.
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Request cancellation. All clones observe it.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Check whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Sending half of the event channel. Sends after the caller has dropped
/// the receiver are discarded.
#[derive(Debug, Clone)]
pub(crate) struct EventEmitter {
    sender: UnboundedSender<ConversionEvent>,
}

impl EventEmitter {
    pub(crate) fn new(sender: UnboundedSender<ConversionEvent>) -> Self {
        Self { sender }
    }

    pub(crate) fn emit(&self, event: ConversionEvent) {
        let _ = self.sender.send(event);
    }

    pub(crate) fn state(&self, state: PipelineState) {
        log::debug!("Pipeline state: {state:?}");
        self.emit(ConversionEvent::StateChanged(state));
    }

    pub(crate) fn warning(&self, message: String) {
        log::warn!("{message}");
        self.emit(ConversionEvent::Warning(message));
    }
}

/// Decides when a frame deserves a progress event and computes it.
///
/// Reports after the first frame, every `stride` frames after that, and on
/// the last frame.
pub(crate) struct ProgressTracker {
    total: Option<u64>,
    current: u64,
    stride: u64,
    start_time: Instant,
    last_percentage: f32,
    last_reported: u64,
}

impl ProgressTracker {
    pub(crate) fn new(total: Option<u64>, stride: u64) -> Self {
        Self {
            total: total.filter(|&total| total > 0),
            current: 0,
            stride: stride.max(1),
            start_time: Instant::now(),
            last_percentage: 0.0,
            last_reported: 0,
        }
    }

    /// Record one transformed frame.
    pub(crate) fn advance(&mut self) -> Option<ProgressEvent> {
        self.current += 1;
        let is_last = self.total == Some(self.current);
        if self.current == 1 || self.current % self.stride == 0 || is_last {
            Some(self.report())
        } else {
            None
        }
    }

    /// Report the final frame if the stride skipped it.
    pub(crate) fn end_of_stream(&mut self) -> Option<ProgressEvent> {
        (self.current > 0 && self.last_reported != self.current).then(|| self.report())
    }

    /// The closing 100% event.
    pub(crate) fn complete(&mut self) -> ProgressEvent {
        self.last_percentage = 100.0;
        ProgressEvent {
            percentage: 100.0,
            message: format!("Conversion complete ({} frames)", self.current),
            frames_done: self.current,
            total_frames: self.total,
            elapsed: self.start_time.elapsed(),
        }
    }

    pub(crate) fn frames_done(&self) -> u64 {
        self.current
    }

    fn report(&mut self) -> ProgressEvent {
        self.last_reported = self.current;
        if let Some(total) = self.total {
            let percentage = (self.current as f32 / total as f32 * 100.0).min(100.0);
            self.last_percentage = self.last_percentage.max(percentage);
        }
        let message = match self.total {
            Some(total) => format!("Processing frame {}/{}", self.current, total),
            None => format!("Processing frame {}", self.current),
        };
        ProgressEvent {
            percentage: self.last_percentage,
            message,
            frames_done: self.current,
            total_frames: self.total,
            elapsed: self.start_time.elapsed(),
        }
    }
}
