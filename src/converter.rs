//! Background job runner and its async handle.
//!
//! [`Converter::start`] moves a job onto a dedicated worker thread and
//! returns a [`ConversionHandle`]. The handle receives [`ConversionEvent`]s
//! over a tokio channel and implements [`tokio_stream::Stream`], so it can be
//! driven with [`StreamExt`](tokio_stream::StreamExt) combinators. Blocking
//! callers can use [`ConversionHandle::blocking_next_event`] and
//! [`ConversionHandle::blocking_wait`] instead.
//!
//! # Example
//!
//! ```no_run
//! use tokio_stream::StreamExt;
//!
//! use quiltweave::{CodecProfile, ConversionEvent, ConversionJob, ConversionOptions, Converter};
//!
//! # async fn example() -> Result<(), quiltweave::QuiltError> {
//! let converter = Converter::new();
//! let job = ConversionJob::with_suggested_output(
//!     "clip_qs5x9a1.87.mp4",
//!     "visual.json",
//!     CodecProfile::H264_420,
//! );
//! let mut handle = converter.start(job, ConversionOptions::new())?;
//!
//! while let Some(event) = handle.next().await {
//!     if let ConversionEvent::Progress(progress) = event {
//!         println!("{:.0}% {}", progress.percentage, progress.message);
//!     }
//! }
//! let result = handle.wait().await;
//! assert!(result.success);
//! # Ok(())
//! # }
//! ```

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};
use std::thread;

use tokio::sync::mpsc::{UnboundedReceiver, unbounded_channel};
use tokio::sync::oneshot;
use tokio_stream::Stream;

use crate::configuration::ConversionOptions;
use crate::error::{JobStatus, QuiltError};
use crate::job::ConversionJob;
use crate::pipeline::{self, FfmpegBackends, MediaBackends, PipelineState};
use crate::progress::{CancellationToken, ConversionEvent, ConversionResult, EventEmitter};

/// Runs at most one conversion at a time.
pub struct Converter {
    backends: Arc<dyn MediaBackends>,
    busy: Arc<AtomicBool>,
}

impl Default for Converter {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Converter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Converter")
            .field("busy", &self.is_busy())
            .finish_non_exhaustive()
    }
}

impl Converter {
    /// A converter backed by FFmpeg.
    pub fn new() -> Self {
        Self::with_backends(FfmpegBackends)
    }

    /// A converter using custom media backends.
    pub fn with_backends(backends: impl MediaBackends + 'static) -> Self {
        Self {
            backends: Arc::new(backends),
            busy: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Whether a job is currently running.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Start `job` on a worker thread.
    ///
    /// If `options` carries no cancellation token one is created, so the
    /// returned handle can always cancel.
    ///
    /// # Errors
    ///
    /// Returns [`QuiltError::JobInProgress`] if another job started by this
    /// converter has not finished. The request is not queued.
    pub fn start(
        &self,
        job: ConversionJob,
        options: ConversionOptions,
    ) -> Result<ConversionHandle, QuiltError> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(QuiltError::JobInProgress);
        }

        let token = options.cancellation.clone().unwrap_or_default();
        let options = options.with_cancellation(token.clone());
        let (event_sender, events) = unbounded_channel();
        let (result_sender, result) = oneshot::channel();
        let backends = Arc::clone(&self.backends);
        let busy = Arc::clone(&self.busy);

        log::info!("Starting conversion of {}", job.input_path.display());
        let spawned = thread::Builder::new()
            .name("quiltweave-job".to_string())
            .spawn(move || {
                let busy = BusyGuard(busy);
                let emitter = EventEmitter::new(event_sender);
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                    pipeline::run(&job, &options, backends.as_ref(), &emitter)
                }))
                .unwrap_or_else(|payload| {
                    let detail = format!(
                        "conversion worker panicked: {}",
                        panic_message(&*payload)
                    );
                    log::error!("{detail}");
                    let result = ConversionResult::failed(JobStatus::InternalError, detail);
                    emitter.state(PipelineState::Failed);
                    emitter.emit(ConversionEvent::Finished(result.clone()));
                    result
                });
                drop(busy);
                let _ = result_sender.send(outcome);
            });

        if let Err(error) = spawned {
            self.busy.store(false, Ordering::Release);
            return Err(QuiltError::Io(error));
        }

        Ok(ConversionHandle {
            events,
            result,
            token,
        })
    }
}

/// Caller's side of a running job.
///
/// Dropping the handle does not stop the job; call
/// [`cancel`](Self::cancel) first.
#[derive(Debug)]
pub struct ConversionHandle {
    events: UnboundedReceiver<ConversionEvent>,
    result: oneshot::Receiver<ConversionResult>,
    token: CancellationToken,
}

impl ConversionHandle {
    /// Next event, or `None` once the job has ended and all events have
    /// been consumed.
    pub async fn next_event(&mut self) -> Option<ConversionEvent> {
        self.events.recv().await
    }

    /// Blocking variant of [`next_event`](Self::next_event).
    ///
    /// # Panics
    ///
    /// Panics if called from within an async runtime.
    pub fn blocking_next_event(&mut self) -> Option<ConversionEvent> {
        self.events.blocking_recv()
    }

    /// Request cancellation at the next frame boundary.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// The job's cancellation token.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Wait for the job to end. Unconsumed events are discarded.
    pub async fn wait(self) -> ConversionResult {
        completed(self.result.await)
    }

    /// Blocking variant of [`wait`](Self::wait).
    ///
    /// # Panics
    ///
    /// Panics if called from within an async runtime.
    pub fn blocking_wait(self) -> ConversionResult {
        completed(self.result.blocking_recv())
    }
}

impl Stream for ConversionHandle {
    type Item = ConversionEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.events.poll_recv(cx)
    }
}

/// Clears the converter's busy flag when the worker ends, even by unwinding.
struct BusyGuard(Arc<AtomicBool>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

fn completed(received: Result<ConversionResult, oneshot::error::RecvError>) -> ConversionResult {
    received.unwrap_or_else(|_| {
        ConversionResult::failed(
            JobStatus::InternalError,
            "conversion worker exited without a result".to_string(),
        )
    })
}
