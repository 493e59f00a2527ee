//! The frame pipeline state machine.
//!
//! One job moves through
//! `Idle → Opening → Probing → {StreamingDirect | StreamingStaged} →
//! Finalizing → {Completed | Failed}`, and every transition is reported as a
//! [`ConversionEvent::StateChanged`]. Any state can fall through to
//! `Failed`.
//!
//! Media access goes through [`MediaBackends`] so the state machine itself
//! never touches FFmpeg directly; [`FfmpegBackends`] is the production set.

use std::path::Path;

use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::calibration::CalibrationProfile;
use crate::codec::CodecProfile;
use crate::configuration::ConversionOptions;
use crate::encode::{DirectMuxer, FrameSink};
use crate::error::QuiltError;
use crate::job::ConversionJob;
use crate::mapper::ViewMapper;
use crate::progress::{ConversionEvent, ConversionResult, EventEmitter, ProgressTracker};
use crate::source::{FrameSource, SourceProperties, VideoSource};
use crate::staged::StagedEncoder;

/// Where a job is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineState {
    /// Created, not started.
    Idle,
    /// Loading the calibration and opening the source.
    Opening,
    /// Reading source properties and choosing a backend.
    Probing,
    /// Streaming frames into the in-process muxer.
    StreamingDirect,
    /// Writing frames to the scratch image sequence.
    StreamingStaged,
    /// Flushing the muxer or running the external encoder.
    Finalizing,
    /// Output written.
    Completed,
    /// Job ended with an error or was cancelled.
    Failed,
}

impl PipelineState {
    /// Whether the job has ended.
    pub fn is_terminal(self) -> bool {
        matches!(self, PipelineState::Completed | PipelineState::Failed)
    }
}

/// Factory for the media endpoints a job reads from and writes to.
pub trait MediaBackends: Send + Sync {
    /// Open the source video.
    fn open_source(&self, path: &Path) -> Result<Box<dyn FrameSource>, QuiltError>;

    /// Try to open the in-process muxer.
    fn open_direct(
        &self,
        output: &Path,
        width: u32,
        height: u32,
        frames_per_second: f64,
        codec: CodecProfile,
    ) -> Result<Box<dyn FrameSink>, QuiltError>;

    /// Open the staged (image sequence + external encoder) backend.
    fn open_staged(
        &self,
        output: &Path,
        frames_per_second: f64,
        codec: CodecProfile,
        options: &ConversionOptions,
    ) -> Result<Box<dyn FrameSink>, QuiltError>;
}

/// FFmpeg decoding, libav muxing, and the external `ffmpeg` program.
#[derive(Debug, Clone, Copy, Default)]
pub struct FfmpegBackends;

impl MediaBackends for FfmpegBackends {
    fn open_source(&self, path: &Path) -> Result<Box<dyn FrameSource>, QuiltError> {
        Ok(Box::new(VideoSource::open(path)?))
    }

    fn open_direct(
        &self,
        output: &Path,
        width: u32,
        height: u32,
        frames_per_second: f64,
        codec: CodecProfile,
    ) -> Result<Box<dyn FrameSink>, QuiltError> {
        Ok(Box::new(DirectMuxer::open(
            output,
            width,
            height,
            frames_per_second,
            codec,
        )?))
    }

    fn open_staged(
        &self,
        output: &Path,
        frames_per_second: f64,
        codec: CodecProfile,
        options: &ConversionOptions,
    ) -> Result<Box<dyn FrameSink>, QuiltError> {
        Ok(Box::new(StagedEncoder::open(
            output,
            frames_per_second,
            codec,
            options,
        )?))
    }
}

/// Run one job to completion on the current thread.
///
/// Emits state changes, progress, and warnings through `events`, and always
/// ends with exactly one [`ConversionEvent::Finished`] carrying the returned
/// result.
pub(crate) fn run(
    job: &ConversionJob,
    options: &ConversionOptions,
    backends: &dyn MediaBackends,
    events: &EventEmitter,
) -> ConversionResult {
    let mut pipeline = Pipeline {
        job,
        options,
        backends,
        events,
        state: PipelineState::Idle,
    };

    let result = match pipeline.execute() {
        Ok(()) => {
            pipeline.transition(PipelineState::Completed);
            log::info!("Wrote {}", job.output_path.display());
            ConversionResult::succeeded()
        }
        Err(error) => {
            match &error {
                QuiltError::Cancelled => log::warn!("Conversion cancelled"),
                other => log::error!("Conversion failed: {other}"),
            }
            pipeline.transition(PipelineState::Failed);
            ConversionResult::failed(error.status(), error.to_string())
        }
    };

    events.emit(ConversionEvent::Finished(result.clone()));
    result
}

struct Pipeline<'a> {
    job: &'a ConversionJob,
    options: &'a ConversionOptions,
    backends: &'a dyn MediaBackends,
    events: &'a EventEmitter,
    state: PipelineState,
}

impl Pipeline<'_> {
    fn transition(&mut self, next: PipelineState) {
        log::debug!("{:?} -> {:?}", self.state, next);
        self.state = next;
        self.events.state(next);
    }

    fn execute(&mut self) -> Result<(), QuiltError> {
        let job = self.job;
        // Already logged by the filename parser.
        if let Some(warning) = &job.geometry_warning {
            self.events
                .emit(ConversionEvent::Warning(warning.to_string()));
        }

        self.transition(PipelineState::Opening);
        let calibration = CalibrationProfile::load(&job.calibration_path)?;
        let mut source = self.backends.open_source(&job.input_path)?;

        self.transition(PipelineState::Probing);
        let properties = source.properties().clone();
        let pool = self.thread_pool();
        let mapper = install(pool.as_ref(), || {
            ViewMapper::new(job.geometry, &calibration, properties.width, properties.height)
        })?;
        let (width, height) = mapper.output_size();
        log::info!(
            "{} views ({}x{}) -> {width}x{height} canvas, {}",
            job.geometry.view_count(),
            job.geometry.columns,
            job.geometry.rows,
            job.codec,
        );

        let mut sink = self.open_sink(&properties, width, height)?;

        let mut tracker = ProgressTracker::new(properties.frame_count, self.options.progress_stride);
        loop {
            if self.options.is_cancelled() {
                return Err(QuiltError::Cancelled);
            }
            let Some(frame) = source.next_frame()? else {
                break;
            };
            let output = install(pool.as_ref(), || mapper.render(&frame))?;
            drop(frame);
            sink.write_frame(&output)?;
            if let Some(event) = tracker.advance() {
                self.events.emit(ConversionEvent::Progress(event));
            }
        }

        if tracker.frames_done() == 0 {
            return Err(QuiltError::Input {
                path: job.input_path.clone(),
                reason: "no frames could be decoded".to_string(),
            });
        }
        if let Some(event) = tracker.end_of_stream() {
            self.events.emit(ConversionEvent::Progress(event));
        }
        if self.options.is_cancelled() {
            return Err(QuiltError::Cancelled);
        }

        self.transition(PipelineState::Finalizing);
        sink.finish()?;
        self.events.emit(ConversionEvent::Progress(tracker.complete()));
        Ok(())
    }

    /// Pick the backend: the direct muxer only for capable profiles, with a
    /// recorded downgrade to staged if it cannot be opened.
    ///
    /// Enters the matching streaming state before the staged backend creates
    /// its scratch directory.
    fn open_sink(
        &mut self,
        properties: &SourceProperties,
        width: u32,
        height: u32,
    ) -> Result<Box<dyn FrameSink>, QuiltError> {
        let job = self.job;
        let fps = properties.frames_per_second;

        if job.codec.direct_muxer_capable() {
            match self
                .backends
                .open_direct(&job.output_path, width, height, fps, job.codec)
            {
                Ok(sink) => {
                    self.transition(PipelineState::StreamingDirect);
                    return Ok(sink);
                }
                Err(error) => self.events.warning(format!(
                    "{error}; falling back to staged encoding"
                )),
            }
        } else {
            log::debug!(
                "{} ({}) is not direct-muxer capable, using staged encoding",
                job.codec,
                job.codec.pixel_format()
            );
        }

        self.transition(PipelineState::StreamingStaged);
        self.backends
            .open_staged(&job.output_path, fps, job.codec, self.options)
    }

    fn thread_pool(&self) -> Option<ThreadPool> {
        let threads = self.options.threads?;
        match ThreadPoolBuilder::new().num_threads(threads).build() {
            Ok(pool) => Some(pool),
            Err(error) => {
                log::warn!("Cannot build a {threads}-thread pool ({error}), using the global pool");
                None
            }
        }
    }
}

fn install<T: Send>(pool: Option<&ThreadPool>, work: impl FnOnce() -> T + Send) -> T {
    match pool {
        Some(pool) => pool.install(work),
        None => work(),
    }
}
