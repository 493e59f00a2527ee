//! Staged backend: PNG sequence plus one external encoder run.
//!
//! Frames are written losslessly as `frame_000000.png`, `frame_000001.png`,
//! ... into a scratch directory private to the job. When the stream ends,
//! [`FrameSink::finish`] runs the external encoder exactly once over the
//! sequence with the codec profile's arguments, under a hard timeout.
//!
//! The scratch directory exists only between [`StagedEncoder::open`] and the
//! end of `finish` (or the encoder being dropped), whatever the outcome.

use std::ffi::OsString;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use image::ImageFormat;
use tempfile::TempDir;

use crate::codec::CodecProfile;
use crate::configuration::ConversionOptions;
use crate::encode::{BackendKind, FrameSink};
use crate::error::QuiltError;
use crate::mapper::FrameBuffer;
use crate::progress::CancellationToken;

const SCRATCH_PREFIX: &str = "quiltweave-frames-";
const FRAME_PATTERN: &str = "frame_%06d.png";
const POLL_INTERVAL: Duration = Duration::from_millis(50);
/// How long encoder output is still collected once the encoder is reaped.
/// Descendants that inherited the pipes may keep them open past this.
const OUTPUT_GRACE: Duration = Duration::from_millis(500);
/// Lines of encoder output kept for error messages.
const DIAGNOSTIC_TAIL_LINES: usize = 40;

/// Writes frames to a scratch image sequence and encodes it externally.
#[derive(Debug)]
pub struct StagedEncoder {
    scratch: Option<TempDir>,
    output_path: PathBuf,
    codec: CodecProfile,
    frames_per_second: f64,
    program: PathBuf,
    timeout: Duration,
    cancellation: Option<CancellationToken>,
    frames_written: u64,
}

impl StagedEncoder {
    /// Create the scratch directory and prepare the encoder invocation.
    ///
    /// # Errors
    ///
    /// Returns [`QuiltError::InternalIo`] if the scratch directory cannot be
    /// created.
    pub fn open<P: AsRef<Path>>(
        output_path: P,
        frames_per_second: f64,
        codec: CodecProfile,
        options: &ConversionOptions,
    ) -> Result<Self, QuiltError> {
        let builder = {
            let mut builder = tempfile::Builder::new();
            builder.prefix(SCRATCH_PREFIX);
            builder
        };
        let scratch = match &options.scratch_root {
            Some(root) => builder.tempdir_in(root),
            None => builder.tempdir(),
        }
        .map_err(|error| QuiltError::InternalIo {
            path: options
                .scratch_root
                .clone()
                .unwrap_or_else(std::env::temp_dir),
            reason: format!("cannot create scratch directory: {error}"),
        })?;
        log::info!("Staging frames in {}", scratch.path().display());

        Ok(Self {
            scratch: Some(scratch),
            output_path: output_path.as_ref().to_path_buf(),
            codec,
            frames_per_second,
            program: options.encoder_program.clone(),
            timeout: options.encoder_timeout,
            cancellation: options.cancellation.clone(),
            frames_written: 0,
        })
    }

    /// The scratch directory, while it exists.
    pub fn scratch_dir(&self) -> Option<&Path> {
        self.scratch.as_ref().map(TempDir::path)
    }

    /// Number of frames staged so far.
    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    /// Arguments passed to the external encoder, in order.
    pub fn encoder_arguments(&self) -> Vec<OsString> {
        let pattern = self
            .scratch_dir()
            .map(|dir| dir.join(FRAME_PATTERN))
            .unwrap_or_else(|| PathBuf::from(FRAME_PATTERN));

        let mut args: Vec<OsString> = [
            "-y",
            "-hide_banner",
            "-loglevel",
            "error",
            "-framerate",
        ]
        .into_iter()
        .map(OsString::from)
        .collect();
        args.push(format_frame_rate(self.frames_per_second).into());
        args.extend(["-start_number", "0", "-i"].map(OsString::from));
        args.push(pattern.into_os_string());
        args.extend(["-c:v", self.codec.encoder_id()].map(OsString::from));
        args.extend(self.codec.encoder_args().iter().map(OsString::from));
        args.extend(["-pix_fmt", self.codec.pixel_format()].map(OsString::from));
        args.push(self.output_path.clone().into_os_string());
        args
    }

    fn run_encoder(&self) -> Result<(), QuiltError> {
        let args = self.encoder_arguments();
        log::info!(
            "Running encoder: {} {}",
            self.program.display(),
            args.iter()
                .map(|arg| arg.to_string_lossy())
                .collect::<Vec<_>>()
                .join(" ")
        );

        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|error| {
                QuiltError::encode(format!(
                    "failed to start encoder {}: {error}",
                    self.program.display()
                ))
            })?;

        let stdout = child.stdout.take().map(drain);
        let stderr = child.stderr.take().map(drain);
        let waited = self.wait_with_deadline(&mut child);
        let diagnostics = collect_diagnostics(stdout, stderr);

        match waited {
            Ok(status) if status.success() => {
                log::info!(
                    "Encoder finished: {} frames -> {}",
                    self.frames_written,
                    self.output_path.display()
                );
                Ok(())
            }
            Ok(status) => Err(QuiltError::encode(format!(
                "encoder exited with {status}: {diagnostics}"
            ))),
            Err(QuiltError::Encode { detail }) => {
                Err(QuiltError::encode(format!("{detail}: {diagnostics}")))
            }
            Err(other) => Err(other),
        }
    }

    /// Poll the child until it exits, the deadline passes, or the job is
    /// cancelled. The child is killed in the latter two cases.
    fn wait_with_deadline(&self, child: &mut Child) -> Result<ExitStatus, QuiltError> {
        let deadline = Instant::now() + self.timeout;
        loop {
            if let Some(status) = child
                .try_wait()
                .map_err(|error| QuiltError::encode(format!("waiting on encoder failed: {error}")))?
            {
                return Ok(status);
            }

            if self
                .cancellation
                .as_ref()
                .is_some_and(CancellationToken::is_cancelled)
            {
                log::warn!("Cancelling encoder run");
                terminate(child);
                return Err(QuiltError::Cancelled);
            }

            if Instant::now() >= deadline {
                log::error!("Encoder exceeded its {:?} budget, killing it", self.timeout);
                terminate(child);
                return Err(QuiltError::encode(format!(
                    "timed out after {:?}",
                    self.timeout
                )));
            }

            thread::sleep(POLL_INTERVAL);
        }
    }

    fn remove_scratch(&mut self) -> Result<(), QuiltError> {
        let Some(scratch) = self.scratch.take() else {
            return Ok(());
        };
        let path = scratch.path().to_path_buf();
        scratch.close().map_err(|error| QuiltError::InternalIo {
            path: path.clone(),
            reason: format!("cannot remove scratch directory: {error}"),
        })?;
        log::debug!("Removed scratch directory {}", path.display());
        Ok(())
    }
}

impl FrameSink for StagedEncoder {
    fn kind(&self) -> BackendKind {
        BackendKind::Staged
    }

    fn write_frame(&mut self, frame: &FrameBuffer) -> Result<(), QuiltError> {
        let Some(dir) = self.scratch_dir() else {
            return Err(QuiltError::encode("staged encoder already finished"));
        };
        let path = dir.join(format!("frame_{:06}.png", self.frames_written));
        frame.save_with_format(&path, ImageFormat::Png)?;
        self.frames_written += 1;
        Ok(())
    }

    fn finish(mut self: Box<Self>) -> Result<(), QuiltError> {
        let encoded = self.run_encoder();
        let cleaned = self.remove_scratch();
        match (encoded, cleaned) {
            (Err(error), Err(cleanup)) => {
                log::error!("{cleanup}");
                Err(error)
            }
            (encoded, cleaned) => encoded.and(cleaned),
        }
    }
}

impl Drop for StagedEncoder {
    fn drop(&mut self) {
        if let Err(error) = self.remove_scratch() {
            log::error!("{error}");
        }
    }
}

fn format_frame_rate(frames_per_second: f64) -> String {
    if frames_per_second.fract() == 0.0 {
        format!("{}", frames_per_second as u64)
    } else {
        format!("{frames_per_second:.6}")
    }
}

fn terminate(child: &mut Child) {
    if let Err(error) = child.kill() {
        log::warn!("Failed to kill encoder: {error}");
    }
    let _ = child.wait();
}

/// Forward everything read from `reader` in chunks. The reader thread is
/// never joined: it ends when the last holder of the pipe closes it.
fn drain<R: Read + Send + 'static>(mut reader: R) -> Receiver<Vec<u8>> {
    let (sender, receiver) = mpsc::channel();
    thread::spawn(move || {
        let mut chunk = [0u8; 4096];
        loop {
            match reader.read(&mut chunk) {
                Ok(0) | Err(_) => break,
                Ok(read) => {
                    if sender.send(chunk[..read].to_vec()).is_err() {
                        break;
                    }
                }
            }
        }
    });
    receiver
}

/// Gather encoder output until both pipes close or [`OUTPUT_GRACE`] runs out.
fn collect_diagnostics(
    stdout: Option<Receiver<Vec<u8>>>,
    stderr: Option<Receiver<Vec<u8>>>,
) -> String {
    let deadline = Instant::now() + OUTPUT_GRACE;
    let mut bytes = Vec::new();
    for receiver in [stderr, stdout].into_iter().flatten() {
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match receiver.recv_timeout(remaining) {
                Ok(chunk) => bytes.extend_from_slice(&chunk),
                Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {
                    log::warn!("Encoder output still open after exit, detaching reader");
                    break;
                }
            }
        }
        bytes.push(b'\n');
    }
    let text = String::from_utf8_lossy(&bytes);
    let lines: Vec<&str> = text.lines().filter(|line| !line.trim().is_empty()).collect();
    if lines.is_empty() {
        return "<no encoder output>".to_string();
    }
    let start = lines.len().saturating_sub(DIAGNOSTIC_TAIL_LINES);
    lines[start..].join("\n")
}
