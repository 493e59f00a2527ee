//! In-memory media backends shared by the pipeline and converter tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use image::{Rgb, RgbImage};
use quiltweave::{
    BackendKind, CodecProfile, ConversionEvent, ConversionHandle, ConversionOptions, FrameBuffer,
    FrameSink, FrameSource, MediaBackends, PipelineState, ProgressEvent, QuiltError,
    SourceProperties, StagedEncoder,
};

/// Calibration whose lenticular phase depends only on x: an 8×2 canvas
/// where every pair of columns shows one view of a 2×2 quilt.
pub const BAND_CALIBRATION: &str = r#"{
    "screenW": 8,
    "screenH": 2,
    "pitch": 1.0,
    "slope": 1000000000.0,
    "center": 0.5,
    "DPI": 8
}"#;

/// Calibration for a 2×2 canvas whose four quadrants land on four
/// different views of a 2×2 quilt. `pitch` is `0.5 / cos(atan 2)`, so the
/// lenticular phase is 0.1, 0.35, 0.6, and 0.85 across the quadrants.
pub const QUADRANT_CALIBRATION: &str = r#"{
    "screenW": 2,
    "screenH": 2,
    "pitch": 1.118033988749895,
    "slope": 0.5,
    "center": 0.4,
    "DPI": 2
}"#;

pub const RED: Rgb<u8> = Rgb([255, 0, 0]);
pub const GREEN: Rgb<u8> = Rgb([0, 255, 0]);
pub const BLUE: Rgb<u8> = Rgb([0, 0, 255]);
pub const WHITE: Rgb<u8> = Rgb([255, 255, 255]);

/// A 4×4 quilt with 2×2 solid tiles: red top-left, green top-right,
/// blue bottom-left, white bottom-right.
pub fn solid_tile_quilt() -> RgbImage {
    RgbImage::from_fn(4, 4, |x, y| match (x / 2, y / 2) {
        (0, 0) => RED,
        (1, 0) => GREEN,
        (0, _) => BLUE,
        _ => WHITE,
    })
}

pub fn write_calibration(directory: &Path, text: &str) -> PathBuf {
    let path = directory.join("visual.json");
    std::fs::write(&path, text).expect("Failed to write calibration");
    path
}

pub struct MemorySource {
    properties: SourceProperties,
    frames: Vec<FrameBuffer>,
    position: usize,
    endless: bool,
    delay: Duration,
    panics: bool,
}

impl FrameSource for MemorySource {
    fn properties(&self) -> &SourceProperties {
        &self.properties
    }

    fn next_frame(&mut self) -> Result<Option<FrameBuffer>, QuiltError> {
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        if self.panics {
            panic!("decoder state corrupted");
        }
        if self.frames.is_empty() {
            return Ok(None);
        }
        if self.endless {
            return Ok(Some(self.frames[self.position % self.frames.len()].clone()));
        }
        let frame = self.frames.get(self.position).cloned();
        self.position += 1;
        Ok(frame)
    }
}

/// Sink that keeps every frame it receives.
pub struct RecordingSink {
    kind: BackendKind,
    frames: Arc<Mutex<Vec<FrameBuffer>>>,
    finished: Arc<AtomicUsize>,
}

impl FrameSink for RecordingSink {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn write_frame(&mut self, frame: &FrameBuffer) -> Result<(), QuiltError> {
        self.frames.lock().unwrap().push(frame.clone());
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<(), QuiltError> {
        self.finished.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Real staged encoder that records its scratch directory's lifecycle.
pub struct ObservedStaged {
    inner: StagedEncoder,
    scratch: Arc<Mutex<ScratchObservation>>,
}

#[derive(Debug, Default, Clone)]
pub struct ScratchObservation {
    pub path: Option<PathBuf>,
    pub existed_at_open: bool,
    pub existed_at_finalize: bool,
}

impl FrameSink for ObservedStaged {
    fn kind(&self) -> BackendKind {
        self.inner.kind()
    }

    fn write_frame(&mut self, frame: &FrameBuffer) -> Result<(), QuiltError> {
        self.inner.write_frame(frame)
    }

    fn finish(self: Box<Self>) -> Result<(), QuiltError> {
        let ObservedStaged { inner, scratch } = *self;
        {
            let mut observation = scratch.lock().unwrap();
            observation.existed_at_finalize = observation
                .path
                .as_ref()
                .is_some_and(|path| path.is_dir());
        }
        Box::new(inner).finish()
    }
}

/// Configurable fake media layer.
#[derive(Clone)]
pub struct FakeBackends {
    pub frames: Vec<FrameBuffer>,
    pub frame_count: Option<u64>,
    pub frames_per_second: f64,
    pub endless: bool,
    pub frame_delay: Duration,
    pub source_panics: bool,
    pub direct_fails: bool,
    pub real_staged: bool,
    /// When set, the staged backend waits for a release before opening.
    pub staged_gate: Option<Arc<Mutex<Receiver<()>>>>,
    pub direct_opens: Arc<AtomicUsize>,
    pub staged_opens: Arc<AtomicUsize>,
    pub finished: Arc<AtomicUsize>,
    pub written: Arc<Mutex<Vec<FrameBuffer>>>,
    pub scratch: Arc<Mutex<ScratchObservation>>,
}

impl FakeBackends {
    pub fn new(frames: Vec<FrameBuffer>) -> Self {
        let frame_count = Some(frames.len() as u64);
        Self {
            frames,
            frame_count,
            frames_per_second: 30.0,
            endless: false,
            frame_delay: Duration::ZERO,
            source_panics: false,
            direct_fails: false,
            real_staged: false,
            staged_gate: None,
            direct_opens: Arc::new(AtomicUsize::new(0)),
            staged_opens: Arc::new(AtomicUsize::new(0)),
            finished: Arc::new(AtomicUsize::new(0)),
            written: Arc::new(Mutex::new(Vec::new())),
            scratch: Arc::new(Mutex::new(ScratchObservation::default())),
        }
    }

    pub fn endless(mut self, delay: Duration) -> Self {
        self.endless = true;
        self.frame_count = None;
        self.frame_delay = delay;
        self
    }

    pub fn written_frames(&self) -> Vec<FrameBuffer> {
        self.written.lock().unwrap().clone()
    }

    pub fn scratch_observation(&self) -> ScratchObservation {
        self.scratch.lock().unwrap().clone()
    }

    fn recording(&self, kind: BackendKind) -> Box<dyn FrameSink> {
        Box::new(RecordingSink {
            kind,
            frames: Arc::clone(&self.written),
            finished: Arc::clone(&self.finished),
        })
    }
}

impl MediaBackends for FakeBackends {
    fn open_source(&self, _path: &Path) -> Result<Box<dyn FrameSource>, QuiltError> {
        let (width, height) = self
            .frames
            .first()
            .map(|frame| frame.dimensions())
            .unwrap_or((4, 4));
        Ok(Box::new(MemorySource {
            properties: SourceProperties {
                width,
                height,
                frames_per_second: self.frames_per_second,
                frame_count: self.frame_count,
                codec: "memory".to_string(),
            },
            frames: self.frames.clone(),
            position: 0,
            endless: self.endless,
            delay: self.frame_delay,
            panics: self.source_panics,
        }))
    }

    fn open_direct(
        &self,
        _output: &Path,
        _width: u32,
        _height: u32,
        _frames_per_second: f64,
        _codec: CodecProfile,
    ) -> Result<Box<dyn FrameSink>, QuiltError> {
        self.direct_opens.fetch_add(1, Ordering::SeqCst);
        if self.direct_fails {
            return Err(QuiltError::MuxerOpenFailure(
                "encoder libx264 not available".to_string(),
            ));
        }
        Ok(self.recording(BackendKind::Direct))
    }

    fn open_staged(
        &self,
        output: &Path,
        frames_per_second: f64,
        codec: CodecProfile,
        options: &ConversionOptions,
    ) -> Result<Box<dyn FrameSink>, QuiltError> {
        self.staged_opens.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.staged_gate {
            let _ = gate.lock().unwrap().recv_timeout(Duration::from_secs(5));
        }
        if !self.real_staged {
            return Ok(self.recording(BackendKind::Staged));
        }
        let inner = StagedEncoder::open(output, frames_per_second, codec, options)?;
        {
            let mut observation = self.scratch.lock().unwrap();
            observation.path = inner.scratch_dir().map(Path::to_path_buf);
            observation.existed_at_open = inner.scratch_dir().is_some_and(Path::is_dir);
        }
        Ok(Box::new(ObservedStaged {
            inner,
            scratch: Arc::clone(&self.scratch),
        }))
    }
}

/// Drain every event from a handle on the current (non-async) thread.
pub fn drain_events(handle: &mut ConversionHandle) -> Vec<ConversionEvent> {
    let mut events = Vec::new();
    while let Some(event) = handle.blocking_next_event() {
        events.push(event);
    }
    events
}

pub fn states(events: &[ConversionEvent]) -> Vec<PipelineState> {
    events
        .iter()
        .filter_map(|event| match event {
            ConversionEvent::StateChanged(state) => Some(*state),
            _ => None,
        })
        .collect()
}

pub fn progress(events: &[ConversionEvent]) -> Vec<ProgressEvent> {
    events
        .iter()
        .filter_map(|event| match event {
            ConversionEvent::Progress(progress) => Some(progress.clone()),
            _ => None,
        })
        .collect()
}

pub fn warnings(events: &[ConversionEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|event| match event {
            ConversionEvent::Warning(message) => Some(message.clone()),
            _ => None,
        })
        .collect()
}
