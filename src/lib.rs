//! # quiltweave
//!
//! Convert quilt videos into the interleaved pixel pattern a lenticular
//! light-field display expects.
//!
//! A quilt frame is a grid of views of the same scene, each rendered from a
//! slightly different angle. A lenticular panel shows a different view
//! through every slanted lenticule, so each output pixel must be copied from
//! the tile its lenticule exposes. `quiltweave` computes that mapping from
//! the display's calibration record, applies it to every frame, and encodes
//! the result, powered by FFmpeg via the
//! [`ffmpeg-next`](https://crates.io/crates/ffmpeg-next) crate.
//!
//! ## Quick Start
//!
//! ### Convert a Video
//!
//! ```no_run
//! use quiltweave::{CodecProfile, ConversionJob, ConversionOptions, Converter};
//!
//! let job = ConversionJob::with_suggested_output(
//!     "clip_qs5x9a1.87.mp4",
//!     "visual.json",
//!     CodecProfile::H265_420,
//! );
//! let handle = Converter::new().start(job, ConversionOptions::new()).unwrap();
//! let result = handle.blocking_wait();
//! println!("finished: {:?}", result.status);
//! ```
//!
//! ### Map a Single Frame
//!
//! ```no_run
//! use quiltweave::{CalibrationProfile, ViewMapper, parse_quilt_filename};
//!
//! let (geometry, _) = parse_quilt_filename("still_qs8x6a0.75.png");
//! let calibration = CalibrationProfile::load("visual.json").unwrap();
//! let quilt = image::open("still_qs8x6a0.75.png").unwrap().to_rgb8();
//! let mapper = ViewMapper::new(geometry, &calibration, quilt.width(), quilt.height()).unwrap();
//! mapper.render(&quilt).unwrap().save("still_display.png").unwrap();
//! ```
//!
//! ## Features
//!
//! - **Filename convention**: `qs<cols>x<rows>a<aspect>` quilt layout
//!   detection with safe defaults
//! - **Calibration records**: bare-number and `{ "value": n }` fields
//! - **Parallel, deterministic mapping**: per-job sample table, rows filled
//!   across rayon threads
//! - **Two encode backends**: in-process muxing for 8-bit 4:2:0 H.264/H.265,
//!   and a staged PNG sequence plus external `ffmpeg` for 4:4:4 and ProRes
//! - **Progress & cancellation**: async event stream and `CancellationToken`
//!
//! ## Requirements
//!
//! FFmpeg development libraries must be installed for the in-process
//! decoder and muxer, and an `ffmpeg` executable must be reachable for the
//! staged backend.

pub mod calibration;
pub mod codec;
pub mod configuration;
pub mod converter;
pub mod encode;
pub mod error;
pub mod ffmpeg;
pub mod filename;
pub mod job;
pub mod mapper;
pub mod pipeline;
pub mod progress;
pub mod source;
pub mod staged;

pub use calibration::CalibrationProfile;
pub use codec::CodecProfile;
pub use configuration::ConversionOptions;
pub use converter::{ConversionHandle, Converter};
pub use encode::{BackendKind, DirectMuxer, FrameSink};
pub use error::{JobStatus, QuiltError};
pub use ffmpeg::{FfmpegLogLevel, set_ffmpeg_log_level};
pub use filename::{FilenameParseWarning, QuiltGeometry, parse_quilt_filename, suggest_output_path};
pub use job::ConversionJob;
pub use mapper::{FrameBuffer, ViewMapper};
pub use pipeline::{FfmpegBackends, MediaBackends, PipelineState};
pub use progress::{CancellationToken, ConversionEvent, ConversionResult, ProgressEvent};
pub use source::{FrameSource, SourceProperties, VideoSource};
pub use staged::StagedEncoder;
