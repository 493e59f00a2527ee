//! ConversionOptions, CancellationToken, and ConversionJob tests.

use std::path::Path;
use std::time::Duration;

use quiltweave::{
    CancellationToken, CodecProfile, ConversionJob, ConversionOptions, QuiltGeometry,
};

// ── ConversionOptions builder ──────────────────────────────────────

#[test]
fn options_defaults() {
    let options = ConversionOptions::new();
    assert_eq!(options.progress_stride(), 10);
    assert_eq!(options.encoder_timeout(), Duration::from_secs(3600));

    let debug = format!("{options:?}");
    assert!(debug.contains("ConversionOptions"));
    assert!(debug.contains("has_cancellation: false"));
    assert!(debug.contains("\"ffmpeg\""));
}

#[test]
fn progress_stride_clamps_zero() {
    let options = ConversionOptions::new().with_progress_stride(0);
    assert_eq!(options.progress_stride(), 1);
}

#[test]
fn builder_settings_are_kept() {
    let options = ConversionOptions::new()
        .with_progress_stride(25)
        .with_encoder_timeout(Duration::from_secs(90))
        .with_encoder_program("/opt/ffmpeg/bin/ffmpeg")
        .with_scratch_root("/var/tmp")
        .with_cancellation(CancellationToken::new())
        .with_threads(Some(0));

    assert_eq!(options.progress_stride(), 25);
    assert_eq!(options.encoder_timeout(), Duration::from_secs(90));
    let debug = format!("{options:?}");
    assert!(debug.contains("has_cancellation: true"));
    assert!(debug.contains("/opt/ffmpeg/bin/ffmpeg"));
    assert!(debug.contains("/var/tmp"));
    assert!(debug.contains("threads: None"));
}

// ── CancellationToken ──────────────────────────────────────────────

#[test]
fn cancellation_token_clone_shares_state() {
    let token = CancellationToken::default();
    let clone = token.clone();
    assert!(!clone.is_cancelled());

    token.cancel();
    assert!(clone.is_cancelled());
}

// ── ConversionJob ──────────────────────────────────────────────────

#[test]
fn job_derives_geometry_from_input_name() {
    let job = ConversionJob::new(
        "media/clip_qs8x6a0.75.mp4",
        "visual.json",
        "out.mp4",
        CodecProfile::H265_420,
    );
    assert_eq!(job.geometry, QuiltGeometry::new(8, 6, 0.75).unwrap());
    assert!(job.geometry_warning.is_none());
    assert_eq!(job.input_name(), "clip_qs8x6a0.75.mp4");
}

#[test]
fn job_suggests_output_next_to_input() {
    let job = ConversionJob::with_suggested_output(
        "media/clip_qs5x9a1.87.mp4",
        "visual.json",
        CodecProfile::ProRes4444,
    );
    assert_eq!(job.output_path, Path::new("media/clip_LookingGlassReady.mov"));
}

#[test]
fn explicit_geometry_clears_warning() {
    let job = ConversionJob::new("plain.mp4", "visual.json", "out.mp4", CodecProfile::H264_420);
    assert!(job.geometry_warning.is_some());

    let job = job.with_geometry(QuiltGeometry::new(4, 8, 0.75).unwrap());
    assert_eq!((job.geometry.columns, job.geometry.rows), (4, 8));
    assert!(job.geometry_warning.is_none());
}
