//! Frame pipeline integration tests.
//!
//! These run the full state machine on a worker thread against in-memory
//! sources and recording sinks, so they need neither FFmpeg fixtures nor
//! encoders. Tests that spawn a real external encoder use the Unix `true`
//! and `false` programs.

mod common;

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use image::RgbImage;
use quiltweave::{
    CodecProfile, ConversionEvent, ConversionJob, ConversionOptions, Converter, JobStatus,
    PipelineState, QuiltGeometry,
};

use common::{
    BAND_CALIBRATION, BLUE, FakeBackends, GREEN, QUADRANT_CALIBRATION, RED, WHITE, drain_events,
    progress, solid_tile_quilt, states, warnings, write_calibration,
};

fn band_job(directory: &std::path::Path, codec: CodecProfile) -> ConversionJob {
    let calibration = write_calibration(directory, BAND_CALIBRATION);
    ConversionJob::new(
        directory.join("clip_qs2x2a1.0.mp4"),
        calibration,
        directory.join(format!("out{}", codec.container_extension())),
        codec,
    )
}

fn run_job(
    backends: FakeBackends,
    job: ConversionJob,
    options: ConversionOptions,
) -> (Vec<ConversionEvent>, quiltweave::ConversionResult) {
    let converter = Converter::with_backends(backends);
    let mut handle = converter.start(job, options).expect("Failed to start job");
    let events = drain_events(&mut handle);
    (events, handle.blocking_wait())
}

// ── End to end ─────────────────────────────────────────────────────

#[test]
fn quadrants_show_one_tile_each() {
    let directory = tempfile::tempdir().expect("Failed to create temp dir");
    let calibration = write_calibration(directory.path(), QUADRANT_CALIBRATION);
    let job = ConversionJob::new(
        directory.path().join("clip_qs2x2a1.0.mp4"),
        calibration,
        directory.path().join("out.mp4"),
        CodecProfile::H264_420,
    );
    let backends = FakeBackends::new(vec![solid_tile_quilt(), solid_tile_quilt()]);
    let written = backends.clone();

    let (events, result) = run_job(backends, job, ConversionOptions::new());
    assert!(result.success, "{:?}", result.error_detail);

    let frames = written.written_frames();
    assert_eq!(frames.len(), 2);
    for frame in &frames {
        assert_eq!(frame.dimensions(), (2, 2));
        // (x, y) -> tile (column, row): (1, 0), (0, 0), (1, 1), (0, 1).
        assert_eq!(*frame.get_pixel(0, 0), GREEN);
        assert_eq!(*frame.get_pixel(1, 0), RED);
        assert_eq!(*frame.get_pixel(0, 1), WHITE);
        assert_eq!(*frame.get_pixel(1, 1), BLUE);
    }
    assert!(matches!(
        events.last(),
        Some(ConversionEvent::Finished(finished)) if finished.success
    ));
    assert_eq!(written.finished.load(Ordering::SeqCst), 1);
}

#[test]
fn bands_show_one_tile_each() {
    let directory = tempfile::tempdir().expect("Failed to create temp dir");
    let backends = FakeBackends::new(vec![solid_tile_quilt(), solid_tile_quilt()]);
    let written = backends.clone();

    let (events, result) = run_job(
        backends,
        band_job(directory.path(), CodecProfile::H264_420),
        ConversionOptions::new(),
    );
    assert!(result.success, "{:?}", result.error_detail);

    let frames = written.written_frames();
    assert_eq!(frames.len(), 2);
    for frame in &frames {
        assert_eq!(frame.dimensions(), (8, 2));
        for y in 0..2 {
            // Views run right-to-left across each tile row.
            let expected = [GREEN, GREEN, RED, RED, WHITE, WHITE, BLUE, BLUE];
            for (x, colour) in expected.iter().enumerate() {
                assert_eq!(frame.get_pixel(x as u32, y), colour, "pixel ({x}, {y})");
            }
        }
    }

    assert_eq!(
        states(&events),
        vec![
            PipelineState::Opening,
            PipelineState::Probing,
            PipelineState::StreamingDirect,
            PipelineState::Finalizing,
            PipelineState::Completed,
        ]
    );
    assert!(matches!(
        events.last(),
        Some(ConversionEvent::Finished(finished)) if finished.success
    ));
    assert_eq!(written.finished.load(Ordering::SeqCst), 1);
}

#[test]
fn thread_cap_does_not_change_output() {
    let directory = tempfile::tempdir().expect("Failed to create temp dir");
    let quilt = RgbImage::from_fn(40, 36, |x, y| image::Rgb([x as u8 * 6, y as u8 * 7, 99]));
    let calibration = write_calibration(
        directory.path(),
        r#"{"screenW": 64, "screenH": 48, "pitch": 47.6, "slope": -5.4,
            "center": 0.13, "DPI": 338}"#,
    );
    let job = ConversionJob::new(
        directory.path().join("clip_qs4x6a0.75.mp4"),
        calibration,
        directory.path().join("out.mp4"),
        CodecProfile::H264_420,
    );

    let single = FakeBackends::new(vec![quilt.clone()]);
    let single_frames = single.clone();
    let (_, result) = run_job(single, job.clone(), ConversionOptions::new().with_threads(Some(1)));
    assert!(result.success);

    let pooled = FakeBackends::new(vec![quilt]);
    let pooled_frames = pooled.clone();
    let (_, result) = run_job(pooled, job, ConversionOptions::new());
    assert!(result.success);

    assert_eq!(single_frames.written_frames(), pooled_frames.written_frames());
}

// ── Backend selection ──────────────────────────────────────────────

#[test]
fn full_chroma_profiles_are_always_staged() {
    for codec in [
        CodecProfile::H264_444,
        CodecProfile::H265_444,
        CodecProfile::ProRes422,
        CodecProfile::ProRes4444,
    ] {
        let directory = tempfile::tempdir().expect("Failed to create temp dir");
        let backends = FakeBackends::new(vec![solid_tile_quilt()]);
        let observed = backends.clone();

        let (events, result) = run_job(
            backends,
            band_job(directory.path(), codec),
            ConversionOptions::new(),
        );
        assert!(result.success, "{codec}: {:?}", result.error_detail);
        assert_eq!(observed.direct_opens.load(Ordering::SeqCst), 0, "{codec}");
        assert_eq!(observed.staged_opens.load(Ordering::SeqCst), 1, "{codec}");
        assert!(states(&events).contains(&PipelineState::StreamingStaged));
        assert!(warnings(&events).is_empty(), "{codec}: no downgrade warning");
    }
}

#[test]
fn direct_open_failure_downgrades_to_staged() {
    let directory = tempfile::tempdir().expect("Failed to create temp dir");
    let mut backends = FakeBackends::new(vec![solid_tile_quilt()]);
    backends.direct_fails = true;
    let observed = backends.clone();

    let (events, result) = run_job(
        backends,
        band_job(directory.path(), CodecProfile::H265_420),
        ConversionOptions::new(),
    );

    assert!(result.success);
    assert_eq!(observed.direct_opens.load(Ordering::SeqCst), 1);
    assert_eq!(observed.staged_opens.load(Ordering::SeqCst), 1);
    assert!(states(&events).contains(&PipelineState::StreamingStaged));
    assert!(!states(&events).contains(&PipelineState::StreamingDirect));

    let warnings = warnings(&events);
    assert_eq!(warnings.len(), 1);
    assert!(
        warnings[0].contains("Direct muxer unavailable"),
        "unexpected warning: {}",
        warnings[0]
    );
}

#[test]
fn defaulted_geometry_is_reported_as_warning() {
    let directory = tempfile::tempdir().expect("Failed to create temp dir");
    let calibration = write_calibration(directory.path(), BAND_CALIBRATION);
    let job = ConversionJob::new(
        directory.path().join("plain.mp4"),
        calibration,
        directory.path().join("out.mp4"),
        CodecProfile::H264_420,
    );
    assert_eq!(job.geometry, QuiltGeometry::default());

    let quilt = RgbImage::new(10, 18);
    let (events, result) = run_job(FakeBackends::new(vec![quilt]), job, ConversionOptions::new());

    assert!(result.success);
    let warnings = warnings(&events);
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].contains("plain.mp4"));
}

// ── Progress ───────────────────────────────────────────────────────

#[test]
fn progress_is_monotonic_and_ends_at_one_hundred() {
    let directory = tempfile::tempdir().expect("Failed to create temp dir");
    let backends = FakeBackends::new(vec![solid_tile_quilt(); 25]);

    let (events, result) = run_job(
        backends,
        band_job(directory.path(), CodecProfile::H264_420),
        ConversionOptions::new().with_progress_stride(4),
    );
    assert!(result.success);

    let progress = progress(&events);
    let frames: Vec<u64> = progress.iter().map(|event| event.frames_done).collect();
    assert_eq!(frames, vec![1, 4, 8, 12, 16, 20, 24, 25, 25]);
    for pair in progress.windows(2) {
        assert!(pair[0].percentage <= pair[1].percentage);
    }
    assert!(progress.iter().all(|event| (0.0..=100.0).contains(&event.percentage)));
    assert_eq!(progress.last().map(|event| event.percentage), Some(100.0));
}

#[test]
fn overestimated_frame_count_still_finishes_at_one_hundred() {
    let directory = tempfile::tempdir().expect("Failed to create temp dir");
    let mut backends = FakeBackends::new(vec![solid_tile_quilt(); 3]);
    backends.frame_count = Some(300);

    let (events, result) = run_job(
        backends,
        band_job(directory.path(), CodecProfile::H264_420),
        ConversionOptions::new(),
    );
    assert!(result.success);

    let progress = progress(&events);
    let last_streamed = &progress[progress.len() - 2];
    assert_eq!(last_streamed.frames_done, 3);
    assert!((last_streamed.percentage - 1.0).abs() < 1e-4);
    assert_eq!(progress.last().map(|event| event.percentage), Some(100.0));
}

#[test]
fn unknown_frame_count_reports_zero_until_done() {
    let directory = tempfile::tempdir().expect("Failed to create temp dir");
    let mut backends = FakeBackends::new(vec![solid_tile_quilt(); 5]);
    backends.frame_count = None;

    let (events, result) = run_job(
        backends,
        band_job(directory.path(), CodecProfile::H264_420),
        ConversionOptions::new().with_progress_stride(1),
    );
    assert!(result.success);

    let progress = progress(&events);
    let (last, streamed) = progress.split_last().expect("progress events");
    assert!(streamed.iter().all(|event| event.percentage == 0.0));
    assert_eq!(last.percentage, 100.0);
}

// ── Failures ───────────────────────────────────────────────────────

#[test]
fn empty_source_is_an_input_error() {
    let directory = tempfile::tempdir().expect("Failed to create temp dir");
    let backends = FakeBackends::new(Vec::new());
    let observed = backends.clone();

    let (events, result) = run_job(
        backends,
        band_job(directory.path(), CodecProfile::H264_420),
        ConversionOptions::new(),
    );

    assert!(!result.success);
    assert_eq!(result.status, JobStatus::InputError);
    assert_eq!(states(&events).last(), Some(&PipelineState::Failed));
    assert_eq!(observed.finished.load(Ordering::SeqCst), 0);
}

#[test]
fn missing_calibration_is_an_input_error() {
    let directory = tempfile::tempdir().expect("Failed to create temp dir");
    let job = ConversionJob::new(
        directory.path().join("clip_qs2x2a1.0.mp4"),
        directory.path().join("missing.json"),
        directory.path().join("out.mp4"),
        CodecProfile::H264_420,
    );

    let (events, result) = run_job(
        FakeBackends::new(vec![solid_tile_quilt()]),
        job,
        ConversionOptions::new(),
    );

    assert_eq!(result.status, JobStatus::InputError);
    assert_eq!(
        states(&events),
        vec![PipelineState::Opening, PipelineState::Failed]
    );
}

#[test]
fn malformed_calibration_is_a_calibration_error() {
    let directory = tempfile::tempdir().expect("Failed to create temp dir");
    let calibration = write_calibration(directory.path(), r#"{"screenW": 8, "pitch": 1}"#);
    let job = ConversionJob::new(
        directory.path().join("clip_qs2x2a1.0.mp4"),
        calibration,
        directory.path().join("out.mp4"),
        CodecProfile::H264_420,
    );

    let (_, result) = run_job(
        FakeBackends::new(vec![solid_tile_quilt()]),
        job,
        ConversionOptions::new(),
    );

    assert_eq!(result.status, JobStatus::CalibrationError);
    assert!(
        result
            .error_detail
            .as_deref()
            .is_some_and(|detail| detail.contains("screenH")),
        "{:?}",
        result.error_detail
    );
}

// ── Scratch directory lifecycle ────────────────────────────────────

#[cfg(unix)]
#[test]
fn scratch_directory_exists_only_while_staging() {
    let directory = tempfile::tempdir().expect("Failed to create temp dir");
    let scratch_root = directory.path().join("scratch");
    std::fs::create_dir(&scratch_root).expect("Failed to create scratch root");
    let mut backends = FakeBackends::new(vec![solid_tile_quilt(); 3]);
    backends.real_staged = true;
    let (release, gate) = std::sync::mpsc::channel();
    backends.staged_gate = Some(Arc::new(Mutex::new(gate)));
    let observed = backends.clone();

    assert_eq!(std::fs::read_dir(&scratch_root).unwrap().count(), 0);
    let converter = Converter::with_backends(backends);
    let mut handle = converter
        .start(
            band_job(directory.path(), CodecProfile::H264_444),
            ConversionOptions::new()
                .with_encoder_program("true")
                .with_scratch_root(&scratch_root),
        )
        .expect("Failed to start job");

    let mut saw_staging = false;
    while let Some(event) = handle.blocking_next_event() {
        if matches!(event, ConversionEvent::StateChanged(PipelineState::StreamingStaged)) {
            // The staged backend is held back until this check is done.
            assert_eq!(std::fs::read_dir(&scratch_root).unwrap().count(), 0);
            saw_staging = true;
            release.send(()).expect("staged backend waiting");
        }
    }
    let result = handle.blocking_wait();
    assert!(saw_staging);
    assert!(result.success, "{:?}", result.error_detail);

    let observation = observed.scratch_observation();
    let scratch = observation.path.expect("scratch directory recorded");
    assert!(scratch.starts_with(&scratch_root));
    assert!(observation.existed_at_open);
    assert!(observation.existed_at_finalize);
    assert!(!scratch.exists());
    assert_eq!(std::fs::read_dir(&scratch_root).unwrap().count(), 0);
}

#[cfg(unix)]
#[test]
fn scratch_directory_removed_after_encoder_failure() {
    let directory = tempfile::tempdir().expect("Failed to create temp dir");
    let mut backends = FakeBackends::new(vec![solid_tile_quilt(); 2]);
    backends.real_staged = true;
    let observed = backends.clone();

    let (events, result) = run_job(
        backends,
        band_job(directory.path(), CodecProfile::ProRes4444),
        ConversionOptions::new()
            .with_encoder_program("false")
            .with_scratch_root(directory.path()),
    );

    assert_eq!(result.status, JobStatus::EncodeError);
    let states = states(&events);
    assert!(states.ends_with(&[PipelineState::Finalizing, PipelineState::Failed]));
    let observation = observed.scratch_observation();
    assert!(observation.existed_at_finalize);
    assert!(!observation.path.expect("scratch directory recorded").exists());
}

#[test]
fn scratch_directory_removed_after_cancellation() {
    let directory = tempfile::tempdir().expect("Failed to create temp dir");
    let mut backends =
        FakeBackends::new(vec![solid_tile_quilt()]).endless(Duration::from_millis(2));
    backends.real_staged = true;
    let observed = backends.clone();

    let converter = Converter::with_backends(backends);
    let mut handle = converter
        .start(
            band_job(directory.path(), CodecProfile::H265_444),
            ConversionOptions::new().with_scratch_root(directory.path()),
        )
        .expect("Failed to start job");

    let mut events = Vec::new();
    while let Some(event) = handle.blocking_next_event() {
        if matches!(event, ConversionEvent::Progress(_)) {
            handle.cancel();
        }
        events.push(event);
    }
    let result = handle.blocking_wait();

    assert_eq!(result.status, JobStatus::Cancelled);
    assert!(!states(&events).contains(&PipelineState::Finalizing));
    let observation = observed.scratch_observation();
    assert!(observation.existed_at_open);
    assert!(!observation.existed_at_finalize);
    assert!(!observation.path.expect("scratch directory recorded").exists());
}
