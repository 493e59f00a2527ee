//! Encode backends and the in-process direct muxer.
//!
//! Transformed frames leave the pipeline through the [`FrameSink`] trait.
//! Two implementations exist: [`DirectMuxer`], which encodes and muxes each
//! frame in-process through libavcodec/libavformat, and
//! [`StagedEncoder`](crate::staged::StagedEncoder), which stages a PNG
//! sequence for an external encoder.
//!
//! The direct muxer only writes 8-bit 4:2:0 H.264/H.265. Profiles with other
//! chroma layouts are rejected at [`DirectMuxer::open`].

use std::path::{Path, PathBuf};

use ffmpeg_next::codec::Id;
use ffmpeg_next::codec::context::Context as CodecContext;
use ffmpeg_next::encoder::video::Encoder as VideoEncoder;
use ffmpeg_next::format::{Flags as FormatFlags, Pixel, context::Output};
use ffmpeg_next::frame::Video as VideoFrame;
use ffmpeg_next::software::scaling::{Context as ScalingContext, Flags as ScalingFlags};
use ffmpeg_next::{Packet, Rational};

use crate::codec::CodecProfile;
use crate::error::QuiltError;
use crate::mapper::FrameBuffer;

/// Which backend a job ended up streaming into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// In-process encode and mux.
    Direct,
    /// Image sequence plus external encoder.
    Staged,
}

/// Destination for transformed frames.
///
/// Frames arrive one at a time in presentation order. [`finish`](FrameSink::finish)
/// is called exactly once after the last frame and must leave a complete
/// output file behind, or fail.
pub trait FrameSink {
    /// Which backend this is.
    fn kind(&self) -> BackendKind;

    /// Accept the next output frame.
    fn write_frame(&mut self, frame: &FrameBuffer) -> Result<(), QuiltError>;

    /// Flush and close the output.
    fn finish(self: Box<Self>) -> Result<(), QuiltError>;
}

/// Streams frames straight into a video container.
pub struct DirectMuxer {
    output: Output,
    encoder: VideoEncoder,
    scaler: ScalingContext,
    stream_index: usize,
    encoder_time_base: Rational,
    stream_time_base: Rational,
    width: u32,
    height: u32,
    frame_index: i64,
    path: PathBuf,
}

impl DirectMuxer {
    /// Open the output container and encoder.
    ///
    /// The container format is inferred from the extension of `path`.
    ///
    /// # Errors
    ///
    /// Returns [`QuiltError::MuxerOpenFailure`] if the profile is not
    /// direct-muxer capable, the encoder is unavailable, or any part of the
    /// output setup fails.
    pub fn open<P: AsRef<Path>>(
        path: P,
        width: u32,
        height: u32,
        frames_per_second: f64,
        codec: CodecProfile,
    ) -> Result<Self, QuiltError> {
        let path = path.as_ref();
        if !codec.direct_muxer_capable() {
            return Err(QuiltError::MuxerOpenFailure(format!(
                "{codec} uses {}, which the direct muxer cannot write",
                codec.pixel_format()
            )));
        }
        let codec_id = match codec.encoder_id() {
            "libx264" => Id::H264,
            "libx265" => Id::HEVC,
            other => {
                return Err(QuiltError::MuxerOpenFailure(format!(
                    "no in-process encoder mapping for {other}"
                )));
            }
        };
        let failure = |what: &str, error: ffmpeg_next::Error| {
            QuiltError::MuxerOpenFailure(format!("{what}: {error}"))
        };

        log::debug!(
            "Opening direct muxer {} ({codec}, {width}x{height} @ {frames_per_second:.3} fps)",
            path.display(),
        );

        crate::ffmpeg::initialize().map_err(|error| failure("FFmpeg initialisation failed", error))?;

        let mut output =
            ffmpeg_next::format::output(&path).map_err(|error| failure("cannot open output", error))?;
        let needs_global_header = output.format().flags().contains(FormatFlags::GLOBAL_HEADER);

        let encoder_codec = ffmpeg_next::encoder::find_by_name(codec.encoder_id())
            .or_else(|| ffmpeg_next::encoder::find(codec_id))
            .ok_or_else(|| {
                QuiltError::MuxerOpenFailure(format!("encoder {} not available", codec.encoder_id()))
            })?;

        let mut stream = output
            .add_stream(encoder_codec)
            .map_err(|error| failure("cannot add stream", error))?;
        let stream_index = stream.index();

        let mut encoder = CodecContext::from_parameters(stream.parameters())
            .map_err(|error| failure("cannot create codec context", error))?
            .encoder()
            .video()
            .map_err(|error| failure("cannot create video encoder", error))?;

        let frame_rate = Rational::from(frames_per_second);
        let encoder_time_base = frame_rate.invert();
        encoder.set_width(width);
        encoder.set_height(height);
        encoder.set_format(Pixel::YUV420P);
        encoder.set_time_base(encoder_time_base);
        encoder.set_frame_rate(Some(frame_rate));

        if needs_global_header {
            unsafe {
                (*encoder.as_mut_ptr()).flags |=
                    ffmpeg_sys_next::AV_CODEC_FLAG_GLOBAL_HEADER as i32;
            }
        }

        let encoder = encoder
            .open_as(encoder_codec)
            .map_err(|error| failure("cannot open encoder", error))?;
        stream.set_parameters(&encoder);
        stream.set_time_base(encoder_time_base);

        output
            .write_header()
            .map_err(|error| failure("cannot write header", error))?;
        let stream_time_base = output
            .stream(stream_index)
            .map(|stream| stream.time_base())
            .unwrap_or(encoder_time_base);

        let scaler = ScalingContext::get(
            Pixel::RGB24,
            width,
            height,
            Pixel::YUV420P,
            width,
            height,
            ScalingFlags::POINT,
        )
        .map_err(|error| failure("cannot create scaler", error))?;

        Ok(Self {
            output,
            encoder,
            scaler,
            stream_index,
            encoder_time_base,
            stream_time_base,
            width,
            height,
            frame_index: 0,
            path: path.to_path_buf(),
        })
    }

    fn drain_packets(&mut self) -> Result<(), QuiltError> {
        let mut packet = Packet::empty();
        while self.encoder.receive_packet(&mut packet).is_ok() {
            packet.set_stream(self.stream_index);
            packet.rescale_ts(self.encoder_time_base, self.stream_time_base);
            packet.write_interleaved(&mut self.output).map_err(|error| {
                QuiltError::encode(format!(
                    "writing packet to {} failed: {error}",
                    self.path.display()
                ))
            })?;
        }
        Ok(())
    }
}

impl FrameSink for DirectMuxer {
    fn kind(&self) -> BackendKind {
        BackendKind::Direct
    }

    fn write_frame(&mut self, frame: &FrameBuffer) -> Result<(), QuiltError> {
        if frame.dimensions() != (self.width, self.height) {
            return Err(QuiltError::FrameSize {
                expected_width: self.width,
                expected_height: self.height,
                actual_width: frame.width(),
                actual_height: frame.height(),
            });
        }

        let mut rgb_frame = VideoFrame::new(Pixel::RGB24, self.width, self.height);
        let stride = rgb_frame.stride(0);
        let row_len = self.width as usize * 3;
        let destination = rgb_frame.data_mut(0);
        for (row, pixels) in frame.as_raw().chunks_exact(row_len).enumerate() {
            let start = row * stride;
            destination[start..start + row_len].copy_from_slice(pixels);
        }

        let mut yuv_frame = VideoFrame::empty();
        self.scaler
            .run(&rgb_frame, &mut yuv_frame)
            .map_err(|error| QuiltError::encode(format!("colour conversion failed: {error}")))?;
        yuv_frame.set_pts(Some(self.frame_index));
        self.frame_index += 1;

        self.encoder
            .send_frame(&yuv_frame)
            .map_err(|error| QuiltError::encode(format!("send_frame failed: {error}")))?;
        self.drain_packets()
    }

    fn finish(mut self: Box<Self>) -> Result<(), QuiltError> {
        self.encoder
            .send_eof()
            .map_err(|error| QuiltError::encode(format!("send_eof failed: {error}")))?;
        self.drain_packets()?;
        self.output.write_trailer().map_err(|error| {
            QuiltError::encode(format!("cannot write trailer: {error}"))
        })?;
        log::info!(
            "Direct muxer wrote {} frames to {}",
            self.frame_index,
            self.path.display()
        );
        Ok(())
    }
}
