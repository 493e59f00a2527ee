//! Sequential frame sources.
//!
//! The pipeline pulls quilt frames through the [`FrameSource`] trait.
//! [`VideoSource`] is the FFmpeg-backed implementation: it opens a video
//! file, probes its properties once, and then decodes strictly forward (no
//! seeking), converting every frame to packed RGB.

use std::path::{Path, PathBuf};

use ffmpeg_next::{
    Error as FfmpegError, Packet,
    codec::context::Context as CodecContext,
    decoder::Video as VideoDecoder,
    format::{Pixel, context::Input},
    frame::Video as VideoFrame,
    media::Type,
    software::scaling::{Context as ScalingContext, Flags as ScalingFlags},
};
use image::RgbImage;

use crate::error::QuiltError;
use crate::mapper::FrameBuffer;

/// Properties read from the source before streaming starts.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceProperties {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Frames per second (may be approximate for variable-rate content).
    pub frames_per_second: f64,
    /// Total frame count, if the container reports one or it can be
    /// estimated from the duration.
    pub frame_count: Option<u64>,
    /// Codec name (e.g. `"h264"`).
    pub codec: String,
}

/// A forward-only supplier of quilt frames.
pub trait FrameSource {
    /// Properties probed when the source was opened.
    fn properties(&self) -> &SourceProperties;

    /// Decode the next frame, or `None` at end of stream.
    fn next_frame(&mut self) -> Result<Option<FrameBuffer>, QuiltError>;
}

/// FFmpeg-backed video file source.
pub struct VideoSource {
    input_context: Input,
    decoder: VideoDecoder,
    scaler: ScalingContext,
    video_stream_index: usize,
    properties: SourceProperties,
    decoded_frame: VideoFrame,
    rgb_frame: VideoFrame,
    eof_sent: bool,
    done: bool,
    path: PathBuf,
}

impl VideoSource {
    /// Open a video file and probe its properties.
    ///
    /// # Errors
    ///
    /// - [`QuiltError::Input`] if the path does not exist.
    /// - [`QuiltError::SourceOpen`] if FFmpeg cannot open it or it has no
    ///   decodable video stream.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, QuiltError> {
        let path = path.as_ref();
        log::debug!("Opening source video: {}", path.display());

        if !path.is_file() {
            return Err(QuiltError::Input {
                path: path.to_path_buf(),
                reason: "file does not exist".to_string(),
            });
        }

        let open_error = |reason: String| QuiltError::SourceOpen {
            path: path.to_path_buf(),
            reason,
        };

        crate::ffmpeg::initialize()
            .map_err(|error| open_error(format!("FFmpeg initialisation failed: {error}")))?;

        let input_context =
            ffmpeg_next::format::input(&path).map_err(|error| open_error(error.to_string()))?;

        let stream = input_context
            .streams()
            .best(Type::Video)
            .ok_or_else(|| open_error("no video stream found".to_string()))?;
        let video_stream_index = stream.index();

        let decoder_context = CodecContext::from_parameters(stream.parameters())
            .map_err(|error| open_error(format!("cannot read codec parameters: {error}")))?;
        let decoder = decoder_context
            .decoder()
            .video()
            .map_err(|error| open_error(format!("cannot create video decoder: {error}")))?;

        let width = decoder.width();
        let height = decoder.height();
        if width == 0 || height == 0 {
            return Err(open_error("video stream reports no frame size".to_string()));
        }

        let frame_rate = stream.avg_frame_rate();
        let frames_per_second = if frame_rate.denominator() != 0 && frame_rate.numerator() > 0 {
            frame_rate.numerator() as f64 / frame_rate.denominator() as f64
        } else {
            let rate = stream.rate();
            if rate.denominator() != 0 && rate.numerator() > 0 {
                rate.numerator() as f64 / rate.denominator() as f64
            } else {
                0.0
            }
        };
        if frames_per_second <= 0.0 {
            return Err(open_error("video stream reports no frame rate".to_string()));
        }

        let frame_count = if stream.frames() > 0 {
            Some(stream.frames() as u64)
        } else {
            let duration_microseconds = input_context.duration();
            (duration_microseconds > 0).then(|| {
                (duration_microseconds as f64 / 1_000_000.0 * frames_per_second).round() as u64
            })
        }
        .filter(|&count| count > 0);

        let codec = decoder
            .codec()
            .map(|codec| codec.name().to_string())
            .unwrap_or_else(|| "unknown".to_string());

        let scaler = ScalingContext::get(
            decoder.format(),
            width,
            height,
            Pixel::RGB24,
            width,
            height,
            ScalingFlags::POINT,
        )
        .map_err(|error| open_error(format!("cannot create RGB converter: {error}")))?;

        let properties = SourceProperties {
            width,
            height,
            frames_per_second,
            frame_count,
            codec,
        };
        log::info!(
            "Source {}: {}x{} @ {:.3} fps, {} frames [{}]",
            path.display(),
            properties.width,
            properties.height,
            properties.frames_per_second,
            properties
                .frame_count
                .map_or_else(|| "unknown".to_string(), |count| count.to_string()),
            properties.codec,
        );

        Ok(Self {
            input_context,
            decoder,
            scaler,
            video_stream_index,
            properties,
            decoded_frame: VideoFrame::empty(),
            rgb_frame: VideoFrame::empty(),
            eof_sent: false,
            done: false,
            path: path.to_path_buf(),
        })
    }

    fn convert_current_frame(&mut self) -> Result<FrameBuffer, QuiltError> {
        self.scaler.run(&self.decoded_frame, &mut self.rgb_frame)?;

        let width = self.properties.width;
        let height = self.properties.height;
        let buffer = packed_rgb(&self.rgb_frame, width, height);
        RgbImage::from_raw(width, height, buffer).ok_or_else(|| {
            QuiltError::VideoDecode(format!(
                "decoded frame from {} does not fill a {width}x{height} RGB image",
                self.path.display()
            ))
        })
    }
}

impl FrameSource for VideoSource {
    fn properties(&self) -> &SourceProperties {
        &self.properties
    }

    fn next_frame(&mut self) -> Result<Option<FrameBuffer>, QuiltError> {
        if self.done {
            return Ok(None);
        }

        loop {
            if self.decoder.receive_frame(&mut self.decoded_frame).is_ok() {
                return self.convert_current_frame().map(Some);
            }

            if self.eof_sent {
                self.done = true;
                return Ok(None);
            }

            let mut packet = Packet::empty();
            match packet.read(&mut self.input_context) {
                Ok(()) => {
                    if packet.stream() == self.video_stream_index {
                        self.decoder.send_packet(&packet).map_err(|error| {
                            QuiltError::VideoDecode(format!("send_packet failed: {error}"))
                        })?;
                    }
                }
                Err(FfmpegError::Eof) => {
                    self.decoder.send_eof()?;
                    self.eof_sent = true;
                }
                Err(error) => {
                    self.done = true;
                    return Err(QuiltError::VideoDecode(format!(
                        "failed to read from {}: {error}",
                        self.path.display()
                    )));
                }
            }
        }
    }
}

/// Copy an RGB24 frame into a tightly packed buffer, dropping row padding.
fn packed_rgb(video_frame: &VideoFrame, width: u32, height: u32) -> Vec<u8> {
    let stride = video_frame.stride(0);
    let row_len = width as usize * 3;
    let data = video_frame.data(0);

    if stride == row_len {
        data[..row_len * height as usize].to_vec()
    } else {
        let mut buffer = Vec::with_capacity(row_len * height as usize);
        for row in 0..height as usize {
            let row_start = row * stride;
            buffer.extend_from_slice(&data[row_start..row_start + row_len]);
        }
        buffer
    }
}
