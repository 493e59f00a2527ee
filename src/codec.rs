//! Output codec profiles.
//!
//! Each [`CodecProfile`] fixes the container, encoder, pixel format, and
//! encoder arguments for one output flavour. Only the 8-bit 4:2:0 profiles
//! can be written by the in-process [direct muxer](crate::encode::DirectMuxer);
//! the rest always go through the [staged backend](crate::staged).

use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

/// The enumerated set of selectable output codecs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[allow(non_camel_case_types)]
pub enum CodecProfile {
    /// H.264 / AVC, YUV 4:2:0.
    #[default]
    H264_420,
    /// H.265 / HEVC, YUV 4:2:0.
    H265_420,
    /// Apple ProRes 422, 10-bit 4:2:2.
    ProRes422,
    /// H.264 / AVC, YUV 4:4:4.
    H264_444,
    /// H.265 / HEVC, YUV 4:4:4.
    H265_444,
    /// Apple ProRes 4444, 10-bit 4:4:4:4 with alpha.
    ProRes4444,
}

impl CodecProfile {
    /// Every profile, in menu order.
    pub const ALL: [CodecProfile; 6] = [
        CodecProfile::H264_420,
        CodecProfile::H265_420,
        CodecProfile::ProRes422,
        CodecProfile::H264_444,
        CodecProfile::H265_444,
        CodecProfile::ProRes4444,
    ];

    /// Container extension including the leading dot.
    pub fn container_extension(self) -> &'static str {
        match self {
            CodecProfile::ProRes422 | CodecProfile::ProRes4444 => ".mov",
            _ => ".mp4",
        }
    }

    /// FFmpeg encoder name.
    pub fn encoder_id(self) -> &'static str {
        match self {
            CodecProfile::H264_420 | CodecProfile::H264_444 => "libx264",
            CodecProfile::H265_420 | CodecProfile::H265_444 => "libx265",
            CodecProfile::ProRes422 | CodecProfile::ProRes4444 => "prores_ks",
        }
    }

    /// FFmpeg pixel format name of the encoded stream.
    pub fn pixel_format(self) -> &'static str {
        match self {
            CodecProfile::H264_420 | CodecProfile::H265_420 => "yuv420p",
            CodecProfile::H264_444 | CodecProfile::H265_444 => "yuv444p",
            CodecProfile::ProRes422 => "yuv422p10le",
            CodecProfile::ProRes4444 => "yuva444p10le",
        }
    }

    /// Codec-specific encoder arguments for the external encoder.
    pub fn encoder_args(self) -> &'static [&'static str] {
        encoder_args(self.encoder_id(), self.pixel_format())
    }

    /// Whether the direct muxer can express this profile's pixel format.
    ///
    /// 4:4:4, 4:4:4:4, and 10-bit planar formats are staged-only.
    pub fn direct_muxer_capable(self) -> bool {
        self.pixel_format() == "yuv420p"
    }

    /// One-line description for menus and `--help` output.
    pub fn description(self) -> &'static str {
        match self {
            CodecProfile::H264_420 => "H.264/AVC (YUV 4:2:0): good compatibility, moderate file size",
            CodecProfile::H265_420 => {
                "H.265/HEVC (YUV 4:2:0): better compression, may need newer devices"
            }
            CodecProfile::ProRes422 => {
                "Apple ProRes 422 (YUV 4:2:2): high quality, large files, best for editing"
            }
            CodecProfile::H264_444 => {
                "H.264/AVC (YUV 4:4:4): full chroma resolution, ideal for lenticular displays"
            }
            CodecProfile::H265_444 => "H.265/HEVC (YUV 4:4:4): best compression with full chroma",
            CodecProfile::ProRes4444 => {
                "Apple ProRes 4444 (YUV 4:4:4:4 + alpha): highest quality"
            }
        }
    }

    /// Command-line selector accepted by [`FromStr`].
    pub fn selector(self) -> &'static str {
        match self {
            CodecProfile::H264_420 => "h264",
            CodecProfile::H265_420 => "h265",
            CodecProfile::ProRes422 => "prores422",
            CodecProfile::H264_444 => "h264-444",
            CodecProfile::H265_444 => "h265-444",
            CodecProfile::ProRes4444 => "prores4444",
        }
    }
}

impl Display for CodecProfile {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.selector())
    }
}

impl FromStr for CodecProfile {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase().replace(['_', ' '], "-");
        match normalized.as_str() {
            "h264" | "h.264" | "avc" | "h264-420" => Ok(CodecProfile::H264_420),
            "h265" | "h.265" | "hevc" | "h265-420" => Ok(CodecProfile::H265_420),
            "prores422" | "prores-422" | "prores" => Ok(CodecProfile::ProRes422),
            "h264-444" | "h.264-444" => Ok(CodecProfile::H264_444),
            "h265-444" | "h.265-444" | "hevc-444" => Ok(CodecProfile::H265_444),
            "prores4444" | "prores-4444" => Ok(CodecProfile::ProRes4444),
            _ => Err(format!("unsupported codec: {value}")),
        }
    }
}

/// Static lookup of encoder arguments keyed by encoder id and pixel format.
pub fn encoder_args(encoder_id: &str, pixel_format: &str) -> &'static [&'static str] {
    match (encoder_id, pixel_format) {
        ("libx264", "yuv444p") => &["-crf", "15", "-preset", "medium", "-profile:v", "high444"],
        ("libx264", _) => &["-crf", "18", "-preset", "medium"],
        ("libx265", "yuv444p") => &["-crf", "17", "-preset", "medium"],
        ("libx265", _) => &["-crf", "20", "-preset", "medium"],
        ("prores_ks", "yuva444p10le") => &["-profile:v", "4"],
        ("prores_ks", _) => &["-profile:v", "2"],
        _ => &[],
    }
}
