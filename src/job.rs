//! Conversion job description.

use std::path::{Path, PathBuf};

use crate::codec::CodecProfile;
use crate::filename::{
    FilenameParseWarning, QuiltGeometry, parse_quilt_filename, suggest_output_path,
};

/// Everything that identifies one conversion: paths, codec, and the quilt
/// layout derived from the input filename.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversionJob {
    /// Source quilt video.
    pub input_path: PathBuf,
    /// Display calibration record (JSON).
    pub calibration_path: PathBuf,
    /// Destination video file.
    pub output_path: PathBuf,
    /// Output codec profile.
    pub codec: CodecProfile,
    /// Tile layout of the source.
    pub geometry: QuiltGeometry,
    /// Set when `geometry` had to fall back to the defaults.
    pub geometry_warning: Option<FilenameParseWarning>,
}

impl ConversionJob {
    /// Describe a job, deriving the quilt layout from `input_path`.
    pub fn new(
        input_path: impl Into<PathBuf>,
        calibration_path: impl Into<PathBuf>,
        output_path: impl Into<PathBuf>,
        codec: CodecProfile,
    ) -> Self {
        let input_path = input_path.into();
        let (geometry, geometry_warning) = parse_quilt_filename(&input_path);
        Self {
            input_path,
            calibration_path: calibration_path.into(),
            output_path: output_path.into(),
            codec,
            geometry,
            geometry_warning,
        }
    }

    /// Like [`new`](Self::new), writing next to the input with a name
    /// derived from it (see [`suggest_output_path`]).
    pub fn with_suggested_output(
        input_path: impl Into<PathBuf>,
        calibration_path: impl Into<PathBuf>,
        codec: CodecProfile,
    ) -> Self {
        let input_path = input_path.into();
        let output_path = suggest_output_path(&input_path, codec.container_extension());
        Self::new(input_path, calibration_path, output_path, codec)
    }

    /// Override the quilt layout. Clears any filename warning.
    #[must_use]
    pub fn with_geometry(mut self, geometry: QuiltGeometry) -> Self {
        self.geometry = geometry;
        self.geometry_warning = None;
        self
    }

    /// Source file name, for display.
    pub fn input_name(&self) -> String {
        file_name(&self.input_path)
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
