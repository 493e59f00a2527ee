//! Quilt geometry from the source filename.
//!
//! Quilt videos carry their tile layout in the filename, e.g.
//! `clip_qs5x9a1.87.mp4` is a 5-column, 9-row quilt whose tiles have an
//! aspect ratio of 1.87. [`parse_quilt_filename`] never fails: when the
//! convention is absent it falls back to [`QuiltGeometry::default`] and
//! reports a [`FilenameParseWarning`].
//!
//! # Example
//!
//! ```
//! use quiltweave::parse_quilt_filename;
//!
//! let (geometry, warning) = parse_quilt_filename("clip_qs5x9a1.87.mp4");
//! assert_eq!((geometry.columns, geometry.rows), (5, 9));
//! assert!(warning.is_none());
//! ```

use std::fmt::{Display, Formatter, Result as FmtResult};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

static QUILT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"qs(\d+)x(\d+)a(\d+(?:\.\d+)?|\.\d+)").expect("quilt filename pattern is valid")
});

/// Suffix appended to generated output filenames.
const OUTPUT_SUFFIX: &str = "_LookingGlassReady";

/// Tile grid layout of a quilt frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuiltGeometry {
    /// Number of tile columns (at least 1).
    pub columns: u32,
    /// Number of tile rows (at least 1).
    pub rows: u32,
    /// Aspect ratio of a single tile (greater than 0).
    pub aspect_ratio: f64,
}

impl Default for QuiltGeometry {
    /// The 5×9 layout at aspect 1.87 used by portrait displays.
    fn default() -> Self {
        Self {
            columns: 5,
            rows: 9,
            aspect_ratio: 1.87,
        }
    }
}

impl QuiltGeometry {
    /// Build a geometry, returning `None` for a degenerate layout.
    pub fn new(columns: u32, rows: u32, aspect_ratio: f64) -> Option<Self> {
        (columns >= 1 && rows >= 1 && aspect_ratio.is_finite() && aspect_ratio > 0.0).then_some(
            Self {
                columns,
                rows,
                aspect_ratio,
            },
        )
    }

    /// Total number of views in the quilt.
    pub fn view_count(&self) -> u32 {
        self.columns * self.rows
    }
}

/// Non-fatal notice that the filename did not describe a usable quilt layout.
#[derive(Debug, Clone, PartialEq)]
pub struct FilenameParseWarning {
    /// The filename that was inspected.
    pub filename: String,
    /// The geometry substituted for it.
    pub substituted: QuiltGeometry,
}

impl Display for FilenameParseWarning {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(
            f,
            "could not parse quilt parameters from {:?}, using defaults ({}x{}, aspect {})",
            self.filename, self.substituted.columns, self.substituted.rows, self.substituted.aspect_ratio,
        )
    }
}

/// Extract the quilt layout from a filename or path.
///
/// Only the final path component is inspected. A match whose values are
/// degenerate (zero columns or rows, zero aspect, overflowing integers) is
/// treated like no match at all.
pub fn parse_quilt_filename<P: AsRef<Path>>(
    path: P,
) -> (QuiltGeometry, Option<FilenameParseWarning>) {
    let path = path.as_ref();
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned());

    if let Some(geometry) = match_geometry(&name) {
        log::debug!(
            "Quilt parameters from {name:?}: {}x{}, aspect {}",
            geometry.columns, geometry.rows, geometry.aspect_ratio,
        );
        return (geometry, None);
    }

    let warning = FilenameParseWarning {
        filename: name,
        substituted: QuiltGeometry::default(),
    };
    log::warn!("{warning}");
    (QuiltGeometry::default(), Some(warning))
}

fn match_geometry(name: &str) -> Option<QuiltGeometry> {
    let captures = QUILT_PATTERN.captures(name)?;
    let columns = captures[1].parse::<u32>().ok()?;
    let rows = captures[2].parse::<u32>().ok()?;
    let aspect_ratio = captures[3].parse::<f64>().ok()?;
    columns.checked_mul(rows)?;
    QuiltGeometry::new(columns, rows, aspect_ratio)
}

/// Suggest an output path next to `input`.
///
/// Everything from `_qs` onwards is dropped from the stem, then
/// `_LookingGlassReady` and `extension` (e.g. `".mp4"`) are appended.
pub fn suggest_output_path<P: AsRef<Path>>(input: P, extension: &str) -> PathBuf {
    let input = input.as_ref();
    let stem = input
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    let base = match stem.find("_qs") {
        Some(index) => &stem[..index],
        None => stem.as_str(),
    };
    let extension = extension.trim_start_matches('.');
    let file_name = format!("{base}{OUTPUT_SUFFIX}.{extension}");
    match input.parent() {
        Some(parent) => parent.join(file_name),
        None => PathBuf::from(file_name),
    }
}
