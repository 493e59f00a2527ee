//! Display calibration records.
//!
//! A lenticular display ships a small JSON record (usually `visual.json`)
//! describing its lenticule geometry. Fields appear either as bare numbers or
//! wrapped in an object with a `value` key:
//!
//! ```json
//! { "pitch": { "value": 49.8 }, "slope": -5.2, "center": 0.1, "DPI": 324,
//!   "screenW": 1536, "screenH": 2048 }
//! ```
//!
//! [`CalibrationProfile::load`] resolves both shapes once into a flat,
//! validated profile. Loading is all-or-nothing.

use std::fs;
use std::path::Path;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::QuiltError;

/// Per-display optical constants.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationProfile {
    /// Panel width in pixels.
    pub screen_width: u32,
    /// Panel height in pixels.
    pub screen_height: u32,
    /// Lenticule pitch in lenses per inch.
    pub pitch: f64,
    /// Lenticule slope. Never zero.
    pub slope: f64,
    /// Phase offset of the lenticule pattern.
    pub center: f64,
    /// Panel pixel density.
    pub dpi: f64,
    /// Optional fringe correction. Carried but not used by the mapper.
    pub fringe: Option<f64>,
}

/// A scalar as it may appear in a record: a JSON number or a numeric string.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Scalar {
    Number(f64),
    Text(String),
}

/// The two accepted field shapes.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FieldValue {
    Bare(Scalar),
    Wrapped { value: Scalar },
}

impl FieldValue {
    fn resolve(&self) -> Option<f64> {
        let scalar = match self {
            FieldValue::Bare(scalar) | FieldValue::Wrapped { value: scalar } => scalar,
        };
        let number = match scalar {
            Scalar::Number(number) => *number,
            Scalar::Text(text) => text.trim().parse::<f64>().ok()?,
        };
        number.is_finite().then_some(number)
    }
}

impl CalibrationProfile {
    /// Load and validate a calibration record from disk.
    ///
    /// # Errors
    ///
    /// - [`QuiltError::Input`] if the file is missing or unreadable.
    /// - [`QuiltError::Calibration`] if the content is not valid JSON, a
    ///   required key is missing, or a value is not a usable number.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, QuiltError> {
        let path = path.as_ref();
        log::debug!("Loading calibration from {}", path.display());

        let text = fs::read_to_string(path).map_err(|error| QuiltError::Input {
            path: path.to_path_buf(),
            reason: error.to_string(),
        })?;
        let profile = Self::from_json_str(&text)?;

        log::info!(
            "Loaded calibration: {}x{} (pitch={}, slope={}, center={}, DPI={})",
            profile.screen_width,
            profile.screen_height,
            profile.pitch,
            profile.slope,
            profile.center,
            profile.dpi,
        );
        Ok(profile)
    }

    /// Parse a calibration record from a JSON string.
    pub fn from_json_str(text: &str) -> Result<Self, QuiltError> {
        let value: Value = serde_json::from_str(text)
            .map_err(|error| QuiltError::Calibration(format!("invalid JSON: {error}")))?;
        let record = value.as_object().ok_or_else(|| {
            QuiltError::Calibration("calibration record must be a JSON object".to_string())
        })?;
        Self::from_record(record)
    }

    fn from_record(record: &Map<String, Value>) -> Result<Self, QuiltError> {
        let screen_width = required(record, "screenW")?;
        let screen_height = required(record, "screenH")?;
        let pitch = required(record, "pitch")?;
        let slope = required(record, "slope")?;
        let center = required(record, "center")?;
        let dpi = required(record, "DPI")?;
        let fringe = optional(record, "fringe")?;

        let screen_width = pixel_extent("screenW", screen_width)?;
        let screen_height = pixel_extent("screenH", screen_height)?;
        if dpi <= 0.0 {
            return Err(QuiltError::Calibration(format!(
                "DPI must be greater than zero (got {dpi})"
            )));
        }
        if slope == 0.0 {
            return Err(QuiltError::Calibration("slope must be non-zero".to_string()));
        }

        Ok(Self {
            screen_width,
            screen_height,
            pitch,
            slope,
            center,
            dpi,
            fringe,
        })
    }
}

fn required(record: &Map<String, Value>, key: &str) -> Result<f64, QuiltError> {
    optional(record, key)?
        .ok_or_else(|| QuiltError::Calibration(format!("missing required key `{key}`")))
}

fn optional(record: &Map<String, Value>, key: &str) -> Result<Option<f64>, QuiltError> {
    let Some(raw) = record.get(key) else {
        return Ok(None);
    };
    let field = FieldValue::deserialize(raw)
        .map_err(|_| QuiltError::Calibration(format!("`{key}` is not a number: {raw}")))?;
    field
        .resolve()
        .map(Some)
        .ok_or_else(|| QuiltError::Calibration(format!("`{key}` is not a number: {raw}")))
}

fn pixel_extent(key: &str, value: f64) -> Result<u32, QuiltError> {
    let truncated = value.trunc();
    if truncated < 1.0 || truncated > u32::MAX as f64 {
        return Err(QuiltError::Calibration(format!(
            "`{key}` must be a positive pixel count (got {value})"
        )));
    }
    Ok(truncated as u32)
}
