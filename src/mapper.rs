//! Quilt-to-display pixel mapping.
//!
//! A lenticular panel shows each slanted stripe of pixels to a different
//! viewing angle. [`ViewMapper`] decides, for every destination pixel, which
//! quilt tile (view) is visible through the lenticule above it and which
//! pixel of that tile to copy. Sampling is nearest-neighbour: no blending.
//!
//! The mapping depends only on the quilt geometry, the calibration, and the
//! source frame size, so it is computed once per job into a sample table.
//! Each frame is then a parallel, row-by-row gather through that table.
//!
//! # Example
//!
//! ```
//! use quiltweave::{CalibrationProfile, QuiltGeometry, ViewMapper};
//!
//! let calibration = CalibrationProfile {
//!     screen_width: 64,
//!     screen_height: 48,
//!     pitch: 50.0,
//!     slope: -5.0,
//!     center: 0.1,
//!     dpi: 300.0,
//!     fringe: None,
//! };
//! let mapper = ViewMapper::new(QuiltGeometry::default(), &calibration, 500, 900)?;
//! let (x, y) = mapper.source_coordinate(10, 20);
//! assert!(x < 500 && y < 900);
//! # Ok::<(), quiltweave::QuiltError>(())
//! ```

use image::RgbImage;
use rayon::prelude::*;

use crate::calibration::CalibrationProfile;
use crate::error::QuiltError;
use crate::filename::QuiltGeometry;

/// An 8-bit RGB frame, tightly packed.
pub type FrameBuffer = RgbImage;

const CHANNELS: usize = 3;

/// Per-job pixel mapper from quilt frames to display frames.
#[derive(Debug, Clone)]
pub struct ViewMapper {
    columns: u32,
    rows: u32,
    screen_width: u32,
    screen_height: u32,
    source_width: u32,
    source_height: u32,
    center: f64,
    pitch_calc: f64,
    tilt: f64,
    tile_width: u32,
    tile_height: u32,
    /// Source pixel index for every destination pixel, row-major.
    table: Vec<u32>,
}

impl ViewMapper {
    /// Derive the per-job constants and build the sample table.
    ///
    /// # Errors
    ///
    /// Returns [`QuiltError::VideoDecode`] if the source frame size is empty
    /// or too large to index.
    pub fn new(
        geometry: QuiltGeometry,
        calibration: &CalibrationProfile,
        source_width: u32,
        source_height: u32,
    ) -> Result<Self, QuiltError> {
        if source_width == 0 || source_height == 0 {
            return Err(QuiltError::VideoDecode(format!(
                "source frame has no pixels ({source_width}x{source_height})"
            )));
        }
        if source_width.checked_mul(source_height).is_none() {
            return Err(QuiltError::VideoDecode(format!(
                "source frame {source_width}x{source_height} is too large"
            )));
        }

        let screen_width = calibration.screen_width;
        let screen_height = calibration.screen_height;
        let screen_inches = screen_width as f64 / calibration.dpi;
        let pitch_calc =
            calibration.pitch * screen_inches * (1.0 / calibration.slope).atan().cos();
        let tilt = screen_height as f64 / (screen_width as f64 * calibration.slope);

        let mut mapper = Self {
            columns: geometry.columns,
            rows: geometry.rows,
            screen_width,
            screen_height,
            source_width,
            source_height,
            center: calibration.center,
            pitch_calc,
            tilt,
            tile_width: source_width / geometry.columns,
            tile_height: source_height / geometry.rows,
            table: Vec::new(),
        };

        log::debug!(
            "View mapper: {}x{} -> {}x{} (pitchCalc={:.6}, tilt={:.6}, tile={}x{})",
            source_width,
            source_height,
            screen_width,
            screen_height,
            pitch_calc,
            tilt,
            mapper.tile_width,
            mapper.tile_height,
        );

        let mut table = vec![0u32; screen_width as usize * screen_height as usize];
        table
            .par_chunks_mut(screen_width as usize)
            .enumerate()
            .for_each(|(y, row)| {
                for (x, slot) in row.iter_mut().enumerate() {
                    let (source_x, source_y) = mapper.source_coordinate(x as u32, y as u32);
                    *slot = source_y * source_width + source_x;
                }
            });
        mapper.table = table;

        Ok(mapper)
    }

    /// Output canvas size `(width, height)`.
    pub fn output_size(&self) -> (u32, u32) {
        (self.screen_width, self.screen_height)
    }

    /// Expected source frame size `(width, height)`.
    pub fn source_size(&self) -> (u32, u32) {
        (self.source_width, self.source_height)
    }

    /// The quilt tile `(column, row)` visible at destination pixel `(x, y)`.
    pub fn tile_for(&self, x: u32, y: u32) -> (u32, u32) {
        let coord_x = x as f64 / self.screen_width as f64;
        let coord_y = y as f64 / self.screen_height as f64;
        self.tile_at(coord_x, coord_y)
    }

    fn tile_at(&self, coord_x: f64, coord_y: f64) -> (u32, u32) {
        let columns = self.columns as f64;
        let phase = (coord_x + coord_y * self.tilt) * self.pitch_calc - self.center;
        let phase = (phase + 0.5).rem_euclid(1.0);
        let view_index = phase * columns * self.rows as f64;

        let tile_row = clamp_floor(view_index / columns, self.rows);
        // Views run right-to-left across a row to match the lenticule direction.
        let reversed = (self.columns as i64 - 1) - view_index.rem_euclid(columns).floor() as i64;
        let tile_column = reversed.clamp(0, self.columns as i64 - 1) as u32;
        (tile_column, tile_row)
    }

    /// The source pixel sampled for destination pixel `(x, y)`.
    ///
    /// Always within `[0, source_width) × [0, source_height)`. Pixels past
    /// the last whole tile on the right or bottom edge are never sampled.
    pub fn source_coordinate(&self, x: u32, y: u32) -> (u32, u32) {
        let coord_x = x as f64 / self.screen_width as f64;
        let coord_y = y as f64 / self.screen_height as f64;
        let (tile_column, tile_row) = self.tile_at(coord_x, coord_y);

        let tile_width = self.tile_width as f64;
        let tile_height = self.tile_height as f64;
        let source_x = clamp_floor(
            tile_column as f64 * tile_width + coord_x * tile_width,
            self.source_width,
        );
        let source_y = clamp_floor(
            tile_row as f64 * tile_height + coord_y * tile_height,
            self.source_height,
        );
        (source_x, source_y)
    }

    /// Transform one quilt frame into a new display frame.
    ///
    /// Rows are filled in parallel on the current rayon pool. Each row owns
    /// a disjoint slice of the output, so the result does not depend on
    /// scheduling.
    ///
    /// # Errors
    ///
    /// Returns [`QuiltError::FrameSize`] if `source` is not the size this
    /// mapper was built for.
    pub fn render(&self, source: &FrameBuffer) -> Result<FrameBuffer, QuiltError> {
        if source.dimensions() != (self.source_width, self.source_height) {
            return Err(QuiltError::FrameSize {
                expected_width: self.source_width,
                expected_height: self.source_height,
                actual_width: source.width(),
                actual_height: source.height(),
            });
        }

        let row_len = self.screen_width as usize * CHANNELS;
        let source_bytes = source.as_raw();
        let mut output = vec![0u8; row_len * self.screen_height as usize];

        output
            .par_chunks_mut(row_len)
            .zip(self.table.par_chunks(self.screen_width as usize))
            .for_each(|(row, offsets)| {
                for (pixel, &offset) in row.chunks_exact_mut(CHANNELS).zip(offsets) {
                    let start = offset as usize * CHANNELS;
                    pixel.copy_from_slice(&source_bytes[start..start + CHANNELS]);
                }
            });

        RgbImage::from_raw(self.screen_width, self.screen_height, output).ok_or_else(|| {
            QuiltError::VideoDecode("failed to assemble output frame".to_string())
        })
    }
}

/// `clamp(floor(value), 0, limit - 1)` for a positive `limit`.
fn clamp_floor(value: f64, limit: u32) -> u32 {
    let floored = value.floor();
    if floored.is_nan() || floored < 0.0 {
        0
    } else if floored >= (limit - 1) as f64 {
        limit - 1
    } else {
        floored as u32
    }
}
