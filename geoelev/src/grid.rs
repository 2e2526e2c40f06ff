//! Decoding of raw `.hgt` grids.
//!
//! An `.hgt` grid is a square of big-endian 16-bit samples stored row-major,
//! north to south and west to east. Row 0 is the northern edge of the tile.
//! The side length is implied by the byte length: `side = sqrt(len / 2)`.

use crate::error::{GeoElevError, Result};
use crate::tile_id::TileId;

/// Samples above this value mark points where no elevation was measured.
pub const NO_DATA_THRESHOLD: u16 = 9000;

/// Number of samples per row/column for SRTM1
pub const SRTM1_SAMPLES: usize = 3601;

/// Number of samples per row/column for SRTM3
pub const SRTM3_SAMPLES: usize = 1201;

/// Resolution of a well-known SRTM grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SrtmResolution {
    /// SRTM1: 1 arc-second (~30m) resolution
    Srtm1,
    /// SRTM3: 3 arc-second (~90m) resolution
    Srtm3,
}

impl SrtmResolution {
    /// Detect the resolution from a grid side length.
    pub fn from_side_length(side: usize) -> Option<Self> {
        match side {
            SRTM1_SAMPLES => Some(SrtmResolution::Srtm1),
            SRTM3_SAMPLES => Some(SrtmResolution::Srtm3),
            _ => None,
        }
    }

    /// Returns the number of samples per row/column for this resolution.
    pub const fn samples(&self) -> usize {
        match self {
            SrtmResolution::Srtm1 => SRTM1_SAMPLES,
            SrtmResolution::Srtm3 => SRTM3_SAMPLES,
        }
    }

    /// Returns the approximate resolution in meters.
    pub fn meters(&self) -> f64 {
        match self {
            SrtmResolution::Srtm1 => 30.0,
            SrtmResolution::Srtm3 => 90.0,
        }
    }
}

/// A decoded tile grid held in memory.
#[derive(Debug, Clone)]
pub struct HgtGrid {
    tile: TileId,
    data: Vec<u8>,
    side: usize,
}

impl HgtGrid {
    /// Validate raw grid bytes for `tile`.
    ///
    /// # Errors
    ///
    /// Returns [`GeoElevError::InvalidGridSize`] unless the length is
    /// `2 * side * side` for some positive `side`.
    pub fn new(tile: TileId, data: Vec<u8>) -> Result<Self> {
        let size = data.len();
        let side = side_length(size).ok_or(GeoElevError::InvalidGridSize { tile, size })?;

        Ok(Self { tile, data, side })
    }

    /// Get the elevation at the specified coordinates.
    ///
    /// Picks the sample at the lower-left grid point of the cell containing
    /// the query (no interpolation).
    ///
    /// # Returns
    ///
    /// - `Ok(Some(elevation))` - elevation in meters
    /// - `Ok(None)` - the sample is above [`NO_DATA_THRESHOLD`]
    ///
    /// # Errors
    ///
    /// Returns [`GeoElevError::OutOfRange`] if the computed row or column is
    /// outside the grid.
    pub fn elevation(&self, lat: f64, lon: f64) -> Result<Option<i16>> {
        let (row, col) = self.cell(lat, lon).ok_or(GeoElevError::OutOfRange {
            tile: self.tile,
            lat,
            lon,
        })?;

        let offset = (row * self.side + col) * 2;
        let value = u16::from_be_bytes([self.data[offset], self.data[offset + 1]]);

        if value > NO_DATA_THRESHOLD {
            Ok(None)
        } else {
            Ok(Some(value as i16))
        }
    }

    /// Row and column of the sample for `(lat, lon)`, if inside the grid.
    fn cell(&self, lat: f64, lon: f64) -> Option<(usize, usize)> {
        let scale = (self.side - 1) as f64;
        let row = ((f64::from(self.tile.south()) + 1.0 - lat) * scale).floor();
        let col = ((lon - f64::from(self.tile.west())) * scale).floor();

        let side = self.side as f64;
        let inside = |v: f64| v.is_finite() && v >= 0.0 && v < side;
        if !inside(row) || !inside(col) {
            return None;
        }

        Some((row as usize, col as usize))
    }

    /// The tile this grid belongs to.
    pub fn tile(&self) -> TileId {
        self.tile
    }

    /// Number of samples per row/column.
    pub fn side_length(&self) -> usize {
        self.side
    }

    /// Well-known resolution, if the side length matches SRTM1 or SRTM3.
    pub fn resolution(&self) -> Option<SrtmResolution> {
        SrtmResolution::from_side_length(self.side)
    }

    /// Size of the raw grid in bytes.
    pub fn byte_len(&self) -> usize {
        self.data.len()
    }
}

/// `sqrt(len / 2)` if it is a positive integer and `len` is even.
fn side_length(len: usize) -> Option<usize> {
    if len == 0 || len % 2 != 0 {
        return None;
    }
    let samples = len / 2;
    let side = (samples as f64).sqrt().round() as usize;
    (side > 0 && side.checked_mul(side) == Some(samples)).then_some(side)
}
