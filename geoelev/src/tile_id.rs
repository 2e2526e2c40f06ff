//! Tile addressing.
//!
//! Maps a coordinate pair to the 1° × 1° tile that contains it. Tiles are
//! named after their **southwest corner**: `{N|S}{lat}{E|W}{lon}`, with the
//! latitude magnitude padded to 2 digits and the longitude to 3.
//!
//! Flooring is applied to the signed coordinate before taking the absolute
//! value, so `-0.1°` belongs to the tile whose corner is `-1°` (`S01`), not `0°`.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Suffix of a stored tile archive.
pub const ARCHIVE_SUFFIX: &str = ".hgt.zip";

/// Identifier of a 1° × 1° tile, e.g. `N45E013` or `S32W152`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileId {
    south: i32,
    west: i32,
}

/// A string that is not a valid tile identifier.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid tile identifier: {0}")]
pub struct ParseTileIdError(pub String);

impl TileId {
    /// Builds the id from the integer southwest corner.
    pub fn new(south: i32, west: i32) -> Self {
        Self { south, west }
    }

    /// Returns the tile containing `(lat, lon)`.
    ///
    /// No range validation is applied; out-of-range and non-finite input
    /// saturates through the integer cast instead of panicking.
    ///
    /// # Examples
    ///
    /// ```
    /// use geoelev::TileId;
    ///
    /// assert_eq!(TileId::from_lat_lon(45.0, 13.0).to_string(), "N45E013");
    /// assert_eq!(TileId::from_lat_lon(25.0, -80.1).to_string(), "N25W081");
    /// assert_eq!(TileId::from_lat_lon(-32.0, 152.0).to_string(), "S32E152");
    /// ```
    pub fn from_lat_lon(lat: f64, lon: f64) -> Self {
        Self {
            south: lat.floor() as i32,
            west: lon.floor() as i32,
        }
    }

    /// Latitude of the southern edge (integer degrees).
    pub fn south(&self) -> i32 {
        self.south
    }

    /// Longitude of the western edge (integer degrees).
    pub fn west(&self) -> i32 {
        self.west
    }

    /// Storage key of the compressed tile, e.g. `N45E013.hgt.zip`.
    pub fn archive_name(&self) -> String {
        format!("{}{}", self, ARCHIVE_SUFFIX)
    }
}

/// Resolves a coordinate pair to its tile.
///
/// Pure arithmetic: resolving the same coordinates twice always yields the
/// same id and corner.
pub fn resolve(lat: f64, lon: f64) -> TileId {
    TileId::from_lat_lon(lat, lon)
}

impl fmt::Display for TileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let lat_prefix = if self.south >= 0 { 'N' } else { 'S' };
        let lon_prefix = if self.west >= 0 { 'E' } else { 'W' };

        write!(
            f,
            "{}{:02}{}{:03}",
            lat_prefix,
            self.south.unsigned_abs(),
            lon_prefix,
            self.west.unsigned_abs()
        )
    }
}

impl FromStr for TileId {
    type Err = ParseTileIdError;

    /// Parses `N45E013`, optionally with a directory and a `.hgt` or
    /// `.hgt.zip` suffix. Letters are case-insensitive.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseTileIdError(s.to_string());

        let name = s.rsplit(&['/', '\\'][..]).next().unwrap_or(s);
        let lower = name.to_ascii_lowercase();
        let name = if lower.ends_with(ARCHIVE_SUFFIX) {
            &name[..name.len() - ARCHIVE_SUFFIX.len()]
        } else if lower.ends_with(".hgt") {
            &name[..name.len() - ".hgt".len()]
        } else {
            name
        };

        if name.len() != 7 || !name.is_ascii() {
            return Err(invalid());
        }

        let bytes = name.as_bytes();
        let lat_sign = match bytes[0] {
            b'N' | b'n' => 1,
            b'S' | b's' => -1,
            _ => return Err(invalid()),
        };
        let lon_sign = match bytes[3] {
            b'E' | b'e' => 1,
            b'W' | b'w' => -1,
            _ => return Err(invalid()),
        };

        let digits = |part: &str| -> Result<i32, ParseTileIdError> {
            if !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(invalid());
            }
            part.parse().map_err(|_| invalid())
        };

        let lat = digits(&name[1..3])?;
        let lon = digits(&name[4..7])?;

        Ok(Self::new(lat * lat_sign, lon * lon_sign))
    }
}
