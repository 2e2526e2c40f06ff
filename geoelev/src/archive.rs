//! Single-entry ZIP extraction.
//!
//! Every SRTM archive holds exactly one `.hgt` grid. An archive with no
//! entries, or with more than one, is treated as corrupt rather than guessing
//! which entry to use.

use std::io::{Cursor, Read};

use zip::ZipArchive;

use crate::error::{GeoElevError, Result};
use crate::grid::SrtmResolution;
use crate::tile_id::TileId;

/// Largest grid an archive may unpack to: one SRTM1 tile.
pub const MAX_ENTRY_BYTES: u64 = {
    let side = SrtmResolution::Srtm1.samples() as u64;
    2 * side * side
};

/// Extract the raw bytes of the only file in a ZIP archive.
///
/// # Errors
///
/// - [`GeoElevError::CorruptArchive`] if the bytes are not a readable ZIP
/// - [`GeoElevError::EmptyArchive`] if the archive has no entries
/// - [`GeoElevError::MultipleArchiveEntries`] if it has more than one
/// - [`GeoElevError::CorruptArchive`] if the entry declares or unpacks to more
///   than [`MAX_ENTRY_BYTES`]
pub fn extract_single_entry(tile: &TileId, data: &[u8]) -> Result<Vec<u8>> {
    extract_with_limit(tile, data, MAX_ENTRY_BYTES)
}

fn extract_with_limit(tile: &TileId, data: &[u8], limit: u64) -> Result<Vec<u8>> {
    let corrupt = |reason: String| GeoElevError::CorruptArchive {
        tile: *tile,
        reason,
    };

    let mut archive = ZipArchive::new(Cursor::new(data))
        .map_err(|e| corrupt(format!("Failed to read ZIP archive: {}", e)))?;

    match archive.len() {
        0 => return Err(GeoElevError::EmptyArchive { tile: *tile }),
        1 => {}
        count => return Err(GeoElevError::MultipleArchiveEntries { tile: *tile, count }),
    }

    let mut entry = archive
        .by_index(0)
        .map_err(|e| corrupt(format!("Failed to read ZIP entry: {}", e)))?;

    // The header size is untrusted, never allocate from it
    if entry.size() > limit {
        return Err(corrupt(format!(
            "entry declares {} bytes, limit is {}",
            entry.size(),
            limit
        )));
    }

    let name = entry.name().to_string();
    let mut contents = Vec::new();
    (&mut entry)
        .take(limit + 1)
        .read_to_end(&mut contents)
        .map_err(|e| corrupt(format!("Failed to extract {}: {}", name, e)))?;

    if contents.len() as u64 > limit {
        return Err(corrupt(format!("entry unpacks to more than {} bytes", limit)));
    }

    Ok(contents)
}
