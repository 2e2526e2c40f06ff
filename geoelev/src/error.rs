//! Error types for the geoelev library.

use std::sync::Arc;

use thiserror::Error;

use crate::tile_id::TileId;

/// Broad failure categories.
///
/// "No data" is deliberately absent: a missing tile or a void sample is a
/// normal `Ok(None)` result, never an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Network error, unexpected status or broken redirect chain.
    Retrieval,
    /// The origin did not answer within the configured timeout.
    Timeout,
    /// Local storage could not be read or written.
    Storage,
    /// Archive or grid contents are malformed.
    Corruption,
    /// Missing credentials or an unusable catalog.
    Configuration,
    /// The query maps outside the tile's sample grid.
    OutOfRange,
}

/// Errors that can occur while resolving an elevation.
#[derive(Error, Debug)]
pub enum GeoElevError {
    /// Storage medium failure other than "not found".
    #[error("Storage error for {key}: {source}")]
    Storage {
        key: String,
        #[source]
        source: std::io::Error,
    },

    /// Transport-level HTTP failure.
    #[cfg(feature = "download")]
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The origin did not respond in time.
    #[error("Request to {url} timed out")]
    Timeout { url: String },

    /// A hop of the download returned an unusable response.
    #[error("Download of {url} failed: {reason}")]
    DownloadFailed { url: String, reason: String },

    /// A redirect response came without a usable `Location` header.
    #[error("Redirect (HTTP {status}) from {url} has no Location header")]
    MissingRedirect { url: String, status: u16 },

    /// Credentials are required but absent or empty.
    #[error("Username or password not set")]
    MissingCredentials,

    /// No downloader was injected and the `download` feature is disabled.
    #[error("No tile downloader configured")]
    NoDownloader,

    /// The tile catalog could not be loaded.
    #[error("Invalid tile catalog: {reason}")]
    Catalog { reason: String },

    /// The downloaded archive could not be read.
    #[error("Corrupt archive for {tile}: {reason}")]
    CorruptArchive { tile: TileId, reason: String },

    /// The archive holds no file.
    #[error("No file in archive for {tile}")]
    EmptyArchive { tile: TileId },

    /// The archive holds more than the single expected grid file.
    #[error("Archive for {tile} has {count} entries (expected exactly 1)")]
    MultipleArchiveEntries { tile: TileId, count: usize },

    /// Grid byte length is not `2 * n * n`.
    #[error("Invalid grid size for {tile}: {size} bytes")]
    InvalidGridSize { tile: TileId, size: usize },

    /// Computed row/column fall outside the grid.
    #[error("Coordinates out of range for {tile}: lat={lat}, lon={lon}")]
    OutOfRange { tile: TileId, lat: f64, lon: f64 },

    /// Failure observed by several concurrent queries for the same tile.
    #[error(transparent)]
    Shared(Arc<GeoElevError>),
}

impl GeoElevError {
    /// Returns the category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            GeoElevError::Storage { .. } => ErrorKind::Storage,
            #[cfg(feature = "download")]
            GeoElevError::Http(e) if e.is_timeout() => ErrorKind::Timeout,
            #[cfg(feature = "download")]
            GeoElevError::Http(_) => ErrorKind::Retrieval,
            GeoElevError::Timeout { .. } => ErrorKind::Timeout,
            GeoElevError::DownloadFailed { .. } | GeoElevError::MissingRedirect { .. } => {
                ErrorKind::Retrieval
            }
            GeoElevError::MissingCredentials
            | GeoElevError::NoDownloader
            | GeoElevError::Catalog { .. } => ErrorKind::Configuration,
            GeoElevError::CorruptArchive { .. }
            | GeoElevError::EmptyArchive { .. }
            | GeoElevError::MultipleArchiveEntries { .. }
            | GeoElevError::InvalidGridSize { .. } => ErrorKind::Corruption,
            GeoElevError::OutOfRange { .. } => ErrorKind::OutOfRange,
            GeoElevError::Shared(inner) => inner.kind(),
        }
    }

    /// Whether a retry of the same download could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            #[cfg(feature = "download")]
            GeoElevError::Http(_) => true,
            GeoElevError::Timeout { .. } => true,
            GeoElevError::Shared(inner) => inner.is_transient(),
            _ => false,
        }
    }

    /// The underlying error, looking through [`GeoElevError::Shared`].
    ///
    /// Tile resolution failures reach every waiting query, the one that ran
    /// the resolution included, wrapped in `Shared`.
    pub fn root(&self) -> &GeoElevError {
        match self {
            GeoElevError::Shared(inner) => inner.root(),
            other => other,
        }
    }
}

/// Result type alias using [`GeoElevError`].
pub type Result<T> = std::result::Result<T, GeoElevError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let tile = TileId::from_lat_lon(45.5, 13.5);

        let err = GeoElevError::InvalidGridSize { tile, size: 1000 };
        assert!(err.to_string().contains("1000"));
        assert!(err.to_string().contains("N45E013"));

        let err = GeoElevError::MissingRedirect {
            url: "https://example.com/N45E013.hgt.zip".to_string(),
            status: 302,
        };
        assert!(err.to_string().contains("302"));

        let err = GeoElevError::Storage {
            key: "N45E013.hgt.zip".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        assert!(err.to_string().contains("N45E013.hgt.zip"));
    }

    #[test]
    fn test_error_kinds() {
        let tile = TileId::from_lat_lon(45.5, 13.5);

        assert_eq!(
            GeoElevError::MissingCredentials.kind(),
            ErrorKind::Configuration
        );
        assert_eq!(
            GeoElevError::EmptyArchive { tile }.kind(),
            ErrorKind::Corruption
        );
        assert_eq!(
            GeoElevError::Timeout {
                url: String::new()
            }
            .kind(),
            ErrorKind::Timeout
        );
        assert_eq!(
            GeoElevError::MissingRedirect {
                url: String::new(),
                status: 302
            }
            .kind(),
            ErrorKind::Retrieval
        );
    }

    #[test]
    fn test_shared_error_keeps_kind() {
        let tile = TileId::from_lat_lon(-32.0, 152.0);
        let err = GeoElevError::Shared(Arc::new(GeoElevError::EmptyArchive { tile }));

        assert_eq!(err.kind(), ErrorKind::Corruption);
        assert!(matches!(err.root(), GeoElevError::EmptyArchive { .. }));
        assert!(err.to_string().contains("S32E152"));

        let nested = GeoElevError::Shared(Arc::new(err));
        assert!(matches!(nested.root(), GeoElevError::EmptyArchive { .. }));

        let plain = GeoElevError::MissingCredentials;
        assert!(matches!(plain.root(), GeoElevError::MissingCredentials));
    }

    #[test]
    fn test_transient() {
        assert!(GeoElevError::Timeout {
            url: String::new()
        }
        .is_transient());
        assert!(!GeoElevError::MissingCredentials.is_transient());
    }
}
