//! # geoelev - SRTM elevation lookups
//!
//! Answers "what is the terrain elevation at this latitude/longitude?" from
//! SRTM `.hgt` tiles, fetching them on demand from an authenticated origin
//! and keeping them in a local cache directory.
//!
//! ## Features
//!
//! - **Catalog driven**: a static [`TileCatalog`] says which tiles exist and
//!   where to download them; tiles outside it have no data
//! - **Authenticated downloads**: follows the NASA Earthdata style login
//!   redirect chain with a cookie store and HTTP Basic credentials
//! - **Persistent cache**: archives are kept as `<tile>.hgt.zip` under
//!   `~/.geoelevations` (or any [`TileStorage`])
//! - **Concurrent**: [`ElevationStore`] is `Send + Sync`, and concurrent
//!   queries for one tile share a single download
//!
//! ## Quick Start
//!
//! ```ignore
//! use geoelev::{ElevationStoreBuilder, TileCatalog};
//!
//! let catalog = TileCatalog::from_json_file("srtm3.json")?;
//! let store = ElevationStoreBuilder::new(catalog)
//!     .credentials("earthdata-user", "password")
//!     .build()?;
//!
//! if let Some(meters) = store.get_elevation(45.2775, 13.726111)? {
//!     println!("Elevation: {}m", meters);
//! }
//! ```
//!
//! ## SRTM Data Format
//!
//! Each tile covers one degree of latitude and longitude and is named after
//! its southwest corner (`N45E013`, `S32W071`). The grid is a square of
//! big-endian 16-bit samples, row-major from the northern edge:
//!
//! - **SRTM1**: 3601×3601 samples, 1 arc-second (~30m) resolution
//! - **SRTM3**: 1201×1201 samples, 3 arc-second (~90m) resolution
//!
//! Samples above 9000 mark voids and are reported as `None`.

pub mod archive;
pub mod catalog;
pub mod download;
pub mod error;
pub mod grid;
pub mod storage;
pub mod store;
pub mod tile_id;

// Re-export main types at crate root for convenience
pub use catalog::{CatalogMatch, TileCatalog};
pub use download::{
    AuthDownloader, Credentials, DownloadConfig, HttpResponse, HttpTransport, TileDownloader,
};
pub use error::{ErrorKind, GeoElevError, Result};
pub use grid::{HgtGrid, SrtmResolution, NO_DATA_THRESHOLD};
pub use storage::{LocalFileStorage, MemoryStorage, TileStorage};
pub use store::{
    BoundingBox, CacheStats, ElevationStore, ElevationStoreBuilder, PreloadStats, TileState,
};
pub use tile_id::{ParseTileIdError, TileId};

#[cfg(feature = "download")]
pub use download::ReqwestTransport;
