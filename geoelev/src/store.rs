//! Elevation store with single-flight tile caching.
//!
//! [`ElevationStore`] ties the collaborators together. A query maps its
//! coordinates to a [`TileId`], looks the tile up in an in-memory LRU cache
//! and, on a miss, resolves it:
//!
//! 1. no catalog entry: the tile is remembered as "no data" for the life of
//!    the store, nothing else is touched
//! 2. archive loaded from [`TileStorage`], or downloaded and saved on a miss
//! 3. archive unpacked and the grid validated
//!
//! Concurrent queries for the same unresolved tile wait on a single
//! resolution. Failures are not cached, so a later query tries again.
//!
//! ```ignore
//! use geoelev::{ElevationStoreBuilder, TileCatalog};
//!
//! let catalog = TileCatalog::from_json_file("srtm3.json")?;
//! let store = ElevationStoreBuilder::new(catalog)
//!     .credentials("user", "password")
//!     .cache_size(50)
//!     .build()?;
//!
//! match store.get_elevation(45.2775, 13.726111)? {
//!     Some(meters) => println!("{}m", meters),
//!     None => println!("no data"),
//! }
//! ```

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use moka::sync::Cache;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::archive::extract_single_entry;
use crate::catalog::TileCatalog;
use crate::download::{Credentials, DownloadConfig, TileDownloader};
use crate::error::{GeoElevError, Result};
use crate::grid::HgtGrid;
use crate::storage::{LocalFileStorage, TileStorage};
use crate::tile_id::TileId;

#[cfg(feature = "download")]
use crate::download::AuthDownloader;

/// Default number of tiles kept in memory.
const DEFAULT_CACHE_SIZE: u64 = 100;

/// Resolved state of a tile. Only terminal states are kept.
#[derive(Debug)]
pub enum TileState {
    /// The catalog has no entry for the tile.
    NoData,
    /// The grid is decoded and held in memory.
    Ready(HgtGrid),
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    /// Number of tiles currently in the cache, no-data tiles included.
    pub entry_count: u64,
    /// Number of cache hits (requests served from cache).
    pub hit_count: u64,
    /// Number of cache misses (tiles resolved from catalog, storage or network).
    pub miss_count: u64,
    /// Number of archives fetched by the downloader.
    pub download_count: u64,
}

impl CacheStats {
    /// Calculate the cache hit rate (0.0 to 1.0).
    ///
    /// Returns 0.0 if no requests have been made.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hit_count + self.miss_count;
        if total == 0 {
            0.0
        } else {
            self.hit_count as f64 / total as f64
        }
    }
}

/// A geographic bounding box for selecting tiles.
///
/// Coordinates are in decimal degrees (WGS84).
#[derive(Debug, Clone, Copy)]
pub struct BoundingBox {
    /// Minimum latitude (southern boundary).
    pub min_lat: f64,
    /// Minimum longitude (western boundary).
    pub min_lon: f64,
    /// Maximum latitude (northern boundary).
    pub max_lat: f64,
    /// Maximum longitude (eastern boundary).
    pub max_lon: f64,
}

impl BoundingBox {
    pub fn new(min_lat: f64, min_lon: f64, max_lat: f64, max_lon: f64) -> Self {
        Self {
            min_lat,
            min_lon,
            max_lat,
            max_lon,
        }
    }

    /// Check if this bounding box overlaps a 1°×1° tile.
    ///
    /// A tile covers `[south, south+1) × [west, west+1)`, so a box that only
    /// touches its northern or eastern edge does not overlap it.
    pub fn overlaps_tile(&self, tile: &TileId) -> bool {
        let (south, west) = (f64::from(tile.south()), f64::from(tile.west()));

        self.min_lat < south + 1.0
            && self.max_lat > south
            && self.min_lon < west + 1.0
            && self.max_lon > west
    }

    /// Every tile overlapping the box, south to north and west to east.
    ///
    /// Boundaries are clamped to ±90° latitude and ±180° longitude. Returns
    /// an empty list if any boundary is not finite.
    pub fn tiles(&self) -> Vec<TileId> {
        let bounds = [self.min_lat, self.min_lon, self.max_lat, self.max_lon];
        if !bounds.iter().all(|v| v.is_finite()) {
            return Vec::new();
        }

        let lat = |v: f64| v.clamp(-90.0, 90.0);
        let lon = |v: f64| v.clamp(-180.0, 180.0);
        let (first_south, last_south) = (
            lat(self.min_lat).floor() as i32,
            lat(self.max_lat).ceil() as i32,
        );
        let (first_west, last_west) = (
            lon(self.min_lon).floor() as i32,
            lon(self.max_lon).ceil() as i32,
        );

        (first_south..last_south)
            .flat_map(|south| (first_west..last_west).map(move |west| TileId::new(south, west)))
            .filter(|tile| self.overlaps_tile(tile))
            .collect()
    }
}

/// Statistics from a preload operation.
#[derive(Debug, Clone, Default)]
pub struct PreloadStats {
    /// Number of tiles asked for.
    pub tiles_requested: u64,
    /// Number of grids resolved into the cache.
    pub tiles_loaded: u64,
    /// Number of tiles without a catalog entry.
    pub tiles_no_data: u64,
    /// Number of tiles that were already in cache.
    pub tiles_already_cached: u64,
    /// Number of tiles that failed to resolve.
    pub tiles_failed: u64,
    /// Total elapsed time in milliseconds.
    pub elapsed_ms: u64,
}

/// Elevation lookups over a tile catalog, persistent storage and a downloader.
///
/// `ElevationStore` is `Send + Sync`; share it between threads with `Arc`.
pub struct ElevationStore {
    catalog: Arc<TileCatalog>,
    storage: Arc<dyn TileStorage>,
    downloader: Arc<dyn TileDownloader>,
    /// LRU cache of decoded grids.
    tile_cache: Cache<TileId, Arc<TileState>>,
    /// Tiles without a catalog entry. Never evicted.
    no_data: RwLock<HashSet<TileId>>,
    no_data_state: Arc<TileState>,
    hit_count: AtomicU64,
    miss_count: AtomicU64,
    download_count: AtomicU64,
}

impl ElevationStore {
    /// Create a store from explicit collaborators.
    pub fn new(
        catalog: Arc<TileCatalog>,
        storage: Arc<dyn TileStorage>,
        downloader: Arc<dyn TileDownloader>,
        cache_size: u64,
    ) -> Self {
        Self {
            catalog,
            storage,
            downloader,
            tile_cache: Cache::builder().max_capacity(cache_size).build(),
            no_data: RwLock::new(HashSet::new()),
            no_data_state: Arc::new(TileState::NoData),
            hit_count: AtomicU64::new(0),
            miss_count: AtomicU64::new(0),
            download_count: AtomicU64::new(0),
        }
    }

    /// Create a builder for more configuration options.
    pub fn builder(catalog: impl Into<Arc<TileCatalog>>) -> ElevationStoreBuilder {
        ElevationStoreBuilder::new(catalog)
    }

    /// Get the elevation in meters at the given coordinates.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(elevation))` - elevation in meters
    /// - `Ok(None)` - no catalog entry for the tile, or a void sample
    /// - `Err(...)` - download, storage or decode failure, or coordinates
    ///   outside the tile grid
    pub fn get_elevation(&self, lat: f64, lon: f64) -> Result<Option<i16>> {
        let tile = TileId::from_lat_lon(lat, lon);
        match &*self.tile(tile)? {
            TileState::NoData => Ok(None),
            TileState::Ready(grid) => grid.elevation(lat, lon),
        }
    }

    /// Resolved state of a tile, from cache or freshly resolved.
    ///
    /// # Errors
    ///
    /// Resolution failures are shared with every query that waited on the
    /// same tile and come back as [`GeoElevError::Shared`]; use
    /// [`GeoElevError::kind`] or [`GeoElevError::root`] to inspect them.
    pub fn tile(&self, id: TileId) -> Result<Arc<TileState>> {
        if self.no_data.read().contains(&id) {
            self.hit_count.fetch_add(1, Ordering::Relaxed);
            return Ok(Arc::clone(&self.no_data_state));
        }
        if let Some(state) = self.tile_cache.get(&id) {
            self.hit_count.fetch_add(1, Ordering::Relaxed);
            return Ok(state);
        }

        self.miss_count.fetch_add(1, Ordering::Relaxed);

        let Some(url) = self.catalog.resolve(&id) else {
            debug!(tile = %id, "no catalog entry, tile has no data");
            self.no_data.write().insert(id);
            return Ok(Arc::clone(&self.no_data_state));
        };

        self.tile_cache
            .try_get_with(id, || {
                self.resolve_tile(id, &url)
                    .map(|grid| Arc::new(TileState::Ready(grid)))
            })
            .map_err(GeoElevError::Shared)
    }

    /// Miss path for a catalogued tile: storage or download, then decode.
    fn resolve_tile(&self, id: TileId, url: &str) -> Result<HgtGrid> {
        let key = id.archive_name();
        let archive = match self.storage.load(&key)? {
            Some(bytes) => {
                debug!(tile = %id, bytes = bytes.len(), "loaded archive from storage");
                bytes
            }
            None => {
                info!(tile = %id, %url, "downloading tile archive");
                let bytes = self.downloader.download(url)?;
                self.download_count.fetch_add(1, Ordering::Relaxed);
                self.storage.save(&key, &bytes)?;
                bytes
            }
        };

        match decode_archive(id, &archive) {
            Ok(grid) => {
                let resolution = grid.resolution();
                debug!(
                    tile = %id,
                    side = grid.side_length(),
                    ?resolution,
                    meters = resolution.map(|r| r.meters()),
                    "tile ready"
                );
                Ok(grid)
            }
            Err(e) => {
                warn!(tile = %id, error = %e, "removing corrupt archive from storage");
                if let Err(remove_err) = self.storage.remove(&key) {
                    warn!(tile = %id, error = %remove_err, "failed to remove corrupt archive");
                }
                Err(e)
            }
        }
    }

    /// Resolve the given tiles into the cache.
    ///
    /// Failures are counted, not returned; a failed tile is retried by the
    /// next query that touches it.
    pub fn preload<I>(&self, tiles: I) -> PreloadStats
    where
        I: IntoIterator<Item = TileId>,
    {
        let start = Instant::now();
        let mut stats = PreloadStats::default();

        for id in tiles {
            stats.tiles_requested += 1;

            if self.no_data.read().contains(&id) || self.tile_cache.contains_key(&id) {
                stats.tiles_already_cached += 1;
                continue;
            }

            match self.tile(id).as_deref() {
                Ok(TileState::Ready(_)) => stats.tiles_loaded += 1,
                Ok(TileState::NoData) => stats.tiles_no_data += 1,
                Err(e) => {
                    warn!(tile = %id, error = %e, "preload failed");
                    stats.tiles_failed += 1;
                }
            }
        }

        stats.elapsed_ms = start.elapsed().as_millis() as u64;
        info!(
            loaded = stats.tiles_loaded,
            failed = stats.tiles_failed,
            elapsed_ms = stats.elapsed_ms,
            "preload finished"
        );
        stats
    }

    /// Preload every tile already present in storage.
    ///
    /// Optionally filters tiles by one or more bounding boxes. Storage keys
    /// that are not tile archive names are skipped.
    pub fn preload_stored(&self, bounds: Option<&[BoundingBox]>) -> Result<PreloadStats> {
        let tiles: Vec<TileId> = self
            .storage
            .keys()?
            .iter()
            .filter_map(|key| key.parse::<TileId>().ok())
            .filter(|tile| {
                bounds.map_or(true, |boxes| boxes.iter().any(|b| b.overlaps_tile(tile)))
            })
            .collect();

        Ok(self.preload(tiles))
    }

    /// Get cache statistics.
    pub fn cache_stats(&self) -> CacheStats {
        CacheStats {
            entry_count: self.tile_cache.entry_count() + self.no_data.read().len() as u64,
            hit_count: self.hit_count.load(Ordering::Relaxed),
            miss_count: self.miss_count.load(Ordering::Relaxed),
            download_count: self.download_count.load(Ordering::Relaxed),
        }
    }

    /// Get the maximum cache size.
    pub fn cache_capacity(&self) -> u64 {
        self.tile_cache.policy().max_capacity().unwrap_or(0)
    }

    /// The catalog tiles are resolved against.
    pub fn catalog(&self) -> &TileCatalog {
        &self.catalog
    }

    /// Drop a tile's grid from the in-memory cache. Stored archives are kept.
    ///
    /// No-data tiles stay known, the catalog cannot change under the store.
    pub fn invalidate(&self, id: &TileId) {
        self.tile_cache.invalidate(id);
    }

    /// Clear all grids from the cache.
    pub fn clear_cache(&self) {
        self.tile_cache.invalidate_all();
    }
}

fn decode_archive(id: TileId, archive: &[u8]) -> Result<HgtGrid> {
    let raw = extract_single_entry(&id, archive)?;
    HgtGrid::new(id, raw)
}

/// Builder for creating [`ElevationStore`] with custom configuration.
///
/// # Example
///
/// ```ignore
/// use geoelev::{ElevationStoreBuilder, TileCatalog};
///
/// let store = ElevationStoreBuilder::new(TileCatalog::from_json_file("srtm3.json")?)
///     .cache_dir("/var/cache/srtm")
///     .credentials("user", "password")
///     .build()?;
/// ```
pub struct ElevationStoreBuilder {
    catalog: Arc<TileCatalog>,
    cache_size: u64,
    cache_dir: Option<PathBuf>,
    storage: Option<Arc<dyn TileStorage>>,
    downloader: Option<Arc<dyn TileDownloader>>,
    download_config: DownloadConfig,
}

impl ElevationStoreBuilder {
    /// Create a new builder around a tile catalog.
    pub fn new(catalog: impl Into<Arc<TileCatalog>>) -> Self {
        Self {
            catalog: catalog.into(),
            cache_size: DEFAULT_CACHE_SIZE,
            cache_dir: None,
            storage: None,
            downloader: None,
            download_config: DownloadConfig::default(),
        }
    }

    /// Create a builder configured from environment variables.
    ///
    /// # Environment Variables
    ///
    /// | Variable | Description | Default |
    /// |----------|-------------|---------|
    /// | `GEOELEV_CATALOG` | Path to the JSON tile catalog | Required |
    /// | `GEOELEV_CACHE_DIR` | Directory for downloaded archives | `~/.geoelevations` |
    /// | `GEOELEV_CACHE_SIZE` | Maximum tiles in memory | 100 |
    /// | `GEOELEV_USERNAME` | Login for authenticated downloads | None |
    /// | `GEOELEV_PASSWORD` | Password for authenticated downloads | None |
    /// | `GEOELEV_TIMEOUT_SECS` | HTTP request timeout | 300 |
    /// | `GEOELEV_MAX_RETRIES` | Retries on network errors and timeouts | 0 |
    ///
    /// # Errors
    ///
    /// Returns an error if `GEOELEV_CATALOG` is not set or the catalog
    /// cannot be read.
    pub fn from_env() -> Result<Self> {
        let catalog_path = std::env::var("GEOELEV_CATALOG").map_err(|_| GeoElevError::Catalog {
            reason: "GEOELEV_CATALOG environment variable not set".to_string(),
        })?;
        let catalog = TileCatalog::from_json_file(&catalog_path)?;

        let mut builder = Self::new(catalog);

        if let Some(size) = env_parse("GEOELEV_CACHE_SIZE") {
            builder.cache_size = size;
        }
        if let Ok(dir) = std::env::var("GEOELEV_CACHE_DIR") {
            builder.cache_dir = Some(PathBuf::from(dir));
        }

        let username = std::env::var("GEOELEV_USERNAME").ok();
        let password = std::env::var("GEOELEV_PASSWORD").ok();
        if let (Some(username), Some(password)) = (username, password) {
            builder.download_config.credentials = Some(Credentials::new(username, password));
        }
        if let Some(timeout_secs) = env_parse("GEOELEV_TIMEOUT_SECS") {
            builder.download_config.timeout_secs = timeout_secs;
        }
        if let Some(max_retries) = env_parse("GEOELEV_MAX_RETRIES") {
            builder.download_config.max_retries = max_retries;
        }

        Ok(builder)
    }

    /// Set the maximum number of tiles to keep in cache.
    ///
    /// Default is 100 tiles.
    pub fn cache_size(mut self, size: u64) -> Self {
        self.cache_size = size;
        self
    }

    /// Directory for [`LocalFileStorage`]. Ignored when a storage is injected.
    pub fn cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    /// Use a custom storage backend.
    pub fn storage(mut self, storage: Arc<dyn TileStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Use a custom downloader instead of the built-in authenticated one.
    pub fn downloader(mut self, downloader: Arc<dyn TileDownloader>) -> Self {
        self.downloader = Some(downloader);
        self
    }

    /// Replace the download configuration.
    pub fn download_config(mut self, config: DownloadConfig) -> Self {
        self.download_config = config;
        self
    }

    /// Set the login used by the built-in downloader.
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.download_config.credentials = Some(Credentials::new(username, password));
        self
    }

    /// Build the [`ElevationStore`].
    ///
    /// # Errors
    ///
    /// - [`GeoElevError::MissingCredentials`] if the built-in downloader is
    ///   used without a complete login
    /// - [`GeoElevError::NoDownloader`] if no downloader is injected and the
    ///   `download` feature is disabled
    /// - [`GeoElevError::Storage`] if the cache directory cannot be created
    pub fn build(self) -> Result<ElevationStore> {
        let downloader = match self.downloader {
            Some(downloader) => downloader,
            None => default_downloader(self.download_config)?,
        };

        let storage = match self.storage {
            Some(storage) => storage,
            None => Arc::new(LocalFileStorage::new(self.cache_dir)?),
        };

        Ok(ElevationStore::new(
            self.catalog,
            storage,
            downloader,
            self.cache_size,
        ))
    }
}

#[cfg(feature = "download")]
fn default_downloader(config: DownloadConfig) -> Result<Arc<dyn TileDownloader>> {
    Ok(Arc::new(AuthDownloader::from_config(config)?))
}

#[cfg(not(feature = "download"))]
fn default_downloader(_config: DownloadConfig) -> Result<Arc<dyn TileDownloader>> {
    Err(GeoElevError::NoDownloader)
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.trim().parse().ok())
}
