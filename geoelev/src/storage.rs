//! Persistent storage for downloaded tile archives.
//!
//! Archives are stored under their [`TileId::archive_name`](crate::TileId::archive_name)
//! key (`N45E013.hgt.zip`). Once saved, an archive is trusted forever; the only
//! removal path is quarantining an archive that failed to decode.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::error::{GeoElevError, Result};
use crate::tile_id::ARCHIVE_SUFFIX;

/// Name of the default cache directory under the user's home directory.
pub const DEFAULT_CACHE_DIR_NAME: &str = ".geoelevations";

/// Storage backend for compressed tile archives.
pub trait TileStorage: Send + Sync {
    /// Load the bytes stored under `key`.
    ///
    /// Returns `Ok(None)` when nothing is stored under `key`; errors are
    /// reserved for a broken storage medium.
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store `bytes` under `key`, replacing any previous value.
    fn save(&self, key: &str, bytes: &[u8]) -> Result<()>;

    /// Remove `key`. Removing a missing key succeeds.
    fn remove(&self, key: &str) -> Result<()>;

    /// Keys currently stored, if the backend can enumerate them.
    fn keys(&self) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
}

fn storage_error(key: &str, source: io::Error) -> GeoElevError {
    GeoElevError::Storage {
        key: key.to_string(),
        source,
    }
}

/// File-per-tile storage in a local cache directory.
#[derive(Debug, Clone)]
pub struct LocalFileStorage {
    cache_dir: PathBuf,
}

impl LocalFileStorage {
    /// Open (and create if needed) a cache directory.
    ///
    /// `None` selects `~/.geoelevations`. A newly created directory is
    /// readable by its owner only.
    pub fn new(cache_dir: Option<PathBuf>) -> Result<Self> {
        let cache_dir = match cache_dir {
            Some(dir) => dir,
            None => default_cache_dir()?,
        };
        info!(dir = %cache_dir.display(), "using SRTM cache directory");

        if !cache_dir.exists() {
            info!(dir = %cache_dir.display(), "creating SRTM cache directory");
            create_private_dir(&cache_dir)
                .map_err(|e| storage_error(&cache_dir.display().to_string(), e))?;
        }

        Ok(Self { cache_dir })
    }

    /// The directory archives are stored in.
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.cache_dir.join(key)
    }
}

/// `~/.geoelevations`
pub fn default_cache_dir() -> Result<PathBuf> {
    dirs::home_dir()
        .map(|home| home.join(DEFAULT_CACHE_DIR_NAME))
        .ok_or_else(|| {
            storage_error(
                DEFAULT_CACHE_DIR_NAME,
                io::Error::new(io::ErrorKind::NotFound, "home directory not found"),
            )
        })
}

#[cfg(unix)]
fn create_private_dir(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    fs::DirBuilder::new()
        .recursive(true)
        .mode(0o700)
        .create(path)
}

#[cfg(not(unix))]
fn create_private_dir(path: &Path) -> io::Result<()> {
    fs::create_dir_all(path)
}

impl TileStorage for LocalFileStorage {
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match fs::read(self.path_for(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(storage_error(key, e)),
        }
    }

    fn save(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path_for(key);
        let partial = self.path_for(&format!("{}.part", key));

        // Write then rename so readers never see a truncated archive
        fs::write(&partial, bytes).map_err(|e| storage_error(key, e))?;
        fs::rename(&partial, &path).map_err(|e| {
            let _ = fs::remove_file(&partial);
            storage_error(key, e)
        })?;

        debug!(key, bytes = bytes.len(), "saved tile archive");
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(storage_error(key, e)),
        }
    }

    /// Sorted names of every `*.hgt.zip` in the cache directory.
    fn keys(&self) -> Result<Vec<String>> {
        let entries = fs::read_dir(&self.cache_dir)
            .map_err(|e| storage_error(&self.cache_dir.display().to_string(), e))?;

        let mut keys: Vec<String> = entries
            .flatten()
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| name.ends_with(ARCHIVE_SUFFIX))
            .collect();
        keys.sort();
        Ok(keys)
    }
}

/// In-memory storage, mainly for tests and ephemeral services.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    files: RwLock<HashMap<String, Vec<u8>>>,
    loads: AtomicU64,
    saves: AtomicU64,
}

impl MemoryStorage {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate `key` without counting it as a save.
    pub fn insert(&self, key: impl Into<String>, bytes: Vec<u8>) {
        self.files.write().insert(key.into(), bytes);
    }

    /// Whether `key` is stored.
    pub fn contains(&self, key: &str) -> bool {
        self.files.read().contains_key(key)
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.files.read().len()
    }

    /// Whether nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.files.read().is_empty()
    }

    /// Number of `load` calls so far.
    pub fn load_count(&self) -> u64 {
        self.loads.load(Ordering::Relaxed)
    }

    /// Number of `save` calls so far.
    pub fn save_count(&self) -> u64 {
        self.saves.load(Ordering::Relaxed)
    }
}

impl TileStorage for MemoryStorage {
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.loads.fetch_add(1, Ordering::Relaxed);
        Ok(self.files.read().get(key).cloned())
    }

    fn save(&self, key: &str, bytes: &[u8]) -> Result<()> {
        self.saves.fetch_add(1, Ordering::Relaxed);
        self.files.write().insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.files.write().remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self.files.read().keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}
