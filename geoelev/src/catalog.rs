//! Static catalog of downloadable tiles.
//!
//! The catalog maps tile names to archive paths relative to a base URL. It is
//! built once at startup and handed to the [`ElevationStore`](crate::ElevationStore);
//! a tile missing from the catalog simply has no elevation data.
//!
//! # File Format
//!
//! ```json
//! {
//!   "baseUrl": "https://e4ftl01.cr.usgs.gov/MEASURES/SRTMGL3.003/2000.02.11/",
//!   "files": {
//!     "N45E013": "N45E013.SRTMGL3.hgt.zip"
//!   }
//! }
//! ```
//!
//! SRTM1 and SRTM3 archives can also be listed as separate tables, each with
//! its own base URL. A tile present in both resolves to the SRTM1 archive:
//!
//! ```json
//! {
//!   "srtm1": {
//!     "baseUrl": "https://e4ftl01.cr.usgs.gov/MEASURES/SRTMGL1.003/2000.02.11/",
//!     "files": { "N40W112": "N40W112.SRTMGL1.hgt.zip" }
//!   },
//!   "srtm3": {
//!     "baseUrl": "https://e4ftl01.cr.usgs.gov/MEASURES/SRTMGL3.003/2000.02.11/",
//!     "files": {
//!       "N40W112": "N40W112.SRTMGL3.hgt.zip",
//!       "N45E013": "N45E013.SRTMGL3.hgt.zip"
//!     }
//!   }
//! }
//! ```

use std::collections::BTreeMap;
use std::ops::Bound;
use std::path::Path;

use serde::Deserialize;

use crate::error::{GeoElevError, Result};
use crate::grid::SrtmResolution;
use crate::tile_id::TileId;

/// How catalog entry names are compared against a tile id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CatalogMatch {
    /// The entry name equals the tile id (`N45E013`).
    #[default]
    Exact,
    /// The entry name starts with the tile id (`N45E013.SRTMGL3`).
    ///
    /// When several entries share the prefix the lexicographically smallest
    /// one is used.
    Prefix,
}

#[derive(Deserialize)]
struct TableFile {
    #[serde(rename = "baseUrl", alias = "base_url")]
    base_url: String,
    #[serde(alias = "entries")]
    files: BTreeMap<String, String>,
}

#[derive(Deserialize)]
struct CatalogFile {
    #[serde(rename = "baseUrl", alias = "base_url")]
    base_url: Option<String>,
    #[serde(alias = "entries")]
    files: Option<BTreeMap<String, String>>,
    srtm1: Option<TableFile>,
    srtm3: Option<TableFile>,
}

/// Archives sharing one base URL.
#[derive(Debug, Clone)]
struct Table {
    resolution: Option<SrtmResolution>,
    base_url: String,
    entries: BTreeMap<String, String>,
}

impl Table {
    fn new<I, K, V>(resolution: Option<SrtmResolution>, base_url: String, entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            resolution,
            base_url,
            entries: entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Lookup order: finest resolution first, untyped table last.
    fn rank(&self) -> u8 {
        match self.resolution {
            Some(SrtmResolution::Srtm1) => 0,
            Some(SrtmResolution::Srtm3) => 1,
            None => 2,
        }
    }

    fn path_for(&self, token: &str, mode: CatalogMatch) -> Option<&str> {
        let found = match mode {
            CatalogMatch::Exact => self.entries.get(token),
            CatalogMatch::Prefix => self
                .entries
                .range::<str, _>((Bound::Included(token), Bound::Unbounded))
                .next()
                .filter(|(name, _)| name.starts_with(token))
                .map(|(_, path)| path),
        };
        found.map(String::as_str)
    }

    fn join(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        if self.base_url.is_empty() {
            return path.to_string();
        }
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

/// Immutable mapping from tile name to download location.
#[derive(Debug, Clone)]
pub struct TileCatalog {
    tables: Vec<Table>,
    match_mode: CatalogMatch,
}

impl TileCatalog {
    /// Create a catalog from a base URL and `name -> relative path` entries.
    pub fn new<I, K, V>(base_url: impl Into<String>, entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            tables: vec![Table::new(None, base_url.into(), entries)],
            match_mode: CatalogMatch::Exact,
        }
    }

    /// Add a table of archives known to hold grids of `resolution`.
    ///
    /// Tables are searched finest resolution first, so SRTM1 entries win
    /// over SRTM3 entries and both win over the plain table.
    pub fn with_table<I, K, V>(
        mut self,
        resolution: SrtmResolution,
        base_url: impl Into<String>,
        entries: I,
    ) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.tables
            .push(Table::new(Some(resolution), base_url.into(), entries));
        self.tables.sort_by_key(Table::rank);
        self
    }

    /// Parse a catalog from its JSON form.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let file: CatalogFile =
            serde_json::from_str(json).map_err(|e| GeoElevError::Catalog {
                reason: e.to_string(),
            })?;

        let mut catalog = match (file.base_url, file.files) {
            (Some(base_url), Some(files)) => Self::new(base_url, files),
            (None, None) => Self {
                tables: Vec::new(),
                match_mode: CatalogMatch::Exact,
            },
            (None, Some(_)) => return Err(catalog_error("`files` given without `baseUrl`")),
            (Some(_), None) => return Err(catalog_error("`baseUrl` given without `files`")),
        };

        for (resolution, table) in [
            (SrtmResolution::Srtm1, file.srtm1),
            (SrtmResolution::Srtm3, file.srtm3),
        ] {
            if let Some(table) = table {
                catalog = catalog.with_table(resolution, table.base_url, table.files);
            }
        }

        if catalog.tables.is_empty() {
            return Err(catalog_error("no tile table (`files`, `srtm1` or `srtm3`)"));
        }
        Ok(catalog)
    }

    /// Read and parse a JSON catalog file.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| GeoElevError::Catalog {
            reason: format!("cannot read {}: {}", path.display(), e),
        })?;
        Self::from_json_str(&json)
    }

    /// Select how entry names are matched.
    pub fn with_match_mode(mut self, mode: CatalogMatch) -> Self {
        self.match_mode = mode;
        self
    }

    /// Absolute URL of a tile's archive, or `None` when the catalog has no
    /// entry (the region has no data).
    ///
    /// When several tables list the tile the finest resolution is returned.
    pub fn resolve(&self, tile: &TileId) -> Option<String> {
        let token = tile.to_string();
        self.tables.iter().find_map(|table| {
            table
                .path_for(&token, self.match_mode)
                .map(|path| table.join(path))
        })
    }

    /// URL of a tile's archive in the table for `resolution` only.
    pub fn resolve_at(&self, tile: &TileId, resolution: SrtmResolution) -> Option<String> {
        let token = tile.to_string();
        self.tables
            .iter()
            .filter(|table| table.resolution == Some(resolution))
            .find_map(|table| {
                table
                    .path_for(&token, self.match_mode)
                    .map(|path| table.join(path))
            })
    }

    /// Whether the catalog has an entry for `tile`.
    pub fn contains(&self, tile: &TileId) -> bool {
        self.resolve(tile).is_some()
    }

    /// Base URL of the plain `files` table, if the catalog has one.
    pub fn base_url(&self) -> Option<&str> {
        self.tables
            .iter()
            .find(|table| table.resolution.is_none())
            .map(|table| table.base_url.as_str())
    }

    /// The active match mode.
    pub fn match_mode(&self) -> CatalogMatch {
        self.match_mode
    }

    /// Number of entries across all tables.
    pub fn len(&self) -> usize {
        self.tables.iter().map(|table| table.entries.len()).sum()
    }

    /// Whether the catalog has no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn catalog_error(reason: &str) -> GeoElevError {
    GeoElevError::Catalog {
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "https://e4ftl01.cr.usgs.gov/MEASURES/SRTMGL3.003/2000.02.11/";

    fn catalog() -> TileCatalog {
        TileCatalog::new(
            BASE,
            [
                ("N45E013", "N45E013.SRTMGL3.hgt.zip"),
                ("S32E152", "S32E152.SRTMGL3.hgt.zip"),
            ],
        )
    }

    #[test]
    fn test_exact_lookup() {
        let catalog = catalog();
        let url = catalog.resolve(&TileId::new(45, 13)).unwrap();
        assert_eq!(url, format!("{}N45E013.SRTMGL3.hgt.zip", BASE));

        assert!(catalog.contains(&TileId::new(-32, 152)));
        assert_eq!(catalog.resolve(&TileId::new(0, 0)), None);
    }

    #[test]
    fn test_exact_does_not_prefix_match() {
        let catalog = TileCatalog::new(BASE, [("N45E013.SRTMGL3", "a.hgt.zip")]);
        assert_eq!(catalog.resolve(&TileId::new(45, 13)), None);
    }

    #[test]
    fn test_prefix_lookup() {
        let catalog = TileCatalog::new(
            BASE,
            [
                ("N45E013.SRTMGL3", "b.hgt.zip"),
                ("N45E013.SRTMGL1", "a.hgt.zip"),
                ("N45E014.SRTMGL3", "c.hgt.zip"),
            ],
        )
        .with_match_mode(CatalogMatch::Prefix);

        // Smallest matching name wins
        let url = catalog.resolve(&TileId::new(45, 13)).unwrap();
        assert!(url.ends_with("/a.hgt.zip"));

        let url = catalog.resolve(&TileId::new(45, 14)).unwrap();
        assert!(url.ends_with("/c.hgt.zip"));

        assert_eq!(catalog.resolve(&TileId::new(45, 12)), None);
        assert_eq!(catalog.resolve(&TileId::new(45, 15)), None);
    }

    #[test]
    fn test_url_joining() {
        let catalog = TileCatalog::new(
            "https://example.com/srtm",
            [
                ("N00E000", "/N00E000.hgt.zip"),
                ("N01E000", "https://mirror.example.com/N01E000.hgt.zip"),
            ],
        );
        assert_eq!(
            catalog.resolve(&TileId::new(0, 0)).unwrap(),
            "https://example.com/srtm/N00E000.hgt.zip"
        );
        assert_eq!(
            catalog.resolve(&TileId::new(1, 0)).unwrap(),
            "https://mirror.example.com/N01E000.hgt.zip"
        );
    }

    #[test]
    fn test_from_json() {
        let json = r#"{
            "baseUrl": "https://example.com/",
            "files": { "N45E013": "N45E013.hgt.zip", "N44E013": "N44E013.hgt.zip" }
        }"#;
        let catalog = TileCatalog::from_json_str(json).unwrap();
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.base_url(), Some("https://example.com/"));
        assert_eq!(catalog.match_mode(), CatalogMatch::Exact);
        assert_eq!(
            catalog.resolve(&TileId::new(44, 13)).unwrap(),
            "https://example.com/N44E013.hgt.zip"
        );
    }

    #[test]
    fn test_from_json_entries_alias() {
        let json = r#"{ "baseUrl": "", "entries": {} }"#;
        let catalog = TileCatalog::from_json_str(json).unwrap();
        assert!(catalog.is_empty());
    }

    #[test]
    fn test_from_json_invalid() {
        let err = TileCatalog::from_json_str("{ \"files\": {} }").unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Configuration);
    }

    #[test]
    fn test_from_json_without_tables() {
        let err = TileCatalog::from_json_str("{}").unwrap_err();
        assert!(matches!(err, GeoElevError::Catalog { .. }));

        let err = TileCatalog::from_json_str(r#"{ "baseUrl": "https://example.com/" }"#)
            .unwrap_err();
        assert!(err.to_string().contains("files"));
    }

    #[test]
    fn test_srtm1_preferred_over_srtm3() {
        let json = r#"{
            "srtm1": {
                "baseUrl": "https://example.com/SRTMGL1/",
                "files": { "N40W112": "N40W112.SRTMGL1.hgt.zip" }
            },
            "srtm3": {
                "baseUrl": "https://example.com/SRTMGL3/",
                "files": {
                    "N40W112": "N40W112.SRTMGL3.hgt.zip",
                    "N45E013": "N45E013.SRTMGL3.hgt.zip"
                }
            }
        }"#;
        let catalog = TileCatalog::from_json_str(json).unwrap();
        assert_eq!(catalog.len(), 3);
        assert_eq!(catalog.base_url(), None);

        // Salt Lake City has both resolutions
        let usa = TileId::from_lat_lon(40.75, -111.883333);
        assert_eq!(
            catalog.resolve(&usa).unwrap(),
            "https://example.com/SRTMGL1/N40W112.SRTMGL1.hgt.zip"
        );
        assert_eq!(
            catalog.resolve_at(&usa, SrtmResolution::Srtm3).unwrap(),
            "https://example.com/SRTMGL3/N40W112.SRTMGL3.hgt.zip"
        );

        // Europe only has SRTM3
        let europe = TileId::from_lat_lon(45.2775, 13.726111);
        assert_eq!(catalog.resolve_at(&europe, SrtmResolution::Srtm1), None);
        assert_eq!(
            catalog.resolve(&europe).unwrap(),
            "https://example.com/SRTMGL3/N45E013.SRTMGL3.hgt.zip"
        );
    }

    #[test]
    fn test_typed_tables_win_over_plain_table() {
        let catalog = TileCatalog::new(BASE, [("N45E013", "plain.hgt.zip")])
            .with_table(
                SrtmResolution::Srtm3,
                "https://example.com/3",
                [("N45E013", "three.hgt.zip")],
            )
            .with_table(
                SrtmResolution::Srtm1,
                "https://example.com/1",
                [("N44E013", "one.hgt.zip")],
            );

        assert_eq!(
            catalog.resolve(&TileId::new(45, 13)).unwrap(),
            "https://example.com/3/three.hgt.zip"
        );
        assert_eq!(
            catalog.resolve(&TileId::new(44, 13)).unwrap(),
            "https://example.com/1/one.hgt.zip"
        );
        assert_eq!(catalog.base_url(), Some(BASE));
    }

    #[test]
    fn test_prefix_lookup_across_tables() {
        let catalog = TileCatalog::new(BASE, [("N45E013.SRTMGL3", "three.hgt.zip")])
            .with_table(
                SrtmResolution::Srtm1,
                "https://example.com/1",
                [("N45E013.SRTMGL1", "one.hgt.zip")],
            )
            .with_match_mode(CatalogMatch::Prefix);

        assert_eq!(
            catalog.resolve(&TileId::new(45, 13)).unwrap(),
            "https://example.com/1/one.hgt.zip"
        );
        assert!(catalog
            .resolve_at(&TileId::new(45, 13), SrtmResolution::Srtm3)
            .is_none());
    }

    #[test]
    fn test_from_json_file_missing() {
        let err = TileCatalog::from_json_file("/nonexistent/catalog.json").unwrap_err();
        assert!(matches!(err, GeoElevError::Catalog { .. }));
    }
}
