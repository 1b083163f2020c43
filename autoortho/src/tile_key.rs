//! The Tile Key: `(row, col, maptype, zoom)`, its on-disk artifact
//! filename, and the regexes used to recognize tile and DSF paths.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;

/// Sentinel `maptype` meaning "zoom-level probe; do not fetch".
pub const ZL_SENTINEL: &str = "ZL";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TileKey {
    pub row: u32,
    pub col: u32,
    pub maptype: String,
    pub zoom: u32,
}

impl TileKey {
    pub fn new(row: u32, col: u32, maptype: impl Into<String>, zoom: u32) -> Self {
        Self {
            row,
            col,
            maptype: maptype.into(),
            zoom,
        }
    }

    pub fn is_zl_sentinel(&self) -> bool {
        self.maptype == ZL_SENTINEL
    }

    /// Returns a copy of this key at a different zoom level.
    pub fn at_zoom(&self, zoom: u32) -> Self {
        Self {
            zoom,
            ..self.clone()
        }
    }

    /// The on-disk artifact filename: `<row>_<col>_<maptype>_<zoom>.dds`.
    pub fn artifact_filename(&self) -> String {
        format!("{}_{}_{}_{}.dds", self.row, self.col, self.maptype, self.zoom)
    }

    /// The on-disk artifact path under `cache_dir`.
    pub fn artifact_path(&self, cache_dir: &Path) -> PathBuf {
        cache_dir.join(self.artifact_filename())
    }
}

/// Regex matching a `.dds` path, capturing `(row, col, maptype, zoom)`.
///
/// `maptype` is `\D*` (any run of non-digit characters), which absorbs a
/// trailing separator before the zoom digits; callers trim it with
/// [`normalize_maptype`].
fn dds_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d+)[-_](\d+)[-_](\D*)(\d+)\.dds$").unwrap())
}

/// Regex matching a DSF scenery path: `+50-010.dsf`-style names.
pub fn dsf_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\+\d+[-+]\d+\.dsf$").unwrap())
}

/// Regex matching a `.ter` reference inside DSF text.
pub fn terrain_ref_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"terrain\W?\d+[-_]\d+[-_]\D*\d+\w*\.ter").unwrap())
}

/// Regex matching a `.dds` reference inside `.ter` text (path-qualified).
pub fn dds_ref_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\S*/\d+[-_]\d+[-_]\D*\d+\.dds").unwrap())
}

/// Strips a trailing run of non-alphanumeric separator characters (the
/// underscore or dash absorbed by the greedy `\D*` maptype group) so that
/// the same canonical maptype is produced whether the source filename had
/// a separator before the zoom digits or not.
fn normalize_maptype(raw: &str) -> String {
    raw.trim_end_matches(['_', '-']).to_uppercase()
}

/// Parses `(row, col, maptype, zoom)` from a `.dds` path or filename.
/// Returns `None` if the path does not match the tile grammar.
pub fn parse_dds_path(path: &str) -> Option<TileKey> {
    let caps = dds_regex().captures(path)?;
    let row = caps.get(1)?.as_str().parse().ok()?;
    let col = caps.get(2)?.as_str().parse().ok()?;
    let maptype = normalize_maptype(caps.get(3)?.as_str());
    let zoom = caps.get(4)?.as_str().parse().ok()?;
    Some(TileKey::new(row, col, maptype, zoom))
}

/// Returns true if `path` names a DSF scenery file.
pub fn is_dsf_path(path: &str) -> bool {
    dsf_regex().is_match(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_incoming_path_without_separator_before_zoom() {
        let key = parse_dds_path("/earth/+50-010/20_30_BI16.dds").unwrap();
        assert_eq!(key.row, 20);
        assert_eq!(key.col, 30);
        assert_eq!(key.maptype, "BI");
        assert_eq!(key.zoom, 16);
    }

    #[test]
    fn parses_incoming_path_with_separator_before_zoom() {
        let key = parse_dds_path("/earth/+50-010/20_30_BI_16.dds").unwrap();
        assert_eq!(key.row, 20);
        assert_eq!(key.col, 30);
        assert_eq!(key.maptype, "BI");
        assert_eq!(key.zoom, 16);
    }

    #[test]
    fn artifact_filename_round_trips() {
        let key = TileKey::new(30, 20, "BI", 13);
        let filename = key.artifact_filename();
        assert_eq!(filename, "30_20_BI_13.dds");
        let parsed = parse_dds_path(&filename).unwrap();
        assert_eq!(parsed, key);
    }

    #[test]
    fn zl_sentinel_is_recognized() {
        let key = TileKey::new(1, 2, "ZL", 10);
        assert!(key.is_zl_sentinel());
    }

    #[test]
    fn non_tile_path_does_not_match() {
        assert!(parse_dds_path("/earth/+50-010/readme.txt").is_none());
    }

    #[test]
    fn dsf_path_is_recognized() {
        assert!(is_dsf_path("/earth/+50-010/+50-010.dsf"));
        assert!(!is_dsf_path("/earth/+50-010/20_30_BI16.dds"));
    }
}
