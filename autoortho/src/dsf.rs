//! The DSF Parser/Prefetch: scans a scenery descriptor, resolves its
//! terrain references to tile keys, and warms the Tile Cache in parallel
//! before the simulator first touches them.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::cache::TileCache;
use crate::error::DsfError;
use crate::tile_key::{dds_ref_regex, parse_dds_path, terrain_ref_regex};

/// Number of parallel workers the deduplicated DDS set is partitioned
/// across.
const PREFETCH_WORKERS: usize = 8;

/// Scans `dsf_path` for terrain references, resolves each to its `.dds`
/// tiles, and warms the cache for all of them before returning. `.ter`
/// files are resolved two directories up from the DSF, matching the
/// scenery package layout. Priority is highest (`0`) when `extra_fast`
/// (the aircraft is going very fast and high, per the Mount Adapter's
/// derivation) so the prefetch doesn't get starved behind it; otherwise
/// it's `1`, even with live reads.
pub fn prefetch(dsf_path: &Path, cache: &TileCache, extra_fast: bool) -> Result<(), DsfError> {
    let start = std::time::Instant::now();
    let text = fs::read_to_string(dsf_path).map_err(|source| DsfError::ReadDsf {
        path: dsf_path.to_path_buf(),
        source,
    })?;

    let terrain_refs: Vec<&str> = terrain_ref_regex()
        .find_iter(&text)
        .map(|m| m.as_str())
        .collect();
    tracing::debug!(count = terrain_refs.len(), "found terrain references");

    // Scenery layout: <scenery>/terrain/<dsf parent>/../.. is where `.ter`
    // references are rooted, per §4.2.
    let ter_dir = dsf_path
        .parent()
        .map(|p| p.join("..").join(".."))
        .unwrap_or_else(|| PathBuf::from(".."));

    let mut dds_paths: HashSet<PathBuf> = HashSet::new();
    for ter_ref in &terrain_refs {
        let ter_path = ter_dir.join(ter_ref);
        let ter_text = match fs::read_to_string(&ter_path) {
            Ok(text) => text,
            Err(err) => {
                tracing::debug!(path = %ter_path.display(), error = %err, "skipping unreadable .ter reference");
                continue;
            }
        };

        for dds_ref in dds_ref_regex().find_iter(&ter_text) {
            let parent = ter_path.parent().unwrap_or(Path::new(""));
            dds_paths.insert(parent.join(dds_ref.as_str()));
        }
    }

    let num_dds = dds_paths.len();
    tracing::info!(num_dds, "DSF: found dds files, retrieving");

    let priority = if extra_fast { 0 } else { 1 };
    let dds_list: Vec<PathBuf> = dds_paths.into_iter().collect();
    let chunk_size = dds_list.len().div_ceil(PREFETCH_WORKERS).max(1);

    rayon::scope(|scope| {
        for chunk in dds_list.chunks(chunk_size) {
            scope.spawn(move |_| {
                for dds_path in chunk {
                    fetch_dds(dds_path, cache, priority);
                }
            });
        }
    });

    tracing::info!(
        path = %dsf_path.display(),
        elapsed_s = start.elapsed().as_secs_f64(),
        "DSF: retrieved all tiles"
    );
    Ok(())
}

/// Parses a single DDS path, creating a placeholder if it's wholly
/// absent, and warming the cache if it's present-but-empty. Unmatched
/// filenames are skipped (best-effort parsing, per §4.2).
fn fetch_dds(dds_path: &Path, cache: &TileCache, priority: i32) {
    let Some(key) = dds_path.to_str().and_then(parse_dds_path) else {
        tracing::debug!(path = %dds_path.display(), "DSF: path does not match known DDS pattern");
        return;
    };

    let size = match fs::metadata(dds_path) {
        Ok(meta) => meta.len(),
        Err(_) => {
            tracing::debug!(path = %dds_path.display(), "DSF: dds file does not exist, creating placeholder");
            if let Err(err) = fs::File::create(dds_path) {
                tracing::debug!(path = %dds_path.display(), error = %err, "failed to create placeholder dds");
            }
            0
        }
    };

    if size == 0 {
        tracing::debug!(?key, "DSF: empty dds, fetching ortho");
        cache.get_quick(&key, None, priority);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AutoOrthoConfig;
    use crate::renderer::PlaceholderRenderer;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn write(path: &Path, contents: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }

    #[test]
    fn prefetch_warms_cache_for_all_referenced_tiles() {
        let root = tempdir().unwrap();
        // Layout: <root>/terrain/10-20_BI16.ter, <root>/textures/10_20_BI16.dds,
        // and the DSF two levels below the scenery root (`terrain` is a
        // directory name, matched by the regex's `\W?` slash before the
        // digits, not part of the filename).
        let ter_path = root.path().join("terrain/10-20_BI16.ter");
        write(
            &ter_path,
            "references ../textures/10_20_BI16.dds and ../textures/11_21_BI16.dds\n",
        );
        std::fs::create_dir_all(root.path().join("textures")).unwrap();

        let dsf_dir = root.path().join("Earth nav data/+50-010");
        std::fs::create_dir_all(&dsf_dir).unwrap();
        let dsf_path = dsf_dir.join("+50-010.dsf");
        std::fs::write(&dsf_path, "terrain/10-20_BI16.ter referenced here\n").unwrap();

        let cache_dir = tempdir().unwrap();
        let config = AutoOrthoConfig {
            cache_dir: cache_dir.path().to_path_buf(),
            ..AutoOrthoConfig::default()
        };
        let renderer = Arc::new(PlaceholderRenderer::default());
        let cache = TileCache::new(config, renderer).unwrap();

        prefetch(&dsf_path, &cache, false).unwrap();

        assert!(cache_dir.path().join("10_20_BI_13.dds").exists());
        assert!(cache_dir.path().join("11_21_BI_13.dds").exists());
    }

    #[test]
    fn prefetch_errors_on_missing_dsf() {
        let cache_dir = tempdir().unwrap();
        let config = AutoOrthoConfig {
            cache_dir: cache_dir.path().to_path_buf(),
            ..AutoOrthoConfig::default()
        };
        let renderer = Arc::new(PlaceholderRenderer::default());
        let cache = TileCache::new(config, renderer).unwrap();

        let result = prefetch(Path::new("/nonexistent/scenery/+50-010.dsf"), &cache, false);
        assert!(result.is_err());
    }
}
