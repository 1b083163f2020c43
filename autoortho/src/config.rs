//! Tunable constants for the cache, policy engine, and flight follower.
//!
//! The CLI surface stays exactly `autoortho <root> <mountpoint>` (no
//! flags), but an optional `~/.autoortho/config.ini` is consulted at
//! startup so the constants below can be tuned without touching the
//! binary's argument surface.

use std::path::{Path, PathBuf};

use ini::Ini;

use crate::error::ConfigError;

/// Lowest zoom level a tile key may legally carry.
pub const MIN_ZOOM: u32 = 8;
/// Highest zoom level a tile key may legally carry.
pub const MAX_ZOOM: u32 = 18;

/// Number of completions the adaptive controller averages over.
pub const TILE_TIME_WINDOW_LEN: usize = 5;

#[derive(Clone, Debug)]
pub struct AutoOrthoConfig {
    /// Directory holding cached `.dds` artifacts.
    pub cache_dir: PathBuf,

    /// Legal zoom range for tile keys.
    pub min_zoom: u32,
    pub max_zoom: u32,

    /// Clamp bounds for Target Zoom.
    pub target_zoom_min: i32,
    pub target_zoom_max: i32,
    pub target_zoom_initial: i32,

    /// Length of the Tile Time Window ring buffer.
    pub tile_time_window_len: usize,

    /// Moving-average thresholds that drive the adaptive controller.
    pub slow_threshold_secs: f64,
    pub fast_threshold_secs: f64,

    /// UDP port the Flight Follower subscribes telemetry on.
    pub telemetry_port: u16,
    /// Receive timeout on the telemetry socket.
    pub telemetry_timeout_secs: u64,

    /// Speed threshold (m/s) above which the policy treats the aircraft
    /// as "going very fast".
    pub policy_fast_speed: f64,
    /// Speed threshold (m/s) above which the policy treats the aircraft
    /// as "going fast".
    pub policy_medium_speed: f64,
    /// Speed threshold (m/s) below which the aircraft is considered
    /// stationary.
    pub policy_stationary_speed: f64,
    /// Altitude (m) below which the fast/medium speed guards apply.
    pub policy_low_altitude: f64,
}

impl Default for AutoOrthoConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from(".cache"),
            min_zoom: MIN_ZOOM,
            max_zoom: MAX_ZOOM,
            target_zoom_min: 12,
            target_zoom_max: 18,
            target_zoom_initial: 16,
            tile_time_window_len: TILE_TIME_WINDOW_LEN,
            slow_threshold_secs: 2.0,
            fast_threshold_secs: 0.3,
            telemetry_port: 49005,
            telemetry_timeout_secs: 5,
            policy_fast_speed: 400.0,
            policy_medium_speed: 200.0,
            policy_stationary_speed: 2.0,
            policy_low_altitude: 4500.0,
        }
    }
}

/// `~/.autoortho/logs`, the directory the CLI writes its rotating log
/// file into. Returns `None` if the home directory can't be resolved.
pub fn default_log_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".autoortho").join("logs"))
}

impl AutoOrthoConfig {
    /// Build a config from defaults, applying an override file if present.
    ///
    /// Looks for `~/.autoortho/config.ini`; a missing file is not an
    /// error, it just means defaults are used as-is.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        let Some(home) = dirs::home_dir() else {
            return Ok(config);
        };
        let path = home.join(".autoortho").join("config.ini");
        if !path.exists() {
            return Ok(config);
        }

        config.apply_override(&path)?;
        Ok(config)
    }

    fn apply_override(&mut self, path: &Path) -> Result<(), ConfigError> {
        let ini = Ini::load_from_file(path).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        if let Some(section) = ini.section(Some("cache")) {
            if let Some(dir) = section.get("cache_dir") {
                self.cache_dir = PathBuf::from(dir);
            }
            if let Some(v) = section.get("target_zoom_initial") {
                self.target_zoom_initial = parse_value("cache", "target_zoom_initial", v)?;
            }
        }

        if let Some(section) = ini.section(Some("telemetry")) {
            if let Some(v) = section.get("port") {
                self.telemetry_port = parse_value("telemetry", "port", v)?;
            }
            if let Some(v) = section.get("timeout_secs") {
                self.telemetry_timeout_secs = parse_value("telemetry", "timeout_secs", v)?;
            }
        }

        Ok(())
    }
}

fn parse_value<T: std::str::FromStr>(
    section: &'static str,
    key: &'static str,
    value: &str,
) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        section,
        key,
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_use_documented_zoom_and_window_constants() {
        let config = AutoOrthoConfig::default();
        assert_eq!(config.min_zoom, 8);
        assert_eq!(config.max_zoom, 18);
        assert_eq!(config.target_zoom_min, 12);
        assert_eq!(config.target_zoom_max, 18);
        assert_eq!(config.target_zoom_initial, 16);
        assert_eq!(config.tile_time_window_len, 5);
    }
}
