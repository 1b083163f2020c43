//! The Tile Cache: single-flight key→artifact mapping, priority-aware
//! background fetching, deadline-bounded synchronous retrieval, and the
//! adaptive zoom-level controller.
//!
//! Coordination is a single mutex paired with a condition variable (the
//! *tile condition*) guarding the Active Set, the Tile Time Window, and
//! Target Zoom. The lock is never held across a renderer call.

use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::config::AutoOrthoConfig;
use crate::renderer::TileRenderer;
use crate::tile_key::TileKey;

struct CacheState {
    active: HashSet<TileKey>,
    tile_times: VecDeque<Duration>,
    target_zoom: i32,
}

type Condition = Arc<(Mutex<CacheState>, Condvar)>;

/// The shared *tile condition*: one mutex
/// protecting Active Set membership, the Tile Time Window, and Target
/// Zoom, paired with one condvar broadcast on every state transition.
///
/// Held behind an `Arc` (separate from the `TileCache` itself) so that
/// background worker threads can own a handle to it without requiring
/// `TileCache` itself to be wrapped in an `Arc` by callers.
pub struct TileCache {
    cache_dir: PathBuf,
    renderer: Arc<dyn TileRenderer>,
    config: AutoOrthoConfig,
    condition: Condition,
}

impl TileCache {
    pub fn new(config: AutoOrthoConfig, renderer: Arc<dyn TileRenderer>) -> std::io::Result<Self> {
        std::fs::create_dir_all(&config.cache_dir)?;
        let state = CacheState {
            active: HashSet::new(),
            tile_times: VecDeque::with_capacity(config.tile_time_window_len),
            target_zoom: config.target_zoom_initial,
        };
        Ok(Self {
            cache_dir: config.cache_dir.clone(),
            renderer,
            config,
            condition: Arc::new((Mutex::new(state), Condvar::new())),
        })
    }

    fn artifact_path(&self, key: &TileKey) -> PathBuf {
        key.artifact_path(&self.cache_dir)
    }

    fn artifact_present(&self, key: &TileKey) -> bool {
        match std::fs::metadata(self.artifact_path(key)) {
            Ok(meta) => meta.len() > 0,
            Err(_) => false,
        }
    }

    fn clamp_zoom(&self, zoom: i64) -> u32 {
        zoom.max(self.config.min_zoom as i64) as u32
    }

    /// Current Target Zoom, always in `[target_zoom_min, target_zoom_max]`.
    pub fn target_zoom(&self) -> i32 {
        self.condition.0.lock().target_zoom
    }

    fn record_completion(&self, elapsed: Duration) {
        let (lock, cvar) = &*self.condition;
        let mut state = lock.lock();
        if state.tile_times.len() == self.config.tile_time_window_len {
            state.tile_times.pop_front();
        }
        state.tile_times.push_back(elapsed);

        let avg = state.tile_times.iter().sum::<Duration>().as_secs_f64()
            / state.tile_times.len() as f64;

        if avg > self.config.slow_threshold_secs && state.target_zoom > self.config.target_zoom_min
        {
            state.target_zoom -= 1;
            tracing::info!(avg_secs = avg, target_zoom = state.target_zoom, "going slow, reducing target zoom");
        } else if avg <= self.config.fast_threshold_secs
            && state.target_zoom < self.config.target_zoom_max
        {
            state.target_zoom += 1;
            tracing::info!(avg_secs = avg, target_zoom = state.target_zoom, "going fast, increasing target zoom");
        }
        cvar.notify_all();
    }

    /// Synchronous. Walks zoom levels `zoom, zoom-1, ..., min_zoom`,
    /// returning the first hit; otherwise blocks the renderer at
    /// `min_zoom` and returns that artifact's path.
    pub fn get_quick(
        &self,
        key: &TileKey,
        min_zoom: Option<i64>,
        priority: i32,
    ) -> PathBuf {
        let zoom = key.zoom;
        let min_zoom = self.clamp_zoom(min_zoom.unwrap_or(zoom as i64 - 3));
        let (lock, cvar) = &*self.condition;

        for z in (min_zoom..=zoom).rev() {
            let candidate = key.at_zoom(z);
            let mut state = lock.lock();
            if state.active.contains(&candidate) {
                tracing::debug!(?candidate, "active, being quick, continue");
                drop(state);
                continue;
            }
            drop(state);
            if self.artifact_present(&candidate) {
                tracing::debug!(?candidate, "cache hit");
                return self.artifact_path(&candidate);
            }
        }

        let target = key.at_zoom(min_zoom);
        let target_path = self.artifact_path(&target);

        {
            let mut state = lock.lock();
            while state.active.contains(&target) {
                cvar.wait(&mut state);
                if self.artifact_present(&target) {
                    return target_path;
                }
            }
            state.active.insert(target.clone());
        }

        let start = Instant::now();
        if let Err(err) =
            self.renderer
                .get_quick_tile(key.col, key.row, zoom, min_zoom, &key.maptype, &target_path, priority)
        {
            tracing::error!(error = %err, ?target, "renderer failed to produce quick tile");
        }
        let elapsed = start.elapsed();

        {
            let mut state = lock.lock();
            state.active.remove(&target);
            cvar.notify_all();
        }

        self.record_completion(elapsed);
        target_path
    }

    /// `get_quick` with `min_zoom = min(zoom, max(zoom-2, TargetZoom))`.
    pub fn get_target(&self, key: &TileKey) -> PathBuf {
        let target_zoom = self.target_zoom() as i64;
        let min_zoom = (key.zoom as i64 - 2).max(target_zoom).min(key.zoom as i64);
        self.get_quick(key, Some(min_zoom), 1)
    }

    /// Idempotent, non-blocking. Schedules a background fetch for `key`
    /// if it is not already present or in flight.
    pub fn get_background(&self, key: &TileKey) {
        if self.artifact_present(key) {
            return;
        }
        let (lock, _cvar) = &*self.condition;
        {
            let mut state = lock.lock();
            if state.active.contains(key) {
                return;
            }
            state.active.insert(key.clone());
        }
        self.spawn_background(key.clone(), 0, 1);
    }

    /// `key` must be at native zoom; the renderer is told the native zoom
    /// and the quick zoom separately (matching `Renderer.get_background_tile`'s
    /// `(zoom, quick_zoom)` pair), while the artifact path and Active Set
    /// bookkeeping key are the *quick*-zoom key actually being produced.
    fn spawn_background(&self, key: TileKey, quick_zoom: u32, priority: i32) {
        let active_key = key.at_zoom(if quick_zoom != 0 { quick_zoom } else { key.zoom });
        let path = self.artifact_path(&active_key);
        let renderer = Arc::clone(&self.renderer);
        let condition = Arc::clone(&self.condition);
        let zoom = key.zoom;
        std::thread::spawn(move || {
            renderer.get_background_tile(key.col, key.row, zoom, quick_zoom, &key.maptype, &path, priority);
            let (lock, cvar) = &*condition;
            let mut state = lock.lock();
            state.active.remove(&active_key);
            cvar.notify_all();
        });
    }

    /// If present, return it. If active, degrade to `get_quick(zoom-2)`.
    /// Otherwise synchronously render at best quality; renderer failures
    /// are logged and swallowed, returning the expected path anyway.
    pub fn get_best(&self, key: &TileKey) -> PathBuf {
        let path = self.artifact_path(key);
        if self.artifact_present(key) {
            return path;
        }

        let won_race = {
            let mut state = self.condition.0.lock();
            if state.active.contains(key) {
                false
            } else {
                state.active.insert(key.clone());
                true
            }
        };
        if !won_race {
            return self.get_quick(key, Some(key.zoom as i64 - 2), 1);
        }

        if let Err(err) = self
            .renderer
            .get_tile(key.col, key.row, key.zoom, &key.maptype, &path)
        {
            tracing::error!(error = %err, ?key, "renderer failed to produce best tile");
        }
        {
            let (lock, cvar) = &*self.condition;
            let mut state = lock.lock();
            state.active.remove(key);
            cvar.notify_all();
        }
        path
    }

    /// Waits up to `deadline` for the artifact at `quick_zoom` (or
    /// `zoom` if `quick_zoom` is `0`) to appear, falling back to
    /// `get_quick` if the deadline is breached.
    pub fn get_deadline(
        &self,
        key: &TileKey,
        quick_zoom: Option<u32>,
        min_zoom: Option<u32>,
        deadline: Duration,
        priority: i32,
    ) -> PathBuf {
        let target = match quick_zoom {
            Some(qz) if qz != 0 => key.at_zoom(qz),
            _ => key.clone(),
        };
        let target_path = self.artifact_path(&target);

        if self.artifact_present(&target) {
            tracing::debug!(?target, "deadline cache hit");
            return target_path;
        }

        {
            let mut state = self.condition.0.lock();
            if !state.active.contains(&target) {
                state.active.insert(target.clone());
                drop(state);
                self.spawn_background(key.clone(), quick_zoom.unwrap_or(0), priority);
            }
        }

        let start = Instant::now();
        let mut deadline_reached = false;
        {
            let (lock, cvar) = &*self.condition;
            let mut state = lock.lock();
            while state.active.contains(&target) || !self.artifact_present(&target) {
                let elapsed = start.elapsed();
                if elapsed >= deadline {
                    deadline_reached = true;
                    break;
                }
                let remaining = deadline - elapsed;
                let timed_out = cvar.wait_for(&mut state, remaining).timed_out();
                if timed_out && start.elapsed() >= deadline {
                    deadline_reached = true;
                    break;
                }
            }
        }

        if !deadline_reached && self.artifact_present(&target) {
            tracing::debug!(?target, "deadline beat");
            return target_path;
        }

        tracing::info!(?target, deadline_s = deadline.as_secs_f64(), "deadline reached, falling back to quick");
        let fallback_min = min_zoom
            .map(|z| z as i64)
            .unwrap_or_else(|| key.zoom as i64 - 3);
        self.get_quick(key, Some(fallback_min), 1)
    }
}
