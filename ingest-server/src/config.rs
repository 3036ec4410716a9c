use std::{env, path::PathBuf, sync::Arc};

use grid_core::{CollectionConfig, GridConfig};

use crate::{IngestBuffer, SessionCatalog};

pub(crate) const DEFAULT_BIND_ADDR: &str = "0.0.0.0:5055";
pub(crate) const DEFAULT_DATA_DIR: &str = "./data";
pub(crate) const DEFAULT_CHUNK_SIZE: usize = 512;
pub(crate) const DEFAULT_BUFFER_SIZE: usize = 200;
pub(crate) const DEFAULT_SESSION_TIMEOUT_SECS: u64 = 30;
pub(crate) const DEFAULT_SESSION_SWEEP_SECS: u64 = 5;
pub(crate) const DEFAULT_MAX_VELOCITY: f64 = 1000.0;
pub(crate) const DEFAULT_MIN_GAME_RADIUS: f64 = 10_000.0;
pub(crate) const DEFAULT_MAX_GAME_RADIUS: f64 = 50_000.0;
// One 64x24x4 grid is ~40 KB of JSON text.
pub(crate) const DEFAULT_JSON_LIMIT_BYTES: usize = 1024 * 1024;

/// Ingest-time sanity bounds for frames coming from untrusted collectors.
#[derive(Debug, Clone, Copy)]
pub(crate) struct IngestPolicy {
    pub(crate) max_velocity: f64,
    pub(crate) min_game_radius: f64,
    pub(crate) max_game_radius: f64,
    pub(crate) expected_grid: GridConfig,
}

impl IngestPolicy {
    pub(crate) fn from_env(expected_grid: GridConfig) -> Self {
        let mut min_game_radius = read_env_f64("MIN_GAME_RADIUS", DEFAULT_MIN_GAME_RADIUS);
        let mut max_game_radius = read_env_f64("MAX_GAME_RADIUS", DEFAULT_MAX_GAME_RADIUS);

        if min_game_radius > max_game_radius {
            tracing::warn!(
                "MIN_GAME_RADIUS ({}) > MAX_GAME_RADIUS ({}). Falling back to defaults.",
                min_game_radius,
                max_game_radius
            );
            min_game_radius = DEFAULT_MIN_GAME_RADIUS;
            max_game_radius = DEFAULT_MAX_GAME_RADIUS;
        }

        Self {
            max_velocity: read_env_f64("MAX_VELOCITY", DEFAULT_MAX_VELOCITY),
            min_game_radius,
            max_game_radius,
            expected_grid,
        }
    }
}

impl Default for IngestPolicy {
    fn default() -> Self {
        Self {
            max_velocity: DEFAULT_MAX_VELOCITY,
            min_game_radius: DEFAULT_MIN_GAME_RADIUS,
            max_game_radius: DEFAULT_MAX_GAME_RADIUS,
            expected_grid: GridConfig::default(),
        }
    }
}

/// Served to collectors through `/config`; grid overrides also define the
/// shape the server accepts.
pub(crate) fn collection_config_from_env() -> CollectionConfig {
    let defaults = CollectionConfig::default();
    let mut config = CollectionConfig {
        grid: GridConfig {
            angular_bins: read_env_usize("ANGULAR_BINS", defaults.grid.angular_bins),
            radial_bins: read_env_usize("RADIAL_BINS", defaults.grid.radial_bins),
            channels: defaults.grid.channels,
            r_min: read_env_f64("R_MIN", defaults.grid.r_min),
            r_max: read_env_f64("R_MAX", defaults.grid.r_max),
            alpha_warp: read_env_f64("ALPHA_WARP", defaults.grid.alpha_warp),
        },
        sample_rate_hz: read_env_u32("SAMPLE_RATE_HZ", defaults.sample_rate_hz),
        ema_beta: read_env_f64("EMA_BETA", f64::from(defaults.ema_beta)) as f32,
        saturation_factor: read_env_f64(
            "SATURATION_FACTOR",
            f64::from(defaults.saturation_factor),
        ) as f32,
        ..defaults
    };

    if let Err(err) = config.validate() {
        tracing::warn!("invalid collection config from environment ({err}). Falling back to defaults.");
        config = defaults;
    }
    config
}

#[derive(Debug, Clone)]
pub(crate) struct BufferSettings {
    pub(crate) buffer_size: usize,
    pub(crate) session_timeout_secs: u64,
}

/// Chunk length and flush threshold are read together: a buffer larger than
/// a chunk would split every flush across chunk files.
pub(crate) fn storage_sizes_from_env() -> (usize, usize) {
    let mut chunk_size = read_env_usize("CHUNK_SIZE", DEFAULT_CHUNK_SIZE);
    let mut buffer_size = read_env_usize("BUFFER_SIZE", DEFAULT_BUFFER_SIZE);
    if buffer_size > chunk_size {
        tracing::warn!(
            "BUFFER_SIZE ({}) > CHUNK_SIZE ({}). Falling back to defaults.",
            buffer_size,
            chunk_size
        );
        chunk_size = DEFAULT_CHUNK_SIZE;
        buffer_size = DEFAULT_BUFFER_SIZE;
    }
    (chunk_size, buffer_size)
}

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) buffer: Arc<IngestBuffer>,
    pub(crate) catalog: Arc<SessionCatalog>,
    pub(crate) collection: CollectionConfig,
    pub(crate) data_dir: PathBuf,
}

pub(crate) fn read_env_string(name: &str, default: &str) -> String {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| default.to_string())
}

pub(crate) fn read_env_usize(name: &str, default: usize) -> usize {
    env::var(name)
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}

pub(crate) fn read_env_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}

pub(crate) fn read_env_u32(name: &str, default: u32) -> u32 {
    env::var(name)
        .ok()
        .and_then(|value| value.parse::<u32>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}

pub(crate) fn read_env_f64(name: &str, default: f64) -> f64 {
    env::var(name)
        .ok()
        .and_then(|value| value.parse::<f64>().ok())
        .filter(|value| value.is_finite() && *value > 0.0)
        .unwrap_or(default)
}
