use core::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::*;
use crate::error::ConfigError;

/// Shape and geometry of the polar grid.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", default)]
pub struct GridConfig {
    pub angular_bins: usize,
    pub radial_bins: usize,
    pub channels: usize,
    pub r_min: f64,
    pub r_max: f64,
    pub alpha_warp: f64,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            angular_bins: DEFAULT_ANGULAR_BINS,
            radial_bins: DEFAULT_RADIAL_BINS,
            channels: GRID_CHANNELS,
            r_min: DEFAULT_R_MIN,
            r_max: DEFAULT_R_MAX,
            alpha_warp: DEFAULT_ALPHA_WARP,
        }
    }
}

impl GridConfig {
    #[inline]
    pub fn cell_count(&self) -> usize {
        self.angular_bins * self.radial_bins * self.channels
    }

    /// Flat offset of `(angle, radius, channel)` in `[A][R][C]` order.
    #[inline]
    pub fn index(&self, angle: usize, radius: usize, channel: usize) -> usize {
        (angle * self.radial_bins + radius) * self.channels + channel
    }

    /// True when both configurations produce grids of identical layout.
    pub fn same_shape(&self, other: &GridConfig) -> bool {
        self.angular_bins == other.angular_bins
            && self.radial_bins == other.radial_bins
            && self.channels == other.channels
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.angular_bins == 0 || self.radial_bins == 0 {
            return Err(ConfigError::ZeroBins {
                angular: self.angular_bins,
                radial: self.radial_bins,
            });
        }
        if self.channels != GRID_CHANNELS {
            return Err(ConfigError::ChannelCount {
                found: self.channels,
                expected: GRID_CHANNELS,
            });
        }
        if !(self.r_min > 0.0 && self.r_max.is_finite() && self.r_max > self.r_min) {
            return Err(ConfigError::RadiusRange {
                r_min: self.r_min,
                r_max: self.r_max,
            });
        }
        if !(self.alpha_warp >= 1.0 && self.alpha_warp.is_finite()) {
            return Err(ConfigError::AlphaWarp {
                found: self.alpha_warp,
            });
        }
        Ok(())
    }
}

/// Everything a collector needs to turn snapshots into frames. Immutable once
/// handed to a scheduler; replace it through `SamplingScheduler::reload_config`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", default)]
pub struct CollectionConfig {
    #[serde(flatten)]
    pub grid: GridConfig,
    pub sample_rate_hz: u32,
    pub ema_beta: f32,
    pub saturation_factor: f32,
    pub food_weight: f64,
    pub body_weight: f64,
    pub head_weight_multiplier: f64,
    pub pointer_radius: f64,
    pub fallback_game_radius: f64,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            grid: GridConfig::default(),
            sample_rate_hz: DEFAULT_SAMPLE_RATE_HZ,
            ema_beta: DEFAULT_EMA_BETA,
            saturation_factor: DEFAULT_SATURATION_FACTOR,
            food_weight: DEFAULT_FOOD_WEIGHT,
            body_weight: DEFAULT_BODY_WEIGHT,
            head_weight_multiplier: DEFAULT_HEAD_WEIGHT_MULTIPLIER,
            pointer_radius: DEFAULT_POINTER_RADIUS,
            fallback_game_radius: FALLBACK_GAME_RADIUS,
        }
    }
}

impl CollectionConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.sample_rate_hz.max(1)))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.grid.validate()?;
        if self.sample_rate_hz == 0 {
            return Err(ConfigError::SampleRate {
                found: self.sample_rate_hz,
            });
        }
        if !(0.0..1.0).contains(&self.ema_beta) {
            return Err(ConfigError::EmaBeta {
                found: self.ema_beta,
            });
        }
        if !(self.saturation_factor > 0.0 && self.saturation_factor.is_finite()) {
            return Err(ConfigError::SaturationFactor {
                found: self.saturation_factor,
            });
        }
        for (name, value) in [
            ("food_weight", self.food_weight),
            ("body_weight", self.body_weight),
            ("head_weight_multiplier", self.head_weight_multiplier),
            ("pointer_radius", self.pointer_radius),
            ("fallback_game_radius", self.fallback_game_radius),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                return Err(ConfigError::SplatWeight { name, found: value });
            }
        }
        Ok(())
    }
}
