use serde::{Deserialize, Serialize};

use crate::accumulate::SplatCounts;
use crate::config::GridConfig;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GridMeta {
    pub angular_bins: usize,
    pub radial_bins: usize,
    pub channels: usize,
    pub r_min: f64,
    pub r_max: f64,
    pub alpha_warp: f64,
}

impl GridMeta {
    pub fn cell_count(&self) -> usize {
        self.angular_bins * self.radial_bins * self.channels
    }

    pub fn same_shape(&self, grid: &GridConfig) -> bool {
        self.angular_bins == grid.angular_bins
            && self.radial_bins == grid.radial_bins
            && self.channels == grid.channels
    }
}

impl From<&GridConfig> for GridMeta {
    fn from(grid: &GridConfig) -> Self {
        Self {
            angular_bins: grid.angular_bins,
            radial_bins: grid.radial_bins,
            channels: grid.channels,
            r_min: grid.r_min,
            r_max: grid.r_max,
            alpha_warp: grid.alpha_warp,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameMetadata {
    pub heading: f64,
    pub heading_sin: f64,
    pub heading_cos: f64,
    /// World units per second.
    pub velocity: f64,
    pub boost: bool,
    pub distance_to_border: f64,
    pub game_radius: f64,
    pub snake_length: f64,
}

/// Pointer target in the observer frame, inside the unit circle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PlayerInput {
    pub mx: f64,
    pub my: f64,
    pub boost: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationFlags {
    pub has_pointer: bool,
    pub game_radius_known: bool,
    pub has_previous_position: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DebugCounts {
    pub food_count: u32,
    pub body_count: u32,
    #[serde(flatten)]
    pub splats: SplatCounts,
}

/// One sampled tick. Built once by the scheduler and never mutated.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameRecord {
    /// Unix epoch milliseconds.
    pub timestamp: f64,
    pub session_id: String,
    pub frame_index: u64,
    /// Seconds since the previous tick.
    pub delta_time: f64,
    pub grid: Vec<f32>,
    pub grid_meta: GridMeta,
    pub metadata: FrameMetadata,
    pub player_input: PlayerInput,
    #[serde(default)]
    pub validation: ValidationFlags,
    #[serde(default)]
    pub debug: DebugCounts,
    #[serde(default = "default_username")]
    pub username: String,
}

pub fn default_username() -> String {
    "unknown".to_string()
}
