use serde::{Deserialize, Serialize};

use crate::config::CollectionConfig;
use crate::constants::{CHANNEL_ENEMY_BODY, CHANNEL_ENEMY_HEAD, CHANNEL_FOOD, CHANNEL_OWN_BODY};
use crate::error::TickError;
use crate::grid::Grid;
use crate::snapshot::{Body, Food, Observer};
use crate::transform::{map, to_local};

/// How many contributions landed inside the grid during one accumulation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SplatCounts {
    pub food_splats: u32,
    pub enemy_segments: u32,
    pub own_segments: u32,
    pub enemy_heads: u32,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GridAccumulator {
    pub food_weight: f64,
    pub body_weight: f64,
    pub head_weight_multiplier: f64,
}

impl From<&CollectionConfig> for GridAccumulator {
    fn from(config: &CollectionConfig) -> Self {
        Self {
            food_weight: config.food_weight,
            body_weight: config.body_weight,
            head_weight_multiplier: config.head_weight_multiplier,
        }
    }
}

impl GridAccumulator {
    /// Splat every food item and body point around `observer` into `grid`.
    ///
    /// The grid is not cleared first. Entities with missing or non-finite
    /// coordinates are skipped silently, as are points outside the radial
    /// range. An observer without a pose contributes nothing.
    pub fn accumulate(
        &self,
        grid: &mut Grid,
        observer: &Observer,
        bodies: &[Body],
        food: &[Food],
    ) -> Result<SplatCounts, TickError> {
        grid.check_shape()?;

        let mut counts = SplatCounts::default();
        let Some((ox, oy, heading)) = observer.pose() else {
            return Ok(counts);
        };
        let config = *grid.config();

        for item in food {
            let (Some(x), Some(y), Some(size)) = (item.x, item.y, item.size) else {
                continue;
            };
            if !(x.is_finite() && y.is_finite() && size.is_finite()) {
                continue;
            }
            let (u, v) = to_local(x - ox, y - oy, heading);
            if let Some(cell) = map(u, v, &config) {
                grid.splat(cell, CHANNEL_FOOD, size * self.food_weight);
                counts.food_splats += 1;
            }
        }

        for body in bodies {
            let own = body.id.is_some() && body.id == observer.id;
            let scale = body.scale.filter(|s| s.is_finite()).unwrap_or(1.0);
            let weight = scale * self.body_weight;
            let channel = if own {
                CHANNEL_OWN_BODY
            } else {
                CHANNEL_ENEMY_BODY
            };

            for (index, point) in body.points.iter().enumerate() {
                let Some((x, y)) = point.coords() else {
                    continue;
                };
                let (u, v) = to_local(x - ox, y - oy, heading);
                let Some(cell) = map(u, v, &config) else {
                    continue;
                };

                grid.splat(cell, channel, weight);
                if own {
                    counts.own_segments += 1;
                } else {
                    counts.enemy_segments += 1;
                    if index == 0 {
                        grid.splat(
                            cell,
                            CHANNEL_ENEMY_HEAD,
                            weight * self.head_weight_multiplier,
                        );
                        counts.enemy_heads += 1;
                    }
                }
            }
        }

        Ok(counts)
    }
}
