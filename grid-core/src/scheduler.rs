//! Tick-level state machine. Owns the grid scratch buffer and EMA state for
//! one collector; the timer loop that drives it lives outside this crate.

use serde::{Deserialize, Serialize};

use crate::accumulate::GridAccumulator;
use crate::config::CollectionConfig;
use crate::error::{ConfigError, TickError};
use crate::frame::{
    default_username, DebugCounts, FrameMetadata, FrameRecord, GridMeta, PlayerInput,
    ValidationFlags,
};
use crate::grid::Grid;
use crate::normalize::{AdaptiveNormalizer, EmaState};
use crate::snapshot::{EntitySnapshot, Observer, PointerState};
use crate::transform::to_local;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    Idle,
    Collecting,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerStats {
    pub frames_emitted: u64,
    pub ticks_skipped: u64,
    pub tick_errors: u64,
    pub transport_errors: u64,
}

#[derive(Clone, Debug, PartialEq)]
pub enum TickOutcome {
    /// Not collecting; nothing happened.
    Idle,
    /// Observer pose unavailable. Normal while the scene loads.
    Skipped,
    Emitted(FrameRecord),
    Failed(TickError),
}

#[derive(Clone, Debug)]
struct ActiveSession {
    id: String,
    next_frame_index: u64,
    last_tick_ms: Option<f64>,
    /// Position and the time it was observed.
    last_position: Option<(f64, f64, f64)>,
}

pub struct SamplingScheduler {
    config: CollectionConfig,
    accumulator: GridAccumulator,
    normalizer: AdaptiveNormalizer,
    grid: Grid,
    ema: EmaState,
    session: Option<ActiveSession>,
    game_radius: Option<f64>,
    username: String,
    stats: SchedulerStats,
}

impl SamplingScheduler {
    pub fn new(config: CollectionConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            accumulator: GridAccumulator::from(&config),
            normalizer: AdaptiveNormalizer::from(&config),
            grid: Grid::new(config.grid),
            ema: EmaState::new(&config.grid),
            config,
            session: None,
            game_radius: None,
            username: default_username(),
            stats: SchedulerStats::default(),
        })
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = username.into();
        self
    }

    pub fn config(&self) -> &CollectionConfig {
        &self.config
    }

    pub fn state(&self) -> SchedulerState {
        if self.session.is_some() {
            SchedulerState::Collecting
        } else {
            SchedulerState::Idle
        }
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.id.as_str())
    }

    pub fn stats(&self) -> SchedulerStats {
        self.stats
    }

    pub fn game_radius(&self) -> Option<f64> {
        self.game_radius
    }

    /// Record the radius parsed from the setup packet. Zero is ignored.
    pub fn learn_game_radius(&mut self, radius: u32) {
        if radius > 0 {
            self.game_radius = Some(f64::from(radius));
        }
    }

    /// Delivery failures are observed by the dispatcher, not the tick.
    pub fn record_transport_error(&mut self) {
        self.stats.transport_errors += 1;
    }

    /// Begin a new session. Restarting while collecting opens a fresh one.
    pub fn start(&mut self, now_ms: f64) -> &str {
        self.ema.reset(&self.config.grid);
        self.grid.reshape(self.config.grid);
        self.grid.clear();
        self.stats = SchedulerStats::default();
        let session = self.session.insert(ActiveSession {
            id: format!("{}", now_ms.max(0.0) as u64),
            next_frame_index: 0,
            last_tick_ms: None,
            last_position: None,
        });
        &session.id
    }

    /// Counters are kept for diagnostics until the next `start`.
    pub fn stop(&mut self) {
        self.session = None;
    }

    /// Swap in a new configuration. EMA history survives only when the grid
    /// layout is unchanged.
    pub fn reload_config(&mut self, config: CollectionConfig) -> Result<(), ConfigError> {
        config.validate()?;
        if !self.config.grid.same_shape(&config.grid) {
            self.ema.reset(&config.grid);
        }
        self.grid.reshape(config.grid);
        self.accumulator = GridAccumulator::from(&config);
        self.normalizer = AdaptiveNormalizer::from(&config);
        self.config = config;
        Ok(())
    }

    pub fn tick(
        &mut self,
        now_ms: f64,
        snapshot: &EntitySnapshot,
        pointer: &PointerState,
    ) -> TickOutcome {
        let Some(session) = self.session.as_mut() else {
            return TickOutcome::Idle;
        };

        let delta_time = match session.last_tick_ms {
            Some(last) => ((now_ms - last) / 1000.0).max(0.0),
            None => 1.0 / f64::from(self.config.sample_rate_hz),
        };
        session.last_tick_ms = Some(now_ms);

        let Some(observer) = snapshot.observer.as_ref() else {
            self.stats.ticks_skipped += 1;
            return TickOutcome::Skipped;
        };
        let Some((x, y, heading)) = observer.pose() else {
            self.stats.ticks_skipped += 1;
            return TickOutcome::Skipped;
        };

        self.grid.clear();
        let counts = match self
            .accumulator
            .accumulate(&mut self.grid, observer, &snapshot.bodies, &snapshot.food)
            .and_then(|counts| {
                self.normalizer
                    .normalize(&mut self.grid, &mut self.ema)
                    .map(|()| counts)
            }) {
            Ok(counts) => counts,
            Err(err) => {
                self.stats.tick_errors += 1;
                self.grid = Grid::new(self.config.grid);
                self.ema.reset(&self.config.grid);
                return TickOutcome::Failed(err);
            }
        };

        let velocity = match session.last_position {
            Some((px, py, seen_ms)) if now_ms > seen_ms => {
                (x - px).hypot(y - py) / ((now_ms - seen_ms) / 1000.0)
            }
            _ => 0.0,
        };
        let has_previous_position = session.last_position.is_some();
        session.last_position = Some((x, y, now_ms));

        let game_radius = self.game_radius.unwrap_or(self.config.fallback_game_radius);
        let (player_input, has_pointer) =
            player_input(pointer, heading, self.config.pointer_radius);

        let frame = FrameRecord {
            timestamp: now_ms,
            session_id: session.id.clone(),
            frame_index: session.next_frame_index,
            delta_time,
            grid: self.grid.cells().to_vec(),
            grid_meta: GridMeta::from(&self.config.grid),
            metadata: FrameMetadata {
                heading,
                heading_sin: heading.sin(),
                heading_cos: heading.cos(),
                velocity,
                boost: observer.boosting || pointer.boost,
                distance_to_border: distance_to_border(x, y, game_radius),
                game_radius,
                snake_length: snake_length(observer),
            },
            player_input,
            validation: ValidationFlags {
                has_pointer,
                game_radius_known: self.game_radius.is_some(),
                has_previous_position,
            },
            debug: DebugCounts {
                food_count: saturating_u32(snapshot.food.len()),
                body_count: saturating_u32(snapshot.bodies.len()),
                splats: counts,
            },
            username: self.username.clone(),
        };
        session.next_frame_index += 1;
        self.stats.frames_emitted += 1;
        TickOutcome::Emitted(frame)
    }

    #[cfg(test)]
    fn corrupt_grid_for_test(&mut self) {
        self.grid.truncate_for_test(3);
    }
}

/// Distance from `(x, y)` to the edge of a circular arena centred on `(R, R)`.
pub fn distance_to_border(x: f64, y: f64, game_radius: f64) -> f64 {
    (game_radius - (x - game_radius).hypot(y - game_radius)).max(0.0)
}

fn player_input(pointer: &PointerState, heading: f64, pointer_radius: f64) -> (PlayerInput, bool) {
    let (px, py) = match (pointer.x, pointer.y) {
        (Some(px), Some(py)) if px.is_finite() && py.is_finite() && pointer_radius > 0.0 => {
            (px, py)
        }
        _ => {
            let idle = PlayerInput {
                boost: pointer.boost,
                ..PlayerInput::default()
            };
            return (idle, false);
        }
    };

    let (u, v) = to_local(px, py, heading);
    let (mut mx, mut my) = (u / pointer_radius, v / pointer_radius);
    let magnitude = mx.hypot(my);
    if magnitude > 1.0 {
        mx /= magnitude;
        my /= magnitude;
    }
    (
        PlayerInput {
            mx,
            my,
            boost: pointer.boost,
        },
        true,
    )
}

fn snake_length(observer: &Observer) -> f64 {
    observer.length.filter(|l| l.is_finite()).unwrap_or(0.0)
}

fn saturating_u32(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}
