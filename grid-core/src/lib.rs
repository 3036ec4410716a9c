pub mod accumulate;
pub mod config;
pub mod constants;
pub mod error;
pub mod frame;
pub mod grid;
pub mod handshake;
pub mod normalize;
pub mod scheduler;
pub mod snapshot;
pub mod transform;

pub use accumulate::{GridAccumulator, SplatCounts};
pub use config::{CollectionConfig, GridConfig};
pub use error::{ConfigError, TickError};
pub use frame::{DebugCounts, FrameMetadata, FrameRecord, GridMeta, PlayerInput, ValidationFlags};
pub use grid::Grid;
pub use handshake::parse_game_radius;
pub use normalize::{AdaptiveNormalizer, EmaState};
pub use scheduler::{SamplingScheduler, SchedulerState, SchedulerStats, TickOutcome};
pub use snapshot::{EntitySnapshot, PointerState};
pub use transform::PolarCell;
