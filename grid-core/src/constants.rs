pub const DEFAULT_ANGULAR_BINS: usize = 64;
pub const DEFAULT_RADIAL_BINS: usize = 24;
pub const GRID_CHANNELS: usize = 4;
pub const DEFAULT_R_MIN: f64 = 60.0;
pub const DEFAULT_R_MAX: f64 = 3200.0;
pub const DEFAULT_ALPHA_WARP: f64 = 6.0;

pub const DEFAULT_SAMPLE_RATE_HZ: u32 = 10;

// Normalization
pub const DEFAULT_EMA_BETA: f32 = 0.99;
pub const DEFAULT_SATURATION_FACTOR: f32 = 3.0;

// Splat weights
pub const DEFAULT_FOOD_WEIGHT: f64 = 0.1;
pub const DEFAULT_BODY_WEIGHT: f64 = 0.3;
pub const DEFAULT_HEAD_WEIGHT_MULTIPLIER: f64 = 2.0;
/// Raw per-cell ceiling applied while splatting, before normalization.
pub const CELL_SATURATION: f32 = 1.0;

// Channel layout of the last grid axis.
pub const CHANNEL_FOOD: usize = 0;
pub const CHANNEL_ENEMY_BODY: usize = 1;
pub const CHANNEL_OWN_BODY: usize = 2;
pub const CHANNEL_ENEMY_HEAD: usize = 3;

/// Used for distance-to-border until the handshake radius has been seen.
pub const FALLBACK_GAME_RADIUS: f64 = 21_600.0;
/// Pointer offset (world units from screen center) that maps to a unit-length input.
pub const DEFAULT_POINTER_RADIUS: f64 = 200.0;

/// Packet type byte of the initial setup packet carrying the game radius.
pub const SETUP_PACKET_TYPE: u8 = b'a';
pub const SETUP_PACKET_RADIUS_OFFSET: usize = 3;
