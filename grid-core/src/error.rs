use core::fmt;

#[derive(Clone, Debug, PartialEq)]
pub enum ConfigError {
    ZeroBins { angular: usize, radial: usize },
    ChannelCount { found: usize, expected: usize },
    RadiusRange { r_min: f64, r_max: f64 },
    AlphaWarp { found: f64 },
    SampleRate { found: u32 },
    EmaBeta { found: f32 },
    SaturationFactor { found: f32 },
    SplatWeight { name: &'static str, found: f64 },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ZeroBins { angular, radial } => write!(
                f,
                "grid needs at least one bin per axis: angular={angular}, radial={radial}"
            ),
            Self::ChannelCount { found, expected } => {
                write!(f, "unsupported channel count {found} (expected {expected})")
            }
            Self::RadiusRange { r_min, r_max } => write!(
                f,
                "radius range must satisfy 0 < r_min < r_max: r_min={r_min}, r_max={r_max}"
            ),
            Self::AlphaWarp { found } => write!(f, "alpha_warp must be >= 1, got {found}"),
            Self::SampleRate { found } => write!(f, "sample rate must be positive, got {found}"),
            Self::EmaBeta { found } => write!(f, "ema_beta must be in [0, 1), got {found}"),
            Self::SaturationFactor { found } => {
                write!(f, "saturation_factor must be positive, got {found}")
            }
            Self::SplatWeight { name, found } => {
                write!(f, "{name} must be finite and non-negative, got {found}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Failure inside one sampling tick. The tick is dropped; the loop keeps running.
#[derive(Clone, Debug, PartialEq)]
pub enum TickError {
    GridShapeMismatch { expected: usize, actual: usize },
    EmaShapeMismatch { expected: usize, actual: usize },
    NonFiniteCell { index: usize },
}

impl fmt::Display for TickError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GridShapeMismatch { expected, actual } => write!(
                f,
                "grid buffer holds {actual} cells, configuration expects {expected}"
            ),
            Self::EmaShapeMismatch { expected, actual } => write!(
                f,
                "ema state holds {actual} cells, grid has {expected}"
            ),
            Self::NonFiniteCell { index } => write!(f, "non-finite value in grid cell {index}"),
        }
    }
}

impl std::error::Error for TickError {}
