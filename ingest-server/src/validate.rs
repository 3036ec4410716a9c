use std::fmt;

use grid_core::{
    frame::default_username, DebugCounts, FrameMetadata, FrameRecord, GridMeta, PlayerInput,
    ValidationFlags,
};
use serde::Deserialize;

use crate::IngestPolicy;

const DEFAULT_DELTA_TIME_SECS: f64 = 0.1;
const MAX_SESSION_ID_LEN: usize = 128;

/// Frame as received off the wire. Every field is optional so a missing one
/// becomes a [`RejectReason`] instead of a body parse error.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct IncomingFrame {
    pub(crate) timestamp: Option<f64>,
    pub(crate) session_id: Option<String>,
    pub(crate) frame_index: Option<u64>,
    pub(crate) delta_time: Option<f64>,
    pub(crate) grid: Option<Vec<f32>>,
    pub(crate) grid_meta: Option<GridMeta>,
    pub(crate) metadata: Option<IncomingMetadata>,
    pub(crate) player_input: Option<PlayerInput>,
    pub(crate) validation: Option<ValidationFlags>,
    pub(crate) debug: Option<DebugCounts>,
    pub(crate) username: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct IncomingMetadata {
    pub(crate) heading: Option<f64>,
    pub(crate) heading_sin: Option<f64>,
    pub(crate) heading_cos: Option<f64>,
    pub(crate) velocity: Option<f64>,
    #[serde(default)]
    pub(crate) boost: bool,
    pub(crate) distance_to_border: Option<f64>,
    pub(crate) game_radius: Option<f64>,
    #[serde(default)]
    pub(crate) snake_length: f64,
}

impl IncomingFrame {
    /// Session key as sent, for counting rejections against a live session.
    pub(crate) fn session_key(&self) -> Option<&str> {
        self.session_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum RejectReason {
    MissingField(&'static str),
    InvalidSessionId,
    NonFinite(&'static str),
    GridShapeMismatch {
        expected: (usize, usize, usize),
        found: (usize, usize, usize),
    },
    GridSizeMismatch { expected: usize, found: usize },
    VelocityTooHigh { velocity: f64, max: f64 },
    GameRadiusOutOfRange { radius: f64, min: f64, max: f64 },
    NegativeDistanceToBorder(f64),
}

impl RejectReason {
    pub(crate) fn code(&self) -> &'static str {
        match self {
            Self::MissingField(_) => "missing_field",
            Self::InvalidSessionId => "invalid_session_id",
            Self::NonFinite(_) => "non_finite_value",
            Self::GridShapeMismatch { .. } => "grid_shape_mismatch",
            Self::GridSizeMismatch { .. } => "grid_size_mismatch",
            Self::VelocityTooHigh { .. } => "velocity_too_high",
            Self::GameRadiusOutOfRange { .. } => "game_radius_out_of_range",
            Self::NegativeDistanceToBorder(_) => "negative_distance_to_border",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingField(field) => write!(f, "missing required field: {field}"),
            Self::InvalidSessionId => write!(
                f,
                "sessionId must be non-empty and at most {MAX_SESSION_ID_LEN} characters"
            ),
            Self::NonFinite(field) => write!(f, "{field} must be a finite number"),
            Self::GridShapeMismatch { expected, found } => write!(
                f,
                "grid shape {}x{}x{} does not match server shape {}x{}x{}",
                found.0, found.1, found.2, expected.0, expected.1, expected.2
            ),
            Self::GridSizeMismatch { expected, found } => {
                write!(f, "grid has {found} cells, expected {expected}")
            }
            Self::VelocityTooHigh { velocity, max } => {
                write!(f, "velocity {velocity} exceeds maximum {max}")
            }
            Self::GameRadiusOutOfRange { radius, min, max } => {
                write!(f, "gameRadius {radius} outside [{min}, {max}]")
            }
            Self::NegativeDistanceToBorder(distance) => {
                write!(f, "distanceToBorder {distance} is negative")
            }
        }
    }
}

impl std::error::Error for RejectReason {}

fn required<T>(value: Option<T>, field: &'static str) -> Result<T, RejectReason> {
    value.ok_or(RejectReason::MissingField(field))
}

fn finite(value: f64, field: &'static str) -> Result<f64, RejectReason> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(RejectReason::NonFinite(field))
    }
}

/// Check `incoming` against `policy` and build the record that gets buffered.
pub(crate) fn validate_frame(
    incoming: IncomingFrame,
    policy: &IngestPolicy,
) -> Result<FrameRecord, RejectReason> {
    let session_id = required(incoming.session_id, "sessionId")?;
    let timestamp = required(incoming.timestamp, "timestamp")?;
    let frame_index = required(incoming.frame_index, "frameIndex")?;
    let grid = required(incoming.grid, "grid")?;
    let grid_meta = required(incoming.grid_meta, "gridMeta")?;
    let metadata = required(incoming.metadata, "metadata")?;
    let player_input = required(incoming.player_input, "playerInput")?;
    let heading = required(metadata.heading, "metadata.heading")?;
    let velocity = required(metadata.velocity, "metadata.velocity")?;
    let distance_to_border = required(metadata.distance_to_border, "metadata.distanceToBorder")?;
    let game_radius = required(metadata.game_radius, "metadata.gameRadius")?;

    let session_id = session_id.trim().to_string();
    if session_id.is_empty() || session_id.len() > MAX_SESSION_ID_LEN {
        return Err(RejectReason::InvalidSessionId);
    }

    let timestamp = finite(timestamp, "timestamp")?;
    let heading = finite(heading, "metadata.heading")?;
    let velocity = finite(velocity, "metadata.velocity")?;
    let distance_to_border = finite(distance_to_border, "metadata.distanceToBorder")?;
    let game_radius = finite(game_radius, "metadata.gameRadius")?;
    let delta_time = finite(
        incoming.delta_time.unwrap_or(DEFAULT_DELTA_TIME_SECS),
        "deltaTime",
    )?;
    finite(player_input.mx, "playerInput.mx")?;
    finite(player_input.my, "playerInput.my")?;

    let expected = &policy.expected_grid;
    if !grid_meta.same_shape(expected) {
        return Err(RejectReason::GridShapeMismatch {
            expected: (expected.angular_bins, expected.radial_bins, expected.channels),
            found: (
                grid_meta.angular_bins,
                grid_meta.radial_bins,
                grid_meta.channels,
            ),
        });
    }
    if grid.len() != grid_meta.cell_count() {
        return Err(RejectReason::GridSizeMismatch {
            expected: grid_meta.cell_count(),
            found: grid.len(),
        });
    }
    if grid.iter().any(|cell| !cell.is_finite()) {
        return Err(RejectReason::NonFinite("grid"));
    }

    if velocity > policy.max_velocity {
        return Err(RejectReason::VelocityTooHigh {
            velocity,
            max: policy.max_velocity,
        });
    }
    if game_radius < policy.min_game_radius || game_radius > policy.max_game_radius {
        return Err(RejectReason::GameRadiusOutOfRange {
            radius: game_radius,
            min: policy.min_game_radius,
            max: policy.max_game_radius,
        });
    }
    if distance_to_border < 0.0 {
        return Err(RejectReason::NegativeDistanceToBorder(distance_to_border));
    }

    let username = incoming
        .username
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(default_username);

    Ok(FrameRecord {
        timestamp,
        session_id,
        frame_index,
        delta_time,
        grid,
        grid_meta,
        metadata: FrameMetadata {
            heading,
            heading_sin: metadata
                .heading_sin
                .filter(|v| v.is_finite())
                .unwrap_or_else(|| heading.sin()),
            heading_cos: metadata
                .heading_cos
                .filter(|v| v.is_finite())
                .unwrap_or_else(|| heading.cos()),
            velocity,
            boost: metadata.boost,
            distance_to_border,
            game_radius,
            snake_length: metadata.snake_length,
        },
        player_input,
        validation: incoming.validation.unwrap_or_default(),
        debug: incoming.debug.unwrap_or_default(),
        username,
    })
}
