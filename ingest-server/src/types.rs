use grid_core::{CollectionConfig, FrameRecord};
use serde::{Deserialize, Serialize};

/// Running per-session aggregates, persisted into `.zattrs` on every flush.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub(crate) struct SessionStats {
    pub(crate) total_food_seen: u64,
    pub(crate) total_enemies_seen: u64,
    pub(crate) avg_velocity: f64,
    pub(crate) boost_time: f64,
    pub(crate) game_radius: Option<f64>,
}

impl SessionStats {
    /// Fold one accepted frame in. `valid_frames` already counts it.
    pub(crate) fn record(&mut self, frame: &FrameRecord, valid_frames: u64) {
        let n = valid_frames.max(1) as f64;
        self.avg_velocity = (self.avg_velocity * (n - 1.0) + frame.metadata.velocity) / n;
        self.total_food_seen += u64::from(frame.debug.food_count);
        self.total_enemies_seen += u64::from(frame.debug.splats.enemy_segments);
        if frame.metadata.boost {
            self.boost_time += frame.delta_time;
        }
        if self.game_radius.is_none() {
            self.game_radius = Some(frame.metadata.game_radius);
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum SessionStatus {
    Open,
    Closed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum CloseReason {
    Expired,
    Shutdown,
    ServerRestarted,
}

impl CloseReason {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Expired => "expired",
            Self::Shutdown => "shutdown",
            Self::ServerRestarted => "server_restarted",
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct IngestResponse {
    pub(crate) success: bool,
    pub(crate) status: &'static str,
    pub(crate) session: String,
    pub(crate) buffered: usize,
    pub(crate) flushed: bool,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct SessionSummary {
    pub(crate) session_id: String,
    pub(crate) username: String,
    pub(crate) client_ip: String,
    pub(crate) start_time: f64,
    pub(crate) last_frame_time: f64,
    pub(crate) frame_count: u64,
    pub(crate) valid_frames: u64,
    pub(crate) errors: u64,
    pub(crate) frames_written: u64,
    pub(crate) frames_dropped: u64,
    pub(crate) buffer_size: usize,
    pub(crate) validity_rate: f64,
    pub(crate) is_expired: bool,
    pub(crate) stats: SessionStats,
}

#[derive(Debug, Serialize)]
pub(crate) struct SessionListResponse {
    pub(crate) success: bool,
    pub(crate) active_sessions: usize,
    pub(crate) sessions: Vec<SessionSummary>,
}

/// Catalog row for one session, open or closed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct CatalogEntry {
    pub(crate) session_id: String,
    pub(crate) username: String,
    pub(crate) client_ip: String,
    // Reported by the enclosing response.
    #[serde(skip_serializing)]
    pub(crate) status: SessionStatus,
    pub(crate) started_at: f64,
    pub(crate) last_flush_at: Option<f64>,
    pub(crate) closed_at: Option<f64>,
    pub(crate) frames_written: u64,
    pub(crate) frame_count: u64,
    pub(crate) valid_frames: u64,
    pub(crate) errors: u64,
    pub(crate) close_reason: Option<String>,
    pub(crate) data_path: String,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub(crate) enum SessionDetails {
    Active(SessionSummary),
    Closed(CatalogEntry),
}

#[derive(Debug, Serialize)]
pub(crate) struct SessionStatsResponse {
    pub(crate) success: bool,
    pub(crate) status: SessionStatus,
    #[serde(flatten)]
    pub(crate) details: SessionDetails,
}

#[derive(Debug, Serialize)]
pub(crate) struct FlushResponse {
    pub(crate) success: bool,
    pub(crate) session: String,
    pub(crate) frames_flushed: usize,
    pub(crate) frames_written: u64,
}

#[derive(Debug, Serialize)]
pub(crate) struct CatalogCounts {
    pub(crate) open: usize,
    pub(crate) closed: usize,
    pub(crate) total: usize,
}

#[derive(Debug, Serialize)]
pub(crate) struct HealthResponse {
    pub(crate) success: bool,
    pub(crate) status: &'static str,
    pub(crate) service: &'static str,
    pub(crate) version: &'static str,
    pub(crate) active_sessions: usize,
    pub(crate) rejected_frames: u64,
    pub(crate) catalog: CatalogCounts,
    pub(crate) data_dir: String,
    pub(crate) timestamp: f64,
}

#[derive(Debug, Serialize)]
pub(crate) struct ConfigResponse {
    pub(crate) success: bool,
    pub(crate) status: &'static str,
    pub(crate) config: CollectionConfig,
    pub(crate) server_version: &'static str,
    pub(crate) timestamp: f64,
}

#[derive(Debug, Serialize)]
pub(crate) struct LatestFrameResponse {
    pub(crate) success: bool,
    pub(crate) frame: FrameRecord,
}
