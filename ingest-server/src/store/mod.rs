mod array;
mod catalog;
mod files;

use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use grid_core::{CollectionConfig, FrameRecord, GridConfig};
use serde_json::{json, Map, Value};

use crate::{now_unix_s, CloseReason, SessionStats};
use array::{ChunkedArray, DType};
pub(crate) use catalog::SessionCatalog;

/// Who a session belongs to, fixed at its first frame.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SessionInfo {
    pub(crate) session_id: String,
    pub(crate) username: String,
    pub(crate) client_ip: String,
    /// Unix seconds.
    pub(crate) start_time: f64,
}

#[derive(Debug, Clone)]
pub(crate) struct SessionClose {
    pub(crate) end_time: f64,
    pub(crate) reason: CloseReason,
    pub(crate) frame_count: u64,
    pub(crate) valid_frames: u64,
    pub(crate) errors: u64,
    pub(crate) stats: SessionStats,
}

/// Durable destination for buffered frames.
pub(crate) trait FrameStore: Send + Sync + 'static {
    /// Append `frames` after everything already persisted for the session.
    /// Returns the persisted frame count.
    fn append(
        &self,
        session: &SessionInfo,
        frames: &[FrameRecord],
        stats: &SessionStats,
    ) -> Result<u64, String>;

    /// Record end-of-session attributes. Frames must already be appended.
    fn finalize(&self, session: &SessionInfo, close: &SessionClose) -> Result<(), String>;
}

const GRIDS: &str = "grids";
const TIMESTAMPS: &str = "timestamps";
const HEADINGS: &str = "headings";
const VELOCITIES: &str = "velocities";
const DISTANCES_TO_BORDER: &str = "distances_to_border";
const BOOST_STATES: &str = "boost_states";
const PLAYER_INPUTS: &str = "player_inputs";

/// Per-session columnar arrays laid out as a Zarr v2 group:
/// `{root}/{username}/session_{id}/{array}/`.
pub(crate) struct DatasetStore {
    root: PathBuf,
    chunk_size: usize,
    config: CollectionConfig,
    catalog: Arc<SessionCatalog>,
}

struct SessionArrays {
    grids: ChunkedArray,
    timestamps: ChunkedArray,
    headings: ChunkedArray,
    velocities: ChunkedArray,
    distances_to_border: ChunkedArray,
    boost_states: ChunkedArray,
    player_inputs: ChunkedArray,
}

impl SessionArrays {
    fn open(dir: &Path, grid: &GridConfig, chunk_size: usize) -> Result<Self, String> {
        let grid_shape = [grid.angular_bins, grid.radial_bins, grid.channels];
        let scalar = |name: &str, dtype: DType| {
            ChunkedArray::open_or_create(&dir.join(name), dtype, &[], chunk_size)
        };
        Ok(Self {
            grids: ChunkedArray::open_or_create(
                &dir.join(GRIDS),
                DType::F32,
                &grid_shape,
                chunk_size,
            )?,
            timestamps: scalar(TIMESTAMPS, DType::F64)?,
            headings: scalar(HEADINGS, DType::F32)?,
            velocities: scalar(VELOCITIES, DType::F32)?,
            distances_to_border: scalar(DISTANCES_TO_BORDER, DType::F32)?,
            boost_states: scalar(BOOST_STATES, DType::Bool)?,
            player_inputs: ChunkedArray::open_or_create(
                &dir.join(PLAYER_INPUTS),
                DType::F32,
                &[3],
                chunk_size,
            )?,
        })
    }

    fn all_mut(&mut self) -> [&mut ChunkedArray; 7] {
        [
            &mut self.grids,
            &mut self.timestamps,
            &mut self.headings,
            &mut self.velocities,
            &mut self.distances_to_border,
            &mut self.boost_states,
            &mut self.player_inputs,
        ]
    }

    /// Encode `frames` column by column and write them at `start`.
    fn write(&mut self, start: usize, frames: &[FrameRecord]) -> Result<(), String> {
        let cells = self.grids.row_bytes() / 4;
        let mut grids = Vec::with_capacity(frames.len() * cells * 4);
        let mut timestamps = Vec::with_capacity(frames.len() * 8);
        let mut headings = Vec::with_capacity(frames.len() * 4);
        let mut velocities = Vec::with_capacity(frames.len() * 4);
        let mut distances = Vec::with_capacity(frames.len() * 4);
        let mut boosts = Vec::with_capacity(frames.len());
        let mut inputs = Vec::with_capacity(frames.len() * 12);

        for frame in frames {
            if frame.grid.len() != cells {
                return Err(format!(
                    "frame {} of session {} has {} grid cells, store expects {cells}",
                    frame.frame_index,
                    frame.session_id,
                    frame.grid.len()
                ));
            }
            for cell in &frame.grid {
                grids.extend_from_slice(&cell.to_le_bytes());
            }
            timestamps.extend_from_slice(&frame.timestamp.to_le_bytes());
            headings.extend_from_slice(&(frame.metadata.heading as f32).to_le_bytes());
            velocities.extend_from_slice(&(frame.metadata.velocity as f32).to_le_bytes());
            distances.extend_from_slice(&(frame.metadata.distance_to_border as f32).to_le_bytes());
            boosts.push(u8::from(frame.metadata.boost));
            let input = &frame.player_input;
            for value in [input.mx as f32, input.my as f32, f32::from(u8::from(input.boost))] {
                inputs.extend_from_slice(&value.to_le_bytes());
            }
        }

        self.grids.write_rows(start, &grids)?;
        self.timestamps.write_rows(start, &timestamps)?;
        self.headings.write_rows(start, &headings)?;
        self.velocities.write_rows(start, &velocities)?;
        self.distances_to_border.write_rows(start, &distances)?;
        self.boost_states.write_rows(start, &boosts)?;
        self.player_inputs.write_rows(start, &inputs)
    }
}

impl DatasetStore {
    pub(crate) fn open(
        root: &Path,
        chunk_size: usize,
        config: CollectionConfig,
        catalog: Arc<SessionCatalog>,
    ) -> Result<Self, String> {
        if chunk_size == 0 {
            return Err("chunk size must be positive".to_string());
        }
        fs::create_dir_all(root)
            .map_err(|e| format!("failed to create data dir {}: {e}", root.display()))?;
        Ok(Self {
            root: root.to_path_buf(),
            chunk_size,
            config,
            catalog,
        })
    }

    pub(crate) fn session_dir(&self, session: &SessionInfo) -> PathBuf {
        files::session_dir(&self.root, &session.username, &session.session_id)
    }

    /// Create the group files on first use. Existing groups are left as is.
    fn ensure_group(&self, dir: &Path, session: &SessionInfo) -> Result<(), String> {
        if dir.join(".zgroup").exists() {
            return Ok(());
        }
        fs::create_dir_all(dir)
            .map_err(|e| format!("failed to create session dir {}: {e}", dir.display()))?;

        let config = serde_json::to_value(self.config)
            .map_err(|e| format!("failed to serialize config: {e}"))?;
        files::write_json_atomic(
            &dir.join("metadata.json"),
            &json!({
                "session_id": session.session_id,
                "username": session.username,
                "client_ip": session.client_ip,
                "start_time": session.start_time,
                "config": config,
                "chunk_size": self.chunk_size,
            }),
        )?;
        files::write_json_atomic(
            &dir.join(".zattrs"),
            &json!({
                "session_id": session.session_id,
                "username": session.username,
                "client_ip": session.client_ip,
                "start_time": session.start_time,
                "config": config,
                "frames_written": 0,
            }),
        )?;
        // Written last: its presence marks a complete group.
        files::write_json_atomic(&dir.join(".zgroup"), &json!({ "zarr_format": 2 }))?;
        tracing::info!(session_id = %session.session_id, dir = %dir.display(), "created session dataset");
        Ok(())
    }

    fn read_attrs(dir: &Path) -> Result<Map<String, Value>, String> {
        files::read_json(&dir.join(".zattrs"))
    }

    fn write_attrs(dir: &Path, attrs: &Map<String, Value>) -> Result<(), String> {
        files::write_json_atomic(&dir.join(".zattrs"), attrs)
    }
}

impl FrameStore for DatasetStore {
    fn append(
        &self,
        session: &SessionInfo,
        frames: &[FrameRecord],
        stats: &SessionStats,
    ) -> Result<u64, String> {
        let dir = self.session_dir(session);
        self.ensure_group(&dir, session)?;

        // `frames_written` is the committed length; array tails past it are
        // leftovers of an interrupted flush and get overwritten.
        let mut attrs = Self::read_attrs(&dir)?;
        let start = attrs
            .get("frames_written")
            .and_then(Value::as_u64)
            .unwrap_or(0);

        let mut arrays = SessionArrays::open(&dir, &self.config.grid, self.chunk_size)?;
        for array in arrays.all_mut() {
            if (array.len() as u64) < start {
                return Err(format!(
                    "session {}: array shorter ({}) than frames_written ({start})",
                    session.session_id,
                    array.len()
                ));
            }
        }
        arrays.write(start as usize, frames)?;

        let total = start + frames.len() as u64;
        attrs.insert("frames_written".to_string(), json!(total));
        attrs.insert("last_update".to_string(), json!(now_unix_s()));
        attrs.insert(
            "stats".to_string(),
            serde_json::to_value(stats).map_err(|e| format!("failed to serialize stats: {e}"))?,
        );
        Self::write_attrs(&dir, &attrs)?;

        self.catalog.record_flush(session, &dir, total)?;
        Ok(total)
    }

    fn finalize(&self, session: &SessionInfo, close: &SessionClose) -> Result<(), String> {
        let dir = self.session_dir(session);
        if dir.join(".zattrs").exists() {
            let mut attrs = Self::read_attrs(&dir)?;
            let final_stats = serde_json::to_value(&close.stats)
                .map_err(|e| format!("failed to serialize stats: {e}"))?;
            attrs.insert("end_time".to_string(), json!(close.end_time));
            attrs.insert("final_stats".to_string(), final_stats);
            attrs.insert("frame_count".to_string(), json!(close.frame_count));
            attrs.insert("valid_frames".to_string(), json!(close.valid_frames));
            attrs.insert("errors".to_string(), json!(close.errors));
            attrs.insert("close_reason".to_string(), json!(close.reason.as_str()));
            Self::write_attrs(&dir, &attrs)?;
        }

        if !self.catalog.record_close(&session.session_id, close)? {
            tracing::warn!(session_id = %session.session_id, "closed session has no catalog row");
        }
        Ok(())
    }
}
