use std::{
    fs,
    io::{BufRead, Write},
    path::Path,
};

use anyhow::{Context, Result};
use grid_core::{
    CollectionConfig, EntitySnapshot, PointerState, SamplingScheduler, SchedulerStats,
    TickOutcome,
};
use serde::{Deserialize, Serialize};

/// One recorded tick of host state.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayLine {
    pub timestamp_ms: f64,
    #[serde(default)]
    pub snapshot: EntitySnapshot,
    #[serde(default)]
    pub pointer: PointerState,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ReplaySummary {
    pub lines: u64,
    pub session_id: Option<String>,
    pub stats: SchedulerStats,
}

/// Read a JSON collection config, falling back to defaults for absent keys.
/// No path means the stock config.
pub fn load_config(path: Option<&Path>) -> Result<CollectionConfig> {
    let Some(path) = path else {
        return Ok(CollectionConfig::default());
    };
    let bytes =
        fs::read(path).with_context(|| format!("failed to read config: {}", path.display()))?;
    serde_json::from_slice(&bytes)
        .with_context(|| format!("invalid config json: {}", path.display()))
}

/// Feed recorded lines through `scheduler`, writing each emitted frame as one
/// JSON line to `frames_out`. The session starts at the first line's timestamp.
pub fn replay<R, W>(
    scheduler: &mut SamplingScheduler,
    input: R,
    mut frames_out: Option<W>,
) -> Result<ReplaySummary>
where
    R: BufRead,
    W: Write,
{
    let mut summary = ReplaySummary::default();

    for (number, line) in input.lines().enumerate() {
        let line = line.with_context(|| format!("failed reading line {}", number + 1))?;
        if line.trim().is_empty() {
            continue;
        }
        let record: ReplayLine = serde_json::from_str(&line)
            .with_context(|| format!("invalid snapshot on line {}", number + 1))?;
        summary.lines += 1;

        if summary.session_id.is_none() {
            summary.session_id = Some(scheduler.start(record.timestamp_ms).to_string());
        }

        match scheduler.tick(record.timestamp_ms, &record.snapshot, &record.pointer) {
            TickOutcome::Emitted(frame) => {
                if let Some(out) = frames_out.as_mut() {
                    serde_json::to_writer(&mut *out, &frame)
                        .context("failed serializing frame")?;
                    out.write_all(b"\n").context("failed writing frame")?;
                }
            }
            TickOutcome::Failed(err) => {
                tracing::warn!(line = number + 1, error = %err, "tick failed");
            }
            TickOutcome::Idle | TickOutcome::Skipped => {}
        }
    }

    if let Some(out) = frames_out.as_mut() {
        out.flush().context("failed flushing frames output")?;
    }
    summary.stats = scheduler.stats();
    scheduler.stop();
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use grid_core::FrameRecord;
    use std::fs::File;
    use std::io::{BufReader, BufWriter};
    use tempfile::TempDir;

    const RECORDING: &str = r#"
{"timestampMs": 1000, "snapshot": {}}
{"timestampMs": 1100, "snapshot": {"observer": {"id": 1, "x": 500, "y": 500, "heading": 0}, "food": [{"x": 700, "y": 500, "size": 1}]}}

{"timestampMs": 1200, "snapshot": {"observer": {"id": 1, "x": 510, "y": 500, "heading": 0}}, "pointer": {"x": 100, "y": 0, "boost": true}}
"#;

    #[test]
    fn replays_lines_into_frames() {
        let mut scheduler = SamplingScheduler::new(CollectionConfig::default()).unwrap();
        let mut out = Vec::new();
        let summary = replay(&mut scheduler, RECORDING.as_bytes(), Some(&mut out)).unwrap();

        assert_eq!(summary.lines, 3);
        assert_eq!(summary.session_id.as_deref(), Some("1000"));
        assert_eq!(summary.stats.frames_emitted, 2);
        assert_eq!(summary.stats.ticks_skipped, 1);

        let frames: Vec<FrameRecord> = std::str::from_utf8(&out)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].debug.splats.food_splats, 1);
        assert!((frames[1].metadata.velocity - 100.0).abs() < 1e-9);
        assert!(frames[1].player_input.boost);
    }

    #[test]
    fn reports_the_offending_line() {
        let mut scheduler = SamplingScheduler::new(CollectionConfig::default()).unwrap();
        let input = "{\"timestampMs\": 1}\nnot json\n";
        let err = replay(&mut scheduler, input.as_bytes(), None::<Vec<u8>>).unwrap_err();
        assert!(format!("{err:#}").contains("line 2"), "{err:#}");
    }

    #[test]
    fn partial_config_file_keeps_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"ANGULAR_BINS": 32, "SAMPLE_RATE_HZ": 5}"#).unwrap();

        let config = load_config(Some(&path)).unwrap();
        let stock = CollectionConfig::default();
        assert_eq!(config.grid.angular_bins, 32);
        assert_eq!(config.sample_rate_hz, 5);
        assert_eq!(config.grid.radial_bins, stock.grid.radial_bins);
        assert_eq!(config.ema_beta, stock.ema_beta);
    }

    #[test]
    fn missing_path_uses_stock_config() {
        let config = load_config(None).unwrap();
        assert_eq!(config, CollectionConfig::default());
    }

    #[test]
    fn bad_config_names_the_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.json");
        fs::write(&path, "{ANGULAR_BINS").unwrap();

        let err = load_config(Some(&path)).unwrap_err();
        assert!(format!("{err:#}").contains("broken.json"), "{err:#}");

        let missing = dir.path().join("absent.json");
        let err = load_config(Some(&missing)).unwrap_err();
        assert!(format!("{err:#}").contains("failed to read config"), "{err:#}");
    }

    #[test]
    fn replays_file_to_file() {
        let dir = TempDir::new().unwrap();
        let input_path = dir.path().join("snapshots.jsonl");
        let output_path = dir.path().join("frames.jsonl");
        fs::write(&input_path, RECORDING).unwrap();

        let mut scheduler = SamplingScheduler::new(CollectionConfig::default()).unwrap();
        let input = BufReader::new(File::open(&input_path).unwrap());
        let output = BufWriter::new(File::create(&output_path).unwrap());
        let summary = replay(&mut scheduler, input, Some(output)).unwrap();
        assert_eq!(summary.stats.frames_emitted, 2);

        let written = fs::read_to_string(&output_path).unwrap();
        let frames: Vec<FrameRecord> = written
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].session_id, "1000");
    }
}
