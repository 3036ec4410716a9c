use std::time::Duration;

use grid_core::{EntitySnapshot, PointerState};
use tracing::debug;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SourceReading {
    pub snapshot: EntitySnapshot,
    pub pointer: PointerState,
}

impl SourceReading {
    pub fn has_observer(&self) -> bool {
        self.snapshot.observer.is_some()
    }
}

/// Adapter from the host environment to typed snapshots.
pub trait SnapshotSource: Send + 'static {
    /// Current view of the world, or `None` while the host is not initialized.
    fn read(&mut self) -> Option<SourceReading>;

    /// Raw setup packet received since the last call, if any.
    fn take_setup_packet(&mut self) -> Option<Vec<u8>> {
        None
    }
}

/// Poll `source` until it produces a reading, at most `attempts` times.
///
/// Returns the attempt number that succeeded.
pub async fn wait_until_ready<S>(
    source: &mut S,
    attempts: u32,
    interval: Duration,
) -> Result<u32, String>
where
    S: SnapshotSource + ?Sized,
{
    for attempt in 1..=attempts {
        if source.read().is_some() {
            return Ok(attempt);
        }
        debug!(attempt, "snapshot source not ready");
        if attempt < attempts {
            tokio::time::sleep(interval).await;
        }
    }
    Err(format!("snapshot source not ready after {attempts} attempts"))
}
