use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use crate::IngestBuffer;

/// Periodically close sessions that stopped sending frames.
pub(crate) fn spawn_session_sweep_task(buffer: Arc<IngestBuffer>, sweep_secs: u64) {
    tokio::spawn(async move {
        let sweep = Duration::from_secs(sweep_secs);
        loop {
            tokio::time::sleep(sweep).await;
            let buffer = Arc::clone(&buffer);
            // Closing flushes to disk.
            match tokio::task::spawn_blocking(move || buffer.sweep_expired(Instant::now())).await {
                Ok(0) => {}
                Ok(n) => tracing::info!(closed = n, "session sweep completed"),
                Err(e) => tracing::error!("session sweep failed: {e}"),
            }
        }
    });
}
