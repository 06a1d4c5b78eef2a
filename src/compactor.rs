use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error};

use crate::engine::Engine;

const COMPACT_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Compact the WAL once `threshold` appends have piled up since the last
/// compaction. Returns whether it compacted.
pub async fn compact_if_due(engine: &Engine, threshold: u64) -> bool {
    let appends = engine.wal_appends_since_compact().await;
    if appends < threshold {
        debug!("WAL compaction not due: {appends}/{threshold} appends");
        return false;
    }
    match engine.compact_wal().await {
        Ok(()) => true,
        Err(e) => {
            error!("WAL compaction failed: {e}");
            false
        }
    }
}

/// Background task: check every 30s whether the WAL needs compacting.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(COMPACT_CHECK_INTERVAL);
    loop {
        interval.tick().await;
        compact_if_due(&engine, threshold).await;
    }
}
