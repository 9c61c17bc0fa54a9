use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use crate::engine::Engine;
use crate::observability::WAL_COMPACTIONS_TOTAL;

const CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Background task that rewrites a tenant's WAL once enough appends have
/// piled up since the last compaction.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(CHECK_INTERVAL);
    loop {
        interval.tick().await;
        compact_if_needed(&engine, threshold).await;
    }
}

/// Returns true when a compaction ran and succeeded.
pub async fn compact_if_needed(engine: &Engine, threshold: u64) -> bool {
    let appends = engine.wal_appends_since_compact().await;
    if appends < threshold {
        return false;
    }
    match engine.compact_wal().await {
        Ok(()) => {
            metrics::counter!(WAL_COMPACTIONS_TOTAL, "status" => "ok").increment(1);
            info!("compacted WAL after {appends} appends");
            true
        }
        Err(e) => {
            metrics::counter!(WAL_COMPACTIONS_TOTAL, "status" => "error").increment(1);
            error!("WAL compaction failed: {e}");
            false
        }
    }
}
