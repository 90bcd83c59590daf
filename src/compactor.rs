use std::sync::Arc;
use std::time::Duration;

use crate::engine::Engine;

const CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Background task: compact the tenant journal once `threshold` appends have
/// accumulated since the last compaction.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(CHECK_INTERVAL);
    loop {
        interval.tick().await;
        engine.notify.prune();
        if let Err(e) = compact_if_needed(&engine, threshold).await {
            tracing::warn!("journal compaction failed: {e}");
        }
    }
}

/// Returns whether a compaction ran.
pub async fn compact_if_needed(engine: &Engine, threshold: u64) -> Result<bool, crate::engine::EngineError> {
    let appends = engine.wal_appends_since_compact().await;
    if appends < threshold {
        return Ok(false);
    }
    tracing::debug!(appends, threshold, "compacting journal");
    engine.compact_wal().await?;
    Ok(true)
}
