use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::auth::{self, SessionStore};
use crate::engine::Engine;
use crate::observability;

/// Background task that rewrites the WAL once enough appends have
/// accumulated since the last compaction.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));
    loop {
        interval.tick().await;
        let appends = engine.wal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match engine.compact_wal().await {
            Ok(()) => info!("compacted WAL after {appends} appends"),
            Err(e) => tracing::warn!("WAL compaction failed: {e}"),
        }
    }
}

/// Background task that drops expired sessions so the store does not
/// accumulate tokens from clients that never log out.
pub async fn run_session_sweeper(sessions: Arc<SessionStore>) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    loop {
        interval.tick().await;
        let removed = sessions.purge_expired(auth::now_ms());
        if removed > 0 {
            tracing::debug!("swept {removed} expired sessions");
        }
        metrics::gauge!(observability::SESSIONS_ACTIVE).set(sessions.len() as f64);
    }
}
