// crates/server/src/reaper.rs
//! Background removal of sessions nobody is using any more.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use crawl_view_core::SessionRegistry;
use tokio::task::JoinHandle;

pub const REAP_INTERVAL: Duration = Duration::from_secs(60);

/// Every `interval`, drop sessions that are idle, unwatched and older than
/// `ttl`.
pub fn spawn_session_reaper(
    registry: Arc<SessionRegistry>,
    ttl: Duration,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            let removed = registry.reap_expired(ttl, Utc::now());
            if removed > 0 {
                tracing::info!(removed, remaining = registry.len(), "Reaped idle sessions");
            } else {
                tracing::debug!(sessions = registry.len(), "No idle sessions to reap");
            }
        }
    })
}
