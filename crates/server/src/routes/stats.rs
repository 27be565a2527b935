// crates/server/src/routes/stats.rs
use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::state::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerStats {
    /// Viewers attached across all sessions.
    pub active_connections: usize,
    pub total_sessions: usize,
    pub platforms: Vec<String>,
}

/// GET /api/stats - Connection and session counts.
pub async fn get_stats(State(state): State<Arc<AppState>>) -> Json<ServerStats> {
    Json(ServerStats {
        active_connections: state.registry.total_viewers(),
        total_sessions: state.registry.len(),
        platforms: state.crawlers.platforms(),
    })
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/stats", get(get_stats))
}
