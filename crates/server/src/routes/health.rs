// crates/server/src/routes/health.rs
//! Liveness and health endpoints.
//!
//! - `GET /` - plain liveness banner
//! - `GET /api/health` - status, version, uptime and session load

use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use crawl_view_core::SessionStatus;
use serde::Serialize;

use crate::state::AppState;

pub const LIVENESS_MESSAGE: &str = "Crawl dashboard API is running";

#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct RootResponse {
    pub message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub sessions: usize,
    pub running_sessions: usize,
    pub viewers: usize,
}

/// GET / - Liveness banner.
pub async fn root() -> Json<RootResponse> {
    Json(RootResponse {
        message: LIVENESS_MESSAGE.to_string(),
    })
}

/// GET /api/health - Server status plus how many sessions are known, running
/// and watched.
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let sessions = state.registry.list();
    let running_sessions = sessions
        .iter()
        .filter(|s| s.status() == SessionStatus::Running)
        .count();
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.uptime_secs(),
        sessions: sessions.len(),
        running_sessions,
        viewers: sessions.iter().map(|s| s.viewer_count()).sum(),
    })
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/health", get(health_check))
}

pub fn root_router() -> Router<Arc<AppState>> {
    Router::new().route("/", get(root))
}
