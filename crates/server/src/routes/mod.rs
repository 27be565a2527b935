//! HTTP and WebSocket route handlers.

pub mod crawl;
pub mod health;
pub mod logs;
pub mod sessions;
pub mod stats;

use std::sync::Arc;

use axum::Router;

use crate::state::AppState;

/// Combined router.
///
/// Routes:
/// - GET  / - Liveness banner
/// - GET  /api/health - Health check
/// - POST /api/crawl/start - Start a crawl run
/// - POST /api/crawl/{session_id}/stop - Stop a running crawl
/// - GET  /api/crawl/sessions - Filtered session history
/// - GET  /api/crawl/sessions/{session_id} - One session summary
/// - GET  /api/stats - Connection and session counts
/// - WS   /ws/logs/{session_id} - Live log stream
pub fn api_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(health::root_router())
        .nest("/api", health::router())
        .nest("/api", crawl::router())
        .nest("/api", sessions::router())
        .nest("/api", stats::router())
        .merge(logs::router())
        .with_state(state)
}
