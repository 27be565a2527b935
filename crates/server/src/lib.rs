// crates/server/src/lib.rs
//! crawl-view server library.
//!
//! Axum HTTP and WebSocket surface over the `crawl-view-core` session engine:
//! start and stop crawls, browse session history, and stream a session's
//! live log to any number of viewers.

pub mod config;
pub mod error;
pub mod reaper;
pub mod routes;
pub mod state;

pub use config::Config;
pub use error::*;
pub use reaper::spawn_session_reaper;
pub use routes::api_routes;
pub use state::AppState;

use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Create the Axum application with all routes and middleware.
///
/// This sets up:
/// - API and live-stream routes
/// - CORS (allows any origin)
/// - Request tracing
pub fn create_app(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(api_routes(state))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
