// crates/server/src/routes/crawl.rs
//! Starting and stopping crawl runs.
//!
//! - POST /api/crawl/start
//! - POST /api/crawl/{session_id}/stop

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    routing::post,
    Json, Router,
};
use crawl_view_core::{CrawlParams, StartOutcome};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Reason recorded when a viewer or API client stops a run.
pub const USER_STOP_REASON: &str = "user requested";

fn default_count() -> u32 {
    20
}

fn default_platform() -> String {
    "xhs".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartCrawlRequest {
    #[serde(default)]
    pub keyword: String,
    #[serde(default = "default_count")]
    pub count: u32,
    #[serde(default = "default_platform")]
    pub platform: String,
    /// Reuse a session; a fresh id is generated when absent.
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct CrawlResponse {
    pub success: bool,
    pub message: String,
    pub session_id: String,
}

/// POST /api/crawl/start - Validate, then hand the run to the runner.
///
/// A start on a session that is already running answers 200 with
/// `success: false`; nothing new is scheduled.
pub async fn start_crawl(
    State(state): State<Arc<AppState>>,
    Json(body): Json<StartCrawlRequest>,
) -> ApiResult<Json<CrawlResponse>> {
    let keyword = body.keyword.trim();
    if keyword.is_empty() {
        return Err(ApiError::BadRequest("keyword must not be empty".to_string()));
    }
    let crawler = state.crawlers.create(&body.platform)?;

    let session_id = body
        .session_id
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let params = CrawlParams {
        keyword: keyword.to_string(),
        platform: body.platform.clone(),
        count: body.count,
    };

    let response = match state.runner.start(&session_id, crawler, params) {
        StartOutcome::Scheduled { generation } => {
            tracing::info!(session_id = %session_id, generation, "Crawl scheduled");
            CrawlResponse {
                success: true,
                message: format!("Started crawling for '{}' on {}", keyword, body.platform),
                session_id,
            }
        }
        StartOutcome::AlreadyRunning => CrawlResponse {
            success: false,
            message: "Crawler is already running for this session".to_string(),
            session_id,
        },
    };
    Ok(Json(response))
}

/// POST /api/crawl/{session_id}/stop - Same effect as a viewer's `stop` token.
pub async fn stop_crawl(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<CrawlResponse>> {
    if state.registry.get(&session_id).is_none() {
        return Err(ApiError::SessionNotFound(session_id));
    }
    let stopped = state.runner.stop(&session_id, USER_STOP_REASON);
    let message = if stopped {
        "Crawl stopped".to_string()
    } else {
        "No crawl is running for this session".to_string()
    };
    Ok(Json(CrawlResponse {
        success: stopped,
        message,
        session_id,
    }))
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/crawl/start", post(start_crawl))
        .route("/crawl/{session_id}/stop", post(stop_crawl))
}
