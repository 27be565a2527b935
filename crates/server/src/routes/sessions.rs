// crates/server/src/routes/sessions.rs
//! Session history endpoints.
//!
//! - GET /api/crawl/sessions?q=&date=&platform=
//! - GET /api/crawl/sessions/{session_id}

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use chrono::NaiveDate;
use crawl_view_core::{HistoryFilter, SessionSummary};
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Raw query string; blank values mean "no filter".
#[derive(Debug, Default, Deserialize)]
pub struct SessionsQuery {
    pub q: Option<String>,
    /// `YYYY-MM-DD`, compared against the run's UTC start date.
    pub date: Option<String>,
    pub platform: Option<String>,
}

impl SessionsQuery {
    fn into_filter(self) -> ApiResult<HistoryFilter> {
        let date = match self.date.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(raw) => Some(NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|e| {
                ApiError::BadRequest(format!("invalid date '{raw}', expected YYYY-MM-DD: {e}"))
            })?),
        };
        Ok(HistoryFilter {
            q: self.q,
            platform: self.platform,
            date,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct SessionsResponse {
    pub total: usize,
    pub sessions: Vec<SessionSummary>,
}

/// GET /api/crawl/sessions - Filtered sessions, most recent first.
pub async fn list_sessions(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SessionsQuery>,
) -> ApiResult<Json<SessionsResponse>> {
    let filter = query.into_filter()?;
    let sessions = state.history.list(&filter);
    Ok(Json(SessionsResponse {
        total: sessions.len(),
        sessions,
    }))
}

/// GET /api/crawl/sessions/{session_id} - One summary; never creates.
pub async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<SessionSummary>> {
    state
        .registry
        .get(&session_id)
        .map(|session| Json(session.summary()))
        .ok_or(ApiError::SessionNotFound(session_id))
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/crawl/sessions", get(list_sessions))
        .route("/crawl/sessions/{session_id}", get(get_session))
}
