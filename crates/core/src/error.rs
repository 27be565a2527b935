// crates/core/src/error.rs
use std::time::Duration;
use thiserror::Error;

use crate::session::ViewerId;

/// Errors raised by the orchestration core.
///
/// Only `InvalidPlatform` ever reaches an API caller. Everything else is
/// captured inside the background run and surfaces as session status and
/// log lines.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("Unsupported platform: {0}")]
    InvalidPlatform(String),

    #[error("Session {0} is already running")]
    AlreadyRunning(String),

    #[error("timeout after {}s", .0.as_secs())]
    TaskTimeout(Duration),

    #[error("{0}")]
    JobFailure(String),

    #[error("Viewer {viewer} of session {session_id} is unreachable")]
    ViewerDelivery { session_id: String, viewer: ViewerId },

    #[error("Persistence hook failed: {0}")]
    PersistenceHook(#[from] StoreError),
}

/// Errors a crawler returns from its entry point.
#[derive(Debug, Error)]
pub enum CrawlerError {
    #[error("Crawl cancelled")]
    Cancelled,

    #[error("{0}")]
    Failed(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl CrawlerError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// Errors raised by a [`crate::crawler::ContentStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Failed to serialize item: {0}")]
    Serialize(#[from] serde_json::Error),
}
