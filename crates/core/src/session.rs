// crates/core/src/session.rs
//! Per-session state: status machine, bounded log history, attached viewers.
//!
//! Every mutable field of a session lives behind one `std::sync::Mutex`
//! (`SessionInner`). The lock is never held across an `.await`: viewer
//! delivery is a non-blocking `try_send` into each viewer's bounded queue,
//! which is what lets the hub enqueue catch-up and live events atomically.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::RunError;

/// Identifier handed out by the hub for each attached viewer.
pub type ViewerId = u64;

/// Lifecycle status of a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    #[default]
    Idle,
    Running,
    Stopped,
    Error,
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Idle => "idle",
            SessionStatus::Running => "running",
            SessionStatus::Stopped => "stopped",
            SessionStatus::Error => "error",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters of one crawl run. Stored on the session as its metadata when
/// the run starts and left untouched until the next run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawlParams {
    pub keyword: String,
    pub platform: String,
    pub count: u32,
}

/// Structured status snapshot pushed to viewers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub crawled_count: u64,
    pub status: SessionStatus,
    #[serde(serialize_with = "unix_seconds::serialize")]
    pub start_time: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

/// Read-only projection of a session used by history listings.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub session_id: String,
    pub keyword: String,
    pub platform: String,
    #[serde(serialize_with = "unix_seconds::serialize")]
    pub start_time: Option<DateTime<Utc>>,
    pub crawled_count: u64,
    pub status: SessionStatus,
}

/// One event queued for a viewer.
#[derive(Debug, Clone, PartialEq)]
pub enum ViewerEvent {
    /// Retained history replayed on attach, lines joined with `\n`.
    CatchUp(String),
    Log(String),
    Stats(StatsSnapshot),
    Data(Value),
    Pong,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum WireFrame<'a> {
    Stats(&'a StatsSnapshot),
    Data { data: &'a Value, status: &'static str },
}

impl ViewerEvent {
    /// Render the event as the text frame sent over the live stream.
    pub fn to_wire(&self) -> String {
        match self {
            ViewerEvent::CatchUp(text) | ViewerEvent::Log(text) => text.clone(),
            ViewerEvent::Stats(stats) => {
                serde_json::to_string(&WireFrame::Stats(stats)).unwrap_or_default()
            }
            ViewerEvent::Data(data) => serde_json::to_string(&WireFrame::Data {
                data,
                status: "success",
            })
            .unwrap_or_default(),
            ViewerEvent::Pong => "pong".to_string(),
        }
    }
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    Completed,
    Stopped(String),
    Failed(String),
}

/// Handed to the runner when a run is admitted.
#[derive(Debug, Clone)]
pub struct RunTicket {
    pub generation: u64,
    pub cancel: CancellationToken,
}

pub(crate) struct Viewer {
    pub(crate) id: ViewerId,
    pub(crate) tx: mpsc::Sender<ViewerEvent>,
}

pub(crate) struct SessionInner {
    pub(crate) status: SessionStatus,
    pub(crate) crawled_count: u64,
    pub(crate) start_time: Option<DateTime<Utc>>,
    pub(crate) end_time: Option<DateTime<Utc>>,
    pub(crate) error_message: Option<String>,
    pub(crate) history: VecDeque<String>,
    pub(crate) viewers: Vec<Viewer>,
    pub(crate) params: CrawlParams,
    pub(crate) generation: u64,
    pub(crate) cancel: Option<CancellationToken>,
    /// Set once the registry has dropped this session. A retired session
    /// never admits runs or viewers again.
    pub(crate) retired: bool,
}

impl SessionInner {
    fn new() -> Self {
        Self {
            status: SessionStatus::Idle,
            crawled_count: 0,
            start_time: None,
            end_time: None,
            error_message: None,
            history: VecDeque::new(),
            viewers: Vec::new(),
            params: CrawlParams::default(),
            generation: 0,
            cancel: None,
            retired: false,
        }
    }

    /// True when `generation` is the live run and the session still accepts
    /// effects from it.
    pub(crate) fn is_current(&self, generation: u64) -> bool {
        self.generation == generation && self.status == SessionStatus::Running
    }

    pub(crate) fn stats(&self) -> StatsSnapshot {
        StatsSnapshot {
            crawled_count: self.crawled_count,
            status: self.status,
            start_time: self.start_time,
            error_message: self.error_message.clone(),
        }
    }

    /// Append to the ring, evicting the oldest entries once at capacity.
    pub(crate) fn push_history(&mut self, line: String, max_logs: usize) {
        if max_logs == 0 {
            return;
        }
        while self.history.len() >= max_logs {
            self.history.pop_front();
        }
        self.history.push_back(line);
    }

    /// Check-and-set `Idle|Stopped|Error -> Running`.
    ///
    /// Entering `Running` clears history, resets the counter, clears the
    /// error, stamps `start_time`, stores `params` and bumps the generation.
    pub(crate) fn begin(&mut self, id: &str, params: CrawlParams) -> Result<RunTicket, RunError> {
        if self.status == SessionStatus::Running {
            return Err(RunError::AlreadyRunning(id.to_string()));
        }
        let cancel = CancellationToken::new();
        self.status = SessionStatus::Running;
        self.history.clear();
        self.crawled_count = 0;
        self.error_message = None;
        self.end_time = None;
        self.start_time = Some(Utc::now());
        self.params = params;
        self.generation += 1;
        self.cancel = Some(cancel.clone());
        Ok(RunTicket {
            generation: self.generation,
            cancel,
        })
    }

    /// Leave `Running`. Returns false if the session was not running.
    pub(crate) fn finish(&mut self, termination: &Termination) -> bool {
        if self.status != SessionStatus::Running {
            return false;
        }
        match termination {
            Termination::Completed | Termination::Stopped(_) => {
                self.status = SessionStatus::Stopped;
                self.error_message = None;
            }
            Termination::Failed(message) => {
                self.status = SessionStatus::Error;
                self.error_message = Some(message.clone());
            }
        }
        self.end_time = Some(Utc::now());
        if let Some(token) = self.cancel.take() {
            token.cancel();
        }
        true
    }
}

/// A logical crawl run identified by a stable key.
pub struct Session {
    id: String,
    max_logs: usize,
    created_at: DateTime<Utc>,
    inner: Mutex<SessionInner>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("status", &inner.status)
            .field("generation", &inner.generation)
            .field("crawled_count", &inner.crawled_count)
            .field("history_len", &inner.history.len())
            .field("viewer_count", &inner.viewers.len())
            .finish()
    }
}

impl Session {
    /// Create an `Idle` session retaining at most `max_logs` history lines.
    pub fn new(id: impl Into<String>, max_logs: usize) -> Self {
        Self {
            id: id.into(),
            max_logs,
            created_at: Utc::now(),
            inner: Mutex::new(SessionInner::new()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn max_logs(&self) -> usize {
        self.max_logs
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, SessionInner> {
        self.inner.lock().unwrap_or_else(|poisoned| {
            tracing::error!(session_id = %self.id, "Session mutex poisoned, recovering");
            poisoned.into_inner()
        })
    }

    pub fn status(&self) -> SessionStatus {
        self.lock().status
    }

    pub fn crawled_count(&self) -> u64 {
        self.lock().crawled_count
    }

    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.lock().start_time
    }

    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.lock().end_time
    }

    pub fn error_message(&self) -> Option<String> {
        self.lock().error_message.clone()
    }

    pub fn params(&self) -> CrawlParams {
        self.lock().params.clone()
    }

    /// Retained log lines, oldest first.
    pub fn history(&self) -> Vec<String> {
        self.lock().history.iter().cloned().collect()
    }

    pub fn viewer_count(&self) -> usize {
        self.lock().viewers.len()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.lock().stats()
    }

    pub fn summary(&self) -> SessionSummary {
        let inner = self.lock();
        SessionSummary {
            session_id: self.id.clone(),
            keyword: inner.params.keyword.clone(),
            platform: inner.params.platform.clone(),
            start_time: inner.start_time,
            crawled_count: inner.crawled_count,
            status: inner.status,
        }
    }

    /// Whether `generation` still names the running run of this session.
    pub fn is_current(&self, generation: u64) -> bool {
        self.lock().is_current(generation)
    }

    /// Lock the session unless the registry has already retired it.
    pub(crate) fn lock_live(&self) -> Option<MutexGuard<'_, SessionInner>> {
        let inner = self.lock();
        (!inner.retired).then_some(inner)
    }

    /// Atomically admit a new run. See [`SessionInner::begin`].
    #[cfg(test)]
    pub(crate) fn try_begin(&self, params: CrawlParams) -> Result<RunTicket, RunError> {
        self.lock().begin(&self.id, params)
    }

    /// Retire the session if it is idle long enough to drop from the
    /// registry: not running, nobody watching, and last activity older than
    /// `ttl`. The check and the flag are one critical section, so nothing can
    /// be admitted between them.
    pub(crate) fn retire_if_expired(&self, ttl: chrono::Duration, now: DateTime<Utc>) -> bool {
        let mut inner = self.lock();
        if inner.status == SessionStatus::Running || !inner.viewers.is_empty() {
            return false;
        }
        let since = inner.end_time.unwrap_or(self.created_at);
        if now.signed_duration_since(since) <= ttl {
            return false;
        }
        inner.retired = true;
        true
    }
}

/// Timestamps on the wire are Unix seconds with millisecond precision.
pub(crate) mod unix_seconds {
    use chrono::{DateTime, Utc};
    use serde::Serializer;

    pub fn to_seconds(value: &DateTime<Utc>) -> f64 {
        value.timestamp_millis() as f64 / 1000.0
    }

    pub fn serialize<S: Serializer>(
        value: &Option<DateTime<Utc>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(ts) => serializer.serialize_f64(to_seconds(ts)),
            None => serializer.serialize_none(),
        }
    }
}
