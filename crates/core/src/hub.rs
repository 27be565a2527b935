// crates/core/src/hub.rs
//! Per-session fan-out of log lines, data records and stats snapshots.
//!
//! Every enqueue happens while holding the session's mutex, so all viewers of
//! one session observe events in the order the hub produced them, and a
//! viewer attaching mid-run sees its catch-up strictly before any live event.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, trace};

use crate::error::RunError;
use crate::registry::SessionRegistry;
use crate::session::{Session, SessionInner, Termination, Viewer, ViewerEvent, ViewerId};

pub struct BroadcastHub {
    registry: Arc<SessionRegistry>,
    next_viewer_id: AtomicU64,
}

impl BroadcastHub {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self {
            registry,
            next_viewer_id: AtomicU64::new(1),
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Register a viewer on `session_id` (creating the session if unknown).
    ///
    /// Before the viewer becomes visible to appends, its queue receives the
    /// retained history as one catch-up payload (skipped when empty) followed
    /// by one stats snapshot. Fails if the viewer's queue cannot take both.
    pub fn attach(
        &self,
        session_id: &str,
        tx: mpsc::Sender<ViewerEvent>,
    ) -> Result<ViewerId, RunError> {
        let id = self.next_viewer_id.fetch_add(1, Ordering::Relaxed);
        let (_, attached) = self.registry.with_live(session_id, |_, inner| {
            let mut queued = true;
            if !inner.history.is_empty() {
                let backlog = inner
                    .history
                    .iter()
                    .map(String::as_str)
                    .collect::<Vec<_>>()
                    .join("\n");
                queued = tx.try_send(ViewerEvent::CatchUp(backlog)).is_ok();
            }
            queued = queued && tx.try_send(ViewerEvent::Stats(inner.stats())).is_ok();

            if !queued {
                return Err(RunError::ViewerDelivery {
                    session_id: session_id.to_string(),
                    viewer: id,
                });
            }
            inner.viewers.push(Viewer { id, tx });
            debug!(
                session_id = %session_id,
                viewer_id = id,
                viewers = inner.viewers.len(),
                "Viewer attached"
            );
            Ok(id)
        });
        attached
    }

    /// Remove a viewer. Idempotent; returns whether it was attached.
    pub fn detach(&self, session_id: &str, viewer: ViewerId) -> bool {
        let Some(session) = self.registry.get(session_id) else {
            return false;
        };
        let mut inner = session.lock();
        let before = inner.viewers.len();
        inner.viewers.retain(|v| v.id != viewer);
        let removed = inner.viewers.len() != before;
        if removed {
            debug!(session_id = %session_id, viewer_id = viewer, "Viewer detached");
        }
        removed
    }

    /// Push a line into the session's history and fan it out.
    pub fn append_log(&self, session: &Session, text: impl Into<String>) {
        let mut inner = session.lock();
        record_log(session, &mut inner, text.into());
    }

    /// Fan out a structured record. Not retained in history.
    pub fn append_data(&self, session: &Session, record: Value) {
        let mut inner = session.lock();
        fan_out(session.id(), &mut inner, ViewerEvent::Data(record));
    }

    /// Fan out the current stats snapshot.
    pub fn publish_stats(&self, session: &Session) {
        let mut inner = session.lock();
        let stats = inner.stats();
        fan_out(session.id(), &mut inner, ViewerEvent::Stats(stats));
    }

    /// Apply one update from a run's callback, atomically with the check that
    /// `generation` is still the session's running run. Stale updates are
    /// dropped without touching anything; returns whether it was applied.
    pub(crate) fn apply_update(
        &self,
        session: &Session,
        generation: u64,
        message: Option<&str>,
        item: Option<Value>,
        completion_marker: &str,
    ) -> bool {
        let mut inner = session.lock();
        if !inner.is_current(generation) {
            trace!(session_id = %session.id(), generation, "Dropping stale update");
            return false;
        }

        let marks_item = message
            .is_some_and(|m| !completion_marker.is_empty() && m.contains(completion_marker));
        if let Some(text) = message {
            record_log(session, &mut inner, text.to_string());
        }
        if item.is_some() || marks_item {
            inner.crawled_count += 1;
            let stats = inner.stats();
            fan_out(session.id(), &mut inner, ViewerEvent::Stats(stats));
        }
        if let Some(record) = item {
            fan_out(session.id(), &mut inner, ViewerEvent::Data(record));
        }
        true
    }

    /// End a run and publish the final snapshot.
    ///
    /// With `Some(generation)`, only that run may be ended; `None` targets
    /// whatever run is live. The terminal line is appended only when this
    /// call performed the transition. Stats are published either way.
    pub(crate) fn finish_run(
        &self,
        session: &Session,
        generation: Option<u64>,
        termination: &Termination,
        line: impl Into<String>,
    ) -> bool {
        let mut inner = session.lock();
        let owns_run = generation.map_or(true, |g| g == inner.generation);
        let finished = owns_run && inner.finish(termination);
        if finished {
            record_log(session, &mut inner, line.into());
        }
        let stats = inner.stats();
        fan_out(session.id(), &mut inner, ViewerEvent::Stats(stats));
        finished
    }
}

fn record_log(session: &Session, inner: &mut SessionInner, text: String) {
    inner.push_history(text.clone(), session.max_logs());
    fan_out(session.id(), inner, ViewerEvent::Log(text));
}

/// Deliver to every viewer; a viewer whose queue is closed or full is
/// detached without affecting the others.
fn fan_out(session_id: &str, inner: &mut SessionInner, event: ViewerEvent) {
    inner.viewers.retain(|viewer| match viewer.tx.try_send(event.clone()) {
        Ok(()) => true,
        Err(err) => {
            let reason = match err {
                TrySendError::Full(_) => "queue full",
                TrySendError::Closed(_) => "disconnected",
            };
            let err = RunError::ViewerDelivery {
                session_id: session_id.to_string(),
                viewer: viewer.id,
            };
            debug!(error = %err, reason, "Detaching viewer");
            false
        }
    });
}
