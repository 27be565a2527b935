// crates/core/src/registry.rs
//
// Session id -> session state. Sessions are created on first reference and
// only leave the map through `reap_expired`, which retires them under their
// own lock first. Admission and attach go through `with_live` so they never
// land on a retired session.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::debug;

use crate::session::{Session, SessionInner};

/// Default capacity of each session's log ring.
pub const DEFAULT_MAX_LOGS: usize = 1000;

/// Owns every known session.
///
/// Backed by a sharded `DashMap`, so the create-if-absent path only locks one
/// shard; per-session fields are guarded by each session's own mutex.
pub struct SessionRegistry {
    sessions: DashMap<String, Arc<Session>>,
    max_logs: usize,
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("session_count", &self.sessions.len())
            .field("max_logs", &self.max_logs)
            .finish()
    }
}

impl SessionRegistry {
    pub fn new(max_logs: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            max_logs,
        }
    }

    pub fn max_logs(&self) -> usize {
        self.max_logs
    }

    /// Return the session for `id`, creating an `Idle` one on first use.
    pub fn get_or_create(&self, id: &str) -> Arc<Session> {
        if let Some(existing) = self.sessions.get(id) {
            return Arc::clone(existing.value());
        }
        let entry = self.sessions.entry(id.to_string()).or_insert_with(|| {
            debug!(session_id = %id, "Creating session");
            Arc::new(Session::new(id, self.max_logs))
        });
        Arc::clone(entry.value())
    }

    /// Run `f` under the lock of the live session for `id`, creating it on
    /// first use. If the reaper retired the looked-up session before the lock
    /// was taken, the lookup is retried and lands on its replacement.
    pub(crate) fn with_live<R>(
        &self,
        id: &str,
        f: impl FnOnce(&Session, &mut SessionInner) -> R,
    ) -> (Arc<Session>, R) {
        loop {
            let session = self.get_or_create(id);
            let out = {
                let Some(mut inner) = session.lock_live() else {
                    debug!(session_id = %id, "Session retired during lookup, retrying");
                    continue;
                };
                f(session.as_ref(), &mut *inner)
            };
            return (session, out);
        }
    }

    /// Lookup without creating.
    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.get(id).map(|s| Arc::clone(s.value()))
    }

    pub fn list(&self) -> Vec<Arc<Session>> {
        self.sessions.iter().map(|s| Arc::clone(s.value())).collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Viewers attached across all sessions.
    pub fn total_viewers(&self) -> usize {
        self.list().iter().map(|s| s.viewer_count()).sum()
    }

    /// Drop sessions that are not running, have no viewers and saw no
    /// activity for longer than `ttl`. Returns how many were removed.
    pub fn reap_expired(&self, ttl: Duration, now: DateTime<Utc>) -> usize {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        let before = self.sessions.len();
        self.sessions
            .retain(|_, session| !session.retire_if_expired(ttl, now));
        before.saturating_sub(self.sessions.len())
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LOGS)
    }
}
