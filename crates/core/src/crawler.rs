// crates/core/src/crawler.rs
//! Boundary with the external crawl engine.
//!
//! A [`Crawler`] exposes one long-running entry point. Everything it needs
//! from the dashboard arrives in a [`CrawlContext`]: the update callback, the
//! item store it must persist through, and a cancellation token.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::{CrawlerError, RunError, StoreError};
use crate::hub::BroadcastHub;
use crate::session::{CrawlParams, Session};

/// The external job.
#[async_trait]
pub trait Crawler: Send + Sync {
    /// Run one crawl to completion. Must call `ctx.store.save_content` for
    /// each produced item and should return promptly once `ctx.cancel` fires.
    async fn crawl(&self, params: CrawlParams, ctx: CrawlContext) -> Result<(), CrawlerError>;
}

/// Persistence hook the crawler writes produced items through.
#[async_trait]
pub trait ContentStore: Send + Sync {
    async fn save_content(&self, item: &Value) -> Result<(), StoreError>;
}

/// Per-invocation collaborators handed to [`Crawler::crawl`].
#[derive(Clone)]
pub struct CrawlContext {
    pub updates: UpdateCallback,
    pub store: Arc<dyn ContentStore>,
    pub cancel: CancellationToken,
}

impl fmt::Debug for CrawlContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CrawlContext")
            .field("updates", &self.updates)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// Update callback bound to one session and one run generation.
///
/// Calls made after the run was superseded, stopped or timed out are
/// dropped silently.
#[derive(Clone)]
pub struct UpdateCallback {
    hub: Arc<BroadcastHub>,
    session: Arc<Session>,
    generation: u64,
    completion_marker: Arc<str>,
}

impl fmt::Debug for UpdateCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdateCallback")
            .field("session_id", &self.session.id())
            .field("generation", &self.generation)
            .finish()
    }
}

impl UpdateCallback {
    pub(crate) fn new(
        hub: Arc<BroadcastHub>,
        session: Arc<Session>,
        generation: u64,
        completion_marker: Arc<str>,
    ) -> Self {
        Self {
            hub,
            session,
            generation,
            completion_marker,
        }
    }

    /// `message` becomes a log line; an `item` (or a message carrying the
    /// completion marker) counts as one crawled item. Returns whether the
    /// update was applied.
    pub fn update(&self, message: Option<&str>, item: Option<Value>) -> bool {
        self.hub.apply_update(
            &self.session,
            self.generation,
            message,
            item,
            &self.completion_marker,
        )
    }

    pub fn log(&self, message: impl AsRef<str>) -> bool {
        self.update(Some(message.as_ref()), None)
    }

    pub fn item(&self, item: Value) -> bool {
        self.update(None, Some(item))
    }

    pub fn session_id(&self) -> &str {
        self.session.id()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// In-process store; keeps every saved item in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    items: Mutex<Vec<Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn items(&self) -> Vec<Value> {
        match self.items.lock() {
            Ok(items) => items.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.items().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ContentStore for MemoryStore {
    async fn save_content(&self, item: &Value) -> Result<(), StoreError> {
        match self.items.lock() {
            Ok(mut items) => items.push(item.clone()),
            Err(poisoned) => {
                tracing::error!("MemoryStore mutex poisoned, recovering");
                poisoned.into_inner().push(item.clone());
            }
        }
        Ok(())
    }
}

/// Maps platform names to crawler implementations.
#[derive(Clone, Default)]
pub struct CrawlerFactory {
    crawlers: BTreeMap<String, Arc<dyn Crawler>>,
}

impl fmt::Debug for CrawlerFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CrawlerFactory")
            .field("platforms", &self.platforms())
            .finish()
    }
}

impl CrawlerFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, platform: impl Into<String>, crawler: Arc<dyn Crawler>) -> Self {
        self.crawlers.insert(platform.into(), crawler);
        self
    }

    pub fn create(&self, platform: &str) -> Result<Arc<dyn Crawler>, RunError> {
        self.crawlers
            .get(platform)
            .cloned()
            .ok_or_else(|| RunError::InvalidPlatform(platform.to_string()))
    }

    /// Registered platform names, sorted.
    pub fn platforms(&self) -> Vec<String> {
        self.crawlers.keys().cloned().collect()
    }
}
