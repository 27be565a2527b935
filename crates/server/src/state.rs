// crates/server/src/state.rs
//! Application state for the Axum server.

use std::sync::Arc;
use std::time::Instant;

use crawl_view_core::{
    BroadcastHub, CrawlerFactory, HistoryQuery, MemoryStore, RunnerConfig, SessionRegistry,
    SimulatedCrawler, TaskRunner, DEFAULT_COMPLETION_MARKER,
};

use crate::config::Config;

/// Shared application state accessible from all route handlers.
pub struct AppState {
    /// Server start time for uptime tracking.
    pub start_time: Instant,
    pub registry: Arc<SessionRegistry>,
    pub hub: Arc<BroadcastHub>,
    pub runner: Arc<TaskRunner>,
    pub history: HistoryQuery,
    /// Platforms a crawl can be started on.
    pub crawlers: CrawlerFactory,
    /// Where crawled items end up.
    pub store: Arc<MemoryStore>,
    /// Capacity of each viewer's outbound queue.
    pub viewer_queue: usize,
}

impl AppState {
    /// State with the built-in simulated crawler registered as `xhs`.
    pub fn new(config: &Config) -> Arc<Self> {
        let crawlers = CrawlerFactory::new().register(
            "xhs",
            Arc::new(SimulatedCrawler::new(config.simulated_delay())),
        );
        Self::with_crawlers(config, crawlers)
    }

    pub fn with_crawlers(config: &Config, crawlers: CrawlerFactory) -> Arc<Self> {
        let registry = Arc::new(SessionRegistry::new(config.max_logs));
        let hub = Arc::new(BroadcastHub::new(Arc::clone(&registry)));
        let store = Arc::new(MemoryStore::new());
        let runner = Arc::new(TaskRunner::new(
            Arc::clone(&hub),
            store.clone(),
            RunnerConfig {
                task_timeout: config.task_timeout(),
                completion_marker: DEFAULT_COMPLETION_MARKER.to_string(),
            },
        ));

        Arc::new(Self {
            start_time: Instant::now(),
            history: HistoryQuery::new(Arc::clone(&registry)),
            registry,
            hub,
            runner,
            crawlers,
            store,
            viewer_queue: config.viewer_queue.max(2),
        })
    }

    /// Get the server uptime in seconds.
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
