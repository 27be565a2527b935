// crates/core/src/lib.rs
//! Session broadcasting and crawl orchestration.
//!
//! [`SessionRegistry`] owns every session, [`BroadcastHub`] fans events out to
//! attached viewers, [`TaskRunner`] drives one exclusive crawl per session and
//! [`HistoryQuery`] answers read-only listings.

pub mod crawler;
pub mod error;
pub mod history;
pub mod hub;
pub mod registry;
pub mod runner;
pub mod session;
pub mod simulated;

pub use crawler::{ContentStore, CrawlContext, Crawler, CrawlerFactory, MemoryStore, UpdateCallback};
pub use error::{CrawlerError, RunError, StoreError};
pub use history::{HistoryFilter, HistoryQuery, ALL_PLATFORMS};
pub use hub::BroadcastHub;
pub use registry::{SessionRegistry, DEFAULT_MAX_LOGS};
pub use runner::{RunnerConfig, StartOutcome, TaskRunner, DEFAULT_COMPLETION_MARKER, DEFAULT_TASK_TIMEOUT};
pub use session::{
    CrawlParams, Session, SessionStatus, SessionSummary, StatsSnapshot, Termination, ViewerEvent,
    ViewerId,
};
pub use simulated::SimulatedCrawler;
