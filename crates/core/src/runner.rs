// crates/core/src/runner.rs
//! Orchestrates one exclusive crawl per session.
//!
//! `start` admits the run synchronously (atomic check-and-set on the session
//! status) and spawns the rest as a background task. The task never
//! propagates failures: timeouts, crawler errors and panics all end up as
//! session status plus one terminal log line, followed by a final stats
//! snapshot.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{error, info, warn};

use crate::crawler::{ContentStore, CrawlContext, Crawler, UpdateCallback};
use crate::error::{CrawlerError, RunError, StoreError};
use crate::hub::BroadcastHub;
use crate::session::{CrawlParams, RunTicket, Session, Termination};

/// Overall deadline for one run.
pub const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(600);

/// Log messages containing this marker count as one crawled item.
pub const DEFAULT_COMPLETION_MARKER: &str = "[saved]";

/// Longest failure summary shown to viewers.
const MAX_SUMMARY_CHARS: usize = 200;

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub task_timeout: Duration,
    pub completion_marker: String,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            task_timeout: DEFAULT_TASK_TIMEOUT,
            completion_marker: DEFAULT_COMPLETION_MARKER.to_string(),
        }
    }
}

/// Result of asking the runner to start a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Scheduled { generation: u64 },
    AlreadyRunning,
}

pub struct TaskRunner {
    hub: Arc<BroadcastHub>,
    store: Arc<dyn ContentStore>,
    config: RunnerConfig,
    completion_marker: Arc<str>,
}

impl TaskRunner {
    /// `store` is the real persistence backend crawlers write through.
    pub fn new(hub: Arc<BroadcastHub>, store: Arc<dyn ContentStore>, config: RunnerConfig) -> Self {
        let completion_marker = Arc::from(config.completion_marker.as_str());
        Self {
            hub,
            store,
            config,
            completion_marker,
        }
    }

    pub fn hub(&self) -> &Arc<BroadcastHub> {
        &self.hub
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Admit a run on `session_id` and drive it on a background task.
    pub fn start(
        self: &Arc<Self>,
        session_id: &str,
        crawler: Arc<dyn Crawler>,
        params: CrawlParams,
    ) -> StartOutcome {
        let (session, admitted) = self.admit(session_id, &params);
        let Some(ticket) = admitted else {
            return StartOutcome::AlreadyRunning;
        };
        let generation = ticket.generation;
        let runner = Arc::clone(self);
        tokio::spawn(async move {
            runner.drive(session, ticket, crawler, params).await;
        });
        StartOutcome::Scheduled { generation }
    }

    /// Same as [`TaskRunner::start`] but waits for the run to end.
    pub async fn run(
        &self,
        session_id: &str,
        crawler: Arc<dyn Crawler>,
        params: CrawlParams,
    ) -> StartOutcome {
        let (session, admitted) = self.admit(session_id, &params);
        let Some(ticket) = admitted else {
            return StartOutcome::AlreadyRunning;
        };
        let generation = ticket.generation;
        self.drive(session, ticket, crawler, params).await;
        StartOutcome::Scheduled { generation }
    }

    /// Stop the live run of `session_id`, if any. The crawler's token is
    /// cancelled and its task aborted; late effects are discarded.
    pub fn stop(&self, session_id: &str, reason: &str) -> bool {
        let Some(session) = self.hub.registry().get(session_id) else {
            return false;
        };
        let stopped = self.hub.finish_run(
            &session,
            None,
            &Termination::Stopped(reason.to_string()),
            format!("Crawling stopped: {reason}"),
        );
        if stopped {
            info!(session_id = %session_id, reason, "Crawl stopped");
        }
        stopped
    }

    /// Check-and-set the session into `Running`, on the registered session
    /// even if the reaper is sweeping concurrently.
    fn admit(&self, session_id: &str, params: &CrawlParams) -> (Arc<Session>, Option<RunTicket>) {
        let (session, admitted) = self
            .hub
            .registry()
            .with_live(session_id, |session, inner| inner.begin(session.id(), params.clone()));
        match admitted {
            Ok(ticket) => {
                info!(
                    session_id = %session_id,
                    generation = ticket.generation,
                    keyword = %params.keyword,
                    platform = %params.platform,
                    count = params.count,
                    "Crawl admitted"
                );
                (session, Some(ticket))
            }
            Err(err) => {
                info!(session_id = %session_id, reason = %err, "Start rejected");
                self.hub
                    .append_log(&session, format!("Crawler is already running for session {session_id}"));
                (session, None)
            }
        }
    }

    async fn drive(
        &self,
        session: Arc<Session>,
        ticket: RunTicket,
        crawler: Arc<dyn Crawler>,
        params: CrawlParams,
    ) {
        let RunTicket { generation, cancel } = ticket;
        let session_id = session.id().to_string();
        let updates = UpdateCallback::new(
            Arc::clone(&self.hub),
            Arc::clone(&session),
            generation,
            Arc::clone(&self.completion_marker),
        );
        let ctx = CrawlContext {
            updates: updates.clone(),
            store: Arc::new(BroadcastingStore {
                inner: Arc::clone(&self.store),
                updates: updates.clone(),
            }),
            cancel: cancel.clone(),
        };

        updates.log(format!(
            "Starting crawler for keyword: {} on {}",
            params.keyword, params.platform
        ));
        self.hub.publish_stats(&session);

        let keyword = params.keyword.clone();
        let deadline = self.config.task_timeout;
        let job = tokio::spawn(async move { crawler.crawl(params, ctx).await });
        let abort = job.abort_handle();

        let termination = tokio::select! {
            joined = tokio::time::timeout(deadline, job) => match joined {
                Ok(Ok(Ok(()))) => Termination::Completed,
                Ok(Ok(Err(CrawlerError::Cancelled))) => Termination::Stopped("cancelled".to_string()),
                Ok(Ok(Err(err))) => {
                    error!(session_id = %session_id, generation, error = ?err, "Crawl failed");
                    let err = RunError::JobFailure(summarize(&err.to_string()));
                    Termination::Failed(err.to_string())
                }
                Ok(Err(join_err)) if join_err.is_panic() => {
                    error!(session_id = %session_id, generation, error = %join_err, "Crawler panicked");
                    let err = RunError::JobFailure("crawler panicked".to_string());
                    Termination::Failed(err.to_string())
                }
                Ok(Err(_)) => Termination::Stopped("aborted".to_string()),
                Err(_) => {
                    let err = RunError::TaskTimeout(deadline);
                    warn!(session_id = %session_id, generation, error = %err, "Crawl deadline exceeded");
                    Termination::Failed(err.to_string())
                }
            },
            _ = cancel.cancelled() => Termination::Stopped("cancelled".to_string()),
        };

        let line = match &termination {
            Termination::Completed => format!("Crawling completed for keyword: {keyword}"),
            Termination::Stopped(reason) => format!("Crawling stopped: {reason}"),
            Termination::Failed(message) => format!("Crawling failed: {message}"),
        };
        // The session leaves `Running` before the crawler is signalled, so any
        // effect it attempts in reaction is already stale.
        let finished = self
            .hub
            .finish_run(&session, Some(generation), &termination, line);
        cancel.cancel();
        abort.abort();
        info!(
            session_id = %session_id,
            generation,
            outcome = ?termination,
            finished,
            crawled = session.crawled_count(),
            "Crawl task exited"
        );
    }
}

/// Persistence hook handed to the crawler: report the item to viewers, then
/// forward to the real store. Store failures become a warning line.
struct BroadcastingStore {
    inner: Arc<dyn ContentStore>,
    updates: UpdateCallback,
}

#[async_trait]
impl ContentStore for BroadcastingStore {
    async fn save_content(&self, item: &Value) -> Result<(), StoreError> {
        self.updates.item(item.clone());
        if let Err(err) = self.inner.save_content(item).await {
            let err = RunError::from(err);
            warn!(
                session_id = %self.updates.session_id(),
                error = %err,
                "Persisting crawled item failed"
            );
            self.updates.log(format!("Warning: {err}"));
        }
        Ok(())
    }
}

/// First line of a failure message, capped for display.
fn summarize(message: &str) -> String {
    let first = message.lines().next().unwrap_or_default().trim();
    if first.chars().count() <= MAX_SUMMARY_CHARS {
        return first.to_string();
    }
    let mut cut: String = first.chars().take(MAX_SUMMARY_CHARS).collect();
    cut.push('…');
    cut
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawler::MemoryStore;
    use crate::registry::SessionRegistry;
    use crate::session::SessionStatus;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Mutex;
    use tokio::sync::Notify;

    fn params(keyword: &str) -> CrawlParams {
        CrawlParams {
            keyword: keyword.to_string(),
            platform: "xhs".to_string(),
            count: 3,
        }
    }

    fn runner_with(store: Arc<dyn ContentStore>, timeout: Duration) -> Arc<TaskRunner> {
        let hub = Arc::new(BroadcastHub::new(Arc::new(SessionRegistry::new(100))));
        Arc::new(TaskRunner::new(
            hub,
            store,
            RunnerConfig {
                task_timeout: timeout,
                ..RunnerConfig::default()
            },
        ))
    }

    /// Saves `params.count` items then returns.
    struct ItemsCrawler;

    #[async_trait]
    impl Crawler for ItemsCrawler {
        async fn crawl(&self, params: CrawlParams, ctx: CrawlContext) -> Result<(), CrawlerError> {
            for i in 0..params.count {
                ctx.store.save_content(&json!({ "n": i })).await?;
            }
            Ok(())
        }
    }

    struct FailingCrawler(&'static str);

    #[async_trait]
    impl Crawler for FailingCrawler {
        async fn crawl(&self, _: CrawlParams, ctx: CrawlContext) -> Result<(), CrawlerError> {
            ctx.updates.log("about to fail");
            Err(CrawlerError::failed(self.0))
        }
    }

    struct PanickingCrawler;

    #[async_trait]
    impl Crawler for PanickingCrawler {
        async fn crawl(&self, _: CrawlParams, _: CrawlContext) -> Result<(), CrawlerError> {
            panic!("selector not found");
        }
    }

    /// Waits for cancellation like a well-behaved crawler.
    struct CooperativeCrawler {
        started: Arc<Notify>,
    }

    #[async_trait]
    impl Crawler for CooperativeCrawler {
        async fn crawl(&self, _: CrawlParams, ctx: CrawlContext) -> Result<(), CrawlerError> {
            ctx.updates.log("waiting for work");
            self.started.notify_one();
            ctx.cancel.cancelled().await;
            ctx.updates.log("cleanup after cancel");
            Err(CrawlerError::Cancelled)
        }
    }

    /// Never returns and ignores cancellation; leaks its callback.
    struct HangingCrawler {
        captured: Arc<Mutex<Option<UpdateCallback>>>,
    }

    #[async_trait]
    impl Crawler for HangingCrawler {
        async fn crawl(&self, _: CrawlParams, ctx: CrawlContext) -> Result<(), CrawlerError> {
            *self.captured.lock().unwrap() = Some(ctx.updates.clone());
            ctx.updates.item(json!({ "n": 0 }));
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    /// Ignores its task and watches the token from an OS thread, reporting
    /// whether the log it emits on cancellation was accepted.
    struct ThreadWatcherCrawler {
        reacted: std::sync::mpsc::Sender<bool>,
    }

    #[async_trait]
    impl Crawler for ThreadWatcherCrawler {
        async fn crawl(&self, _: CrawlParams, ctx: CrawlContext) -> Result<(), CrawlerError> {
            let updates = ctx.updates.clone();
            let cancel = ctx.cancel.clone();
            let reacted = self.reacted.clone();
            std::thread::spawn(move || {
                while !cancel.is_cancelled() {
                    std::thread::yield_now();
                }
                let _ = reacted.send(updates.log("reacting to cancel"));
            });
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    struct BrokenStore;

    #[async_trait]
    impl ContentStore for BrokenStore {
        async fn save_content(&self, _: &Value) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("database locked".into()))
        }
    }

    #[tokio::test]
    async fn test_run_to_completion() {
        let store = Arc::new(MemoryStore::new());
        let runner = runner_with(store.clone(), DEFAULT_TASK_TIMEOUT);

        let outcome = runner.run("s1", Arc::new(ItemsCrawler), params("cat")).await;
        assert_eq!(outcome, StartOutcome::Scheduled { generation: 1 });

        let session = runner.hub().registry().get("s1").unwrap();
        assert_eq!(session.status(), SessionStatus::Stopped);
        assert_eq!(session.crawled_count(), 3);
        assert_eq!(store.len(), 3);
        assert!(session.end_time().is_some());
        assert_eq!(
            session.history(),
            vec![
                "Starting crawler for keyword: cat on xhs",
                "Crawling completed for keyword: cat",
            ]
        );
    }

    #[tokio::test]
    async fn test_job_failure_sets_error() {
        let runner = runner_with(Arc::new(MemoryStore::new()), DEFAULT_TASK_TIMEOUT);
        runner
            .run("s1", Arc::new(FailingCrawler("login wall\nstack: ...")), params("cat"))
            .await;

        let session = runner.hub().registry().get("s1").unwrap();
        assert_eq!(session.status(), SessionStatus::Error);
        assert_eq!(session.error_message().as_deref(), Some("login wall"));
        assert_eq!(
            session.history().last().map(String::as_str),
            Some("Crawling failed: login wall")
        );
    }

    #[tokio::test]
    async fn test_panic_is_contained() {
        let runner = runner_with(Arc::new(MemoryStore::new()), DEFAULT_TASK_TIMEOUT);
        runner.run("s1", Arc::new(PanickingCrawler), params("cat")).await;

        let session = runner.hub().registry().get("s1").unwrap();
        assert_eq!(session.status(), SessionStatus::Error);
        assert_eq!(session.error_message().as_deref(), Some("crawler panicked"));
    }

    #[tokio::test]
    async fn test_store_failure_is_logged_and_run_continues() {
        let runner = runner_with(Arc::new(BrokenStore), DEFAULT_TASK_TIMEOUT);
        runner.run("s1", Arc::new(ItemsCrawler), params("cat")).await;

        let session = runner.hub().registry().get("s1").unwrap();
        assert_eq!(session.status(), SessionStatus::Stopped);
        assert_eq!(session.crawled_count(), 3);
        let warnings = session
            .history()
            .iter()
            .filter(|l| l.starts_with("Warning: Persistence hook failed"))
            .count();
        assert_eq!(warnings, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_expiry_discards_late_callbacks() {
        let captured = Arc::new(Mutex::new(None));
        let runner = runner_with(Arc::new(MemoryStore::new()), Duration::from_secs(5));
        let crawler = Arc::new(HangingCrawler {
            captured: Arc::clone(&captured),
        });

        runner.run("s1", crawler, params("cat")).await;

        let session = runner.hub().registry().get("s1").unwrap();
        assert_eq!(session.status(), SessionStatus::Error);
        assert!(session.error_message().unwrap().contains("timeout"));
        assert_eq!(session.crawled_count(), 1);

        let history_before = session.history();
        let late = captured.lock().unwrap().clone().expect("crawler ran");
        assert!(!late.item(json!({ "n": 1 })));
        assert!(!late.log("still here"));
        assert_eq!(session.crawled_count(), 1);
        assert_eq!(session.history(), history_before);
        assert_eq!(session.status(), SessionStatus::Error);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_marks_session_before_signalling_crawler() {
        let runner = runner_with(Arc::new(MemoryStore::new()), Duration::from_secs(5));
        for _ in 0..50 {
            let (tx, rx) = std::sync::mpsc::channel();
            runner
                .run("s1", Arc::new(ThreadWatcherCrawler { reacted: tx }), params("cat"))
                .await;

            let accepted = rx
                .recv_timeout(Duration::from_secs(5))
                .expect("watcher thread saw the cancellation");
            assert!(!accepted);
            let session = runner.hub().registry().get("s1").unwrap();
            assert_eq!(session.status(), SessionStatus::Error);
            assert!(!session.history().iter().any(|l| l == "reacting to cancel"));
        }
    }

    #[tokio::test]
    async fn test_stop_cancels_running_crawl() {
        let runner = runner_with(Arc::new(MemoryStore::new()), DEFAULT_TASK_TIMEOUT);
        let started = Arc::new(Notify::new());
        let crawler = Arc::new(CooperativeCrawler {
            started: Arc::clone(&started),
        });

        let task = {
            let runner = Arc::clone(&runner);
            tokio::spawn(async move { runner.run("s1", crawler, params("cat")).await })
        };
        started.notified().await;

        assert!(runner.stop("s1", "user requested"));
        assert!(!runner.stop("s1", "user requested"));
        task.await.unwrap();

        let session = runner.hub().registry().get("s1").unwrap();
        assert_eq!(session.status(), SessionStatus::Stopped);
        assert!(session.error_message().is_none());
        let history = session.history();
        assert_eq!(history.last().map(String::as_str), Some("Crawling stopped: user requested"));
        assert!(!history.iter().any(|l| l == "cleanup after cancel"));
    }

    #[tokio::test]
    async fn test_stop_unknown_session_is_noop() {
        let runner = runner_with(Arc::new(MemoryStore::new()), DEFAULT_TASK_TIMEOUT);
        assert!(!runner.stop("missing", "user requested"));
        assert!(runner.hub().registry().is_empty());
    }

    #[tokio::test]
    async fn test_counter_resets_after_error() {
        let runner = runner_with(Arc::new(MemoryStore::new()), DEFAULT_TASK_TIMEOUT);
        runner.run("s1", Arc::new(ItemsCrawler), params("cat")).await;
        runner.run("s1", Arc::new(FailingCrawler("boom")), params("cat")).await;

        let session = runner.hub().registry().get("s1").unwrap();
        assert_eq!(session.status(), SessionStatus::Error);
        assert_eq!(session.crawled_count(), 0);

        let outcome = runner.run("s1", Arc::new(ItemsCrawler), params("dog")).await;
        assert_eq!(outcome, StartOutcome::Scheduled { generation: 3 });
        assert_eq!(session.crawled_count(), 3);
        assert_eq!(session.status(), SessionStatus::Stopped);
        assert!(session.error_message().is_none());
        assert_eq!(session.params().keyword, "dog");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_starts_admit_exactly_one() {
        let runner = runner_with(Arc::new(MemoryStore::new()), DEFAULT_TASK_TIMEOUT);
        let started = Arc::new(Notify::new());
        let crawler: Arc<dyn Crawler> = Arc::new(CooperativeCrawler {
            started: Arc::clone(&started),
        });
        let barrier = Arc::new(tokio::sync::Barrier::new(8));

        let mut handles = Vec::new();
        for i in 0..8 {
            let runner = Arc::clone(&runner);
            let crawler = Arc::clone(&crawler);
            let barrier = Arc::clone(&barrier);
            handles.push(tokio::spawn(async move {
                barrier.wait().await;
                runner.start("shared", crawler, params(&format!("kw{i}")))
            }));
        }
        let mut outcomes = Vec::new();
        for handle in handles {
            outcomes.push(handle.await.unwrap());
        }

        let scheduled = outcomes
            .iter()
            .filter(|o| matches!(o, StartOutcome::Scheduled { .. }))
            .count();
        assert_eq!(scheduled, 1);

        let session = runner.hub().registry().get("shared").unwrap();
        assert_eq!(session.generation(), 1);
        assert_eq!(session.status(), SessionStatus::Running);

        started.notified().await;
        let start_time = session.start_time();
        let outcome = runner.start("shared", Arc::clone(&crawler), params("late"));
        assert_eq!(outcome, StartOutcome::AlreadyRunning);
        assert_eq!(session.start_time(), start_time);
        assert_eq!(session.crawled_count(), 0);
        assert!(session
            .history()
            .iter()
            .any(|l| l == "Crawler is already running for session shared"));

        runner.stop("shared", "test cleanup");
    }

    #[test]
    fn test_summarize_takes_first_line_and_caps() {
        assert_eq!(summarize("short\nsecond"), "short");
        let long = "x".repeat(500);
        let summary = summarize(&long);
        assert_eq!(summary.chars().count(), MAX_SUMMARY_CHARS + 1);
        assert!(summary.ends_with('…'));
    }
}
