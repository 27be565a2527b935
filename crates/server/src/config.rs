// crates/server/src/config.rs
//! Command-line configuration for the `crawl-view` binary.

use std::time::Duration;

use clap::Parser;
use crawl_view_core::{DEFAULT_MAX_LOGS, DEFAULT_TASK_TIMEOUT};

/// Default port for the server.
pub const DEFAULT_PORT: u16 = 3450;

pub const DEFAULT_VIEWER_QUEUE: usize = 256;
pub const DEFAULT_SESSION_TTL_SECS: u64 = 24 * 60 * 60;
pub const DEFAULT_SIMULATED_DELAY_MS: u64 = 250;

#[derive(Debug, Clone, Parser)]
#[command(name = "crawl-view", version, about = "Live crawl dashboard backend")]
pub struct Config {
    /// Address to bind.
    #[arg(long, default_value = "0.0.0.0")]
    pub host: String,

    /// Port to bind. Falls back to CRAWL_VIEW_PORT, then PORT.
    #[arg(long)]
    pub port: Option<u16>,

    /// Log lines retained per session for catch-up.
    #[arg(long, default_value_t = DEFAULT_MAX_LOGS)]
    pub max_logs: usize,

    /// Deadline for one crawl run.
    #[arg(long, default_value_t = DEFAULT_TASK_TIMEOUT.as_secs())]
    pub task_timeout_secs: u64,

    /// Events buffered per viewer before it is dropped as too slow.
    #[arg(long, default_value_t = DEFAULT_VIEWER_QUEUE)]
    pub viewer_queue: usize,

    /// Idle sessions older than this are forgotten; 0 keeps them forever.
    #[arg(long, default_value_t = DEFAULT_SESSION_TTL_SECS)]
    pub session_ttl_secs: u64,

    /// Pace of the built-in simulated crawler.
    #[arg(long, default_value_t = DEFAULT_SIMULATED_DELAY_MS)]
    pub simulated_delay_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: None,
            max_logs: DEFAULT_MAX_LOGS,
            task_timeout_secs: DEFAULT_TASK_TIMEOUT.as_secs(),
            viewer_queue: DEFAULT_VIEWER_QUEUE,
            session_ttl_secs: DEFAULT_SESSION_TTL_SECS,
            simulated_delay_ms: DEFAULT_SIMULATED_DELAY_MS,
        }
    }
}

impl Config {
    /// `--port`, then the environment, then [`DEFAULT_PORT`].
    pub fn port(&self) -> u16 {
        self.port.or_else(port_from_env).unwrap_or(DEFAULT_PORT)
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }

    /// `None` when reaping is disabled.
    pub fn session_ttl(&self) -> Option<Duration> {
        (self.session_ttl_secs > 0).then(|| Duration::from_secs(self.session_ttl_secs))
    }

    pub fn simulated_delay(&self) -> Duration {
        Duration::from_millis(self.simulated_delay_ms)
    }
}

fn port_from_env() -> Option<u16> {
    std::env::var("CRAWL_VIEW_PORT")
        .ok()
        .or_else(|| std::env::var("PORT").ok())
        .and_then(|p| p.parse().ok())
}
