// crates/server/src/main.rs
//! crawl-view server binary.

use anyhow::{Context, Result};
use clap::Parser;
use crawl_view_server::reaper::REAP_INTERVAL;
use crawl_view_server::{create_app, spawn_session_reaper, AppState, Config};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn,crawl_view_server=info,crawl_view_core=info".into()),
        )
        .init();

    let config = Config::parse();
    let state = AppState::new(&config);

    match config.session_ttl() {
        Some(ttl) => {
            spawn_session_reaper(state.registry.clone(), ttl, REAP_INTERVAL);
        }
        None => tracing::info!("Session reaping disabled"),
    }

    let port = config.port();
    let listener = TcpListener::bind((config.host.as_str(), port))
        .await
        .with_context(|| format!("failed to bind {}:{}", config.host, port))?;
    let addr = listener.local_addr()?;
    tracing::info!(
        %addr,
        platforms = ?state.crawlers.platforms(),
        max_logs = config.max_logs,
        task_timeout_secs = config.task_timeout_secs,
        "crawl-view listening"
    );

    axum::serve(listener, create_app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "Failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}
