// crates/core/src/simulated.rs
//! A stand-in crawl engine that produces synthetic notes at a fixed pace.
//!
//! Used as the default `xhs` backend and by tests that need a crawler which
//! behaves like the real one: progress lines, one store write per item, and
//! prompt exit on cancellation.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tracing::debug;
use uuid::Uuid;

use crate::crawler::{CrawlContext, Crawler};
use crate::error::CrawlerError;
use crate::session::CrawlParams;

pub const DEFAULT_ITEM_DELAY: Duration = Duration::from_millis(250);

#[derive(Debug, Clone)]
pub struct SimulatedCrawler {
    item_delay: Duration,
}

impl SimulatedCrawler {
    pub fn new(item_delay: Duration) -> Self {
        Self { item_delay }
    }
}

impl Default for SimulatedCrawler {
    fn default() -> Self {
        Self::new(DEFAULT_ITEM_DELAY)
    }
}

#[async_trait]
impl Crawler for SimulatedCrawler {
    async fn crawl(&self, params: CrawlParams, ctx: CrawlContext) -> Result<(), CrawlerError> {
        ctx.updates.log(format!(
            "Searching {} for \"{}\" ({} notes requested)",
            params.platform, params.keyword, params.count
        ));

        for index in 0..params.count {
            tokio::select! {
                _ = ctx.cancel.cancelled() => {
                    debug!(session_id = %ctx.updates.session_id(), fetched = index, "Simulated crawl cancelled");
                    return Err(CrawlerError::Cancelled);
                }
                _ = tokio::time::sleep(self.item_delay) => {}
            }

            let position = index + 1;
            let note = json!({
                "noteId": Uuid::new_v4().to_string(),
                "title": format!("{} #{}", params.keyword, position),
                "keyword": params.keyword,
                "platform": params.platform,
                "likedCount": (u64::from(index) * 37) % 1000,
                "crawledAt": Utc::now().to_rfc3339(),
            });
            ctx.store.save_content(&note).await?;
            ctx.updates
                .log(format!("Fetched note {position}/{}", params.count));
        }

        ctx.updates
            .log(format!("Finished search for \"{}\"", params.keyword));
        Ok(())
    }
}
