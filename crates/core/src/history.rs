// crates/core/src/history.rs
//! Read-only filtering and ordering of sessions for the history view.

use std::cmp::Ordering;
use std::sync::Arc;

use chrono::NaiveDate;
use serde::Deserialize;

use crate::registry::SessionRegistry;
use crate::session::SessionSummary;

/// Platform value that disables platform filtering.
pub const ALL_PLATFORMS: &str = "all";

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct HistoryFilter {
    /// Case-insensitive keyword substring.
    #[serde(default)]
    pub q: Option<String>,
    #[serde(default)]
    pub platform: Option<String>,
    /// UTC calendar date of the run's start.
    #[serde(default)]
    pub date: Option<NaiveDate>,
}

impl HistoryFilter {
    fn matches(&self, row: &SessionSummary) -> bool {
        if let Some(q) = self.q.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
            if !row.keyword.to_lowercase().contains(&q.to_lowercase()) {
                return false;
            }
        }
        if let Some(platform) = self
            .platform
            .as_deref()
            .filter(|p| !p.is_empty() && *p != ALL_PLATFORMS)
        {
            if row.platform != platform {
                return false;
            }
        }
        if let Some(date) = self.date {
            match row.start_time {
                Some(start) if start.date_naive() == date => {}
                _ => return false,
            }
        }
        true
    }
}

pub struct HistoryQuery {
    registry: Arc<SessionRegistry>,
}

impl HistoryQuery {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self { registry }
    }

    /// Matching sessions, most recently started first.
    pub fn list(&self, filter: &HistoryFilter) -> Vec<SessionSummary> {
        let mut rows: Vec<SessionSummary> = self
            .registry
            .list()
            .iter()
            .map(|s| s.summary())
            .filter(|row| filter.matches(row))
            .collect();
        rows.sort_by(recency);
        rows
    }
}

fn recency(a: &SessionSummary, b: &SessionSummary) -> Ordering {
    match (a.start_time, b.start_time) {
        (Some(x), Some(y)) => y.cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
    .then_with(|| a.session_id.cmp(&b.session_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{CrawlParams, SessionStatus};
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;

    /// Registry with two finished runs: A(cat, xhs, Mar 2) and B(dog, xhs, Mar 1),
    /// plus one session that never started.
    fn seeded() -> HistoryQuery {
        let registry = Arc::new(SessionRegistry::default());
        for (id, keyword, day) in [("A", "Cat pictures", 2), ("B", "dog", 1)] {
            let session = registry.get_or_create(id);
            session
                .try_begin(CrawlParams {
                    keyword: keyword.to_string(),
                    platform: "xhs".to_string(),
                    count: 5,
                })
                .unwrap();
            session.lock().start_time = Some(Utc.with_ymd_and_hms(2026, 3, day, 10, 0, 0).unwrap());
        }
        registry.get_or_create("never-run");
        HistoryQuery::new(registry)
    }

    fn ids(rows: &[SessionSummary]) -> Vec<&str> {
        rows.iter().map(|r| r.session_id.as_str()).collect()
    }

    #[test]
    fn test_keyword_is_case_insensitive_substring() {
        let query = seeded();
        let filter = HistoryFilter {
            q: Some("ca".into()),
            ..Default::default()
        };
        assert_eq!(ids(&query.list(&filter)), vec!["A"]);
    }

    #[test]
    fn test_all_platforms_orders_by_recency_with_unstarted_last() {
        let query = seeded();
        let filter = HistoryFilter {
            platform: Some(ALL_PLATFORMS.into()),
            ..Default::default()
        };
        assert_eq!(ids(&query.list(&filter)), vec!["A", "B", "never-run"]);
    }

    #[test]
    fn test_platform_is_exact_match() {
        let query = seeded();
        let filter = HistoryFilter {
            platform: Some("douyin".into()),
            ..Default::default()
        };
        assert!(query.list(&filter).is_empty());
    }

    #[test]
    fn test_date_matches_utc_calendar_day() {
        let query = seeded();
        let filter = HistoryFilter {
            date: NaiveDate::from_ymd_opt(2026, 3, 1),
            ..Default::default()
        };
        let rows = query.list(&filter);
        assert_eq!(ids(&rows), vec!["B"]);
        assert_eq!(rows[0].keyword, "dog");
        assert_eq!(rows[0].status, SessionStatus::Running);
    }

    #[test]
    fn test_blank_keyword_matches_everything() {
        let query = seeded();
        let filter = HistoryFilter {
            q: Some("  ".into()),
            platform: Some(String::new()),
            date: None,
        };
        assert_eq!(query.list(&filter).len(), 3);
    }

    #[test]
    fn test_filter_deserializes_from_query_shape() {
        let filter: HistoryFilter =
            serde_json::from_str(r#"{"q":"cat","date":"2026-03-02"}"#).unwrap();
        assert_eq!(filter.date, NaiveDate::from_ymd_opt(2026, 3, 2));
        assert!(filter.platform.is_none());
    }
}
