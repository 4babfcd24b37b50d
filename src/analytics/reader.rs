//! Aggregate reader
//!
//! Turns a raw `AnalyticsAggregate` into what a dashboard shows. Current-period
//! counts are looked up with the same bucket keys the recorder writes, so a
//! reader and writer sharing a clock always agree on "today".
//!
//! Unlike the recorder, reads are explicitly invoked and surface store errors.
//! `get_analytics_with_retry` wraps the plain read in bounded exponential
//! backoff for transient failures.

use super::buckets::BucketKeys;
use super::{AnalyticsAggregate, LinkClickStats, TrafficSourceStats, ANALYTICS_COLLECTION};
use crate::clock::Clock;
use crate::error::{LinkstatsError, Result};
use crate::store::{from_document, Document, DocumentStore, Subscription};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_TOP_LINKS: usize = 10;

/// Display-ready analytics for one account
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsSummary {
    pub total_views: u64,
    pub total_clicks: u64,
    pub today_views: u64,
    pub today_clicks: u64,
    pub week_views: u64,
    pub week_clicks: u64,
    pub month_views: u64,
    pub month_clicks: u64,
    pub top_links: Vec<TopLink>,
    pub traffic_sources: BTreeMap<String, TrafficSourceStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopLink {
    pub link_id: String,
    #[serde(flatten)]
    pub stats: LinkClickStats,
}

/// Derive a summary from an aggregate as of `now`
pub fn summarize(aggregate: &AnalyticsAggregate, now: DateTime<Utc>, top_links: usize) -> AnalyticsSummary {
    let keys = BucketKeys::at(now);
    let count = |map: &BTreeMap<String, u64>, key: &str| map.get(key).copied().unwrap_or(0);

    let mut links: Vec<TopLink> = aggregate
        .link_clicks
        .iter()
        .map(|(link_id, stats)| TopLink {
            link_id: link_id.clone(),
            stats: stats.clone(),
        })
        .collect();
    // Most clicked first; link id breaks ties
    links.sort_by(|a, b| {
        b.stats
            .total_clicks
            .cmp(&a.stats.total_clicks)
            .then_with(|| a.link_id.cmp(&b.link_id))
    });
    links.truncate(top_links);

    AnalyticsSummary {
        total_views: aggregate.total_views,
        total_clicks: aggregate.total_clicks,
        today_views: count(&aggregate.daily_views, &keys.day),
        today_clicks: count(&aggregate.daily_clicks, &keys.day),
        week_views: count(&aggregate.weekly_views, &keys.week),
        week_clicks: count(&aggregate.weekly_clicks, &keys.week),
        month_views: count(&aggregate.monthly_views, &keys.month),
        month_clicks: count(&aggregate.monthly_clicks, &keys.month),
        top_links: links,
        traffic_sources: aggregate.traffic_sources.clone(),
        last_updated: aggregate.last_updated,
    }
}

/// Bounded exponential backoff for dashboard re-reads
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts including the first
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Backoff before attempt `attempt` (1-based; attempt 1 never waits)
    pub fn backoff(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let factor = 2u32.saturating_pow(attempt - 2);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

#[derive(Clone)]
pub struct AggregateReader {
    store: Arc<dyn DocumentStore>,
    clock: Arc<dyn Clock>,
    top_links: usize,
}

impl AggregateReader {
    pub fn new(store: Arc<dyn DocumentStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            top_links: DEFAULT_TOP_LINKS,
        }
    }

    pub fn with_top_links(mut self, limit: usize) -> Self {
        self.top_links = limit;
        self
    }

    /// Summary for one account; an account with no events gets all zeros
    pub fn get_analytics(&self, account_id: &str) -> Result<AnalyticsSummary> {
        let doc = self.store.get(ANALYTICS_COLLECTION, account_id)?;
        self.summary_of(doc)
    }

    /// Summaries for many accounts. A failed read maps to `None` for that id only.
    pub fn get_bulk_analytics<S: AsRef<str>>(
        &self,
        account_ids: &[S],
    ) -> BTreeMap<String, Option<AnalyticsSummary>> {
        account_ids
            .iter()
            .map(|id| {
                let id = id.as_ref();
                let summary = match self.get_analytics(id) {
                    Ok(summary) => Some(summary),
                    Err(e) => {
                        tracing::warn!(account_id = id, error = %e, "Bulk analytics read failed");
                        None
                    }
                };
                (id.to_string(), summary)
            })
            .collect()
    }

    /// `get_analytics` with re-reads on transient store failures
    pub fn get_analytics_with_retry(&self, account_id: &str, policy: RetryPolicy) -> Result<AnalyticsSummary> {
        let attempts = policy.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.get_analytics(account_id) {
                Ok(summary) => return Ok(summary),
                Err(LinkstatsError::Store(e)) if e.is_transient() && attempt < attempts => {
                    attempt += 1;
                    let wait = policy.backoff(attempt);
                    tracing::debug!(account_id, attempt, ?wait, error = %e, "Retrying analytics read");
                    std::thread::sleep(wait);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Live summaries for one account. Dropping the watch unsubscribes.
    pub fn watch_analytics(&self, account_id: &str) -> Result<AnalyticsWatch> {
        let subscription = self.store.subscribe(ANALYTICS_COLLECTION, account_id)?;
        Ok(AnalyticsWatch {
            subscription,
            reader: self.clone(),
        })
    }

    fn summary_of(&self, doc: Option<Document>) -> Result<AnalyticsSummary> {
        let Some(doc) = doc else {
            return Ok(AnalyticsSummary::default());
        };
        let aggregate: AnalyticsAggregate = from_document(doc)?;
        Ok(summarize(&aggregate, self.clock.now(), self.top_links))
    }
}

/// Scoped live view of one account's analytics
#[derive(Debug)]
pub struct AnalyticsWatch {
    subscription: Subscription,
    reader: AggregateReader,
}

impl std::fmt::Debug for AggregateReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AggregateReader")
            .field("store", &self.store.name())
            .field("top_links", &self.top_links)
            .finish()
    }
}

impl AnalyticsWatch {
    pub fn account_id(&self) -> &str {
        self.subscription.id()
    }

    /// Summary of the latest known state
    pub fn current(&self) -> Result<AnalyticsSummary> {
        self.reader.summary_of(self.subscription.current())
    }

    /// Wait for the next change. Returns `None` when the store side has closed.
    ///
    /// Updates whose document cannot be decoded are logged and skipped.
    pub async fn next(&mut self) -> Option<AnalyticsSummary> {
        loop {
            let doc = self.subscription.changed().await?;
            match self.reader.summary_of(doc) {
                Ok(summary) => return Some(summary),
                Err(e) => tracing::warn!(
                    account_id = self.subscription.id(),
                    error = %e,
                    "Skipping undecodable analytics update"
                ),
            }
        }
    }
}
