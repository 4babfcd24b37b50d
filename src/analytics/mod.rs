//! Analytics aggregates
//!
//! One `AnalyticsAggregate` document per account holds every counter the
//! dashboard needs. Writers only ever increment counters or overwrite metadata;
//! readers derive the "today / this week / this month" view from the bucket maps.
//!
//! ```text
//! record_* ──→ EventRecorder ──upsert──→ analytics/{accountId}
//!                    │                          │
//!                    ├──→ EventLog (optional)   ├──→ AggregateReader ──→ AnalyticsSummary
//!                    └──→ RollupDispatcher      └──→ watch_analytics (subscription)
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub mod buckets;
pub mod event_log;
pub mod reader;
pub mod recorder;

pub use buckets::BucketKeys;
pub use event_log::{EventLog, EventLogRecord};
pub use reader::{AggregateReader, AnalyticsSummary, AnalyticsWatch, RetryPolicy, TopLink};
pub use recorder::{DropReason, EventRecorder, LinkInfo, RecordOutcome, RecorderSettings, ViewerInfo};

/// Collection holding one aggregate per account id
pub const ANALYTICS_COLLECTION: &str = "analytics";

/// Counter document for one account
///
/// Every counter is monotonic. Bucket maps are keyed by the strings from
/// [`buckets`]; their sums are not guaranteed to equal the totals.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AnalyticsAggregate {
    pub total_views: u64,
    pub total_clicks: u64,
    pub daily_views: BTreeMap<String, u64>,
    pub weekly_views: BTreeMap<String, u64>,
    pub monthly_views: BTreeMap<String, u64>,
    pub daily_clicks: BTreeMap<String, u64>,
    pub weekly_clicks: BTreeMap<String, u64>,
    pub monthly_clicks: BTreeMap<String, u64>,
    pub link_clicks: BTreeMap<String, LinkClickStats>,
    pub traffic_sources: BTreeMap<String, TrafficSourceStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

/// Per-link click counter plus last-seen metadata (last write wins)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LinkClickStats {
    pub total_clicks: u64,
    pub title: String,
    pub url: String,
    #[serde(rename = "type")]
    pub link_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_clicked: Option<DateTime<Utc>>,
}

/// Per-source counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TrafficSourceStats {
    pub views: u64,
    pub clicks: u64,
    pub medium: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub campaign: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_view: Option<DateTime<Utc>>,
}

/// Make an arbitrary string safe to use as one dotted-path segment
///
/// Dots would split the segment, so they become underscores. Empty input maps
/// to `"unknown"`.
pub fn path_segment(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return "unknown".to_string();
    }
    trimmed.replace('.', "_")
}

/// Key for `trafficSources`: a lowercased path segment
pub fn source_key(source: &str) -> String {
    path_segment(&source.to_lowercase())
}
