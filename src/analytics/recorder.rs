//! Event recorder
//!
//! Hot path for public page loads. Every call resolves the account, then folds
//! the event into the account's aggregate with a single write:
//!
//! ```text
//! identifier ──resolve──→ accountId ──→ BucketKeys::at(now)
//!                                            │
//!                       ┌────────────────────┴───────────────────┐
//!                       ▼                                        ▼
//!               seed (full shape,                      ops (one increment per
//!               counters at 1)                          counter, sets for metadata)
//!                       └──────────── upsert(analytics/{id}) ────┘
//!                                            │
//!                        ├──→ EventLog::append (detailed_logging)
//!                        └──→ RollupDispatcher::trigger(groupId)  (views only)
//! ```
//!
//! None of the `record_*` methods return an error. A page load must never fail
//! because analytics did; failures are logged and reported as
//! [`RecordOutcome::Dropped`].

use super::buckets::BucketKeys;
use super::event_log::{EventLog, EventLogRecord, EventType};
use super::{
    path_segment, source_key, AnalyticsAggregate, LinkClickStats, TrafficSourceStats,
    ANALYTICS_COLLECTION,
};
use crate::accounts::fetch_account;
use crate::attribution::{SessionAttribution, TrafficSource};
use crate::clock::Clock;
use crate::config::AnalyticsConfig;
use crate::error::{LinkstatsError, StoreResult};
use crate::identity::IdentityIndex;
use crate::rollup::RollupDispatcher;
use crate::store::{to_document, Document, DocumentStore, FieldOp, UpsertOutcome};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;

/// Request context for a view or click
#[derive(Debug, Clone, Default)]
pub struct ViewerInfo {
    pub user_agent: Option<String>,
    pub referrer: Option<String>,
    /// Only ever stored hashed
    pub ip_address: Option<String>,
    pub country: Option<String>,
    /// Attribution for the visit, if the client has one
    pub session: Option<SessionAttribution>,
}

impl ViewerInfo {
    pub fn with_session(session: SessionAttribution) -> Self {
        Self {
            session: Some(session),
            ..Default::default()
        }
    }

    fn traffic_source(&self) -> Option<&TrafficSource> {
        self.session.as_ref().map(|s| &s.traffic_source)
    }
}

/// The clicked link
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkInfo {
    pub link_id: String,
    pub title: String,
    pub url: String,
    pub link_type: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Identifier did not resolve to an account
    UnknownIdentifier,
    /// Empty account or link id
    InvalidInput,
    /// Store read or write failed
    StoreFailure,
}

/// Result of a `record_*` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    Recorded {
        account_id: String,
        /// This event created the aggregate
        created: bool,
    },
    Dropped(DropReason),
}

impl RecordOutcome {
    pub fn is_recorded(&self) -> bool {
        matches!(self, RecordOutcome::Recorded { .. })
    }
}

/// Recorder behavior switches
#[derive(Debug, Clone, Copy)]
pub struct RecorderSettings {
    /// Use the store's atomic upsert. When false, fall back to read-then-create
    /// which can lose the first events of a brand-new account under concurrency.
    pub atomic_upsert: bool,
    /// Also append every event to the detailed event log
    pub detailed_logging: bool,
}

impl Default for RecorderSettings {
    fn default() -> Self {
        Self {
            atomic_upsert: true,
            detailed_logging: false,
        }
    }
}

impl From<&AnalyticsConfig> for RecorderSettings {
    fn from(config: &AnalyticsConfig) -> Self {
        Self {
            atomic_upsert: config.atomic_upsert,
            detailed_logging: config.detailed_logging,
        }
    }
}

/// One write against an aggregate: the full-shape seed and the equivalent ops
struct AggregateWrite {
    seed: Document,
    ops: Vec<FieldOp>,
}

pub struct EventRecorder {
    store: Arc<dyn DocumentStore>,
    index: IdentityIndex,
    clock: Arc<dyn Clock>,
    settings: RecorderSettings,
    event_log: Option<EventLog>,
    rollup: Option<Arc<RollupDispatcher>>,
}

impl EventRecorder {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        index: IdentityIndex,
        clock: Arc<dyn Clock>,
        settings: RecorderSettings,
    ) -> Self {
        let event_log = settings
            .detailed_logging
            .then(|| EventLog::new(store.clone()));
        Self {
            store,
            index,
            clock,
            settings,
            event_log,
            rollup: None,
        }
    }

    /// Trigger group rollups through `dispatcher` after successful views
    pub fn with_rollup(mut self, dispatcher: Arc<RollupDispatcher>) -> Self {
        self.rollup = Some(dispatcher);
        self
    }

    pub fn settings(&self) -> RecorderSettings {
        self.settings
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Public API
    // ─────────────────────────────────────────────────────────────────────────

    /// Record a profile view for a username, display name, email, or account id
    pub fn record_profile_view(&self, identifier: &str, viewer: Option<&ViewerInfo>) -> RecordOutcome {
        match self.resolve(identifier) {
            Ok((account_id, username)) => self.record_view(&account_id, username, viewer),
            Err(reason) => RecordOutcome::Dropped(reason),
        }
    }

    pub fn record_profile_view_by_account_id(
        &self,
        account_id: &str,
        viewer: Option<&ViewerInfo>,
    ) -> RecordOutcome {
        let account_id = account_id.trim();
        if account_id.is_empty() {
            return RecordOutcome::Dropped(DropReason::InvalidInput);
        }
        self.record_view(account_id, None, viewer)
    }

    /// Record a link click for a username, display name, email, or account id
    pub fn record_link_click(
        &self,
        identifier: &str,
        link: &LinkInfo,
        clicker: Option<&ViewerInfo>,
    ) -> RecordOutcome {
        match self.resolve(identifier) {
            Ok((account_id, username)) => self.record_click(&account_id, username, link, clicker),
            Err(reason) => RecordOutcome::Dropped(reason),
        }
    }

    pub fn record_link_click_by_account_id(
        &self,
        account_id: &str,
        link: &LinkInfo,
        clicker: Option<&ViewerInfo>,
    ) -> RecordOutcome {
        let account_id = account_id.trim();
        if account_id.is_empty() {
            return RecordOutcome::Dropped(DropReason::InvalidInput);
        }
        self.record_click(account_id, None, link, clicker)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Internals
    // ─────────────────────────────────────────────────────────────────────────

    fn resolve(&self, identifier: &str) -> Result<(String, Option<String>), DropReason> {
        match self.index.resolve(identifier) {
            Ok(entry) => Ok((entry.account_id, Some(entry.username))),
            Err(LinkstatsError::NotFound(_)) => {
                tracing::debug!(identifier, "Unknown identifier, event dropped");
                Err(DropReason::UnknownIdentifier)
            }
            Err(e) => {
                tracing::warn!(identifier, error = %e, "Identity lookup failed, event dropped");
                Err(DropReason::StoreFailure)
            }
        }
    }

    fn record_view(
        &self,
        account_id: &str,
        username: Option<String>,
        viewer: Option<&ViewerInfo>,
    ) -> RecordOutcome {
        let now = self.clock.now();
        let keys = BucketKeys::at(now);
        let source = viewer.and_then(ViewerInfo::traffic_source);

        let write = match view_write(&keys, now, username, source) {
            Ok(write) => write,
            Err(e) => {
                tracing::warn!(account_id, error = %e, "Failed to build view write");
                return RecordOutcome::Dropped(DropReason::StoreFailure);
            }
        };

        let created = match self.apply(account_id, write) {
            Ok(created) => created,
            Err(e) => {
                tracing::warn!(account_id, error = %e, "Failed to record profile view");
                return RecordOutcome::Dropped(DropReason::StoreFailure);
            }
        };
        tracing::debug!(
            account_id,
            created,
            source = source.map(|s| s.source.as_str()),
            "Profile view recorded"
        );

        self.log_event(
            EventLogRecord::new(EventType::ProfileView, account_id, now, keys.day),
            viewer,
        );
        self.trigger_rollup(account_id);

        RecordOutcome::Recorded {
            account_id: account_id.to_string(),
            created,
        }
    }

    fn record_click(
        &self,
        account_id: &str,
        username: Option<String>,
        link: &LinkInfo,
        clicker: Option<&ViewerInfo>,
    ) -> RecordOutcome {
        if link.link_id.trim().is_empty() {
            tracing::debug!(account_id, "Link click without link id, event dropped");
            return RecordOutcome::Dropped(DropReason::InvalidInput);
        }
        let now = self.clock.now();
        let keys = BucketKeys::at(now);
        let source = clicker.and_then(ViewerInfo::traffic_source);

        let write = match click_write(&keys, now, username, link, source) {
            Ok(write) => write,
            Err(e) => {
                tracing::warn!(account_id, error = %e, "Failed to build click write");
                return RecordOutcome::Dropped(DropReason::StoreFailure);
            }
        };

        let created = match self.apply(account_id, write) {
            Ok(created) => created,
            Err(e) => {
                tracing::warn!(account_id, link_id = %link.link_id, error = %e, "Failed to record link click");
                return RecordOutcome::Dropped(DropReason::StoreFailure);
            }
        };
        tracing::debug!(account_id, link_id = %link.link_id, created, "Link click recorded");

        let mut record = EventLogRecord::new(EventType::LinkClick, account_id, now, keys.day);
        record.link_id = Some(link.link_id.clone());
        self.log_event(record, clicker);

        RecordOutcome::Recorded {
            account_id: account_id.to_string(),
            created,
        }
    }

    /// Apply a write; returns whether the aggregate was created
    fn apply(&self, account_id: &str, write: AggregateWrite) -> StoreResult<bool> {
        if self.settings.atomic_upsert {
            let outcome = self
                .store
                .upsert(ANALYTICS_COLLECTION, account_id, write.seed, &write.ops)?;
            return Ok(outcome == UpsertOutcome::Created);
        }

        // Read-then-branch: two concurrent first events can both see "absent",
        // and the second seed overwrites the first.
        if self.store.get(ANALYTICS_COLLECTION, account_id)?.is_none() {
            self.store.set(ANALYTICS_COLLECTION, account_id, write.seed)?;
            Ok(true)
        } else {
            self.store.update(ANALYTICS_COLLECTION, account_id, &write.ops)?;
            Ok(false)
        }
    }

    fn log_event(&self, record: EventLogRecord, viewer: Option<&ViewerInfo>) {
        let Some(log) = &self.event_log else {
            return;
        };
        let record = match viewer {
            Some(viewer) => record.with_viewer(viewer),
            None => record,
        };
        if let Err(e) = log.append(&record) {
            tracing::warn!(account_id = %record.account_id, error = %e, "Failed to append event log record");
        }
    }

    fn trigger_rollup(&self, account_id: &str) {
        let Some(dispatcher) = &self.rollup else {
            return;
        };
        match fetch_account(self.store.as_ref(), account_id) {
            Ok(Some(account)) => {
                if let Some(group_id) = account.group_id.as_deref().filter(|g| !g.is_empty()) {
                    dispatcher.trigger(group_id);
                }
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(account_id, error = %e, "Failed to read account for group rollup");
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Write construction
// ─────────────────────────────────────────────────────────────────────────────

fn counter_map(key: &str, count: u64) -> std::collections::BTreeMap<String, u64> {
    std::collections::BTreeMap::from([(key.to_string(), count)])
}

/// Aggregate with every bucket map present at the current keys
fn seed_aggregate(
    keys: &BucketKeys,
    now: DateTime<Utc>,
    username: Option<String>,
    views: u64,
    clicks: u64,
) -> AnalyticsAggregate {
    AnalyticsAggregate {
        total_views: views,
        total_clicks: clicks,
        daily_views: counter_map(&keys.day, views),
        weekly_views: counter_map(&keys.week, views),
        monthly_views: counter_map(&keys.month, views),
        daily_clicks: counter_map(&keys.day, clicks),
        weekly_clicks: counter_map(&keys.week, clicks),
        monthly_clicks: counter_map(&keys.month, clicks),
        last_updated: Some(now),
        created_at: Some(now),
        username,
        ..Default::default()
    }
}

fn bucket_increments(prefix: &str, keys: &BucketKeys) -> Vec<FieldOp> {
    let total = match prefix {
        "Views" => "totalViews",
        _ => "totalClicks",
    };
    vec![
        FieldOp::increment(total, 1),
        FieldOp::increment(format!("daily{prefix}.{}", keys.day), 1),
        FieldOp::increment(format!("weekly{prefix}.{}", keys.week), 1),
        FieldOp::increment(format!("monthly{prefix}.{}", keys.month), 1),
    ]
}

fn timestamp(now: DateTime<Utc>) -> StoreResult<Value> {
    Ok(serde_json::to_value(now)?)
}

fn view_write(
    keys: &BucketKeys,
    now: DateTime<Utc>,
    username: Option<String>,
    source: Option<&TrafficSource>,
) -> StoreResult<AggregateWrite> {
    let mut seed = seed_aggregate(keys, now, username, 1, 0);
    let mut ops = bucket_increments("Views", keys);
    ops.push(FieldOp::set("lastUpdated", timestamp(now)?));

    if let Some(source) = source {
        let key = source_key(&source.source);
        seed.traffic_sources.insert(
            key.clone(),
            TrafficSourceStats {
                views: 1,
                clicks: 0,
                medium: source.medium.clone(),
                campaign: source.campaign.clone(),
                last_view: Some(now),
            },
        );
        ops.push(FieldOp::increment(format!("trafficSources.{key}.views"), 1));
        ops.push(FieldOp::set(format!("trafficSources.{key}.medium"), source.medium.clone()));
        ops.push(FieldOp::set(format!("trafficSources.{key}.lastView"), timestamp(now)?));
        if let Some(campaign) = &source.campaign {
            ops.push(FieldOp::set(format!("trafficSources.{key}.campaign"), campaign.clone()));
        }
    }

    Ok(AggregateWrite {
        seed: to_document(&seed)?,
        ops,
    })
}

fn click_write(
    keys: &BucketKeys,
    now: DateTime<Utc>,
    username: Option<String>,
    link: &LinkInfo,
    source: Option<&TrafficSource>,
) -> StoreResult<AggregateWrite> {
    let link_key = path_segment(&link.link_id);
    let mut seed = seed_aggregate(keys, now, username, 0, 1);
    seed.link_clicks.insert(
        link_key.clone(),
        LinkClickStats {
            total_clicks: 1,
            title: link.title.clone(),
            url: link.url.clone(),
            link_type: link.link_type.clone(),
            last_clicked: Some(now),
        },
    );

    let mut ops = bucket_increments("Clicks", keys);
    ops.extend([
        FieldOp::increment(format!("linkClicks.{link_key}.totalClicks"), 1),
        FieldOp::set(format!("linkClicks.{link_key}.title"), link.title.clone()),
        FieldOp::set(format!("linkClicks.{link_key}.url"), link.url.clone()),
        FieldOp::set(format!("linkClicks.{link_key}.type"), link.link_type.clone()),
        FieldOp::set(format!("linkClicks.{link_key}.lastClicked"), timestamp(now)?),
        FieldOp::set("lastUpdated", timestamp(now)?),
    ]);

    if let Some(source) = source {
        let key = source_key(&source.source);
        seed.traffic_sources.insert(
            key.clone(),
            TrafficSourceStats {
                views: 0,
                clicks: 1,
                medium: source.medium.clone(),
                campaign: source.campaign.clone(),
                last_view: None,
            },
        );
        ops.push(FieldOp::increment(format!("trafficSources.{key}.clicks"), 1));
        ops.push(FieldOp::set(format!("trafficSources.{key}.medium"), source.medium.clone()));
    }

    Ok(AggregateWrite {
        seed: to_document(&seed)?,
        ops,
    })
}
