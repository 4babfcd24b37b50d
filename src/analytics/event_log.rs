//! Detailed per-event log
//!
//! When enabled, every recorded view or click also appends an immutable record
//! to `analytics_events`. Nothing reads these back in-process; they exist for
//! offline analysis. Raw IP addresses are never persisted, only a truncated
//! SHA-256 digest.

use super::recorder::ViewerInfo;
use crate::attribution::SessionAttribution;
use crate::error::StoreResult;
use crate::store::{to_document, DocumentStore};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;

pub const EVENTS_COLLECTION: &str = "analytics_events";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    ProfileView,
    LinkClick,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventLogRecord {
    pub event_type: EventType,
    pub account_id: String,
    pub timestamp: DateTime<Utc>,
    pub date_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referrer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub medium: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub campaign: Option<String>,
}

impl EventLogRecord {
    pub fn new(
        event_type: EventType,
        account_id: &str,
        timestamp: DateTime<Utc>,
        date_key: String,
    ) -> Self {
        Self {
            event_type,
            account_id: account_id.to_string(),
            timestamp,
            date_key,
            link_id: None,
            user_agent: None,
            referrer: None,
            ip_hash: None,
            country: None,
            session_id: None,
            source: None,
            medium: None,
            campaign: None,
        }
    }

    pub fn with_viewer(mut self, viewer: &ViewerInfo) -> Self {
        self.user_agent = viewer.user_agent.clone();
        self.referrer = viewer.referrer.clone();
        self.ip_hash = viewer.ip_address.as_deref().map(hash_ip);
        self.country = viewer.country.clone();
        if let Some(session) = &viewer.session {
            self = self.with_session(session);
        }
        self
    }

    fn with_session(mut self, session: &SessionAttribution) -> Self {
        self.session_id = Some(session.session_id.clone());
        self.source = Some(session.traffic_source.source.clone());
        self.medium = Some(session.traffic_source.medium.clone());
        self.campaign = session.traffic_source.campaign.clone();
        self
    }
}

/// First 16 hex chars of SHA-256 over the trimmed address
pub fn hash_ip(ip: &str) -> String {
    let digest = Sha256::digest(ip.trim().as_bytes());
    digest.iter().take(8).map(|b| format!("{b:02x}")).collect()
}

/// Append-only writer for event records
#[derive(Clone)]
pub struct EventLog {
    store: Arc<dyn DocumentStore>,
}

impl EventLog {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Append one record and return its generated id
    pub fn append(&self, record: &EventLogRecord) -> StoreResult<String> {
        self.store.append(EVENTS_COLLECTION, to_document(record)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{from_document, MemoryStore};
    use chrono::TimeZone;

    #[test]
    fn test_hash_ip_is_stable_and_truncated() {
        let a = hash_ip("203.0.113.9");
        assert_eq!(a.len(), 16);
        assert_eq!(a, hash_ip(" 203.0.113.9 "));
        assert_ne!(a, hash_ip("203.0.113.10"));
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_append_never_stores_raw_ip() {
        let store = Arc::new(MemoryStore::new());
        let log = EventLog::new(store.clone());
        let now = Utc.with_ymd_and_hms(2026, 10, 17, 10, 0, 0).unwrap();
        let viewer = ViewerInfo {
            ip_address: Some("198.51.100.7".into()),
            country: Some("NZ".into()),
            ..Default::default()
        };

        let record = EventLogRecord::new(EventType::ProfileView, "u1", now, "2026-10-17".into())
            .with_viewer(&viewer);
        let id = log.append(&record).unwrap();

        let doc = store.get(EVENTS_COLLECTION, &id).unwrap().unwrap();
        let body = serde_json::to_string(&doc).unwrap();
        assert!(!body.contains("198.51.100.7"));
        assert_eq!(doc["eventType"], "profile_view");

        let back: EventLogRecord = from_document(doc).unwrap();
        assert_eq!(back, record);
    }
}
