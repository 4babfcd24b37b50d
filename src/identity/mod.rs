//! Identity resolution index
//!
//! The store has no secondary indexes, so lookups by username, display name, or
//! email are served by redundant point records, all pointing at the same account:
//!
//! ```text
//! identity_index/
//!   userABC                 → {accountId: userABC, keyType: accountId, ...}
//!   username_jane           → {accountId: userABC, keyType: username, ...}
//!   displayName_Jane Doe    → {accountId: userABC, keyType: displayName, ...}
//!   email_jane@x.com        → {accountId: userABC, keyType: email, ...}
//! ```
//!
//! Resolution probes at most a handful of point reads in a fixed order instead
//! of scanning the accounts collection. Records go stale if an account changes
//! without a matching `upsert_index`; `accounts::AccountService` keeps them in
//! step on every write, and `backfill` rebuilds them wholesale.

use crate::clock::Clock;
use crate::error::{LinkstatsError, Result};
use crate::store::{from_document, to_document, Document, DocumentStore};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub mod backfill;

pub use backfill::{run_backfill, BackfillConfig, BackfillReport};

/// Collection holding index records
pub const INDEX_COLLECTION: &str = "identity_index";

/// Which account field an index record was derived from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum KeyType {
    AccountId,
    Username,
    DisplayName,
    Email,
}

impl KeyType {
    /// Key prefix in the index collection (empty for the account id itself)
    pub fn prefix(self) -> &'static str {
        match self {
            KeyType::AccountId => "",
            KeyType::Username => "username_",
            KeyType::DisplayName => "displayName_",
            KeyType::Email => "email_",
        }
    }

    pub fn key(self, value: &str) -> String {
        format!("{}{}", self.prefix(), value)
    }
}

/// One stored index record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexEntry {
    pub account_id: String,
    pub username: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    pub updated_at: DateTime<Utc>,
    pub key_type: KeyType,
}

/// The identifying fields of an account
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccountIdentity {
    pub account_id: String,
    pub username: String,
    pub display_name: Option<String>,
    pub email: Option<String>,
}

impl AccountIdentity {
    pub fn new(account_id: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            username: username.into(),
            ..Default::default()
        }
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = Some(display_name.into());
        self
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Index keys for an account, in write order
///
/// - account id (always)
/// - `username_` + lowercase username
/// - `displayName_` + display name as typed, skipped when equal to the username
/// - `email_` + lowercase email, skipped when absent
pub fn index_keys(identity: &AccountIdentity) -> Vec<(KeyType, String)> {
    let username = identity.username.trim();
    let mut keys = vec![
        (KeyType::AccountId, identity.account_id.trim().to_string()),
        (KeyType::Username, KeyType::Username.key(&username.to_lowercase())),
    ];
    if let Some(display_name) = non_blank(identity.display_name.as_deref()) {
        if display_name != username {
            keys.push((KeyType::DisplayName, KeyType::DisplayName.key(display_name)));
        }
    }
    if let Some(email) = non_blank(identity.email.as_deref()) {
        keys.push((KeyType::Email, KeyType::Email.key(&email.to_lowercase())));
    }
    keys
}

/// Probe keys for an identifier, in lookup order, without duplicates
pub fn candidate_keys(identifier: &str) -> Vec<String> {
    let raw = identifier.trim();
    if raw.is_empty() {
        return Vec::new();
    }
    let lower = raw.to_lowercase();

    let mut keys: Vec<String> = Vec::with_capacity(5);
    let mut push = |key: String| {
        if !keys.contains(&key) {
            keys.push(key);
        }
    };
    push(raw.to_string());
    push(KeyType::Username.key(&lower));
    push(KeyType::DisplayName.key(&lower));
    push(KeyType::Email.key(&lower));
    // Display names keep their case in the key
    push(KeyType::DisplayName.key(raw));
    keys
}

/// Read/write access to the identity index
#[derive(Clone)]
pub struct IdentityIndex {
    store: Arc<dyn DocumentStore>,
    clock: Arc<dyn Clock>,
}

impl IdentityIndex {
    pub fn new(store: Arc<dyn DocumentStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Write every index record for an account. Returns how many were written.
    ///
    /// Records are written as one batch, which is not atomic as a set: a
    /// partial failure leaves some keys resolvable and others not.
    pub fn upsert_index(&self, identity: &AccountIdentity) -> Result<usize> {
        if identity.account_id.trim().is_empty() {
            return Err(LinkstatsError::InvalidInput("account id is empty".into()));
        }
        if identity.username.trim().is_empty() {
            return Err(LinkstatsError::InvalidInput(format!(
                "account {} has no username",
                identity.account_id
            )));
        }

        let now = self.clock.now();
        let docs = index_keys(identity)
            .into_iter()
            .map(|(key_type, key)| -> Result<(String, Document)> {
                let entry = IndexEntry {
                    account_id: identity.account_id.trim().to_string(),
                    username: identity.username.trim().to_string(),
                    display_name: non_blank(identity.display_name.as_deref()).map(str::to_string),
                    email: non_blank(identity.email.as_deref()).map(str::to_string),
                    updated_at: now,
                    key_type,
                };
                Ok((key, to_document(&entry)?))
            })
            .collect::<Result<Vec<(String, Document)>>>()?;

        let written = docs.len();
        self.store.set_batch(INDEX_COLLECTION, docs)?;
        tracing::debug!(
            account_id = %identity.account_id,
            records = written,
            "Identity index updated"
        );
        Ok(written)
    }

    /// Resolve a username, display name, email, or account id to its index entry
    pub fn resolve(&self, identifier: &str) -> Result<IndexEntry> {
        for key in candidate_keys(identifier) {
            if let Some(doc) = self.store.get(INDEX_COLLECTION, &key)? {
                let entry: IndexEntry = from_document(doc)?;
                tracing::trace!(identifier, key = %key, account_id = %entry.account_id, "Resolved identifier");
                return Ok(entry);
            }
        }
        Err(LinkstatsError::NotFound(identifier.to_string()))
    }

    /// Delete every index record for an account. Missing records are fine.
    pub fn remove_index(&self, identity: &AccountIdentity) -> Result<usize> {
        let keys: Vec<String> = index_keys(identity)
            .into_iter()
            .map(|(_, key)| key)
            .filter(|key| !key.is_empty())
            .collect();
        let removed = self.store.delete_batch(INDEX_COLLECTION, &keys)?;
        tracing::debug!(account_id = %identity.account_id, removed, "Identity index records removed");
        Ok(removed)
    }

    /// Delete only the keys of `previous` that `current` no longer produces
    pub fn remove_stale(&self, previous: &AccountIdentity, current: &AccountIdentity) -> Result<usize> {
        let keep: Vec<String> = index_keys(current).into_iter().map(|(_, k)| k).collect();
        let stale: Vec<String> = index_keys(previous)
            .into_iter()
            .map(|(_, k)| k)
            .filter(|k| !k.is_empty() && !keep.contains(k))
            .collect();
        if stale.is_empty() {
            return Ok(0);
        }
        Ok(self.store.delete_batch(INDEX_COLLECTION, &stale)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::store::testing::FlakyStore;
    use crate::store::MemoryStore;
    use chrono::TimeZone;
    use std::sync::atomic::Ordering;

    fn clock() -> Arc<dyn Clock> {
        Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2026, 10, 17, 8, 0, 0).unwrap()))
    }

    fn jane() -> AccountIdentity {
        AccountIdentity::new("userABC", "jane")
            .with_display_name("Jane Doe")
            .with_email("jane@x.com")
    }

    fn index() -> (Arc<MemoryStore>, IdentityIndex) {
        let store = Arc::new(MemoryStore::new());
        let index = IdentityIndex::new(store.clone(), clock());
        (store, index)
    }

    #[test]
    fn test_index_keys_for_full_identity() {
        let keys: Vec<String> = index_keys(&jane()).into_iter().map(|(_, k)| k).collect();
        assert_eq!(
            keys,
            vec!["userABC", "username_jane", "displayName_Jane Doe", "email_jane@x.com"]
        );
    }

    #[test]
    fn test_display_name_equal_to_username_is_skipped() {
        let identity = AccountIdentity::new("u1", "jane").with_display_name("jane");
        let keys = index_keys(&identity);
        assert_eq!(keys.len(), 2);
        assert!(keys.iter().all(|(t, _)| *t != KeyType::DisplayName));
    }

    #[test]
    fn test_upsert_writes_four_records() {
        let (store, index) = index();
        assert_eq!(index.upsert_index(&jane()).unwrap(), 4);
        assert_eq!(store.len(INDEX_COLLECTION), 4);
    }

    #[test]
    fn test_resolve_scenario_all_identifiers() {
        let (_store, index) = index();
        index.upsert_index(&jane()).unwrap();

        for identifier in ["jane", "JANE", "jane@x.com", "Jane Doe", "userABC", "  Jane  "] {
            let entry = index.resolve(identifier).unwrap();
            assert_eq!(entry.account_id, "userABC", "identifier {identifier}");
        }
    }

    #[test]
    fn test_resolve_reports_key_type() {
        let (_store, index) = index();
        index.upsert_index(&jane()).unwrap();
        assert_eq!(index.resolve("userABC").unwrap().key_type, KeyType::AccountId);
        assert_eq!(index.resolve("JANE").unwrap().key_type, KeyType::Username);
        assert_eq!(index.resolve("JANE@X.COM").unwrap().key_type, KeyType::Email);
    }

    #[test]
    fn test_resolve_unknown_and_empty() {
        let (_store, index) = index();
        assert!(index.resolve("nobody").unwrap_err().is_not_found());
        assert!(index.resolve("   ").unwrap_err().is_not_found());
    }

    #[test]
    fn test_username_case_insensitive_property() {
        let (_store, index) = index();
        for (id, name) in [("a1", "alice"), ("b2", "Bob_99"), ("c3", "ZED")] {
            index.upsert_index(&AccountIdentity::new(id, name)).unwrap();
            let lower = index.resolve(&name.to_lowercase()).unwrap();
            let upper = index.resolve(&name.to_uppercase()).unwrap();
            assert_eq!(lower, upper);
            assert_eq!(lower.account_id, id);
        }
    }

    #[test]
    fn test_empty_identity_rejected() {
        let (_store, index) = index();
        assert!(matches!(
            index.upsert_index(&AccountIdentity::new("", "x")),
            Err(LinkstatsError::InvalidInput(_))
        ));
        assert!(matches!(
            index.upsert_index(&AccountIdentity::new("id", " ")),
            Err(LinkstatsError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_remove_index_tolerates_missing_records() {
        let (store, index) = index();
        index.upsert_index(&jane()).unwrap();
        store.delete(INDEX_COLLECTION, "email_jane@x.com").unwrap();

        assert_eq!(index.remove_index(&jane()).unwrap(), 3);
        assert!(store.is_empty(INDEX_COLLECTION));
        assert_eq!(index.remove_index(&jane()).unwrap(), 0);
    }

    #[test]
    fn test_remove_stale_keeps_current_keys() {
        let (store, index) = index();
        index.upsert_index(&jane()).unwrap();

        let renamed = AccountIdentity::new("userABC", "janed").with_email("jane@x.com");
        assert_eq!(index.remove_stale(&jane(), &renamed).unwrap(), 2);
        assert!(store.get(INDEX_COLLECTION, "email_jane@x.com").unwrap().is_some());
        assert!(store.get(INDEX_COLLECTION, "username_jane").unwrap().is_none());
    }

    #[test]
    fn test_resolve_probe_count_worst_case() {
        let store = Arc::new(FlakyStore::default());
        let index = IdentityIndex::new(store.clone(), clock());
        let _ = index.resolve("Someone Else");
        assert_eq!(store.reads.load(Ordering::SeqCst), 5);

        store.reads.store(0, Ordering::SeqCst);
        let _ = index.resolve("lower");
        // Raw and lowercased display-name probes collapse into one
        assert_eq!(store.reads.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_resolve_propagates_store_failures() {
        let store = Arc::new(FlakyStore::default());
        store.fail_reads.store(true, Ordering::SeqCst);
        let index = IdentityIndex::new(store, clock());
        assert!(matches!(index.resolve("jane"), Err(LinkstatsError::Store(_))));
    }
}
