//! One-shot identity index backfill
//!
//! Populates the index for accounts created before index maintenance existed.
//! Reads every account and profile detail record up front, then writes index
//! records a batch of accounts at a time with a fixed pause between batches to
//! keep write throughput bounded.
//!
//! Safe to rerun: every write is an overwrite of the same keys. There is no
//! checkpointing, so a rerun redoes all work.

use super::{AccountIdentity, IdentityIndex};
use crate::accounts::{Account, ProfileDetail, ACCOUNTS_COLLECTION, PROFILES_COLLECTION};
use crate::error::Result;
use crate::store::{from_document, DocumentStore};
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct BackfillConfig {
    /// Accounts per batch
    pub batch_size: usize,
    /// Pause between batches (not after the last one)
    pub batch_delay: Duration,
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            batch_delay: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackfillReport {
    pub accounts_seen: usize,
    pub indexed: usize,
    /// Accounts without a username
    pub skipped: usize,
    pub records_written: usize,
    pub batches: usize,
}

impl std::fmt::Display for BackfillReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} accounts seen, {} indexed, {} skipped, {} records written in {} batches",
            self.accounts_seen, self.indexed, self.skipped, self.records_written, self.batches
        )
    }
}

/// Rebuild the index from the accounts collection. Store failures abort the run.
pub fn run_backfill(
    store: &dyn DocumentStore,
    index: &IdentityIndex,
    config: &BackfillConfig,
) -> Result<BackfillReport> {
    let mut profiles: HashMap<String, ProfileDetail> = HashMap::new();
    for (id, doc) in store.list(PROFILES_COLLECTION)? {
        match from_document::<ProfileDetail>(doc) {
            Ok(profile) => {
                profiles.insert(id, profile);
            }
            Err(e) => tracing::warn!(account_id = %id, error = %e, "Skipping unreadable profile detail"),
        }
    }

    let mut identities = Vec::new();
    let mut report = BackfillReport::default();
    for (id, doc) in store.list(ACCOUNTS_COLLECTION)? {
        report.accounts_seen += 1;
        let mut account: Account = match from_document(doc) {
            Ok(account) => account,
            Err(e) => {
                tracing::warn!(account_id = %id, error = %e, "Skipping unreadable account");
                report.skipped += 1;
                continue;
            }
        };
        if account.account_id.is_empty() {
            account.account_id = id.clone();
        }
        if account.username.trim().is_empty() {
            tracing::debug!(account_id = %id, "Skipping account without username");
            report.skipped += 1;
            continue;
        }

        let mut identity: AccountIdentity = account.identity();
        if let Some(name) = profiles
            .get(&id)
            .and_then(|p| p.display_name.as_deref())
            .filter(|n| !n.trim().is_empty())
        {
            identity.display_name = Some(name.to_string());
        }
        identities.push(identity);
    }

    tracing::info!(
        accounts = report.accounts_seen,
        to_index = identities.len(),
        profiles = profiles.len(),
        batch_size = config.batch_size,
        "Starting identity index backfill"
    );

    let batch_size = config.batch_size.max(1);
    let total_batches = identities.len().div_ceil(batch_size);
    for (n, batch) in identities.chunks(batch_size).enumerate() {
        if n > 0 && !config.batch_delay.is_zero() {
            std::thread::sleep(config.batch_delay);
        }
        for identity in batch {
            report.records_written += index.upsert_index(identity)?;
            report.indexed += 1;
        }
        report.batches += 1;
        tracing::info!(
            batch = n + 1,
            of = total_batches,
            indexed = report.indexed,
            "Backfill batch written"
        );
    }

    tracing::info!(%report, "Identity index backfill complete");
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, SystemClock};
    use crate::identity::INDEX_COLLECTION;
    use crate::store::{to_document, testing::FlakyStore, MemoryStore};
    use serde_json::json;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use std::time::Instant;

    fn seed(store: &MemoryStore) {
        for (id, username, display) in [
            ("a1", "alice", Some("Alice A")),
            ("b2", "bob", None),
            ("c3", "", Some("Nameless")),
        ] {
            let account = Account {
                account_id: id.into(),
                username: username.into(),
                display_name: display.map(str::to_string),
                email: Some(format!("{id}@mail.test")),
                group_id: None,
                created_at: None,
                updated_at: None,
            };
            store
                .set(ACCOUNTS_COLLECTION, id, to_document(&account).unwrap())
                .unwrap();
        }
        let profile = json!({"displayName": "Bobby Tables"});
        store
            .set(PROFILES_COLLECTION, "b2", profile.as_object().unwrap().clone())
            .unwrap();
    }

    fn config(batch_size: usize) -> BackfillConfig {
        BackfillConfig {
            batch_size,
            batch_delay: Duration::ZERO,
        }
    }

    fn index_on(store: Arc<dyn DocumentStore>) -> IdentityIndex {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        IdentityIndex::new(store, clock)
    }

    #[test]
    fn test_backfill_report_and_records() {
        let store = Arc::new(MemoryStore::new());
        seed(&store);
        let index = index_on(store.clone());

        let report = run_backfill(store.as_ref(), &index, &config(10)).unwrap();
        assert_eq!(
            report,
            BackfillReport {
                accounts_seen: 3,
                indexed: 2,
                skipped: 1,
                records_written: 8,
                batches: 1,
            }
        );
        assert_eq!(store.len(INDEX_COLLECTION), 8);
    }

    #[test]
    fn test_profile_display_name_wins() {
        let store = Arc::new(MemoryStore::new());
        seed(&store);
        let index = index_on(store.clone());
        run_backfill(store.as_ref(), &index, &config(10)).unwrap();

        assert_eq!(index.resolve("Bobby Tables").unwrap().account_id, "b2");
        assert_eq!(index.resolve("Alice A").unwrap().account_id, "a1");
    }

    #[test]
    fn test_backfill_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        seed(&store);
        let index = index_on(store.clone());

        let first = run_backfill(store.as_ref(), &index, &config(1)).unwrap();
        let second = run_backfill(store.as_ref(), &index, &config(1)).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.batches, 2);
        assert_eq!(store.len(INDEX_COLLECTION), 8);
    }

    #[test]
    fn test_delay_only_between_batches() {
        let store = Arc::new(MemoryStore::new());
        seed(&store);
        let index = index_on(store.clone());
        let config = BackfillConfig {
            batch_size: 1,
            batch_delay: Duration::from_millis(40),
        };

        let start = Instant::now();
        run_backfill(store.as_ref(), &index, &config).unwrap();
        let elapsed = start.elapsed();
        // Two batches → exactly one pause
        assert!(elapsed >= Duration::from_millis(40));
        assert!(elapsed < Duration::from_millis(80 + 200));
    }

    #[test]
    fn test_write_failures_propagate() {
        let flaky = Arc::new(FlakyStore::default());
        seed(&flaky.inner);
        flaky.fail_writes.store(true, Ordering::SeqCst);
        let index = index_on(flaky.clone());

        assert!(run_backfill(flaky.as_ref(), &index, &config(10)).is_err());
    }

    #[test]
    fn test_empty_store() {
        let store = Arc::new(MemoryStore::new());
        let index = index_on(store.clone());
        let report = run_backfill(store.as_ref(), &index, &config(10)).unwrap();
        assert_eq!(report, BackfillReport::default());
    }
}
