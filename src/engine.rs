//! Component wiring
//!
//! Builds every service over one shared store and clock, the way the binary
//! (and any embedding application) uses them.
//!
//! ```text
//! Config ──→ open_store ──→ Arc<dyn DocumentStore>
//!                                 │
//!        ┌──────────────┬─────────┼──────────────┬───────────────┐
//!        ▼              ▼         ▼              ▼               ▼
//!  IdentityIndex  AccountService  EventRecorder  AggregateReader  RollupDispatcher
//! ```

use crate::accounts::AccountService;
use crate::analytics::{AggregateReader, EventRecorder, RecorderSettings};
use crate::attribution::TrafficClassifier;
use crate::clock::Clock;
use crate::config::{Config, MigrationConfig, StoreBackend, StoreConfig};
use crate::error::{Result, StoreResult};
use crate::identity::{run_backfill, BackfillReport, IdentityIndex};
use crate::rollup::{GroupRollup, LoggingRollup, RollupDispatcher};
use crate::store::{DocumentStore, MemoryStore, SqliteStore};
use std::sync::Arc;

/// Open the configured backend
pub fn open_store(config: &StoreConfig) -> StoreResult<Arc<dyn DocumentStore>> {
    let store: Arc<dyn DocumentStore> = match config.backend {
        StoreBackend::Sqlite => Arc::new(SqliteStore::open(&config.db_path, config.pool_size)?),
        StoreBackend::Memory => Arc::new(MemoryStore::new()),
    };
    tracing::debug!(backend = store.name(), "Document store opened");
    Ok(store)
}

pub struct Engine {
    pub store: Arc<dyn DocumentStore>,
    pub clock: Arc<dyn Clock>,
    pub index: IdentityIndex,
    pub accounts: AccountService,
    pub recorder: EventRecorder,
    pub reader: AggregateReader,
    pub classifier: TrafficClassifier,
    pub rollup: Option<Arc<RollupDispatcher>>,
    migration: MigrationConfig,
}

impl Engine {
    /// Wire all services. With rollups enabled and no implementation given,
    /// triggers go to [`LoggingRollup`].
    pub fn new(
        store: Arc<dyn DocumentStore>,
        clock: Arc<dyn Clock>,
        config: &Config,
        rollup: Option<Arc<dyn GroupRollup>>,
    ) -> anyhow::Result<Self> {
        let index = IdentityIndex::new(store.clone(), clock.clone());
        let accounts = AccountService::new(store.clone(), index.clone(), clock.clone());
        let reader = AggregateReader::new(store.clone(), clock.clone())
            .with_top_links(config.analytics.top_links_limit);
        let classifier = TrafficClassifier::new(config.attribution.clone());

        let dispatcher = if config.rollup.enabled {
            let rollup = rollup.unwrap_or_else(|| Arc::new(LoggingRollup) as Arc<dyn GroupRollup>);
            Some(Arc::new(RollupDispatcher::new(rollup, &config.rollup)?))
        } else {
            None
        };

        let mut recorder = EventRecorder::new(
            store.clone(),
            index.clone(),
            clock.clone(),
            RecorderSettings::from(&config.analytics),
        );
        if let Some(dispatcher) = &dispatcher {
            recorder = recorder.with_rollup(dispatcher.clone());
        }

        tracing::debug!(
            store = store.name(),
            atomic_upsert = config.analytics.atomic_upsert,
            detailed_logging = config.analytics.detailed_logging,
            rollup = dispatcher.as_ref().map(|d| d.rollup_name()),
            "Engine ready"
        );

        Ok(Self {
            store,
            clock,
            index,
            accounts,
            recorder,
            reader,
            classifier,
            rollup: dispatcher,
            migration: config.migration.clone(),
        })
    }

    /// Rebuild the identity index from all accounts
    pub fn backfill(&self) -> Result<BackfillReport> {
        run_backfill(
            self.store.as_ref(),
            &self.index,
            &self.migration.backfill_config(),
        )
    }

    /// Drain pending rollups and stop the dispatcher
    pub fn shutdown(&self) {
        if let Some(dispatcher) = &self.rollup {
            dispatcher.shutdown();
            for failure in dispatcher.drain_failures() {
                tracing::warn!(
                    group_id = %failure.group_id,
                    at = %failure.at,
                    error = %failure.error,
                    "Unhandled group rollup failure"
                );
            }
        }
    }
}
