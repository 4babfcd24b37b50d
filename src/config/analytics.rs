//! Analytics configuration: recorder, reader, backfill, and rollup settings

use crate::identity::BackfillConfig;
use serde::Deserialize;
use std::time::Duration;

// ─────────────────────────────────────────────────────────────────────────────
// Analytics
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct AnalyticsConfig {
    /// Write aggregates with the store's atomic upsert (false = legacy read-then-create)
    pub atomic_upsert: bool,
    /// Append every event to `analytics_events`
    pub detailed_logging: bool,
    /// Links returned in a summary's top list
    pub top_links_limit: usize,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            atomic_upsert: true,
            detailed_logging: false,
            top_links_limit: 10,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct FileAnalytics {
    pub atomic_upsert: Option<bool>,
    pub detailed_logging: Option<bool>,
    pub top_links_limit: Option<usize>,
}

impl AnalyticsConfig {
    pub fn from_file(file: Option<FileAnalytics>) -> Self {
        let file = file.unwrap_or_default();
        let defaults = Self::default();

        Self {
            atomic_upsert: file.atomic_upsert.unwrap_or(defaults.atomic_upsert),
            detailed_logging: file.detailed_logging.unwrap_or(defaults.detailed_logging),
            top_links_limit: file.top_links_limit.unwrap_or(defaults.top_links_limit),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Migration
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct MigrationConfig {
    /// Accounts indexed per batch
    pub batch_size: usize,
    /// Pause between batches
    pub batch_delay_ms: u64,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            batch_delay_ms: 100,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct FileMigration {
    pub batch_size: Option<usize>,
    pub batch_delay_ms: Option<u64>,
}

impl MigrationConfig {
    pub fn from_file(file: Option<FileMigration>) -> Self {
        let file = file.unwrap_or_default();
        let defaults = Self::default();

        Self {
            batch_size: file.batch_size.unwrap_or(defaults.batch_size).max(1),
            batch_delay_ms: file.batch_delay_ms.unwrap_or(defaults.batch_delay_ms),
        }
    }

    pub fn backfill_config(&self) -> BackfillConfig {
        BackfillConfig {
            batch_size: self.batch_size,
            batch_delay: Duration::from_millis(self.batch_delay_ms),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Rollup
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct RollupConfig {
    /// Start the dispatcher thread at all
    pub enabled: bool,
    /// Pending triggers before new ones are dropped
    pub queue_capacity: usize,
    /// Failures retained until drained
    pub failure_buffer: usize,
}

impl Default for RollupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            queue_capacity: 1024,
            failure_buffer: 256,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct FileRollup {
    pub enabled: Option<bool>,
    pub queue_capacity: Option<usize>,
    pub failure_buffer: Option<usize>,
}

impl RollupConfig {
    pub fn from_file(file: Option<FileRollup>) -> Self {
        let file = file.unwrap_or_default();
        let defaults = Self::default();

        Self {
            enabled: file.enabled.unwrap_or(defaults.enabled),
            queue_capacity: file.queue_capacity.unwrap_or(defaults.queue_capacity),
            failure_buffer: file.failure_buffer.unwrap_or(defaults.failure_buffer),
        }
    }
}
