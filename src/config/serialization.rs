//! Config serialization to TOML
//!
//! Single source of truth for config file format.

use super::Config;
use std::collections::BTreeMap;

/// TOML basic string (Debug escaping is a compatible subset)
fn quoted(s: &str) -> String {
    format!("{s:?}")
}

fn table_to_toml(header: &str, table: &BTreeMap<String, String>) -> String {
    let mut output = format!("[{header}]\n");
    for (domain, source) in table {
        output.push_str(&format!("{} = {}\n", quoted(domain), quoted(source)));
    }
    output
}

impl Config {
    pub fn to_toml(&self) -> String {
        let site_hosts: Vec<String> = self
            .attribution
            .site_hosts
            .iter()
            .map(|h| quoted(h))
            .collect();

        format!(
            r#"# linkstats configuration

# Document store (LINKSTATS_STORE / LINKSTATS_DB override)
[store]
backend = {backend}  # sqlite, memory
db_path = {db_path}
pool_size = {pool_size}

# Logging configuration (RUST_LOG overrides, then LINKSTATS_LOG_LEVEL)
[logging]
level = {log_level}
# JSON log files in addition to stderr
file_enabled = {log_file_enabled}
file_dir = {log_file_dir}
file_rotation = {log_file_rotation}  # hourly, daily, never
file_prefix = {log_file_prefix}

# Event recording and dashboard reads
[analytics]
# false = legacy read-then-create writes (can lose concurrent first events)
atomic_upsert = {atomic_upsert}
# Append every event to analytics_events (LINKSTATS_DETAILED_LOGGING overrides)
detailed_logging = {detailed_logging}
top_links_limit = {top_links_limit}

# Identity index backfill (`linkstats migrate`)
[migration]
batch_size = {batch_size}
batch_delay_ms = {batch_delay_ms}

# Group rollup dispatcher
[rollup]
enabled = {rollup_enabled}
queue_capacity = {queue_capacity}
failure_buffer = {failure_buffer}

# Traffic attribution (LINKSTATS_SESSION_TTL_MINUTES overrides the TTL)
# Domain tables below replace the built-in lists when present.
[attribution]
session_ttl_minutes = {ttl}
site_hosts = [{site_hosts}]

{social}
{search}"#,
            backend = quoted(self.store.backend.as_str()),
            db_path = quoted(&self.store.db_path.display().to_string()),
            pool_size = self.store.pool_size,
            log_level = quoted(&self.logging.level),
            log_file_enabled = self.logging.file_enabled,
            log_file_dir = quoted(&self.logging.file_dir.display().to_string()),
            log_file_rotation = quoted(self.logging.file_rotation.as_str()),
            log_file_prefix = quoted(&self.logging.file_prefix),
            atomic_upsert = self.analytics.atomic_upsert,
            detailed_logging = self.analytics.detailed_logging,
            top_links_limit = self.analytics.top_links_limit,
            batch_size = self.migration.batch_size,
            batch_delay_ms = self.migration.batch_delay_ms,
            rollup_enabled = self.rollup.enabled,
            queue_capacity = self.rollup.queue_capacity,
            failure_buffer = self.rollup.failure_buffer,
            ttl = self.attribution.session_ttl_minutes,
            site_hosts = site_hosts.join(", "),
            social = table_to_toml("attribution.social_domains", &self.attribution.social_domains),
            search = table_to_toml("attribution.search_domains", &self.attribution.search_domains),
        )
    }
}
