//! Configuration tests
//!
//! The template produced by `to_toml` must parse back into the same values,
//! so a field added to `Config` but forgotten in the template shows up here.

use super::*;
use std::collections::HashMap;
use std::path::Path;

fn no_env(_: &str) -> Option<String> {
    None
}

fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |key| map.get(key).cloned()
}

// ─────────────────────────────────────────────────────────────────────────────
// Round-trip tests
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_config_roundtrip_default() {
    let toml_str = Config::default().to_toml();
    let parsed = Config::parse_file_config(&toml_str);
    assert!(
        parsed.is_ok(),
        "Default config should round-trip.\nTOML:\n{}\nError: {:?}",
        toml_str,
        parsed.err()
    );

    let config = Config::from_sources(parsed.unwrap(), no_env);
    let defaults = Config::default();
    assert_eq!(config.store.backend, defaults.store.backend);
    assert_eq!(config.store.db_path, defaults.store.db_path);
    assert_eq!(config.logging.file_rotation, defaults.logging.file_rotation);
    assert_eq!(config.analytics.top_links_limit, defaults.analytics.top_links_limit);
    assert_eq!(config.migration.batch_size, 10);
    assert_eq!(config.rollup.queue_capacity, defaults.rollup.queue_capacity);
    assert_eq!(config.attribution.session_ttl_minutes, 30);
    assert_eq!(config.attribution.social_domains, defaults.attribution.social_domains);
    assert_eq!(config.attribution.search_domains, defaults.attribution.search_domains);
}

#[test]
fn test_config_roundtrip_customized() {
    let mut config = Config::default();
    config.store.backend = StoreBackend::Memory;
    config.store.db_path = "/var/lib/linkstats/db.sqlite".into();
    config.logging.file_rotation = LogRotation::Hourly;
    config.analytics.atomic_upsert = false;
    config.attribution.site_hosts = vec!["tapcard.example".into(), "www.tapcard.example".into()];
    config
        .attribution
        .social_domains
        .insert("mastodon.social".into(), "mastodon".into());

    let parsed = Config::from_sources(Config::parse_file_config(&config.to_toml()).unwrap(), no_env);
    assert_eq!(parsed.store.backend, StoreBackend::Memory);
    assert_eq!(parsed.store.db_path, Path::new("/var/lib/linkstats/db.sqlite"));
    assert_eq!(parsed.logging.file_rotation, LogRotation::Hourly);
    assert!(!parsed.analytics.atomic_upsert);
    assert_eq!(parsed.attribution.site_hosts, config.attribution.site_hosts);
    assert_eq!(parsed.attribution.social_domains["mastodon.social"], "mastodon");
}

// ─────────────────────────────────────────────────────────────────────────────
// Precedence
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_empty_file_gives_defaults() {
    let config = Config::from_sources(Config::parse_file_config("").unwrap(), no_env);
    assert_eq!(config.logging.level, "info");
    assert!(config.analytics.atomic_upsert);
    assert!(!config.analytics.detailed_logging);
    assert!(config.rollup.enabled);
}

#[test]
fn test_file_overrides_defaults() {
    let file = Config::parse_file_config(
        r#"
[logging]
level = "debug"

[migration]
batch_size = 25
batch_delay_ms = 0

[attribution]
session_ttl_minutes = 45
[attribution.search_domains]
"Kagi.com" = "Kagi"
"#,
    )
    .unwrap();
    let config = Config::from_sources(file, no_env);

    assert_eq!(config.logging.level, "debug");
    assert_eq!(config.migration.batch_size, 25);
    assert_eq!(config.migration.backfill_config().batch_delay, std::time::Duration::ZERO);
    assert_eq!(config.attribution.session_ttl_minutes, 45);
    // A configured table replaces the built-in one and is normalized
    assert_eq!(config.attribution.search_domains.len(), 1);
    assert_eq!(config.attribution.search_domains["kagi.com"], "kagi");
    // Untouched table keeps its defaults
    assert!(config.attribution.social_domains.contains_key("instagram.com"));
}

#[test]
fn test_env_overrides_file() {
    let file = Config::parse_file_config(
        r#"
[store]
db_path = "/from/file.db"
[logging]
level = "warn"
[attribution]
session_ttl_minutes = 45
"#,
    )
    .unwrap();
    let env = env_from(&[
        (ENV_DB, "/from/env.db"),
        (ENV_STORE, "memory"),
        (ENV_LOG_LEVEL, "trace"),
        (ENV_SESSION_TTL, "5"),
        (ENV_DETAILED_LOGGING, "true"),
    ]);
    let config = Config::from_sources(file, env);

    assert_eq!(config.store.db_path, Path::new("/from/env.db"));
    assert_eq!(config.store.backend, StoreBackend::Memory);
    assert_eq!(config.logging.level, "trace");
    assert_eq!(config.attribution.session_ttl_minutes, 5);
    assert!(config.analytics.detailed_logging);
}

#[test]
fn test_garbage_env_values_are_ignored() {
    let env = env_from(&[(ENV_SESSION_TTL, "soon"), (ENV_DETAILED_LOGGING, "maybe"), (ENV_DB, " ")]);
    let config = Config::from_sources(FileConfig::default(), env);
    assert_eq!(config.attribution.session_ttl_minutes, 30);
    assert!(!config.analytics.detailed_logging);
    assert_eq!(config.store.db_path, StoreConfig::default().db_path);
}

#[test]
fn test_session_ttl_is_capped() {
    let file = Config::parse_file_config("[attribution]\nsession_ttl_minutes = 200000000000000\n").unwrap();
    let config = Config::from_sources(file, no_env);
    assert_eq!(config.attribution.session_ttl_minutes, MAX_SESSION_TTL_MINUTES);

    let env = env_from(&[(ENV_SESSION_TTL, "18446744073709551615")]);
    let config = Config::from_sources(FileConfig::default(), env);
    assert_eq!(config.attribution.session_ttl_minutes, MAX_SESSION_TTL_MINUTES);
}

#[test]
fn test_invalid_file_is_an_error() {
    assert!(Config::parse_file_config("[logging\nlevel = ").is_err());
    assert!(Config::parse_file_config("[migration]\nbatch_size = \"ten\"").is_err());
}

// ─────────────────────────────────────────────────────────────────────────────
// Enum parsing
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_rotation_and_backend_parsing() {
    assert_eq!(LogRotation::parse("HOURLY"), LogRotation::Hourly);
    assert_eq!(LogRotation::parse("never"), LogRotation::Never);
    assert_eq!(LogRotation::parse("weekly"), LogRotation::Daily);
    assert_eq!(StoreBackend::parse("Memory"), StoreBackend::Memory);
    assert_eq!(StoreBackend::parse("postgres"), StoreBackend::Sqlite);
}

#[test]
fn test_zero_sizes_are_clamped() {
    let file = Config::parse_file_config("[store]\npool_size = 0\n[migration]\nbatch_size = 0").unwrap();
    let config = Config::from_sources(file, no_env);
    assert_eq!(config.store.pool_size, 1);
    assert_eq!(config.migration.batch_size, 1);
}
