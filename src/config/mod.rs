//! Configuration for the analytics engine and CLI
//!
//! Configuration is loaded in order of precedence:
//! 1. Environment variables (highest priority)
//! 2. Config file (~/.config/linkstats/config.toml)
//! 3. Built-in defaults (lowest priority)

use anyhow::Context;
use serde::Deserialize;
use std::path::PathBuf;

// ─────────────────────────────────────────────────────────────────────────────
// Submodules
// ─────────────────────────────────────────────────────────────────────────────

mod analytics;
mod attribution;
mod observability;
mod serialization;
mod storage;

#[cfg(test)]
mod tests;

// ─────────────────────────────────────────────────────────────────────────────
// Re-exports
// ─────────────────────────────────────────────────────────────────────────────

pub use analytics::{
    AnalyticsConfig, FileAnalytics, FileMigration, FileRollup, MigrationConfig, RollupConfig,
};
pub use attribution::{AttributionConfig, FileAttribution, MAX_SESSION_TTL_MINUTES};
pub use observability::{FileLogging, LogRotation, LoggingConfig};
pub use storage::{FileStore, StoreBackend, StoreConfig};

// ─────────────────────────────────────────────────────────────────────────────
// Constants
// ─────────────────────────────────────────────────────────────────────────────

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Path to the SQLite database
pub const ENV_DB: &str = "LINKSTATS_DB";
/// Store backend: sqlite | memory
pub const ENV_STORE: &str = "LINKSTATS_STORE";
pub const ENV_LOG_LEVEL: &str = "LINKSTATS_LOG_LEVEL";
pub const ENV_SESSION_TTL: &str = "LINKSTATS_SESSION_TTL_MINUTES";
pub const ENV_DETAILED_LOGGING: &str = "LINKSTATS_DETAILED_LOGGING";

// ─────────────────────────────────────────────────────────────────────────────
// Application Configuration
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Document store backend and location
    pub store: StoreConfig,

    pub logging: LoggingConfig,

    /// Recorder and reader behavior
    pub analytics: AnalyticsConfig,

    /// Session TTL and referrer classification tables
    pub attribution: AttributionConfig,

    /// Identity index backfill pacing
    pub migration: MigrationConfig,

    /// Group rollup dispatcher
    pub rollup: RollupConfig,
}

// ─────────────────────────────────────────────────────────────────────────────
// File Configuration (deserialization layer)
// ─────────────────────────────────────────────────────────────────────────────

/// Config file structure; every section is optional
#[derive(Debug, Deserialize, Default)]
pub(crate) struct FileConfig {
    pub store: Option<FileStore>,
    pub logging: Option<FileLogging>,
    pub analytics: Option<FileAnalytics>,
    pub attribution: Option<FileAttribution>,
    pub migration: Option<FileMigration>,
    pub rollup: Option<FileRollup>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Configuration Loading
// ─────────────────────────────────────────────────────────────────────────────

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

impl Config {
    /// Config file path: ~/.config/linkstats/config.toml
    pub fn config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|p| p.join(".config").join("linkstats").join("config.toml"))
    }

    /// Write the default template if no config file exists yet. Failures are ignored.
    pub fn ensure_config_exists() {
        let Some(path) = Self::config_path() else {
            return;
        };
        if path.exists() {
            return;
        }
        if let Some(parent) = path.parent() {
            if std::fs::create_dir_all(parent).is_err() {
                return;
            }
        }
        let _ = std::fs::write(&path, Self::default().to_toml());
    }

    /// Parse the config file. A missing file yields empty sections; an
    /// unreadable or invalid file is an error.
    fn load_file_config() -> anyhow::Result<FileConfig> {
        let Some(path) = Self::config_path() else {
            return Ok(FileConfig::default());
        };
        match std::fs::read_to_string(&path) {
            Ok(contents) => Self::parse_file_config(&contents)
                .with_context(|| format!("invalid config file {}", path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(FileConfig::default()),
            Err(e) => Err(e).with_context(|| format!("cannot read config file {}", path.display())),
        }
    }

    pub(crate) fn parse_file_config(contents: &str) -> anyhow::Result<FileConfig> {
        Ok(toml::from_str(contents)?)
    }

    /// Load configuration: env > file > defaults
    pub fn from_env() -> anyhow::Result<Self> {
        let file = Self::load_file_config()?;
        Ok(Self::from_sources(file, |key| std::env::var(key).ok()))
    }

    /// Merge a parsed file with an environment lookup
    pub(crate) fn from_sources(file: FileConfig, env: impl Fn(&str) -> Option<String>) -> Self {
        let mut store = StoreConfig::from_file(file.store);
        if let Some(db) = env(ENV_DB).filter(|v| !v.trim().is_empty()) {
            store.db_path = PathBuf::from(db);
        }
        if let Some(backend) = env(ENV_STORE) {
            store.backend = StoreBackend::parse(&backend);
        }

        let mut logging = LoggingConfig::from_file(file.logging);
        if let Some(level) = env(ENV_LOG_LEVEL).filter(|v| !v.trim().is_empty()) {
            logging.level = level;
        }

        let mut analytics = AnalyticsConfig::from_file(file.analytics);
        if let Some(enabled) = env(ENV_DETAILED_LOGGING).as_deref().and_then(parse_bool) {
            analytics.detailed_logging = enabled;
        }

        let mut attribution = AttributionConfig::from_file(file.attribution);
        if let Some(ttl) = env(ENV_SESSION_TTL).and_then(|v| v.trim().parse().ok()) {
            attribution.session_ttl_minutes = self::attribution::clamp_session_ttl(ttl);
        }

        Self {
            store,
            logging,
            analytics,
            attribution,
            migration: MigrationConfig::from_file(file.migration),
            rollup: RollupConfig::from_file(file.rollup),
        }
    }
}
