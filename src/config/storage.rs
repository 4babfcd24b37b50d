//! Document store configuration

use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StoreBackend {
    /// SQLite file (default)
    #[default]
    Sqlite,
    /// Process-local; nothing survives exit
    Memory,
}

impl StoreBackend {
    /// Unknown values fall back to sqlite
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "memory" | "mem" => Self::Memory,
            _ => Self::Sqlite,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sqlite => "sqlite",
            Self::Memory => "memory",
        }
    }
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// SQLite database file
    pub db_path: PathBuf,
    /// r2d2 pool size
    pub pool_size: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Sqlite,
            db_path: PathBuf::from("./data/linkstats.db"),
            pool_size: 4,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct FileStore {
    pub backend: Option<String>,
    pub db_path: Option<String>,
    pub pool_size: Option<u32>,
}

impl StoreConfig {
    pub fn from_file(file: Option<FileStore>) -> Self {
        let file = file.unwrap_or_default();
        let defaults = Self::default();

        Self {
            backend: file
                .backend
                .map(|s| StoreBackend::parse(&s))
                .unwrap_or(defaults.backend),
            db_path: file.db_path.map(PathBuf::from).unwrap_or(defaults.db_path),
            pool_size: file.pool_size.unwrap_or(defaults.pool_size).max(1),
        }
    }
}
