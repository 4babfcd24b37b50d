//! Traffic attribution configuration
//!
//! The domain tables default to the built-in lists in `attribution::sources`.
//! A table given in the config file replaces the built-in one entirely.

use crate::attribution::sources::{SEARCH_DOMAINS, SOCIAL_DOMAINS};
use serde::Deserialize;
use std::collections::BTreeMap;

/// Upper bound for `session_ttl_minutes` (one year)
pub const MAX_SESSION_TTL_MINUTES: u64 = 365 * 24 * 60;

pub(crate) fn clamp_session_ttl(minutes: u64) -> u64 {
    minutes.min(MAX_SESSION_TTL_MINUTES)
}

#[derive(Debug, Clone)]
pub struct AttributionConfig {
    /// Inactivity after which a visit is attributed afresh
    pub session_ttl_minutes: u64,
    /// Hosts of this site; referrers from them count as direct
    pub site_hosts: Vec<String>,
    /// Domain → source name, medium "social"
    pub social_domains: BTreeMap<String, String>,
    /// Domain → source name, medium "search"
    pub search_domains: BTreeMap<String, String>,
}

fn table(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
    entries
        .iter()
        .map(|(domain, source)| (domain.to_string(), source.to_string()))
        .collect()
}

impl Default for AttributionConfig {
    fn default() -> Self {
        Self {
            session_ttl_minutes: 30,
            site_hosts: Vec::new(),
            social_domains: table(SOCIAL_DOMAINS),
            search_domains: table(SEARCH_DOMAINS),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct FileAttribution {
    pub session_ttl_minutes: Option<u64>,
    pub site_hosts: Option<Vec<String>>,
    pub social_domains: Option<BTreeMap<String, String>>,
    pub search_domains: Option<BTreeMap<String, String>>,
}

/// Lowercase domains so lookups against normalized hosts match
fn normalize_table(table: BTreeMap<String, String>) -> BTreeMap<String, String> {
    table
        .into_iter()
        .map(|(domain, source)| (domain.trim().to_lowercase(), source.trim().to_lowercase()))
        .filter(|(domain, source)| !domain.is_empty() && !source.is_empty())
        .collect()
}

impl AttributionConfig {
    pub fn from_file(file: Option<FileAttribution>) -> Self {
        let file = file.unwrap_or_default();
        let defaults = Self::default();

        Self {
            session_ttl_minutes: file
                .session_ttl_minutes
                .map(clamp_session_ttl)
                .unwrap_or(defaults.session_ttl_minutes),
            site_hosts: file.site_hosts.unwrap_or(defaults.site_hosts),
            social_domains: file
                .social_domains
                .map(normalize_table)
                .unwrap_or(defaults.social_domains),
            search_domains: file
                .search_domains
                .map(normalize_table)
                .unwrap_or(defaults.search_domains),
        }
    }
}
