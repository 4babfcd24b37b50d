// linkstats - identity resolution and real-time profile analytics
//
// Resolves human-facing identifiers (username, display name, email) to
// accounts through a denormalized index, and folds profile views and link
// clicks into per-account counter documents with traffic-source attribution.
//
// Architecture:
// - Store: point-lookup document store (in-memory or SQLite) with atomic upsert
// - Identity: redundant index records per identifier, plus a backfill job
// - Attribution: first-touch source/medium classification per visit
// - Analytics: recorder (hot path, never fails), reader (dashboard summaries)
// - Rollup: fire-and-forget group recompute on a dedicated thread

pub mod accounts;
pub mod analytics;
pub mod attribution;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod identity;
pub mod logging;
pub mod rollup;
pub mod store;

pub use engine::{open_store, Engine};
pub use error::{LinkstatsError, Result, StoreError};
