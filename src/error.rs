//! Error types
//!
//! Two layers:
//! - [`StoreError`]: anything the document store can fail with (transient by
//!   default, since the store is the only I/O we do)
//! - [`LinkstatsError`]: what explicitly-invoked operations surface to callers
//!
//! Hot-path recording never returns either; see `analytics::recorder`.

use thiserror::Error;

/// Result type for store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Result type for explicitly-invoked engine operations
pub type Result<T> = std::result::Result<T, LinkstatsError>;

/// Errors raised by a [`crate::store::DocumentStore`] backend
#[derive(Debug, Error)]
pub enum StoreError {
    /// `create` was called for a document that is already present
    #[error("document {collection}/{id} already exists")]
    AlreadyExists { collection: String, id: String },

    /// `update` was called for a document that does not exist.
    /// Increments are undefined against a missing record.
    #[error("document {collection}/{id} does not exist")]
    Missing { collection: String, id: String },

    /// A field operation could not be applied at the given dotted path
    #[error("cannot {op} at '{path}': {reason}")]
    InvalidPath {
        op: &'static str,
        path: String,
        reason: String,
    },

    /// Stored body is not a JSON object
    #[error("document {collection}/{id} is not a JSON object")]
    Malformed { collection: String, id: String },

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Backend is unreachable or refused the operation
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Whether a retry of the same operation might succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StoreError::Sqlite(_) | StoreError::Pool(_) | StoreError::Unavailable(_)
        )
    }
}

/// Errors surfaced by identity, account, and dashboard operations
#[derive(Debug, Error)]
pub enum LinkstatsError {
    /// Identifier did not resolve to any account
    #[error("'{0}' does not resolve to an account")]
    NotFound(String),

    /// Caller supplied something unusable (empty id, missing username, ...)
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl LinkstatsError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, LinkstatsError::NotFound(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(StoreError::Unavailable("down".into()).is_transient());
        assert!(!StoreError::Missing {
            collection: "analytics".into(),
            id: "a".into()
        }
        .is_transient());
    }

    #[test]
    fn test_store_error_converts() {
        let err: LinkstatsError = StoreError::Unavailable("offline".into()).into();
        assert!(!err.is_not_found());
        assert_eq!(err.to_string(), "store unavailable: offline");
    }
}
