//! Document store abstraction
//!
//! The engine is written against a deliberately small store contract: point
//! reads and writes keyed by `(collection, id)`, per-field increments/sets on
//! dotted paths, and change subscriptions. There are no secondary indexes and no
//! multi-document transactions; everything above this layer is built to live
//! with that.
//!
//! # Backends
//!
//! ```text
//! DocumentStore (trait)
//!     │
//!     ├──→ MemoryStore  (mutex-guarded map, tests / embedding)
//!     └──→ SqliteStore  (r2d2 pool, WAL mode, JSON bodies)
//!             │
//!             └──→ SubscriptionRegistry (tokio::sync::watch fan-out)
//! ```
//!
//! # Upsert
//!
//! `upsert` is the one primitive beyond the classic point API: "create with this
//! seed, or apply these ops if present", atomically per document. It closes the
//! check-then-create race that the two-step `get` → `create`/`update` sequence
//! has under concurrent first events.

use crate::error::StoreResult;
use chrono::Utc;
use rand::Rng;
use serde_json::{Map, Value};

pub mod memory;
pub mod path;
pub mod sqlite;
pub mod subscription;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use subscription::{Subscription, SubscriptionRegistry};

/// A stored document: always a JSON object at the top level
pub type Document = Map<String, Value>;

/// A single field mutation addressed by dotted path (`"dailyViews.2026-01-01"`)
#[derive(Debug, Clone, PartialEq)]
pub enum FieldOp {
    /// Add `by` to the integer at `path`; a missing field counts as 0
    Increment { path: String, by: i64 },
    /// Overwrite the value at `path` (last write wins)
    Set { path: String, value: Value },
}

impl FieldOp {
    pub fn increment(path: impl Into<String>, by: i64) -> Self {
        Self::Increment {
            path: path.into(),
            by,
        }
    }

    pub fn set(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Set {
            path: path.into(),
            value: value.into(),
        }
    }

    pub fn path(&self) -> &str {
        match self {
            Self::Increment { path, .. } | Self::Set { path, .. } => path,
        }
    }
}

/// What `upsert` ended up doing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// Document was absent; the seed was written as-is
    Created,
    /// Document existed; the ops were applied
    Updated,
}

/// Storage contract consumed by the identity index, recorder, and reader
///
/// All methods are synchronous point operations. Implementations must be
/// shareable across threads; every request path holds an `Arc<dyn DocumentStore>`.
pub trait DocumentStore: Send + Sync {
    /// Backend name for logging
    fn name(&self) -> &'static str;

    /// Point read
    fn get(&self, collection: &str, id: &str) -> StoreResult<Option<Document>>;

    /// Insert a new document. Fails with `AlreadyExists` if present.
    fn create(&self, collection: &str, id: &str, doc: Document) -> StoreResult<()>;

    /// Insert or overwrite a whole document
    fn set(&self, collection: &str, id: &str, doc: Document) -> StoreResult<()>;

    /// Apply field ops to an existing document as one atomic update.
    /// Fails with `Missing` if the document does not exist.
    fn update(&self, collection: &str, id: &str, ops: &[FieldOp]) -> StoreResult<()>;

    /// Create with `seed` if absent, otherwise apply `ops`; atomic per document
    fn upsert(
        &self,
        collection: &str,
        id: &str,
        seed: Document,
        ops: &[FieldOp],
    ) -> StoreResult<UpsertOutcome>;

    /// Delete a document. Returns whether anything was removed.
    fn delete(&self, collection: &str, id: &str) -> StoreResult<bool>;

    /// Full collection scan, ordered by id. Only batch jobs should call this.
    fn list(&self, collection: &str) -> StoreResult<Vec<(String, Document)>>;

    /// Insert a document under a generated id and return the id
    fn append(&self, collection: &str, doc: Document) -> StoreResult<String> {
        let id = generate_document_id();
        self.create(collection, &id, doc)?;
        Ok(id)
    }

    /// Write several documents. Batched for round-trip efficiency only;
    /// callers must not rely on all-or-nothing semantics.
    fn set_batch(&self, collection: &str, docs: Vec<(String, Document)>) -> StoreResult<()> {
        for (id, doc) in docs {
            self.set(collection, &id, doc)?;
        }
        Ok(())
    }

    /// Delete several documents, returning how many existed
    fn delete_batch(&self, collection: &str, ids: &[String]) -> StoreResult<usize> {
        let mut removed = 0;
        for id in ids {
            if self.delete(collection, id)? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Subscribe to changes of one document. Dropping the returned guard
    /// unregisters the listener.
    fn subscribe(&self, collection: &str, id: &str) -> StoreResult<Subscription>;
}

/// Time-ordered unique id for appended documents: `<unix millis>-<8 hex>`
pub fn generate_document_id() -> String {
    let millis = Utc::now().timestamp_millis();
    let suffix: u32 = rand::thread_rng().gen();
    format!("{:013}-{:08x}", millis, suffix)
}

/// Serialize a value into a top-level document
pub fn to_document<T: serde::Serialize>(value: &T) -> StoreResult<Document> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => Err(crate::error::StoreError::InvalidPath {
            op: "serialize",
            path: String::new(),
            reason: format!("expected an object, got {}", kind_of(&other)),
        }),
    }
}

/// Deserialize a document into a typed record
pub fn from_document<T: serde::de::DeserializeOwned>(doc: Document) -> StoreResult<T> {
    Ok(serde_json::from_value(Value::Object(doc))?)
}

pub(crate) fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Test helpers shared by module tests across the crate
#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::error::StoreError;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Wraps a `MemoryStore` and fails reads/writes on demand
    #[derive(Default)]
    pub struct FlakyStore {
        pub inner: MemoryStore,
        pub fail_reads: AtomicBool,
        pub fail_writes: AtomicBool,
        pub reads: AtomicUsize,
    }

    impl FlakyStore {
        pub fn failing_writes() -> Self {
            let store = Self::default();
            store.fail_writes.store(true, Ordering::SeqCst);
            store
        }

        fn check_read(&self) -> StoreResult<()> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            if self.fail_reads.load(Ordering::SeqCst) {
                return Err(StoreError::Unavailable("injected read failure".into()));
            }
            Ok(())
        }

        fn check_write(&self) -> StoreResult<()> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(StoreError::Unavailable("injected write failure".into()));
            }
            Ok(())
        }
    }

    impl DocumentStore for FlakyStore {
        fn name(&self) -> &'static str {
            "flaky"
        }

        fn get(&self, collection: &str, id: &str) -> StoreResult<Option<Document>> {
            self.check_read()?;
            self.inner.get(collection, id)
        }

        fn create(&self, collection: &str, id: &str, doc: Document) -> StoreResult<()> {
            self.check_write()?;
            self.inner.create(collection, id, doc)
        }

        fn set(&self, collection: &str, id: &str, doc: Document) -> StoreResult<()> {
            self.check_write()?;
            self.inner.set(collection, id, doc)
        }

        fn update(&self, collection: &str, id: &str, ops: &[FieldOp]) -> StoreResult<()> {
            self.check_write()?;
            self.inner.update(collection, id, ops)
        }

        fn upsert(
            &self,
            collection: &str,
            id: &str,
            seed: Document,
            ops: &[FieldOp],
        ) -> StoreResult<UpsertOutcome> {
            self.check_write()?;
            self.inner.upsert(collection, id, seed, ops)
        }

        fn delete(&self, collection: &str, id: &str) -> StoreResult<bool> {
            self.check_write()?;
            self.inner.delete(collection, id)
        }

        fn list(&self, collection: &str) -> StoreResult<Vec<(String, Document)>> {
            self.check_read()?;
            self.inner.list(collection)
        }

        fn subscribe(&self, collection: &str, id: &str) -> StoreResult<Subscription> {
            self.check_read()?;
            self.inner.subscribe(collection, id)
        }
    }
}
