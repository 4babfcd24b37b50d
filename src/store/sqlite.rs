//! SQLite-backed document store
//!
//! Documents live in a single `documents` table as JSON text. Field ops are
//! applied in Rust (see [`super::path`]) inside an `IMMEDIATE` transaction, which
//! takes the write lock up front so that read-modify-write cannot interleave
//! with another writer.
//!
//! In-process writes also hold `publish_order` from the start of the write until
//! listeners are notified, so subscribers see commits in the order they landed.
//! Writes made by other processes are not observed by subscriptions.
//!
//! # Architecture
//!
//! ```text
//! Recorder / Index / Reader
//!         │
//!         └──→ SqliteStore (r2d2 pool)
//!                 │
//!                 ├──→ Connection 1..N (WAL mode, busy_timeout)
//!                 └──→ SubscriptionRegistry (notified under publish_order)
//! ```

use super::path::apply_ops;
use super::{Document, DocumentStore, FieldOp, Subscription, SubscriptionRegistry, UpsertOutcome};
use crate::error::{StoreError, StoreResult};
use chrono::Utc;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

const SCHEMA_VERSION: i32 = 1;

pub struct SqliteStore {
    pool: Pool<SqliteConnectionManager>,
    db_path: PathBuf,
    subscriptions: SubscriptionRegistry,
    publish_order: Mutex<()>,
}

impl SqliteStore {
    /// Open (or create) the database and run schema migrations
    pub fn open(db_path: impl AsRef<Path>, pool_size: u32) -> StoreResult<Self> {
        let db_path = db_path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StoreError::Unavailable(format!(
                        "cannot create directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let manager = SqliteConnectionManager::file(&db_path).with_init(|conn| {
            conn.execute_batch(
                r#"
                PRAGMA busy_timeout=5000;
                PRAGMA synchronous=NORMAL;
                "#,
            )
        });
        let pool = Pool::builder().max_size(pool_size.max(1)).build(manager)?;

        {
            let conn = pool.get()?;
            Self::init_schema(&conn)?;
        }

        tracing::debug!("SQLite document store opened at {}", db_path.display());

        Ok(Self {
            pool,
            db_path,
            subscriptions: SubscriptionRegistry::new(),
            publish_order: Mutex::new(()),
        })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn conn(&self) -> StoreResult<PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }

    /// Held across commit and notify for every in-process write
    fn publish_order(&self) -> MutexGuard<'_, ()> {
        self.publish_order
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Initialize schema with WAL mode and apply pending migrations
    fn init_schema(conn: &Connection) -> StoreResult<()> {
        // journal_mode returns a row, so it cannot go through execute()
        let _mode: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS metadata (key TEXT PRIMARY KEY, value TEXT);",
        )?;

        let current_version: i32 = conn
            .query_row(
                "SELECT COALESCE(
                    (SELECT CAST(value AS INTEGER) FROM metadata WHERE key = 'schema_version'),
                    0
                )",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0);

        if current_version < 1 {
            Self::apply_schema_v1(conn)?;
        }

        Ok(())
    }

    /// Initial schema (v1)
    fn apply_schema_v1(conn: &Connection) -> StoreResult<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                collection TEXT NOT NULL,
                id TEXT NOT NULL,
                body TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (collection, id)
            );
            "#,
        )?;
        conn.execute(
            "INSERT OR REPLACE INTO metadata (key, value) VALUES ('schema_version', ?1)",
            params![SCHEMA_VERSION.to_string()],
        )?;

        tracing::info!("Initialized document store schema v{}", SCHEMA_VERSION);
        Ok(())
    }

    fn read_body(
        conn: &Connection,
        collection: &str,
        id: &str,
    ) -> StoreResult<Option<Document>> {
        let body: Option<String> = conn
            .query_row(
                "SELECT body FROM documents WHERE collection = ?1 AND id = ?2",
                params![collection, id],
                |row| row.get(0),
            )
            .optional()?;

        body.map(|text| parse_body(collection, id, &text)).transpose()
    }

    fn write_body(conn: &Connection, collection: &str, id: &str, doc: &Document) -> StoreResult<()> {
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO documents (collection, id, body, updated_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?4)
             ON CONFLICT(collection, id) DO UPDATE SET
                 body = excluded.body,
                 updated_at = excluded.updated_at",
            params![collection, id, serde_json::to_string(doc)?, now],
        )?;
        Ok(())
    }
}

fn parse_body(collection: &str, id: &str, text: &str) -> StoreResult<Document> {
    match serde_json::from_str::<Value>(text)? {
        Value::Object(map) => Ok(map),
        _ => Err(StoreError::Malformed {
            collection: collection.to_string(),
            id: id.to_string(),
        }),
    }
}

impl DocumentStore for SqliteStore {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn get(&self, collection: &str, id: &str) -> StoreResult<Option<Document>> {
        let conn = self.conn()?;
        Self::read_body(&conn, collection, id)
    }

    fn create(&self, collection: &str, id: &str, doc: Document) -> StoreResult<()> {
        let _order = self.publish_order();
        let conn = self.conn()?;
        let now = Utc::now().to_rfc3339();
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO documents (collection, id, body, updated_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?4)",
            params![collection, id, serde_json::to_string(&doc)?, now],
        )?;
        if inserted == 0 {
            return Err(StoreError::AlreadyExists {
                collection: collection.to_string(),
                id: id.to_string(),
            });
        }
        self.subscriptions.notify(collection, id, Some(&doc));
        Ok(())
    }

    fn set(&self, collection: &str, id: &str, doc: Document) -> StoreResult<()> {
        let _order = self.publish_order();
        let conn = self.conn()?;
        Self::write_body(&conn, collection, id, &doc)?;
        self.subscriptions.notify(collection, id, Some(&doc));
        Ok(())
    }

    fn update(&self, collection: &str, id: &str, ops: &[FieldOp]) -> StoreResult<()> {
        let _order = self.publish_order();
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let mut doc = Self::read_body(&tx, collection, id)?.ok_or_else(|| StoreError::Missing {
            collection: collection.to_string(),
            id: id.to_string(),
        })?;
        apply_ops(&mut doc, ops)?;
        Self::write_body(&tx, collection, id, &doc)?;
        tx.commit()?;

        self.subscriptions.notify(collection, id, Some(&doc));
        Ok(())
    }

    fn upsert(
        &self,
        collection: &str,
        id: &str,
        seed: Document,
        ops: &[FieldOp],
    ) -> StoreResult<UpsertOutcome> {
        let _order = self.publish_order();
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let (outcome, doc) = match Self::read_body(&tx, collection, id)? {
            Some(mut existing) => {
                apply_ops(&mut existing, ops)?;
                (UpsertOutcome::Updated, existing)
            }
            None => (UpsertOutcome::Created, seed),
        };
        Self::write_body(&tx, collection, id, &doc)?;
        tx.commit()?;

        self.subscriptions.notify(collection, id, Some(&doc));
        Ok(outcome)
    }

    fn delete(&self, collection: &str, id: &str) -> StoreResult<bool> {
        let _order = self.publish_order();
        let conn = self.conn()?;
        let removed = conn.execute(
            "DELETE FROM documents WHERE collection = ?1 AND id = ?2",
            params![collection, id],
        )? > 0;
        if removed {
            self.subscriptions.notify(collection, id, None);
        }
        Ok(removed)
    }

    fn list(&self, collection: &str) -> StoreResult<Vec<(String, Document)>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT id, body FROM documents WHERE collection = ?1 ORDER BY id")?;
        let rows = stmt.query_map(params![collection], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut results = Vec::new();
        for row in rows {
            let (id, body) = row?;
            let doc = parse_body(collection, &id, &body)?;
            results.push((id, doc));
        }
        Ok(results)
    }

    fn set_batch(&self, collection: &str, docs: Vec<(String, Document)>) -> StoreResult<()> {
        let _order = self.publish_order();
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        for (id, doc) in &docs {
            Self::write_body(&tx, collection, id, doc)?;
        }
        tx.commit()?;

        for (id, doc) in &docs {
            self.subscriptions.notify(collection, id, Some(doc));
        }
        Ok(())
    }

    fn subscribe(&self, collection: &str, id: &str) -> StoreResult<Subscription> {
        let _order = self.publish_order();
        let current = self.get(collection, id)?;
        Ok(self.subscriptions.subscribe(collection, id, current))
    }
}
