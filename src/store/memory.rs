//! In-memory document store
//!
//! A single mutex guards all collections, so every operation (including
//! `upsert`) is trivially atomic per document. Listeners are notified and
//! registered while that mutex is held, so they observe writes in commit order.

use super::path::apply_ops;
use super::{Document, DocumentStore, FieldOp, Subscription, SubscriptionRegistry, UpsertOutcome};
use crate::error::{StoreError, StoreResult};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

type Collections = HashMap<String, BTreeMap<String, Document>>;

#[derive(Default)]
pub struct MemoryStore {
    collections: Mutex<Collections>,
    subscriptions: SubscriptionRegistry,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Collections> {
        self.collections
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Number of documents in a collection
    pub fn len(&self, collection: &str) -> usize {
        self.lock().get(collection).map(BTreeMap::len).unwrap_or(0)
    }

    pub fn is_empty(&self, collection: &str) -> bool {
        self.len(collection) == 0
    }

    /// Live listener count (for leak checks)
    pub fn listener_count(&self) -> usize {
        self.subscriptions.listener_count()
    }
}

impl DocumentStore for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn get(&self, collection: &str, id: &str) -> StoreResult<Option<Document>> {
        Ok(self
            .lock()
            .get(collection)
            .and_then(|docs| docs.get(id))
            .cloned())
    }

    fn create(&self, collection: &str, id: &str, doc: Document) -> StoreResult<()> {
        let mut collections = self.lock();
        let docs = collections.entry(collection.to_string()).or_default();
        if docs.contains_key(id) {
            return Err(StoreError::AlreadyExists {
                collection: collection.to_string(),
                id: id.to_string(),
            });
        }
        docs.insert(id.to_string(), doc.clone());
        self.subscriptions.notify(collection, id, Some(&doc));
        Ok(())
    }

    fn set(&self, collection: &str, id: &str, doc: Document) -> StoreResult<()> {
        let mut collections = self.lock();
        collections
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), doc.clone());
        self.subscriptions.notify(collection, id, Some(&doc));
        Ok(())
    }

    fn update(&self, collection: &str, id: &str, ops: &[FieldOp]) -> StoreResult<()> {
        let mut collections = self.lock();
        let existing = collections
            .get_mut(collection)
            .and_then(|docs| docs.get_mut(id))
            .ok_or_else(|| StoreError::Missing {
                collection: collection.to_string(),
                id: id.to_string(),
            })?;
        let mut next = existing.clone();
        apply_ops(&mut next, ops)?;
        *existing = next.clone();
        self.subscriptions.notify(collection, id, Some(&next));
        Ok(())
    }

    fn upsert(
        &self,
        collection: &str,
        id: &str,
        seed: Document,
        ops: &[FieldOp],
    ) -> StoreResult<UpsertOutcome> {
        let mut collections = self.lock();
        let docs = collections.entry(collection.to_string()).or_default();
        let (outcome, stored) = match docs.get_mut(id) {
            Some(existing) => {
                let mut next = existing.clone();
                apply_ops(&mut next, ops)?;
                *existing = next.clone();
                (UpsertOutcome::Updated, next)
            }
            None => {
                docs.insert(id.to_string(), seed.clone());
                (UpsertOutcome::Created, seed)
            }
        };
        self.subscriptions.notify(collection, id, Some(&stored));
        Ok(outcome)
    }

    fn delete(&self, collection: &str, id: &str) -> StoreResult<bool> {
        let mut collections = self.lock();
        let removed = collections
            .get_mut(collection)
            .and_then(|docs| docs.remove(id))
            .is_some();
        if removed {
            self.subscriptions.notify(collection, id, None);
        }
        Ok(removed)
    }

    fn list(&self, collection: &str) -> StoreResult<Vec<(String, Document)>> {
        Ok(self
            .lock()
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .map(|(id, doc)| (id.clone(), doc.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    fn subscribe(&self, collection: &str, id: &str) -> StoreResult<Subscription> {
        // Seed and register under the same lock writers notify under
        let collections = self.lock();
        let current = collections
            .get(collection)
            .and_then(|docs| docs.get(id))
            .cloned();
        Ok(self.subscriptions.subscribe(collection, id, current))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use std::thread;

    fn doc(value: serde_json::Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_create_then_duplicate_fails() {
        let store = MemoryStore::new();
        store.create("accounts", "u1", doc(json!({"username": "jane"}))).unwrap();

        let err = store
            .create("accounts", "u1", doc(json!({"username": "other"})))
            .unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists { .. }));
        assert_eq!(
            store.get("accounts", "u1").unwrap().unwrap()["username"],
            json!("jane")
        );
    }

    #[test]
    fn test_update_missing_document_fails() {
        let store = MemoryStore::new();
        let err = store
            .update("analytics", "nobody", &[FieldOp::increment("totalViews", 1)])
            .unwrap_err();
        assert!(matches!(err, StoreError::Missing { .. }));
    }

    #[test]
    fn test_failed_update_leaves_document_untouched() {
        let store = MemoryStore::new();
        store.set("analytics", "u1", doc(json!({"totalViews": 1, "bad": "x"}))).unwrap();

        let result = store.update(
            "analytics",
            "u1",
            &[
                FieldOp::increment("totalViews", 1),
                FieldOp::increment("bad", 1),
            ],
        );
        assert!(result.is_err());
        assert_eq!(
            store.get("analytics", "u1").unwrap().unwrap()["totalViews"],
            json!(1)
        );
    }

    #[test]
    fn test_upsert_seeds_then_increments() {
        let store = MemoryStore::new();
        let ops = [FieldOp::increment("totalViews", 1)];

        let first = store
            .upsert("analytics", "u1", doc(json!({"totalViews": 1})), &ops)
            .unwrap();
        let second = store
            .upsert("analytics", "u1", doc(json!({"totalViews": 1})), &ops)
            .unwrap();

        assert_eq!(first, UpsertOutcome::Created);
        assert_eq!(second, UpsertOutcome::Updated);
        assert_eq!(
            store.get("analytics", "u1").unwrap().unwrap()["totalViews"],
            json!(2)
        );
    }

    #[test]
    fn test_concurrent_upserts_lose_nothing() {
        let store = Arc::new(MemoryStore::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                thread::spawn(move || {
                    for _ in 0..25 {
                        store
                            .upsert(
                                "analytics",
                                "u1",
                                doc(json!({"totalViews": 1})),
                                &[FieldOp::increment("totalViews", 1)],
                            )
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(
            store.get("analytics", "u1").unwrap().unwrap()["totalViews"],
            json!(200)
        );
    }

    #[test]
    fn test_list_is_ordered_and_delete_reports() {
        let store = MemoryStore::new();
        store.set("accounts", "b", Document::new()).unwrap();
        store.set("accounts", "a", Document::new()).unwrap();

        let ids: Vec<String> = store
            .list("accounts")
            .unwrap()
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        assert_eq!(ids, vec!["a", "b"]);

        assert!(store.delete("accounts", "a").unwrap());
        assert!(!store.delete("accounts", "a").unwrap());
        assert_eq!(store.len("accounts"), 1);
    }

    #[test]
    fn test_append_generates_ids() {
        let store = MemoryStore::new();
        let a = store.append("analytics_events", doc(json!({"n": 1}))).unwrap();
        let b = store.append("analytics_events", doc(json!({"n": 2}))).unwrap();
        assert_ne!(a, b);
        assert_eq!(store.len("analytics_events"), 2);
    }

    #[test]
    fn test_subscription_ends_on_last_write_under_contention() {
        for _ in 0..20 {
            let store = Arc::new(MemoryStore::new());
            let sub = store.subscribe("analytics", "u1").unwrap();

            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let store = store.clone();
                    thread::spawn(move || {
                        for _ in 0..50 {
                            store
                                .upsert(
                                    "analytics",
                                    "u1",
                                    doc(json!({"totalViews": 1})),
                                    &[FieldOp::increment("totalViews", 1)],
                                )
                                .unwrap();
                        }
                    })
                })
                .collect();
            for handle in handles {
                handle.join().unwrap();
            }

            assert_eq!(sub.current().unwrap()["totalViews"], json!(400));
        }
    }

    #[test]
    fn test_subscribe_while_writing_never_regresses() {
        let store = Arc::new(MemoryStore::new());
        let writer = {
            let store = store.clone();
            thread::spawn(move || {
                for _ in 0..200 {
                    store
                        .upsert(
                            "analytics",
                            "u1",
                            doc(json!({"totalViews": 1})),
                            &[FieldOp::increment("totalViews", 1)],
                        )
                        .unwrap();
                }
            })
        };

        let subs: Vec<_> = (0..20)
            .map(|_| store.subscribe("analytics", "u1").unwrap())
            .collect();
        writer.join().unwrap();

        for sub in &subs {
            assert_eq!(sub.current().unwrap()["totalViews"], json!(200));
        }
    }

    #[tokio::test]
    async fn test_subscription_receives_writes_and_deletes() {
        let store = MemoryStore::new();
        let mut sub = store.subscribe("analytics", "u1").unwrap();

        store.set("analytics", "u1", doc(json!({"totalViews": 1}))).unwrap();
        let seen = sub.changed().await.unwrap().unwrap();
        assert_eq!(seen["totalViews"], json!(1));

        store.delete("analytics", "u1").unwrap();
        assert!(sub.changed().await.unwrap().is_none());

        drop(sub);
        assert_eq!(store.listener_count(), 0);
    }
}
