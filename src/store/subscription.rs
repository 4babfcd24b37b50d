//! Per-document change subscriptions
//!
//! Backends call [`SubscriptionRegistry::notify`] for every committed write
//! while still holding whatever lock orders their writes, and register new
//! listeners under that same lock. Otherwise two racing writers could publish
//! out of commit order and leave a listener on the older state.
//! Listeners hold a [`Subscription`] guard; dropping it removes the listener,
//! so a dashboard that navigates away cannot leak a sender.
//!
//! Each listener gets its own `tokio::sync::watch` channel. Watch semantics fit
//! the use: a slow reader only ever sees the latest document, never a backlog.

use super::Document;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

type DocKey = (String, String);

#[derive(Default)]
struct RegistryInner {
    listeners: Mutex<HashMap<DocKey, HashMap<u64, watch::Sender<Option<Document>>>>>,
    next_id: AtomicU64,
}

/// Fan-out of document changes to live listeners
#[derive(Clone, Default)]
pub struct SubscriptionRegistry {
    inner: Arc<RegistryInner>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener seeded with the document's current state
    pub fn subscribe(&self, collection: &str, id: &str, current: Option<Document>) -> Subscription {
        let key = (collection.to_string(), id.to_string());
        let listener_id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = watch::channel(current);

        self.inner
            .listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .entry(key.clone())
            .or_default()
            .insert(listener_id, tx);

        tracing::trace!(
            collection,
            id,
            listener_id,
            "Registered document listener"
        );

        Subscription {
            rx,
            key,
            listener_id,
            registry: self.inner.clone(),
        }
    }

    /// Push a new document state (`None` = deleted) to every listener of the key
    pub fn notify(&self, collection: &str, id: &str, doc: Option<&Document>) {
        let listeners = self
            .inner
            .listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let key = (collection.to_string(), id.to_string());
        if let Some(senders) = listeners.get(&key) {
            for tx in senders.values() {
                tx.send_replace(doc.cloned());
            }
        }
    }

    /// Number of live listeners across all documents
    pub fn listener_count(&self) -> usize {
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .values()
            .map(HashMap::len)
            .sum()
    }
}

/// Scoped listener for a single document. Unsubscribes on drop.
pub struct Subscription {
    rx: watch::Receiver<Option<Document>>,
    key: DocKey,
    listener_id: u64,
    registry: Arc<RegistryInner>,
}

impl Subscription {
    pub fn collection(&self) -> &str {
        &self.key.0
    }

    pub fn id(&self) -> &str {
        &self.key.1
    }

    /// Latest known state of the document
    pub fn current(&self) -> Option<Document> {
        self.rx.borrow().clone()
    }

    /// Wait for the next change and return the new state.
    ///
    /// Returns `None` once the registry side has gone away.
    pub async fn changed(&mut self) -> Option<Option<Document>> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }

    /// Whether a change arrived that has not been observed via `changed`
    pub fn has_changed(&self) -> bool {
        self.rx.has_changed().unwrap_or(false)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let mut listeners = self
            .registry
            .listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(senders) = listeners.get_mut(&self.key) {
            senders.remove(&self.listener_id);
            if senders.is_empty() {
                listeners.remove(&self.key);
            }
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("collection", &self.key.0)
            .field("id", &self.key.1)
            .field("listener_id", &self.listener_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(n: i64) -> Document {
        json!({ "totalViews": n }).as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_listener_sees_latest_state() {
        let registry = SubscriptionRegistry::new();
        let mut sub = registry.subscribe("analytics", "u1", None);
        assert!(sub.current().is_none());

        registry.notify("analytics", "u1", Some(&doc(1)));
        registry.notify("analytics", "u1", Some(&doc(2)));

        let latest = sub.changed().await.unwrap().unwrap();
        assert_eq!(latest["totalViews"], json!(2));
        assert!(!sub.has_changed());
    }

    #[test]
    fn test_other_documents_do_not_notify() {
        let registry = SubscriptionRegistry::new();
        let sub = registry.subscribe("analytics", "u1", None);
        registry.notify("analytics", "u2", Some(&doc(1)));
        assert!(!sub.has_changed());
    }

    #[test]
    fn test_drop_unsubscribes() {
        let registry = SubscriptionRegistry::new();
        let a = registry.subscribe("analytics", "u1", None);
        let b = registry.subscribe("analytics", "u1", None);
        assert_eq!(registry.listener_count(), 2);

        drop(a);
        assert_eq!(registry.listener_count(), 1);
        drop(b);
        assert_eq!(registry.listener_count(), 0);
    }
}
