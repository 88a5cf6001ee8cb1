use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use ridesync_protocol::{Document, StoreError};
use tokio::sync::mpsc;

/// One realtime delivery: the document (or `None` once deleted) or an error.
pub type Snapshot = Result<Option<Document>, StoreError>;

type DocKey = (String, String);

#[derive(Default)]
struct HubInner {
    next_id: u64,
    listeners: HashMap<DocKey, Vec<(u64, mpsc::UnboundedSender<Snapshot>)>>,
}

/// Fan-out point between a store's write path and its live listeners.
///
/// Stores call [`ListenerHub::publish`] after every write while still
/// holding their own data lock, so listeners observe writes in order.
#[derive(Clone, Default)]
pub struct ListenerHub {
    inner: Arc<Mutex<HubInner>>,
}

impl ListenerHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener and queue `initial` as its first snapshot.
    pub fn attach(&self, collection: &str, id: &str, initial: Snapshot) -> DocumentListener {
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(initial);

        let key = (collection.to_string(), id.to_string());
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let listener_id = inner.next_id;
        inner.next_id += 1;
        inner
            .listeners
            .entry(key.clone())
            .or_default()
            .push((listener_id, tx));

        DocumentListener {
            rx,
            guard: ListenerGuard {
                hub: Arc::downgrade(&self.inner),
                key,
                listener_id,
            },
        }
    }

    /// Deliver a snapshot to every listener of one document.
    pub fn publish(&self, collection: &str, id: &str, snapshot: Snapshot) {
        let key = (collection.to_string(), id.to_string());
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(senders) = inner.listeners.get_mut(&key) {
            senders.retain(|(_, tx)| tx.send(snapshot.clone()).is_ok());
            if senders.is_empty() {
                inner.listeners.remove(&key);
            }
        }
    }

    /// Number of live listeners on one document.
    pub fn count(&self, collection: &str, id: &str) -> usize {
        let key = (collection.to_string(), id.to_string());
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.listeners.get(&key).map(Vec::len).unwrap_or(0)
    }

    /// Number of live listeners across all documents.
    pub fn total(&self) -> usize {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.listeners.values().map(Vec::len).sum()
    }
}

/// Detaches its listener from the hub when dropped.
pub struct ListenerGuard {
    hub: Weak<Mutex<HubInner>>,
    key: DocKey,
    listener_id: u64,
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        let Some(hub) = self.hub.upgrade() else {
            return;
        };
        let mut inner = hub.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(senders) = inner.listeners.get_mut(&self.key) {
            senders.retain(|(id, _)| *id != self.listener_id);
            if senders.is_empty() {
                inner.listeners.remove(&self.key);
            }
        }
    }
}

/// Realtime subscription to a single document.
pub struct DocumentListener {
    rx: mpsc::UnboundedReceiver<Snapshot>,
    guard: ListenerGuard,
}

impl DocumentListener {
    /// Next snapshot, `None` once the listener has been detached.
    pub async fn next(&mut self) -> Option<Snapshot> {
        self.rx.recv().await
    }

    /// Split into the snapshot stream and the guard that keeps it attached.
    ///
    /// Dropping the guard detaches the listener; the stream then drains any
    /// queued snapshots and ends.
    pub fn into_parts(self) -> (mpsc::UnboundedReceiver<Snapshot>, ListenerGuard) {
        (self.rx, self.guard)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(status: &str) -> Document {
        let mut d = Document::new();
        d.insert("status".into(), json!(status));
        d
    }

    #[tokio::test]
    async fn initial_snapshot_then_published() {
        let hub = ListenerHub::new();
        let mut listener = hub.attach("trips", "t1", Ok(Some(doc("requested"))));
        hub.publish("trips", "t1", Ok(Some(doc("accepted"))));
        hub.publish("trips", "other", Ok(None));

        let first = listener.next().await.unwrap().unwrap().unwrap();
        assert_eq!(first["status"], "requested");
        let second = listener.next().await.unwrap().unwrap().unwrap();
        assert_eq!(second["status"], "accepted");
    }

    #[tokio::test]
    async fn dropping_guard_detaches() {
        let hub = ListenerHub::new();
        let listener = hub.attach("trips", "t1", Ok(None));
        assert_eq!(hub.count("trips", "t1"), 1);

        let (mut rx, guard) = listener.into_parts();
        drop(guard);
        assert_eq!(hub.count("trips", "t1"), 0);
        assert_eq!(hub.total(), 0);

        assert!(matches!(rx.recv().await, Some(Ok(None))));
        assert!(rx.recv().await.is_none());
    }
}
