use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use ridesync_protocol::{Document, StoreError};
use serde_json::Value;

use super::listeners::{DocumentListener, ListenerHub};
use super::{apply_changes, FieldUpdate, TripStore};

/// Store operations that can be made to fail on purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Get,
    Set,
    Update,
    Delete,
    Query,
    Listen,
}

type Collections = HashMap<String, BTreeMap<String, Document>>;

/// In-process document store with realtime listeners.
///
/// Used by tests and local runs. Failures can be injected per operation to
/// exercise error paths.
#[derive(Default)]
pub struct MemoryStore {
    collections: Mutex<Collections>,
    hub: ListenerHub,
    failing: Mutex<HashSet<StoreOp>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call of `op` fail with a backend error until cleared.
    pub fn fail_operation(&self, op: StoreOp) {
        self.failing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(op);
    }

    pub fn clear_failures(&self) {
        self.failing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Push a listener error to every live listener of one document.
    pub fn fail_listeners(&self, collection: &str, id: &str, message: impl Into<String>) {
        let _data = self.data();
        self.hub
            .publish(collection, id, Err(StoreError::Listener(message.into())));
    }

    /// Number of live listeners on one document.
    pub fn listener_count(&self, collection: &str, id: &str) -> usize {
        self.hub.count(collection, id)
    }

    /// Number of live listeners across the store.
    pub fn total_listeners(&self) -> usize {
        self.hub.total()
    }

    fn data(&self) -> MutexGuard<'_, Collections> {
        self.collections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn check(&self, op: StoreOp) -> Result<(), StoreError> {
        let failing = self.failing.lock().unwrap_or_else(PoisonError::into_inner);
        if failing.contains(&op) {
            return Err(StoreError::Backend(format!("injected {op:?} failure")));
        }
        Ok(())
    }
}

impl TripStore for MemoryStore {
    fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError> {
        self.check(StoreOp::Get)?;
        let data = self.data();
        Ok(data.get(collection).and_then(|docs| docs.get(id)).cloned())
    }

    fn set(&self, collection: &str, id: &str, doc: Document) -> Result<(), StoreError> {
        self.check(StoreOp::Set)?;
        let mut data = self.data();
        data.entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), doc.clone());
        self.hub.publish(collection, id, Ok(Some(doc)));
        Ok(())
    }

    fn update(
        &self,
        collection: &str,
        id: &str,
        changes: &[(String, FieldUpdate)],
    ) -> Result<(), StoreError> {
        self.check(StoreOp::Update)?;
        let mut data = self.data();
        let doc = data
            .get_mut(collection)
            .and_then(|docs| docs.get_mut(id))
            .ok_or_else(|| StoreError::not_found(collection, id))?;
        apply_changes(doc, changes);
        let snapshot = doc.clone();
        self.hub.publish(collection, id, Ok(Some(snapshot)));
        Ok(())
    }

    fn delete(&self, collection: &str, id: &str) -> Result<bool, StoreError> {
        self.check(StoreOp::Delete)?;
        let mut data = self.data();
        let existed = data
            .get_mut(collection)
            .and_then(|docs| docs.remove(id))
            .is_some();
        if existed {
            self.hub.publish(collection, id, Ok(None));
        }
        Ok(existed)
    }

    fn query_eq(
        &self,
        collection: &str,
        field: &str,
        value: &Value,
    ) -> Result<Vec<(String, Document)>, StoreError> {
        self.check(StoreOp::Query)?;
        let data = self.data();
        let Some(docs) = data.get(collection) else {
            return Ok(Vec::new());
        };
        Ok(docs
            .iter()
            .filter(|(_, doc)| doc.get(field) == Some(value))
            .map(|(id, doc)| (id.clone(), doc.clone()))
            .collect())
    }

    fn listen(&self, collection: &str, id: &str) -> Result<DocumentListener, StoreError> {
        self.check(StoreOp::Listen)?;
        let data = self.data();
        let current = data.get(collection).and_then(|docs| docs.get(id)).cloned();
        Ok(self.hub.attach(collection, id, Ok(current)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    #[test]
    fn update_missing_document_is_not_found() {
        let store = MemoryStore::new();
        let err = store
            .update("trips", "nope", &[("status".into(), FieldUpdate::set("x"))])
            .unwrap_err();
        assert_eq!(err, StoreError::not_found("trips", "nope"));
    }

    #[test]
    fn query_matches_exact_value() {
        let store = MemoryStore::new();
        store
            .set("trips", "a", doc(json!({ "tripId": "t1" })))
            .unwrap();
        store
            .set("trips", "b", doc(json!({ "tripId": "t2" })))
            .unwrap();

        let hits = store.query_eq("trips", "tripId", &json!("t1")).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, "a");
        assert!(store
            .query_eq("missing", "tripId", &json!("t1"))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn injected_failures_apply_per_operation() {
        let store = MemoryStore::new();
        store.fail_operation(StoreOp::Get);
        assert!(store.get("trips", "a").is_err());
        assert!(store.set("trips", "a", Document::new()).is_ok());

        store.clear_failures();
        assert!(store.get("trips", "a").unwrap().is_some());
    }

    #[tokio::test]
    async fn listener_sees_writes_and_deletion() {
        let store = MemoryStore::new();
        store
            .set("trips", "t1", doc(json!({ "status": "requested" })))
            .unwrap();
        let mut listener = store.listen("trips", "t1").unwrap();
        assert_eq!(store.listener_count("trips", "t1"), 1);

        store
            .update("trips", "t1", &[("status".into(), FieldUpdate::set("accepted"))])
            .unwrap();
        assert!(store.delete("trips", "t1").unwrap());
        assert!(!store.delete("trips", "t1").unwrap());

        let first = listener.next().await.unwrap().unwrap().unwrap();
        assert_eq!(first["status"], "requested");
        let second = listener.next().await.unwrap().unwrap().unwrap();
        assert_eq!(second["status"], "accepted");
        assert!(matches!(listener.next().await, Some(Ok(None))));

        drop(listener);
        assert_eq!(store.total_listeners(), 0);
    }
}
