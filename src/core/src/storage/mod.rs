mod listeners;
mod memory;
mod sqlite;

pub use listeners::{DocumentListener, ListenerGuard, ListenerHub, Snapshot};
pub use memory::{MemoryStore, StoreOp};
pub use sqlite::SqliteStore;

use ridesync_protocol::{Document, StoreError};
use serde_json::Value;

/// A single field mutation applied by [`TripStore::update`].
#[derive(Debug, Clone, PartialEq)]
pub enum FieldUpdate {
    Set(Value),
    /// Remove the field from the document (not the same as setting null).
    Delete,
}

impl FieldUpdate {
    pub fn set(value: impl Into<Value>) -> Self {
        Self::Set(value.into())
    }
}

/// Abstract document store holding trip records.
///
/// Mirrors the subset of a realtime document database the synchronizer
/// needs. All methods use `&self`; implementations handle interior
/// mutability and must publish every write to live listeners of the
/// affected document.
pub trait TripStore: Send + Sync + 'static {
    /// Fetch a document, `None` if it does not exist.
    fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError>;

    /// Create or replace a document.
    fn set(&self, collection: &str, id: &str, doc: Document) -> Result<(), StoreError>;

    /// Apply field mutations to an existing document.
    ///
    /// Fails with [`StoreError::NotFound`] if the document does not exist.
    fn update(
        &self,
        collection: &str,
        id: &str,
        changes: &[(String, FieldUpdate)],
    ) -> Result<(), StoreError>;

    /// Delete a document. Returns whether it existed.
    fn delete(&self, collection: &str, id: &str) -> Result<bool, StoreError>;

    /// All documents of a collection whose `field` equals `value`.
    fn query_eq(
        &self,
        collection: &str,
        field: &str,
        value: &Value,
    ) -> Result<Vec<(String, Document)>, StoreError>;

    /// Open a realtime listener on one document.
    ///
    /// The current state is delivered first, then every subsequent change.
    /// Dropping the listener detaches it.
    fn listen(&self, collection: &str, id: &str) -> Result<DocumentListener, StoreError>;
}

/// Apply `changes` to `doc` in order.
pub(crate) fn apply_changes(doc: &mut Document, changes: &[(String, FieldUpdate)]) {
    for (field, change) in changes {
        match change {
            FieldUpdate::Set(value) => {
                doc.insert(field.clone(), value.clone());
            }
            FieldUpdate::Delete => {
                doc.remove(field);
            }
        }
    }
}
