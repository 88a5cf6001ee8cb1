use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use ridesync_protocol::{Document, StoreError};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;

use super::listeners::{DocumentListener, ListenerHub};
use super::{apply_changes, FieldUpdate, TripStore};

/// SQLite-backed document store.
///
/// Documents are stored as JSON text keyed by `(collection, doc_id)`.
/// Uses a `Mutex<Connection>` for thread-safe interior mutability; writes
/// are published to listeners while the connection lock is held so every
/// listener sees them in commit order. The database is created/migrated on
/// `open()`.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    hub: ListenerHub,
}

impl SqliteStore {
    /// Open (or create) a sqlite database at the given path.
    pub fn open(path: &Path) -> Result<Self, String> {
        let conn = Connection::open(path).map_err(|e| format!("sqlite open: {e}"))?;
        let store = Self {
            conn: Mutex::new(conn),
            hub: ListenerHub::new(),
        };
        store.migrate()?;
        Ok(store)
    }

    /// Open an in-memory database (useful for tests).
    pub fn open_memory() -> Result<Self, String> {
        let conn = Connection::open_in_memory().map_err(|e| format!("sqlite open: {e}"))?;
        let store = Self {
            conn: Mutex::new(conn),
            hub: ListenerHub::new(),
        };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<(), String> {
        let conn = self.conn.lock().map_err(|e| format!("lock: {e}"))?;

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS documents (
                collection  TEXT NOT NULL,
                doc_id      TEXT NOT NULL,
                body        TEXT NOT NULL,
                updated_at  INTEGER NOT NULL,
                PRIMARY KEY (collection, doc_id)
            );
            ",
        )
        .map_err(|e| format!("migrate: {e}"))?;

        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|e| StoreError::Backend(format!("lock: {e}")))
    }

    /// Number of live listeners on one document.
    pub fn listener_count(&self, collection: &str, id: &str) -> usize {
        self.hub.count(collection, id)
    }
}

fn read_doc(conn: &Connection, collection: &str, id: &str) -> Result<Option<Document>, StoreError> {
    let body: Option<String> = conn
        .query_row(
            "SELECT body FROM documents WHERE collection = ?1 AND doc_id = ?2",
            params![collection, id],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| StoreError::Backend(format!("get: {e}")))?;

    body.map(|body| decode_body(&body)).transpose()
}

fn write_doc(conn: &Connection, collection: &str, id: &str, doc: &Document) -> Result<(), StoreError> {
    let body = serde_json::to_string(doc)
        .map_err(|e| StoreError::Backend(format!("encode document: {e}")))?;
    conn.execute(
        "INSERT INTO documents (collection, doc_id, body, updated_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(collection, doc_id) DO UPDATE SET
            body = excluded.body,
            updated_at = excluded.updated_at",
        params![collection, id, body, now_unix() as i64],
    )
    .map_err(|e| StoreError::Backend(format!("write: {e}")))?;
    Ok(())
}

fn decode_body(body: &str) -> Result<Document, StoreError> {
    match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(StoreError::Backend(format!(
            "stored document is not an object: {other}"
        ))),
        Err(e) => Err(StoreError::Backend(format!("decode document: {e}"))),
    }
}

impl TripStore for SqliteStore {
    fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError> {
        let conn = self.conn()?;
        read_doc(&conn, collection, id)
    }

    fn set(&self, collection: &str, id: &str, doc: Document) -> Result<(), StoreError> {
        let conn = self.conn()?;
        write_doc(&conn, collection, id, &doc)?;
        self.hub.publish(collection, id, Ok(Some(doc)));
        Ok(())
    }

    fn update(
        &self,
        collection: &str,
        id: &str,
        changes: &[(String, FieldUpdate)],
    ) -> Result<(), StoreError> {
        let conn = self.conn()?;
        let mut doc =
            read_doc(&conn, collection, id)?.ok_or_else(|| StoreError::not_found(collection, id))?;
        apply_changes(&mut doc, changes);
        write_doc(&conn, collection, id, &doc)?;
        self.hub.publish(collection, id, Ok(Some(doc)));
        Ok(())
    }

    fn delete(&self, collection: &str, id: &str) -> Result<bool, StoreError> {
        let conn = self.conn()?;
        let removed = conn
            .execute(
                "DELETE FROM documents WHERE collection = ?1 AND doc_id = ?2",
                params![collection, id],
            )
            .map_err(|e| StoreError::Backend(format!("delete: {e}")))?;
        if removed > 0 {
            self.hub.publish(collection, id, Ok(None));
        }
        Ok(removed > 0)
    }

    fn query_eq(
        &self,
        collection: &str,
        field: &str,
        value: &Value,
    ) -> Result<Vec<(String, Document)>, StoreError> {
        let (json_type, scalar) = sql_match(value);
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT doc_id, body FROM documents
                 WHERE collection = ?1
                   AND (?3 IS NULL OR json_type(body, ?2) = ?3)
                   AND (?4 IS NULL OR json_extract(body, ?2) = ?4)
                 ORDER BY doc_id",
            )
            .map_err(|e| StoreError::Backend(format!("query prepare: {e}")))?;
        let rows = stmt
            .query_map(
                params![collection, json_path(field), json_type, scalar],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
            )
            .map_err(|e| StoreError::Backend(format!("query: {e}")))?;

        // SQLite narrows by type and scalar value; the exact comparison
        // (arrays, objects, large integers) happens on the decoded hits.
        let mut hits = Vec::new();
        for row in rows {
            let (doc_id, body) = row.map_err(|e| StoreError::Backend(format!("query row: {e}")))?;
            let doc = decode_body(&body)?;
            if doc.get(field) == Some(value) {
                hits.push((doc_id, doc));
            }
        }
        Ok(hits)
    }

    fn listen(&self, collection: &str, id: &str) -> Result<DocumentListener, StoreError> {
        let conn = self.conn()?;
        let current = read_doc(&conn, collection, id);
        Ok(self.hub.attach(collection, id, current))
    }
}

/// JSON path selecting a top-level field.
fn json_path(field: &str) -> String {
    format!("$.\"{field}\"")
}

/// `json_type` name and, for scalars SQLite compares exactly, the bound
/// value. `None`/`Null` leave that part of the filter open.
fn sql_match(value: &Value) -> (Option<&'static str>, SqlValue) {
    match value {
        Value::Null => (Some("null"), SqlValue::Null),
        Value::Bool(true) => (Some("true"), SqlValue::Null),
        Value::Bool(false) => (Some("false"), SqlValue::Null),
        Value::String(s) => (Some("text"), SqlValue::Text(s.clone())),
        Value::Number(n) => match (n.as_i64(), n.is_f64()) {
            (Some(i), _) => (Some("integer"), SqlValue::Integer(i)),
            (None, true) => (Some("real"), n.as_f64().map_or(SqlValue::Null, SqlValue::Real)),
            // Beyond i64: SQLite's typing of these is not relied on.
            (None, false) => (None, SqlValue::Null),
        },
        Value::Array(_) => (Some("array"), SqlValue::Null),
        Value::Object(_) => (Some("object"), SqlValue::Null),
    }
}

fn now_unix() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
