use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension, params};
use serde_json::{Map, Value};

use super::engine;
use super::models::{ID_FIELD, Record};
use super::query::Stage;

/// Async-safe handle to the document store.
///
/// Wraps `DashboardDb` behind `Arc<Mutex>` and runs all access on tokio's
/// blocking thread pool via `spawn_blocking`, keeping synchronous SQLite I/O
/// off the async worker threads.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<DashboardDb>>,
}

impl DbHandle {
    pub fn new(db: DashboardDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    /// Run a closure with access to the database on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&DashboardDb) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db.lock().map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
            f(&guard)
        })
        .await
        .context("DB task panicked")?
    }

    /// Acquire the database mutex synchronously. For CLI commands, startup,
    /// code already running on a blocking thread, and tests.
    pub fn lock_sync(&self) -> Result<std::sync::MutexGuard<'_, DashboardDb>> {
        self.inner
            .lock()
            .map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))
    }
}

/// Document database: JSON documents addressed by database, collection and
/// `_id`, plus a key-value settings table.
pub struct DashboardDb {
    conn: Connection,
}

impl DashboardDb {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        self.run_migrations().context("Failed to run migrations")?;
        Ok(())
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS documents (
                    db_name TEXT NOT NULL,
                    collection TEXT NOT NULL,
                    id TEXT NOT NULL,
                    body TEXT NOT NULL,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
                    PRIMARY KEY (db_name, collection, id)
                );

                CREATE INDEX IF NOT EXISTS idx_documents_collection
                    ON documents(db_name, collection);

                CREATE TABLE IF NOT EXISTS settings (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL,
                    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
                );
                ",
            )
            .context("Failed to create tables")?;
        Ok(())
    }

    // ── Documents ─────────────────────────────────────────────────────

    /// Insert one document, assigning a UUID `_id` when it has none.
    pub fn insert_document(&self, database: &str, collection: &str, doc: Value) -> Result<Record> {
        let record = prepare_document(doc)?;
        self.insert_record(database, collection, &record)?;
        Ok(record)
    }

    /// Insert many documents in one transaction. Returns the number inserted.
    pub fn insert_documents(&self, database: &str, collection: &str, docs: Vec<Value>) -> Result<usize> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        let mut count = 0;
        for doc in docs {
            let record = prepare_document(doc)?;
            self.insert_record(database, collection, &record)?;
            count += 1;
        }
        tx.commit().context("Failed to commit import")?;
        Ok(count)
    }

    fn insert_record(&self, database: &str, collection: &str, record: &Record) -> Result<()> {
        let id = record
            .id()
            .ok_or_else(|| anyhow::anyhow!("document has no usable _id"))?;
        let body = serde_json::to_string(record).context("Failed to serialize document")?;
        self.conn
            .execute(
                "INSERT INTO documents (db_name, collection, id, body) VALUES (?1, ?2, ?3, ?4)",
                params![database, collection, id, body],
            )
            .with_context(|| format!("Failed to insert document {} into {}", id, collection))?;
        Ok(())
    }

    /// All documents of a collection in insertion order.
    pub fn list_documents(&self, database: &str, collection: &str) -> Result<Vec<Record>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT body FROM documents WHERE db_name = ?1 AND collection = ?2 ORDER BY rowid",
            )
            .context("Failed to prepare list_documents")?;
        let rows = stmt
            .query_map(params![database, collection], |row| row.get::<_, String>(0))
            .context("Failed to query documents")?;
        let mut records = Vec::new();
        for body in rows {
            let body = body.context("Failed to read document row")?;
            records.push(parse_body(&body)?);
        }
        Ok(records)
    }

    fn list_values(&self, database: &str, collection: &str) -> Result<Vec<Value>> {
        Ok(self
            .list_documents(database, collection)?
            .into_iter()
            .map(Record::into_value)
            .collect())
    }

    pub fn get_document(&self, database: &str, collection: &str, id: &str) -> Result<Option<Record>> {
        let body = self
            .conn
            .query_row(
                "SELECT body FROM documents WHERE db_name = ?1 AND collection = ?2 AND id = ?3",
                params![database, collection, id],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .context("Failed to query document")?;
        body.map(|b| parse_body(&b)).transpose()
    }

    /// Apply `f` to the document with `id` and write it back in one
    /// transaction. Returns `None` if no such document exists.
    pub fn modify_document<F>(
        &self,
        database: &str,
        collection: &str,
        id: &str,
        f: F,
    ) -> Result<Option<Record>>
    where
        F: FnOnce(&mut Record) -> Result<()>,
    {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        let Some(mut record) = self.get_document(database, collection, id)? else {
            return Ok(None);
        };
        f(&mut record)?;
        // The identifier is the row key and cannot be rewritten.
        record.insert(ID_FIELD, Value::String(id.to_string()));
        self.write_back(database, collection, id, &record)?;
        tx.commit().context("Failed to commit document update")?;
        Ok(Some(record))
    }

    fn write_back(&self, database: &str, collection: &str, id: &str, record: &Record) -> Result<()> {
        let body = serde_json::to_string(record).context("Failed to serialize document")?;
        self.conn
            .execute(
                "UPDATE documents SET body = ?4, updated_at = datetime('now')
                 WHERE db_name = ?1 AND collection = ?2 AND id = ?3",
                params![database, collection, id, body],
            )
            .context("Failed to update document")?;
        Ok(())
    }

    /// Merge `fields` into every listed document. Unknown ids are skipped.
    /// Returns how many documents were updated.
    pub fn update_many(
        &self,
        database: &str,
        collection: &str,
        ids: &[String],
        fields: &Map<String, Value>,
    ) -> Result<usize> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        let mut updated = 0;
        for id in ids {
            if let Some(mut record) = self.get_document(database, collection, id)? {
                for (k, v) in fields {
                    if k != ID_FIELD {
                        record.insert(k.clone(), v.clone());
                    }
                }
                self.write_back(database, collection, id, &record)?;
                updated += 1;
            }
        }
        tx.commit().context("Failed to commit batch update")?;
        Ok(updated)
    }

    pub fn delete_document(&self, database: &str, collection: &str, id: &str) -> Result<bool> {
        let rows = self
            .conn
            .execute(
                "DELETE FROM documents WHERE db_name = ?1 AND collection = ?2 AND id = ?3",
                params![database, collection, id],
            )
            .context("Failed to delete document")?;
        Ok(rows > 0)
    }

    pub fn list_collections(&self, database: &str) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT collection FROM documents WHERE db_name = ?1 ORDER BY collection")
            .context("Failed to prepare list_collections")?;
        let rows = stmt
            .query_map(params![database], |row| row.get::<_, String>(0))
            .context("Failed to query collections")?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read collection names")
    }

    /// Run an aggregation pipeline over a collection.
    pub fn aggregate(&self, database: &str, collection: &str, stages: &[Stage]) -> Result<Vec<Value>> {
        let docs = self.list_values(database, collection)?;
        Ok(engine::aggregate(docs, stages)?)
    }

    /// Filter (and optionally project) a collection.
    pub fn find(
        &self,
        database: &str,
        collection: &str,
        filter: &Map<String, Value>,
        projection: Option<&Map<String, Value>>,
    ) -> Result<Vec<Value>> {
        let docs = self.list_values(database, collection)?;
        Ok(engine::find(docs, filter, projection)?)
    }

    // ── Settings ──────────────────────────────────────────────────────

    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        self.conn
            .query_row(
                "SELECT value FROM settings WHERE key = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .context("Failed to query setting")
    }

    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO settings (key, value, updated_at) VALUES (?1, ?2, datetime('now'))
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = datetime('now')",
                params![key, value],
            )
            .context("Failed to upsert setting")?;
        Ok(())
    }

    pub fn delete_setting(&self, key: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM settings WHERE key = ?1", params![key])
            .context("Failed to delete setting")?;
        Ok(())
    }
}

fn prepare_document(doc: Value) -> Result<Record> {
    let mut record = Record::from_value(doc)
        .ok_or_else(|| anyhow::anyhow!("documents must be JSON objects"))?;
    if record.id().is_none() {
        record.insert(ID_FIELD, Value::String(uuid::Uuid::new_v4().to_string()));
    }
    Ok(record)
}

fn parse_body(body: &str) -> Result<Record> {
    let value: Value = serde_json::from_str(body).context("Stored document is not valid JSON")?;
    Record::from_value(value).ok_or_else(|| anyhow::anyhow!("Stored document is not an object"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_db() -> DashboardDb {
        DashboardDb::new_in_memory().unwrap()
    }

    #[test]
    fn test_insert_assigns_id() {
        let db = test_db();
        let record = db
            .insert_document("factory", "inspections", json!({"factory": "Factory A"}))
            .unwrap();
        let id = record.id().unwrap();
        assert_eq!(id.len(), 36);
        let fetched = db.get_document("factory", "inspections", &id).unwrap().unwrap();
        assert_eq!(fetched.get("factory"), Some(&json!("Factory A")));
    }

    #[test]
    fn test_insert_keeps_existing_id_and_rejects_duplicates() {
        let db = test_db();
        db.insert_document("factory", "c", json!({"_id": "r1"})).unwrap();
        assert!(db.insert_document("factory", "c", json!({"_id": "r1"})).is_err());
        // Same id in another collection or database is fine
        db.insert_document("factory", "d", json!({"_id": "r1"})).unwrap();
        db.insert_document("other", "c", json!({"_id": "r1"})).unwrap();
    }

    #[test]
    fn test_insert_rejects_non_objects() {
        let db = test_db();
        assert!(db.insert_document("factory", "c", json!([1, 2])).is_err());
    }

    #[test]
    fn test_insert_many_is_atomic() {
        let db = test_db();
        let result = db.insert_documents(
            "factory",
            "c",
            vec![json!({"_id": "a"}), json!({"_id": "b"}), json!({"_id": "a"})],
        );
        assert!(result.is_err());
        assert!(db.list_documents("factory", "c").unwrap().is_empty());
    }

    #[test]
    fn test_list_preserves_insertion_order_and_scoping() {
        let db = test_db();
        db.insert_documents(
            "factory",
            "c",
            vec![json!({"_id": "z"}), json!({"_id": "a"}), json!({"_id": "m"})],
        )
        .unwrap();
        db.insert_document("factory", "other", json!({"_id": "x"})).unwrap();
        let ids: Vec<String> = db
            .list_documents("factory", "c")
            .unwrap()
            .iter()
            .filter_map(Record::id)
            .collect();
        assert_eq!(ids, vec!["z", "a", "m"]);
        assert_eq!(db.list_collections("factory").unwrap(), vec!["c", "other"]);
        assert!(db.list_collections("nope").unwrap().is_empty());
    }

    #[test]
    fn test_modify_document() {
        let db = test_db();
        db.insert_document("factory", "c", json!({"_id": "r1", "n": 1})).unwrap();
        let updated = db
            .modify_document("factory", "c", "r1", |r| {
                r.insert("n", json!(2));
                r.insert("_id", json!("hijack"));
                Ok(())
            })
            .unwrap()
            .unwrap();
        assert_eq!(updated.get("n"), Some(&json!(2)));
        assert_eq!(updated.id().as_deref(), Some("r1"));
        let stored = db.get_document("factory", "c", "r1").unwrap().unwrap();
        assert_eq!(stored.get("n"), Some(&json!(2)));
    }

    #[test]
    fn test_modify_missing_document_returns_none() {
        let db = test_db();
        let result = db
            .modify_document("factory", "c", "nope", |_| Ok(()))
            .unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_modify_closure_error_leaves_document_untouched() {
        let db = test_db();
        db.insert_document("factory", "c", json!({"_id": "r1", "n": 1})).unwrap();
        let result = db.modify_document("factory", "c", "r1", |r| {
            r.insert("n", json!(99));
            anyhow::bail!("validation failed")
        });
        assert!(result.is_err());
        let stored = db.get_document("factory", "c", "r1").unwrap().unwrap();
        assert_eq!(stored.get("n"), Some(&json!(1)));
    }

    #[test]
    fn test_update_many_skips_unknown_ids() {
        let db = test_db();
        db.insert_documents("factory", "c", vec![json!({"_id": "a"}), json!({"_id": "b"})])
            .unwrap();
        let fields = json!({"status": "approved"}).as_object().unwrap().clone();
        let updated = db
            .update_many("factory", "c", &["a".into(), "ghost".into()], &fields)
            .unwrap();
        assert_eq!(updated, 1);
        let a = db.get_document("factory", "c", "a").unwrap().unwrap();
        let b = db.get_document("factory", "c", "b").unwrap().unwrap();
        assert_eq!(a.get("status"), Some(&json!("approved")));
        assert_eq!(b.get("status"), None);
    }

    #[test]
    fn test_delete_document() {
        let db = test_db();
        db.insert_document("factory", "c", json!({"_id": "a"})).unwrap();
        assert!(db.delete_document("factory", "c", "a").unwrap());
        assert!(!db.delete_document("factory", "c", "a").unwrap());
    }

    #[test]
    fn test_aggregate_and_find() {
        let db = test_db();
        db.insert_documents(
            "factory",
            "c",
            vec![
                json!({"factory": "A", "q": 1}),
                json!({"factory": "B", "q": 2}),
                json!({"factory": "A", "q": 3}),
            ],
        )
        .unwrap();
        let stages: Vec<Stage> = serde_json::from_value(json!([
            {"$group": {"_id": "$factory", "q": {"$sum": "$q"}}},
            {"$sort": {"_id": 1}}
        ]))
        .unwrap();
        let rows = db.aggregate("factory", "c", &stages).unwrap();
        assert_eq!(rows, vec![json!({"_id": "A", "q": 4}), json!({"_id": "B", "q": 2})]);

        let filter = json!({"factory": "B"}).as_object().unwrap().clone();
        let found = db.find("factory", "c", &filter, None).unwrap();
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn test_aggregate_bad_pipeline_surfaces_pipeline_error() {
        let db = test_db();
        db.insert_document("factory", "c", json!({"a": 1})).unwrap();
        let stages: Vec<Stage> =
            serde_json::from_value(json!([{"$match": {"a": {"$where": "1"}}}])).unwrap();
        let err = db.aggregate("factory", "c", &stages).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<crate::errors::DashboardError>(),
            Some(crate::errors::DashboardError::Pipeline(_))
        ));
    }

    #[test]
    fn test_settings_crud() {
        let db = test_db();
        assert_eq!(db.get_setting("shopfloor.theme").unwrap(), None);
        db.set_setting("shopfloor.theme", "dark").unwrap();
        assert_eq!(db.get_setting("shopfloor.theme").unwrap().as_deref(), Some("dark"));
        db.set_setting("shopfloor.theme", "light").unwrap();
        assert_eq!(db.get_setting("shopfloor.theme").unwrap().as_deref(), Some("light"));
        db.delete_setting("shopfloor.theme").unwrap();
        assert_eq!(db.get_setting("shopfloor.theme").unwrap(), None);
    }

    #[tokio::test]
    async fn test_handle_call_runs_on_blocking_pool() {
        let handle = DbHandle::new(test_db());
        let record = handle
            .call(|db| db.insert_document("factory", "c", json!({"x": 1})))
            .await
            .unwrap();
        let id = record.id().unwrap();
        let fetched = handle
            .call(move |db| db.get_document("factory", "c", &id))
            .await
            .unwrap();
        assert!(fetched.is_some());
    }
}
