use crate::errors::{AppError, AppResult};
use crate::store::KeyValueStore;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

const SCHEMA_SQL: &str = include_str!("schema.sql");

/// SQLite-backed key/value store holding one JSON document per key.
#[derive(Debug)]
pub struct SqliteStore {
    conn: Mutex<Connection>,
    db_path: PathBuf,
}

impl SqliteStore {
    pub fn new(path: &Path) -> AppResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| AppError::Io(err.to_string()))?;
        }
        let conn = Connection::open(path).map_err(AppError::from)?;
        conn.execute_batch(SCHEMA_SQL).map_err(AppError::from)?;

        Ok(Self {
            conn: Mutex::new(conn),
            db_path: path.to_path_buf(),
        })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn keys(&self) -> AppResult<Vec<String>> {
        let conn = self.conn.lock().map_err(|_| AppError::Internal("database mutex poisoned".to_string()))?;
        let mut stmt = conn.prepare("SELECT key FROM kv ORDER BY key")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut keys = Vec::new();
        for row in rows {
            keys.push(row?);
        }
        Ok(keys)
    }

    pub fn remove(&self, key: &str) -> AppResult<()> {
        let conn = self.conn.lock().map_err(|_| AppError::Internal("database mutex poisoned".to_string()))?;
        conn.execute("DELETE FROM kv WHERE key = ?1", [key])?;
        Ok(())
    }
}

impl KeyValueStore for SqliteStore {
    fn get(&self, key: &str) -> AppResult<Option<Value>> {
        let conn = self.conn.lock().map_err(|_| AppError::Internal("database mutex poisoned".to_string()))?;
        let raw = conn
            .query_row("SELECT value_json FROM kv WHERE key = ?1", [key], |row| {
                row.get::<_, String>(0)
            })
            .optional()?;

        match raw {
            Some(raw) => Ok(Some(serde_json::from_str::<Value>(&raw)?)),
            None => Ok(None),
        }
    }

    fn set(&self, key: &str, value: &Value) -> AppResult<()> {
        let conn = self.conn.lock().map_err(|_| AppError::Internal("database mutex poisoned".to_string()))?;
        conn.execute(
            "INSERT INTO kv (key, value_json, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json, updated_at = excluded.updated_at",
            params![key, serde_json::to_string(value)?, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::SqliteStore;
    use crate::store::KeyValueStore;
    use serde_json::json;

    #[test]
    fn store_can_write_and_read_documents() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SqliteStore::new(&dir.path().join("nested").join("test.db")).expect("db");

        assert!(store.get("state").expect("get").is_none());
        store.set("state", &json!({"pages": [], "selectedPageId": null})).expect("set");
        store.set("state", &json!({"pages": [{"id": "page_1"}]})).expect("overwrite");

        let value = store.get("state").expect("get").expect("value");
        assert_eq!(value["pages"][0]["id"], "page_1");
        assert_eq!(store.keys().expect("keys"), vec!["state".to_string()]);
    }

    #[test]
    fn values_survive_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("test.db");
        {
            let store = SqliteStore::new(&path).expect("db");
            store.set("rss_seen_https://example.com/feed", &json!(["a", "b"])).expect("set");
        }
        let store = SqliteStore::new(&path).expect("reopen");
        let seen = store.get("rss_seen_https://example.com/feed").expect("get");
        assert_eq!(seen, Some(json!(["a", "b"])));

        store.remove("rss_seen_https://example.com/feed").expect("remove");
        assert!(store.keys().expect("keys").is_empty());
    }
}
