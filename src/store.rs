//! Key-value persistence for detection snapshots and tracker settings.
//!
//! The core never talks to a concrete database directly; everything goes
//! through [`KeyValueStore`] so the scanning and enforcement logic can be
//! exercised against an in-memory store in tests.

use anyhow::{Context, Result};
use rusqlite::{params, Connection};
use rustc_hash::FxHashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::{Mutex, RwLock};
use tracing::info;

/// Well-known store keys.
pub mod keys {
    pub const DETECTED_TOOLS: &str = "detected_tools";
    pub const LAST_SCAN_TIME: &str = "last_scan_time";
    pub const TRACKERS: &str = "trackers";
    pub const CUSTOM_TRIGGERS: &str = "custom_triggers";
}

pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn delete(&self, key: &str) -> Result<()>;
}

pub fn get_json<T: DeserializeOwned>(store: &dyn KeyValueStore, key: &str) -> Result<Option<T>> {
    match store.get(key)? {
        Some(raw) => {
            let value = serde_json::from_str(&raw)
                .with_context(|| format!("Corrupt JSON under store key '{}'", key))?;
            Ok(Some(value))
        }
        None => Ok(None),
    }
}

pub fn set_json<T: Serialize>(store: &dyn KeyValueStore, key: &str, value: &T) -> Result<()> {
    let raw = serde_json::to_string(value)
        .with_context(|| format!("Failed to serialize value for store key '{}'", key))?;
    store.set(key, &raw)
}

/// SQLite-backed store. A single `options` table keyed by name, mirroring
/// the flat option storage the rest of the core expects.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open database at {}", db_path))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS options (
                name TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
            [],
        )?;
        info!("Option store initialized at {}", db_path);
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl KeyValueStore for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare_cached("SELECT value FROM options WHERE name = ?1")?;
        let mut rows = stmt.query(params![key])?;
        match rows.next()? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare_cached(
            "INSERT INTO options (name, value) VALUES (?1, ?2)
             ON CONFLICT(name) DO UPDATE SET value = excluded.value",
        )?;
        stmt.execute(params![key, value])?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare_cached("DELETE FROM options WHERE name = ?1")?;
        stmt.execute(params![key])?;
        Ok(())
    }
}

/// In-memory store for tests and ephemeral runs.
#[derive(Default)]
pub struct MemoryStore {
    values: RwLock<FxHashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.read().unwrap().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.values
            .write()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.values.write().unwrap().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_roundtrip() {
        let store = MemoryStore::new();
        assert_eq!(store.get("missing").unwrap(), None);

        store.set("a", "1").unwrap();
        assert_eq!(store.get("a").unwrap().as_deref(), Some("1"));

        store.set("a", "2").unwrap();
        assert_eq!(store.get("a").unwrap().as_deref(), Some("2"));

        store.delete("a").unwrap();
        assert_eq!(store.get("a").unwrap(), None);
    }

    #[test]
    fn sqlite_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("options.db");
        let store = SqliteStore::open(path.to_str().unwrap()).unwrap();

        store.set(keys::LAST_SCAN_TIME, "1700000000").unwrap();
        assert_eq!(
            store.get(keys::LAST_SCAN_TIME).unwrap().as_deref(),
            Some("1700000000")
        );

        store.set(keys::LAST_SCAN_TIME, "1700000001").unwrap();
        assert_eq!(
            store.get(keys::LAST_SCAN_TIME).unwrap().as_deref(),
            Some("1700000001")
        );

        store.delete(keys::LAST_SCAN_TIME).unwrap();
        assert_eq!(store.get(keys::LAST_SCAN_TIME).unwrap(), None);
    }

    #[test]
    fn json_helpers_roundtrip() {
        let store = MemoryStore::new();
        set_json(&store, "n", &42u64).unwrap();
        assert_eq!(get_json::<u64>(&store, "n").unwrap(), Some(42));
        assert_eq!(get_json::<u64>(&store, "missing").unwrap(), None);
    }
}
