use chrono::Local;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::app_dirs::AppDirs;
use crate::error::Result;

pub const USER_ID_KEY: &str = "simulator_user_id";
pub const USERNAME_KEY: &str = "simulator_username";
pub const VARIANT_KEY: &str = "simulator_variant";
pub const LEADERBOARD_KEY: &str = "leaderboard";

/// Key/value store holding JSON text, persistent across runs for one user profile.
pub trait LocalStore {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&mut self, key: &str, value: &str) -> Result<()>;
    fn remove(&mut self, key: &str) -> Result<()>;

    fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>>
    where
        Self: Sized,
    {
        match self.get(key)? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    fn set_json<T: Serialize>(&mut self, key: &str, value: &T) -> Result<()>
    where
        Self: Sized,
    {
        let raw = serde_json::to_string(value)?;
        self.set(key, &raw)
    }
}

/// SQLite-backed store
#[derive(Debug)]
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open the store under the application state directory
    pub fn open_default() -> Result<Self> {
        let path = AppDirs::store_path().unwrap_or_else(|| "abpuzzle_store.db".into());
        Self::open(path)
    }

    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    pub fn in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
            [],
        )?;
        Ok(Self { conn })
    }
}

impl LocalStore for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row("SELECT value FROM kv WHERE key = ?1", [key], |row| {
                row.get::<_, String>(0)
            })
            .optional()?;
        Ok(value)
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
            params![key, value, Local::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<()> {
        self.conn.execute("DELETE FROM kv WHERE key = ?1", [key])?;
        Ok(())
    }
}

/// In-process store, used for `--ephemeral` runs and tests
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    entries: HashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LocalStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }
}

/// Either store, picked at startup
#[derive(Debug)]
pub enum AnyStore {
    Sqlite(SqliteStore),
    Memory(MemoryStore),
}

impl LocalStore for AnyStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        match self {
            AnyStore::Sqlite(s) => s.get(key),
            AnyStore::Memory(s) => s.get(key),
        }
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match self {
            AnyStore::Sqlite(s) => s.set(key, value),
            AnyStore::Memory(s) => s.set(key, value),
        }
    }

    fn remove(&mut self, key: &str) -> Result<()> {
        match self {
            AnyStore::Sqlite(s) => s.remove(key),
            AnyStore::Memory(s) => s.remove(key),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn sqlite_set_get_overwrite() {
        let mut store = SqliteStore::in_memory().unwrap();
        assert_eq!(store.get(USERNAME_KEY).unwrap(), None);

        store.set(USERNAME_KEY, "\"Swift Fox\"").unwrap();
        assert_eq!(store.get(USERNAME_KEY).unwrap().as_deref(), Some("\"Swift Fox\""));

        store.set(USERNAME_KEY, "\"Sonic Hawk\"").unwrap();
        let name: Option<String> = store.get_json(USERNAME_KEY).unwrap();
        assert_eq!(name.as_deref(), Some("Sonic Hawk"));
    }

    #[test]
    fn sqlite_persists_across_connections() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("store.db");
        {
            let mut store = SqliteStore::open(&path).unwrap();
            store.set_json(VARIANT_KEY, &"B").unwrap();
        }
        let store = SqliteStore::open(&path).unwrap();
        let variant: Option<String> = store.get_json(VARIANT_KEY).unwrap();
        assert_eq!(variant.as_deref(), Some("B"));
    }

    #[test]
    fn remove_deletes_key() {
        let mut store = MemoryStore::new();
        store.set("k", "1").unwrap();
        store.remove("k").unwrap();
        assert_eq!(store.get("k").unwrap(), None);
    }

    #[test]
    fn get_json_reports_corrupt_values() {
        let mut store = MemoryStore::new();
        store.set(LEADERBOARD_KEY, "not json").unwrap();
        let parsed: Result<Option<Vec<u32>>> = store.get_json(LEADERBOARD_KEY);
        assert!(parsed.is_err());
    }
}
