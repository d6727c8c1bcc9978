//! Durable string key/value storage for the application context.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;

use crate::db;

/// A string-keyed, string-valued persistent store.
pub trait KeyValueStore: Send + Sync {
  fn get_item(&self, key: &str) -> Result<Option<String>>;

  fn set_item(&self, key: &str, value: &str) -> Result<()>;

  fn remove_item(&self, key: &str) -> Result<()>;
}

const STORAGE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS local_storage (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

/// SQLite-based local storage.
pub struct SqliteKeyValueStore {
  conn: Mutex<Connection>,
}

impl SqliteKeyValueStore {
  pub fn open(path: &Path) -> Result<Self> {
    let conn = db::open(path, STORAGE_SCHEMA)
      .map_err(|e| eyre!("Failed to open local storage: {}", e))?;
    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  #[allow(dead_code)]
  pub fn open_in_memory() -> Result<Self> {
    Ok(Self {
      conn: Mutex::new(db::open_in_memory(STORAGE_SCHEMA)?),
    })
  }
}

impl KeyValueStore for SqliteKeyValueStore {
  fn get_item(&self, key: &str) -> Result<Option<String>> {
    let conn = db::lock(&self.conn)?;
    conn
      .query_row(
        "SELECT value FROM local_storage WHERE key = ?",
        params![key],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read {}: {}", key, e))
  }

  fn set_item(&self, key: &str, value: &str) -> Result<()> {
    let conn = db::lock(&self.conn)?;
    conn
      .execute(
        "INSERT OR REPLACE INTO local_storage (key, value, updated_at)
         VALUES (?, ?, datetime('now'))",
        params![key, value],
      )
      .map_err(|e| eyre!("Failed to write {}: {}", key, e))?;
    Ok(())
  }

  fn remove_item(&self, key: &str) -> Result<()> {
    let conn = db::lock(&self.conn)?;
    conn
      .execute("DELETE FROM local_storage WHERE key = ?", params![key])
      .map_err(|e| eyre!("Failed to remove {}: {}", key, e))?;
    Ok(())
  }
}
