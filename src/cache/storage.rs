//! Cache storage trait and SQLite implementation.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;
use tracing::debug;

use super::traits::CacheKey;
use crate::db;
use crate::http::{Request, Response};

/// A single cached response.
#[derive(Debug, Clone)]
pub struct CachedEntry {
  /// The stored response
  pub response: Response,
  /// When the response was cached
  pub cached_at: DateTime<Utc>,
}

/// Trait for cache storage backends.
///
/// Entries live in named generations. Only successful (2xx) responses to GET
/// requests are ever stored; anything else passed to `put` is ignored.
pub trait CacheStorage: Send + Sync {
  /// Store a single response.
  fn put(&self, generation: &str, request: &Request, response: &Response) -> Result<()>;

  /// Store a batch of responses. Either every entry is stored or none is.
  fn put_all(&self, generation: &str, entries: &[(Request, Response)]) -> Result<()>;

  /// Look up a response by request identity.
  fn lookup(&self, generation: &str, request: &Request) -> Result<Option<CachedEntry>>;

  /// Names of all existing generations.
  fn generations(&self) -> Result<Vec<String>>;

  /// Delete a generation and all of its entries. Returns whether it existed.
  fn delete_generation(&self, name: &str) -> Result<bool>;

  /// Record which generation is serving fetches.
  fn mark_active(&self, name: &str) -> Result<()>;

  /// The generation currently serving fetches, if any.
  fn active_generation(&self) -> Result<Option<String>>;

  /// Number of entries stored in a generation.
  fn entry_count(&self, generation: &str) -> Result<usize>;
}

fn is_cacheable(request: &Request, response: &Response) -> bool {
  request.method == reqwest::Method::GET && response.is_success()
}

/// Storage implementation that doesn't cache anything.
/// Used when offline caching is disabled - all operations are no-ops.
pub struct NoopStorage;

impl CacheStorage for NoopStorage {
  fn put(&self, _generation: &str, _request: &Request, _response: &Response) -> Result<()> {
    Ok(()) // Discard
  }

  fn put_all(&self, _generation: &str, _entries: &[(Request, Response)]) -> Result<()> {
    Ok(()) // Discard
  }

  fn lookup(&self, _generation: &str, _request: &Request) -> Result<Option<CachedEntry>> {
    Ok(None) // Always miss
  }

  fn generations(&self) -> Result<Vec<String>> {
    Ok(Vec::new())
  }

  fn delete_generation(&self, _name: &str) -> Result<bool> {
    Ok(false)
  }

  fn mark_active(&self, _name: &str) -> Result<()> {
    Ok(())
  }

  fn active_generation(&self) -> Result<Option<String>> {
    Ok(None)
  }

  fn entry_count(&self, _generation: &str) -> Result<usize> {
    Ok(0)
  }
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open (or create) the cache database at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    let conn = db::open(path, CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to open response cache: {}", e))?;
    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  /// Cache that lives only as long as this value.
  #[allow(dead_code)]
  pub fn open_in_memory() -> Result<Self> {
    let conn = db::open_in_memory(CACHE_SCHEMA)?;
    Ok(Self {
      conn: Mutex::new(conn),
    })
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS cache_generations (
    name TEXT PRIMARY KEY,
    active INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS response_cache (
    generation TEXT NOT NULL,
    request_hash TEXT NOT NULL,
    request_identity TEXT NOT NULL,
    status INTEGER NOT NULL,
    status_text TEXT NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (generation, request_hash)
);

CREATE INDEX IF NOT EXISTS idx_response_cache_generation ON response_cache(generation);
"#;

fn insert_generation(conn: &Connection, name: &str) -> Result<()> {
  conn
    .execute(
      "INSERT OR IGNORE INTO cache_generations (name) VALUES (?)",
      params![name],
    )
    .map_err(|e| eyre!("Failed to open cache generation {}: {}", name, e))?;
  Ok(())
}

fn insert_entry(
  conn: &Connection,
  generation: &str,
  request: &Request,
  response: &Response,
) -> Result<()> {
  let headers = serde_json::to_string(&response.headers)
    .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

  conn
    .execute(
      "INSERT OR REPLACE INTO response_cache
         (generation, request_hash, request_identity, status, status_text, headers, body, cached_at)
       VALUES (?, ?, ?, ?, ?, ?, ?, datetime('now'))",
      params![
        generation,
        request.cache_hash(),
        request.description(),
        response.status,
        response.status_text,
        headers,
        response.body,
      ],
    )
    .map_err(|e| eyre!("Failed to store response for {}: {}", request.identity(), e))?;

  Ok(())
}

impl CacheStorage for SqliteStorage {
  fn put(&self, generation: &str, request: &Request, response: &Response) -> Result<()> {
    if !is_cacheable(request, response) {
      debug!(request = %request.identity(), status = response.status, "not caching response");
      return Ok(());
    }

    let conn = db::lock(&self.conn)?;
    let tx = conn
      .unchecked_transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;
    insert_generation(&tx, generation)?;
    insert_entry(&tx, generation, request, response)?;
    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))
  }

  fn put_all(&self, generation: &str, entries: &[(Request, Response)]) -> Result<()> {
    if let Some((request, response)) = entries.iter().find(|(q, r)| !is_cacheable(q, r)) {
      return Err(eyre!(
        "Refusing to cache {} with status {}",
        request.identity(),
        response.status
      ));
    }

    let conn = db::lock(&self.conn)?;
    // Rolled back on drop if any insert fails
    let tx = conn
      .unchecked_transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;
    insert_generation(&tx, generation)?;
    for (request, response) in entries {
      insert_entry(&tx, generation, request, response)?;
    }
    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))
  }

  fn lookup(&self, generation: &str, request: &Request) -> Result<Option<CachedEntry>> {
    let conn = db::lock(&self.conn)?;

    let mut stmt = conn
      .prepare(
        "SELECT status, status_text, headers, body, cached_at FROM response_cache
         WHERE generation = ? AND request_hash = ?",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let row: Option<(u16, String, String, Vec<u8>, String)> = stmt
      .query_row(params![generation, request.cache_hash()], |row| {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
      })
      .optional()
      .map_err(|e| eyre!("Failed to look up {}: {}", request.identity(), e))?;

    match row {
      Some((status, status_text, headers, body, cached_at_str)) => {
        let headers = serde_json::from_str(&headers)
          .map_err(|e| eyre!("Failed to deserialize headers: {}", e))?;
        Ok(Some(CachedEntry {
          response: Response {
            status,
            status_text,
            headers,
            body,
          },
          cached_at: parse_datetime(&cached_at_str)?,
        }))
      }
      None => Ok(None),
    }
  }

  fn generations(&self) -> Result<Vec<String>> {
    let conn = db::lock(&self.conn)?;

    let mut stmt = conn
      .prepare("SELECT name FROM cache_generations ORDER BY created_at, name")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list cache generations: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read cache generation: {}", e))?;

    Ok(names)
  }

  fn delete_generation(&self, name: &str) -> Result<bool> {
    let conn = db::lock(&self.conn)?;
    let tx = conn
      .unchecked_transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "DELETE FROM response_cache WHERE generation = ?",
      params![name],
    )
    .map_err(|e| eyre!("Failed to delete cached responses: {}", e))?;
    let removed = tx
      .execute(
        "DELETE FROM cache_generations WHERE name = ?",
        params![name],
      )
      .map_err(|e| eyre!("Failed to delete cache generation {}: {}", name, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;
    Ok(removed > 0)
  }

  fn mark_active(&self, name: &str) -> Result<()> {
    let conn = db::lock(&self.conn)?;
    let tx = conn
      .unchecked_transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;
    insert_generation(&tx, name)?;
    tx.execute(
      "UPDATE cache_generations SET active = (name = ?)",
      params![name],
    )
    .map_err(|e| eyre!("Failed to mark {} active: {}", name, e))?;
    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))
  }

  fn active_generation(&self) -> Result<Option<String>> {
    let conn = db::lock(&self.conn)?;
    conn
      .query_row(
        "SELECT name FROM cache_generations WHERE active = 1 LIMIT 1",
        [],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read active cache generation: {}", e))
  }

  fn entry_count(&self, generation: &str) -> Result<usize> {
    let conn = db::lock(&self.conn)?;
    let count: i64 = conn
      .query_row(
        "SELECT COUNT(*) FROM response_cache WHERE generation = ?",
        params![generation],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to count cached responses: {}", e))?;
    Ok(count as usize)
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}
