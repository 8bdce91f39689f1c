//! SQLite storage backend.

use std::collections::HashMap;
use std::hash::Hash;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{de::DeserializeOwned, Serialize};
use tracing::warn;

use super::codec;
use super::Storage;

/// Schema for the entry table.
const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS cache_entries (
    namespace TEXT NOT NULL,
    entry_key TEXT NOT NULL,
    data BLOB NOT NULL,
    PRIMARY KEY (namespace, entry_key)
);
"#;

/// SQLite-based storage.
///
/// Several stores can share one database file; each one only sees the rows
/// of its own namespace.
pub struct SqliteStorage<K, V> {
  conn: Mutex<Connection>,
  namespace: String,
  _marker: PhantomData<fn() -> (K, V)>,
}

impl<K, V> SqliteStorage<K, V> {
  /// Open (or create) a database file at `path`.
  pub fn open(path: &Path, namespace: impl Into<String>) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      if !parent.as_os_str().is_empty() {
        std::fs::create_dir_all(parent)
          .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
      }
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::with_connection(conn, namespace.into())
  }

  /// Open a private in-memory database.
  pub fn open_in_memory(namespace: impl Into<String>) -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;

    Self::with_connection(conn, namespace.into())
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("recache").join("cache.db"))
  }

  /// Namespace this store reads and writes.
  pub fn namespace(&self) -> &str {
    &self.namespace
  }

  fn with_connection(conn: Connection, namespace: String) -> Result<Self> {
    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(Self {
      conn: Mutex::new(conn),
      namespace,
      _marker: PhantomData,
    })
  }

  /// Run `op` against the connection, logging and swallowing failures.
  fn with_conn<T>(&self, op: &str, f: impl FnOnce(&Connection) -> rusqlite::Result<T>) -> Option<T> {
    let conn = match self.conn.lock() {
      Ok(conn) => conn,
      Err(e) => {
        warn!(op, error = %e, "Cache database lock poisoned");
        return None;
      }
    };

    match f(&conn) {
      Ok(value) => Some(value),
      Err(e) => {
        warn!(op, namespace = %self.namespace, error = %e, "Cache database operation failed");
        None
      }
    }
  }
}

impl<K, V> Storage<K, V> for SqliteStorage<K, V>
where
  K: Serialize + DeserializeOwned,
  V: Serialize + DeserializeOwned,
{
  fn has(&self, key: &K) -> bool {
    let Ok(entry_key) = codec::encode_key(key) else {
      return false;
    };

    self
      .with_conn("has", |conn| {
        conn
          .query_row(
            "SELECT 1 FROM cache_entries WHERE namespace = ? AND entry_key = ?",
            params![self.namespace, entry_key],
            |_| Ok(()),
          )
          .optional()
          .map(|row| row.is_some())
      })
      .unwrap_or(false)
  }

  fn get(&self, key: &K) -> Option<V> {
    let entry_key = codec::encode_key(key).ok()?;

    let data: Vec<u8> = self
      .with_conn("get", |conn| {
        conn
          .query_row(
            "SELECT data FROM cache_entries WHERE namespace = ? AND entry_key = ?",
            params![self.namespace, entry_key],
            |row| row.get(0),
          )
          .optional()
      })
      .flatten()?;

    match codec::decode_value(&data) {
      Ok(value) => Some(value),
      Err(e) => {
        warn!(namespace = %self.namespace, entry_key = %entry_key, error = %e, "Failed to deserialize cache entry");
        None
      }
    }
  }

  fn all(&self) -> HashMap<K, V>
  where
    K: Eq + Hash,
  {
    let rows: Vec<(String, Vec<u8>)> = self
      .with_conn("all", |conn| {
        let mut stmt =
          conn.prepare("SELECT entry_key, data FROM cache_entries WHERE namespace = ?")?;
        let rows = stmt
          .query_map(params![self.namespace], |row| Ok((row.get(0)?, row.get(1)?)))?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .unwrap_or_default();

    // Rows that no longer decode are skipped rather than failing the snapshot
    rows
      .into_iter()
      .filter_map(|(entry_key, data)| {
        let key = codec::decode_key(&entry_key).ok()?;
        let value = codec::decode_value(&data).ok()?;
        Some((key, value))
      })
      .collect()
  }

  fn set(&self, key: &K, value: V) -> bool {
    let (Ok(entry_key), Ok(data)) = (codec::encode_key(key), codec::encode_value(&value)) else {
      warn!(namespace = %self.namespace, "Failed to serialize cache entry");
      return false;
    };

    self
      .with_conn("set", |conn| {
        conn.execute(
          "INSERT OR REPLACE INTO cache_entries (namespace, entry_key, data) VALUES (?, ?, ?)",
          params![self.namespace, entry_key, data],
        )
      })
      .is_some()
  }

  fn delete(&self, key: &K) -> bool {
    let Ok(entry_key) = codec::encode_key(key) else {
      return false;
    };

    self
      .with_conn("delete", |conn| {
        conn.execute(
          "DELETE FROM cache_entries WHERE namespace = ? AND entry_key = ?",
          params![self.namespace, entry_key],
        )
      })
      .is_some()
  }

  fn clear(&self) -> bool {
    self
      .with_conn("clear", |conn| {
        conn.execute(
          "DELETE FROM cache_entries WHERE namespace = ?",
          params![self.namespace],
        )?;
        conn.query_row(
          "SELECT COUNT(*) FROM cache_entries WHERE namespace = ?",
          params![self.namespace],
          |row| row.get::<_, i64>(0),
        )
      })
      .map(|remaining| remaining == 0)
      .unwrap_or(false)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::CacheEntry;
  use chrono::{TimeZone, Utc};

  fn storage() -> SqliteStorage<String, u32> {
    SqliteStorage::open_in_memory("test").unwrap()
  }

  #[test]
  fn test_set_get_overwrite() {
    let storage = storage();
    assert_eq!(storage.get(&"a".to_string()), None);

    assert!(storage.set(&"a".to_string(), 1));
    assert_eq!(storage.get(&"a".to_string()), Some(1));
    assert!(storage.has(&"a".to_string()));

    assert!(storage.set(&"a".to_string(), 2));
    assert_eq!(storage.get(&"a".to_string()), Some(2));
    assert_eq!(storage.all().len(), 1);
  }

  #[test]
  fn test_delete_and_clear() {
    let storage = storage();
    storage.set(&"a".to_string(), 1);
    storage.set(&"b".to_string(), 2);

    assert!(storage.delete(&"a".to_string()));
    assert!(storage.delete(&"missing".to_string()));
    assert!(!storage.has(&"a".to_string()));

    assert!(storage.clear());
    assert!(storage.all().is_empty());
    assert!(storage.clear());
  }

  #[test]
  fn test_entries_keep_capture_time() {
    let storage: SqliteStorage<u64, CacheEntry<String>> =
      SqliteStorage::open_in_memory("entries").unwrap();
    let captured_at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap();
    storage.set(&7, CacheEntry::captured(String::from("token"), captured_at));

    let entry = storage.get(&7).unwrap();
    assert_eq!(entry.value, "token");
    assert_eq!(entry.captured_at, captured_at);
  }

  #[test]
  fn test_namespaces_share_a_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("cache.db");

    let first: SqliteStorage<String, u32> = SqliteStorage::open(&path, "first").unwrap();
    let second: SqliteStorage<String, u32> = SqliteStorage::open(&path, "second").unwrap();

    first.set(&"a".to_string(), 1);
    second.set(&"a".to_string(), 2);

    assert_eq!(first.get(&"a".to_string()), Some(1));
    assert_eq!(second.get(&"a".to_string()), Some(2));

    assert!(first.clear());
    assert!(first.all().is_empty());
    assert_eq!(second.get(&"a".to_string()), Some(2));
  }

  #[test]
  fn test_undecodable_row_reads_as_absent() {
    let storage = storage();
    storage.set(&"good".to_string(), 1);
    storage
      .with_conn("seed", |conn| {
        conn.execute(
          "INSERT INTO cache_entries (namespace, entry_key, data) VALUES ('test', '\"bad\"', x'00')",
          [],
        )
      })
      .unwrap();

    assert_eq!(storage.get(&"bad".to_string()), None);
    let all = storage.all();
    assert_eq!(all.len(), 1);
    assert_eq!(all.get("good"), Some(&1));
  }
}
