//! Redis storage backend.
//!
//! Every entry of a store lives in one Redis hash, so a whole store can be
//! enumerated with `HGETALL` and dropped with a single `DEL`.

use std::collections::HashMap;
use std::hash::Hash;
use std::marker::PhantomData;
use std::sync::Mutex;
use std::time::Duration;

use color_eyre::{eyre::eyre, Result};
use redis::{Client, Commands, Connection, RedisResult};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

use super::codec;
use super::Storage;

/// Default connect/read/write timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

/// Storage backed by a Redis hash.
///
/// The connection is opened lazily and thrown away after any transport
/// error, so the next operation reconnects.
pub struct RedisStorage<K, V> {
  client: Client,
  conn: Mutex<Option<Connection>>,
  hash_key: String,
  timeout: Duration,
  _marker: PhantomData<fn() -> (K, V)>,
}

impl<K, V> RedisStorage<K, V> {
  /// Create a store for the hash `hash_key` on the server at `url`.
  ///
  /// Only validates the URL; no connection is made until the first call.
  pub fn open(url: &str, hash_key: impl Into<String>) -> Result<Self> {
    let client =
      Client::open(url).map_err(|e| eyre!("Invalid Redis URL {}: {}", url, e))?;

    Ok(Self {
      client,
      conn: Mutex::new(None),
      hash_key: hash_key.into(),
      timeout: DEFAULT_TIMEOUT,
      _marker: PhantomData,
    })
  }

  /// Set the connect/read/write timeout.
  pub fn with_timeout(mut self, timeout: Duration) -> Self {
    self.timeout = timeout;
    self
  }

  /// Name of the Redis hash holding the entries.
  pub fn hash_key(&self) -> &str {
    &self.hash_key
  }

  fn connect(&self) -> RedisResult<Connection> {
    let conn = self.client.get_connection_with_timeout(self.timeout)?;
    conn.set_read_timeout(Some(self.timeout))?;
    conn.set_write_timeout(Some(self.timeout))?;
    debug!(hash_key = %self.hash_key, "Connected to Redis");
    Ok(conn)
  }

  /// Run `op` on a live connection; failures are logged and become `None`.
  fn with_conn<T>(&self, op: &str, f: impl FnOnce(&mut Connection) -> RedisResult<T>) -> Option<T> {
    let mut slot = match self.conn.lock() {
      Ok(slot) => slot,
      Err(e) => {
        warn!(op, error = %e, "Redis connection lock poisoned");
        return None;
      }
    };

    if slot.is_none() {
      match self.connect() {
        Ok(conn) => *slot = Some(conn),
        Err(e) => {
          warn!(op, hash_key = %self.hash_key, error = %e, "Could not connect to Redis");
          return None;
        }
      }
    }

    let conn = slot.as_mut()?;
    match f(conn) {
      Ok(value) => Some(value),
      Err(e) => {
        warn!(op, hash_key = %self.hash_key, error = %e, "Redis operation failed");
        if e.is_io_error() || e.is_connection_dropped() || e.is_timeout() {
          *slot = None;
        }
        None
      }
    }
  }
}

impl<K, V> Storage<K, V> for RedisStorage<K, V>
where
  K: Serialize + DeserializeOwned,
  V: Serialize + DeserializeOwned,
{
  fn has(&self, key: &K) -> bool {
    let Ok(field) = codec::encode_key(key) else {
      return false;
    };

    self
      .with_conn("has", |conn| conn.hexists(&self.hash_key, field))
      .unwrap_or(false)
  }

  fn get(&self, key: &K) -> Option<V> {
    let field = codec::encode_key(key).ok()?;
    let data: Vec<u8> = self
      .with_conn("get", |conn| {
        conn.hget::<_, _, Option<Vec<u8>>>(&self.hash_key, &field)
      })
      .flatten()?;

    match codec::decode_value(&data) {
      Ok(value) => Some(value),
      Err(e) => {
        warn!(hash_key = %self.hash_key, field = %field, error = %e, "Failed to deserialize cache entry");
        None
      }
    }
  }

  fn all(&self) -> HashMap<K, V>
  where
    K: Eq + Hash,
  {
    let raw: HashMap<String, Vec<u8>> = self
      .with_conn("all", |conn| conn.hgetall(&self.hash_key))
      .unwrap_or_default();

    raw
      .into_iter()
      .filter_map(|(field, data)| {
        let key = codec::decode_key(&field).ok()?;
        let value = codec::decode_value(&data).ok()?;
        Some((key, value))
      })
      .collect()
  }

  fn set(&self, key: &K, value: V) -> bool {
    let (Ok(field), Ok(data)) = (codec::encode_key(key), codec::encode_value(&value)) else {
      warn!(hash_key = %self.hash_key, "Failed to serialize cache entry");
      return false;
    };

    self
      .with_conn("set", |conn| conn.hset::<_, _, _, ()>(&self.hash_key, field, data))
      .is_some()
  }

  fn delete(&self, key: &K) -> bool {
    let Ok(field) = codec::encode_key(key) else {
      return false;
    };

    self
      .with_conn("delete", |conn| conn.hdel::<_, _, ()>(&self.hash_key, field))
      .is_some()
  }

  fn clear(&self) -> bool {
    self
      .with_conn("clear", |conn| conn.del::<_, ()>(&self.hash_key))
      .is_some()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_open_rejects_bad_url() {
    assert!(RedisStorage::<String, u32>::open("not a url", "h").is_err());
  }

  #[test]
  fn test_unreachable_server_degrades() {
    // Nothing listens on port 1; every call must fail soft.
    let storage: RedisStorage<String, u32> = RedisStorage::open("redis://127.0.0.1:1/", "recache:test")
      .unwrap()
      .with_timeout(Duration::from_millis(200));

    assert!(!storage.has(&"a".to_string()));
    assert_eq!(storage.get(&"a".to_string()), None);
    assert!(storage.all().is_empty());
    assert!(!storage.set(&"a".to_string(), 1));
    assert!(!storage.delete(&"a".to_string()));
    assert!(!storage.clear());
  }

  #[test]
  #[ignore = "requires a Redis server at RECACHE_TEST_REDIS_URL"]
  fn test_round_trip_against_server() {
    let url = std::env::var("RECACHE_TEST_REDIS_URL").unwrap();
    let storage: RedisStorage<(String, u32), Vec<String>> =
      RedisStorage::open(&url, "recache:test:round_trip").unwrap();
    assert!(storage.clear());

    let key = ("tenant".to_string(), 7);
    assert!(storage.set(&key, vec!["a".to_string(), "b".to_string()]));
    assert!(storage.has(&key));
    assert_eq!(storage.get(&key), Some(vec!["a".to_string(), "b".to_string()]));
    assert_eq!(storage.all().len(), 1);

    assert!(storage.delete(&key));
    assert!(storage.delete(&key));
    assert!(!storage.has(&key));
    assert!(storage.clear());
  }
}
