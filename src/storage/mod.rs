//! Storage contract and backends.
//!
//! The refresh engine never talks to a concrete store. It only needs the six
//! operations of [`Storage`], so an in-process table, a SQLite file shared by
//! several processes and a Redis hash are interchangeable.
//!
//! Backends own their failure policy: a store that cannot be reached reports
//! `None` / `false` instead of raising transport errors through the contract.

mod codec;
mod memory;
mod redis;
mod sqlite;

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

pub use memory::MemoryStorage;
pub use self::redis::RedisStorage;
pub use sqlite::SqliteStorage;

/// Minimal capability set a backing store must expose.
///
/// Implementations must synchronize internally: the engine calls them from
/// caller tasks and from its background sweep at the same time.
pub trait Storage<K, V>: Send + Sync {
  /// Whether an entry exists for `key`.
  fn has(&self, key: &K) -> bool;

  /// Get the entry for `key`, or `None` when it is absent (or unreadable).
  fn get(&self, key: &K) -> Option<V>;

  /// Snapshot of every entry. Callers treat it as read-only.
  fn all(&self) -> HashMap<K, V>
  where
    K: Eq + Hash;

  /// Store `value` under `key`, overwriting any existing entry.
  fn set(&self, key: &K, value: V) -> bool;

  /// Remove `key`. Removing an absent key succeeds.
  fn delete(&self, key: &K) -> bool;

  /// Remove every entry. The flag reports whether the store is now empty.
  fn clear(&self) -> bool;
}

impl<K, V, S> Storage<K, V> for Arc<S>
where
  S: Storage<K, V> + ?Sized,
{
  fn has(&self, key: &K) -> bool {
    (**self).has(key)
  }

  fn get(&self, key: &K) -> Option<V> {
    (**self).get(key)
  }

  fn all(&self) -> HashMap<K, V>
  where
    K: Eq + Hash,
  {
    (**self).all()
  }

  fn set(&self, key: &K, value: V) -> bool {
    (**self).set(key, value)
  }

  fn delete(&self, key: &K) -> bool {
    (**self).delete(key)
  }

  fn clear(&self) -> bool {
    (**self).clear()
  }
}

impl<K, V, S> Storage<K, V> for Box<S>
where
  S: Storage<K, V> + ?Sized,
{
  fn has(&self, key: &K) -> bool {
    (**self).has(key)
  }

  fn get(&self, key: &K) -> Option<V> {
    (**self).get(key)
  }

  fn all(&self) -> HashMap<K, V>
  where
    K: Eq + Hash,
  {
    (**self).all()
  }

  fn set(&self, key: &K, value: V) -> bool {
    (**self).set(key, value)
  }

  fn delete(&self, key: &K) -> bool {
    (**self).delete(key)
  }

  fn clear(&self) -> bool {
    (**self).clear()
  }
}
