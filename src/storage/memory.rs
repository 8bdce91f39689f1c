//! In-process storage backend.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::RwLock;

use super::Storage;

/// Storage backed by a `HashMap` behind a `RwLock`.
///
/// No external resources; its lifetime is the lifetime of the process.
#[derive(Debug)]
pub struct MemoryStorage<K, V> {
  entries: RwLock<HashMap<K, V>>,
}

impl<K, V> MemoryStorage<K, V> {
  /// Create an empty store.
  pub fn new() -> Self {
    Self {
      entries: RwLock::new(HashMap::new()),
    }
  }
}

impl<K, V> Default for MemoryStorage<K, V> {
  fn default() -> Self {
    Self::new()
  }
}

impl<K: Eq + Hash, V> FromIterator<(K, V)> for MemoryStorage<K, V> {
  fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
    Self {
      entries: RwLock::new(iter.into_iter().collect()),
    }
  }
}

impl<K, V> Storage<K, V> for MemoryStorage<K, V>
where
  K: Eq + Hash + Clone + Send + Sync,
  V: Clone + Send + Sync,
{
  fn has(&self, key: &K) -> bool {
    self
      .entries
      .read()
      .map(|entries| entries.contains_key(key))
      .unwrap_or(false)
  }

  fn get(&self, key: &K) -> Option<V> {
    self.entries.read().ok()?.get(key).cloned()
  }

  fn all(&self) -> HashMap<K, V> {
    self
      .entries
      .read()
      .map(|entries| entries.clone())
      .unwrap_or_default()
  }

  fn set(&self, key: &K, value: V) -> bool {
    match self.entries.write() {
      Ok(mut entries) => {
        entries.insert(key.clone(), value);
        true
      }
      Err(_) => false,
    }
  }

  fn delete(&self, key: &K) -> bool {
    match self.entries.write() {
      Ok(mut entries) => {
        entries.remove(key);
        true
      }
      Err(_) => false,
    }
  }

  fn clear(&self) -> bool {
    match self.entries.write() {
      Ok(mut entries) => {
        entries.clear();
        entries.is_empty()
      }
      Err(_) => false,
    }
  }
}
