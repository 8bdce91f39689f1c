//! A cache for one global value, such as a rotating credential.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use color_eyre::Result;

use super::entry::CacheEntry;
use super::record::RecordCache;
use super::traits::{BulkFetcher, KeylessFetcher, OnDemandFetcher};
use crate::error::CacheError;
use crate::storage::Storage;

/// Serves a keyless fetcher as an on-demand fetcher for the `()` key.
pub struct OnDemandAdapter<F>(pub F);

#[async_trait]
impl<V, F> OnDemandFetcher<(), V> for OnDemandAdapter<F>
where
  V: 'static,
  F: KeylessFetcher<V>,
{
  async fn fetch_by_key(&self, _key: &()) -> Result<V> {
    self.0.fetch().await
  }
}

/// Serves a keyless fetcher as a bulk fetcher with a single `()` entry.
pub struct BulkAdapter<F>(pub F);

#[async_trait]
impl<V, F> BulkFetcher<(), V> for BulkAdapter<F>
where
  V: Send + 'static,
  F: KeylessFetcher<V>,
{
  async fn fetch_all(&self) -> Result<HashMap<(), V>> {
    let value = self.0.fetch().await?;
    Ok(HashMap::from([((), value)]))
  }
}

/// A [`RecordCache`] with exactly one entry.
pub struct KeylessRecordCache<V, S: ?Sized> {
  cache: RecordCache<(), V, S>,
}

impl<V, S> KeylessRecordCache<V, S>
where
  V: Send + Sync + 'static,
  S: Storage<(), CacheEntry<V>> + ?Sized + 'static,
{
  /// Fetch the value when it is missing or older than `ttl`.
  pub async fn on_demand<F>(storage: Arc<S>, fetcher: F, ttl: Duration) -> Self
  where
    F: KeylessFetcher<V> + 'static,
  {
    let cache = RecordCache::new(storage);
    cache.set_on_demand_fetcher(OnDemandAdapter(fetcher), ttl).await;
    Self { cache }
  }

  /// Refresh the value in the background every `ttl`.
  pub async fn bulk<F>(storage: Arc<S>, fetcher: F, ttl: Duration) -> Self
  where
    F: KeylessFetcher<V> + 'static,
  {
    let cache = RecordCache::new(storage);
    cache.set_bulk_fetcher(BulkAdapter(fetcher), ttl).await;
    Self { cache }
  }

  /// Get the value, fetching it first when it is missing or stale.
  pub async fn get(&self) -> Result<V, CacheError> {
    self.cache.get(&()).await
  }

  /// The underlying engine.
  pub fn record_cache(&self) -> &RecordCache<(), V, S> {
    &self.cache
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::storage::MemoryStorage;
  use color_eyre::eyre::eyre;
  use std::sync::atomic::{AtomicU32, Ordering};

  #[derive(Default)]
  struct Greeting {
    calls: AtomicU32,
  }

  #[async_trait]
  impl KeylessFetcher<String> for Greeting {
    async fn fetch(&self) -> Result<String> {
      self.calls.fetch_add(1, Ordering::SeqCst);
      Ok("hello".to_string())
    }
  }

  struct Broken;

  #[async_trait]
  impl KeylessFetcher<String> for Broken {
    async fn fetch(&self) -> Result<String> {
      Err(eyre!("credential endpoint down"))
    }
  }

  fn storage() -> Arc<MemoryStorage<(), CacheEntry<String>>> {
    Arc::new(MemoryStorage::new())
  }

  #[tokio::test]
  async fn test_on_demand_get() {
    let fetcher = Arc::new(Greeting::default());
    let cache = KeylessRecordCache::on_demand(storage(), fetcher.clone(), Duration::from_secs(60)).await;

    assert_eq!(cache.get().await.unwrap(), "hello");
    assert_eq!(cache.get().await.unwrap(), "hello");
    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_on_demand_error_propagates() {
    let cache = KeylessRecordCache::on_demand(storage(), Broken, Duration::from_secs(60)).await;

    let err = cache.get().await.unwrap_err();
    assert_eq!(
      err.fetch_error().map(|r| r.to_string()),
      Some("credential endpoint down".to_string())
    );
  }

  #[tokio::test]
  async fn test_bulk_populates_single_entry() {
    let store = storage();
    let cache = KeylessRecordCache::bulk(store.clone(), Greeting::default(), Duration::from_secs(60)).await;

    assert!(cache.record_cache().is_scheduled().await);
    assert_eq!(store.get(&()).unwrap().value, "hello");
    assert_eq!(cache.get().await.unwrap(), "hello");
  }

  #[tokio::test]
  async fn test_bulk_failure_leaves_cache_empty() {
    let store = storage();
    let cache = KeylessRecordCache::bulk(store.clone(), Broken, Duration::from_secs(60)).await;

    assert!(store.all().is_empty());
    assert!(matches!(
      cache.get().await.unwrap_err(),
      CacheError::NoFetcherConfigured
    ));
  }
}
