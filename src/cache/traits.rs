//! Fetch strategies the cache consumes.
//!
//! Consumers implement one or more of these against their data source and
//! attach them to a [`RecordCache`](super::RecordCache). The cache imposes no
//! deadline on a fetch; implementations that need bounded latency must apply
//! their own timeout.

use async_trait::async_trait;
use color_eyre::Result;
use std::collections::HashMap;
use std::sync::Arc;

/// Produces the value for a single key, on a miss or when the entry is stale.
#[async_trait]
pub trait OnDemandFetcher<K, V>: Send + Sync {
  async fn fetch_by_key(&self, key: &K) -> Result<V>;
}

/// Produces the entire current data set, on the recurring sweep.
#[async_trait]
pub trait BulkFetcher<K, V>: Send + Sync {
  async fn fetch_all(&self) -> Result<HashMap<K, V>>;
}

/// Produces the one value of a keyless cache (e.g. a rotating credential).
#[async_trait]
pub trait KeylessFetcher<V>: Send + Sync {
  async fn fetch(&self) -> Result<V>;
}

#[async_trait]
impl<K, V, F> OnDemandFetcher<K, V> for Arc<F>
where
  K: Sync,
  V: 'static,
  F: OnDemandFetcher<K, V> + ?Sized,
{
  async fn fetch_by_key(&self, key: &K) -> Result<V> {
    (**self).fetch_by_key(key).await
  }
}

#[async_trait]
impl<K, V, F> BulkFetcher<K, V> for Arc<F>
where
  K: 'static,
  V: 'static,
  F: BulkFetcher<K, V> + ?Sized,
{
  async fn fetch_all(&self) -> Result<HashMap<K, V>> {
    (**self).fetch_all().await
  }
}

#[async_trait]
impl<V, F> KeylessFetcher<V> for Arc<F>
where
  V: 'static,
  F: KeylessFetcher<V> + ?Sized,
{
  async fn fetch(&self) -> Result<V> {
    (**self).fetch().await
  }
}
