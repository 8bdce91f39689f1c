//! The staleness and refresh engine.

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, info_span, warn, Instrument, Span};

use super::entry::{elapsed, CacheEntry};
use super::scheduler::{Scheduler, DEFAULT_INTERVAL};
use super::traits::{BulkFetcher, OnDemandFetcher};
use crate::error::CacheError;
use crate::storage::Storage;

/// A fetch strategy with the TTL it was attached with.
struct Strategy<F: ?Sized> {
  fetcher: Arc<F>,
  ttl: Duration,
}

impl<F: ?Sized> Clone for Strategy<F> {
  fn clone(&self) -> Self {
    Self {
      fetcher: Arc::clone(&self.fetcher),
      ttl: self.ttl,
    }
  }
}

/// Scheduler lifecycle. Only ever moves forward.
enum Schedule {
  Uninitialized,
  Scheduled(Scheduler),
}

/// State shared between callers and the background sweep.
struct Inner<K, V, S: ?Sized> {
  storage: Arc<S>,
  on_demand: RwLock<Option<Strategy<dyn OnDemandFetcher<K, V>>>>,
  bulk: RwLock<Option<Strategy<dyn BulkFetcher<K, V>>>>,
  last_bulk_refresh: Mutex<Option<DateTime<Utc>>>,
  /// Readers hold it shared while reading or storing a fetched value, never
  /// across a fetch; bulk repopulation and stale purges hold it exclusively.
  gate: tokio::sync::RwLock<()>,
  /// Serializes sweeps.
  sweeping: tokio::sync::Mutex<()>,
}

/// Read-through cache with per-entry TTLs.
///
/// Values are refreshed two ways:
/// - on demand: a miss or a stale entry makes [`get`](Self::get) call the
///   [`OnDemandFetcher`] before answering;
/// - in bulk: a recurring sweep replaces the whole store with the output of
///   the [`BulkFetcher`] once its TTL has elapsed.
///
/// The same sweep purges entries older than the on-demand TTL, so keys nobody
/// asks for again do not pile up. A failed bulk fetch keeps the previous
/// contents: availability wins over freshness while the origin is down.
///
/// The sweep scheduler starts with the first fetcher attached and stops when
/// the cache is dropped. Storage is shared, never owned exclusively.
///
/// # Example
///
/// ```ignore
/// let storage = Arc::new(MemoryStorage::new());
/// let cache = RecordCache::new(storage).with_name("prices");
/// cache.set_on_demand_fetcher(PriceApi::new(), Duration::from_secs(300)).await;
///
/// let price = cache.get(&"BTC".to_string()).await?;
/// ```
pub struct RecordCache<K, V, S: ?Sized> {
  inner: Arc<Inner<K, V, S>>,
  schedule: tokio::sync::Mutex<Schedule>,
  sweep_interval: Duration,
  span: Span,
}

impl<K, V, S> RecordCache<K, V, S>
where
  K: Eq + Hash + Debug + Send + Sync + 'static,
  V: Send + Sync + 'static,
  S: Storage<K, CacheEntry<V>> + ?Sized + 'static,
{
  /// Create a cache over `storage`. No fetcher is attached yet.
  pub fn new(storage: Arc<S>) -> Self {
    Self {
      inner: Arc::new(Inner {
        storage,
        on_demand: RwLock::new(None),
        bulk: RwLock::new(None),
        last_bulk_refresh: Mutex::new(None),
        gate: tokio::sync::RwLock::new(()),
        sweeping: tokio::sync::Mutex::new(()),
      }),
      schedule: tokio::sync::Mutex::new(Schedule::Uninitialized),
      sweep_interval: DEFAULT_INTERVAL,
      span: info_span!("record_cache"),
    }
  }

  /// Set how often the background sweep runs. Defaults to one minute.
  ///
  /// Only takes effect if set before the first fetcher is attached. A zero
  /// interval is ignored.
  pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
    if interval.is_zero() {
      self
        .span
        .in_scope(|| warn!("Ignoring zero sweep interval, keeping {:?}", self.sweep_interval));
      return self;
    }
    self.sweep_interval = interval;
    self
  }

  /// Name this cache in log output.
  pub fn with_name(mut self, name: &str) -> Self {
    self.span = info_span!("record_cache", name = %name);
    self
  }

  /// The backing store.
  pub fn storage(&self) -> &Arc<S> {
    &self.inner.storage
  }

  /// When the last successful bulk refresh was written, if ever.
  pub fn last_bulk_refresh(&self) -> Option<DateTime<Utc>> {
    self.inner.last_bulk_refresh()
  }

  /// Whether the background sweep has been started.
  pub async fn is_scheduled(&self) -> bool {
    matches!(*self.schedule.lock().await, Schedule::Scheduled(_))
  }

  /// Attach the single-key fetcher and the TTL its entries live for.
  ///
  /// Replaces any previously attached on-demand fetcher. The first attached
  /// fetcher (of either kind) starts the scheduler after an immediate sweep.
  pub async fn set_on_demand_fetcher<F>(&self, fetcher: F, ttl: Duration)
  where
    F: OnDemandFetcher<K, V> + 'static,
  {
    let fetcher: Arc<dyn OnDemandFetcher<K, V>> = Arc::new(fetcher);
    *write(&self.inner.on_demand) = Some(Strategy { fetcher, ttl });
    self.span.in_scope(|| debug!(ttl = ?ttl, "On-demand fetcher attached"));
    self.ensure_scheduled().await;
  }

  /// Attach the bulk fetcher and how often it should replace the store.
  ///
  /// Same scheduling contract as [`set_on_demand_fetcher`](Self::set_on_demand_fetcher).
  pub async fn set_bulk_fetcher<F>(&self, fetcher: F, ttl: Duration)
  where
    F: BulkFetcher<K, V> + 'static,
  {
    let fetcher: Arc<dyn BulkFetcher<K, V>> = Arc::new(fetcher);
    *write(&self.inner.bulk) = Some(Strategy { fetcher, ttl });
    self.span.in_scope(|| debug!(ttl = ?ttl, "Bulk fetcher attached"));
    self.ensure_scheduled().await;
  }

  /// Get the value for `key`, refreshing it first if absent or stale.
  pub async fn get(&self, key: &K) -> Result<V, CacheError> {
    self.inner.get(key).instrument(self.span.clone()).await
  }

  /// Whether `key` is absent or stale.
  ///
  /// Staleness is judged against the on-demand TTL when an on-demand fetcher
  /// is attached, otherwise against the bulk TTL.
  pub fn needs_refresh(&self, key: &K) -> bool {
    self.inner.needs_refresh(key)
  }

  /// Fetch `key` from the origin and store it, whatever its current state.
  pub async fn refresh(&self, key: &K) -> Result<(), CacheError> {
    self.inner.refresh(key).instrument(self.span.clone()).await
  }

  /// Run one sweep now: purge stale entries and bulk refresh if due.
  pub async fn sweep(&self) {
    self.inner.sweep().instrument(self.span.clone()).await
  }

  async fn ensure_scheduled(&self) {
    let mut schedule = self.schedule.lock().await;
    if let Schedule::Scheduled(_) = *schedule {
      self.span.in_scope(|| debug!("Scheduler already running"));
      return;
    }

    self.sweep().await;

    // The task only holds a weak reference, so dropping the cache ends it
    // even if an abort races with a tick.
    let weak = Arc::downgrade(&self.inner);
    let span = self.span.clone();
    let scheduler = Scheduler::every(self.sweep_interval, move || {
      let weak = weak.clone();
      let span = span.clone();
      async move {
        match weak.upgrade() {
          Some(inner) => {
            inner.sweep().instrument(span).await;
            true
          }
          None => false,
        }
      }
    });

    self.span.in_scope(|| {
      debug!(interval = ?scheduler.period(), "Scheduler started");
    });
    *schedule = Schedule::Scheduled(scheduler);
  }
}

impl<K, V, S> Inner<K, V, S>
where
  K: Eq + Hash + Debug + Send + Sync + 'static,
  V: Send + Sync + 'static,
  S: Storage<K, CacheEntry<V>> + ?Sized + 'static,
{
  fn on_demand(&self) -> Option<Strategy<dyn OnDemandFetcher<K, V>>> {
    read(&self.on_demand).clone()
  }

  fn bulk(&self) -> Option<Strategy<dyn BulkFetcher<K, V>>> {
    read(&self.bulk).clone()
  }

  fn last_bulk_refresh(&self) -> Option<DateTime<Utc>> {
    *self
      .last_bulk_refresh
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
  }

  /// TTL a single entry is judged against.
  fn entry_ttl(&self) -> Duration {
    if let Some(on_demand) = self.on_demand() {
      return on_demand.ttl;
    }
    self.bulk().map(|bulk| bulk.ttl).unwrap_or(Duration::ZERO)
  }

  fn needs_refresh(&self, key: &K) -> bool {
    match self.storage.get(key) {
      Some(entry) => entry.is_stale(self.entry_ttl()),
      None => true,
    }
  }

  async fn get(&self, key: &K) -> Result<V, CacheError> {
    {
      let _gate = self.gate.read().await;
      if let Some(entry) = self.storage.get(key) {
        if !entry.is_stale(self.entry_ttl()) {
          return Ok(entry.value);
        }
      }
    }

    let value = self.fetch_item(key).await?;

    let _gate = self.gate.read().await;
    self.store_item(key, value);
    self
      .storage
      .get(key)
      .map(|entry| entry.value)
      .ok_or(CacheError::RecordNotFound)
  }

  async fn refresh(&self, key: &K) -> Result<(), CacheError> {
    let value = self.fetch_item(key).await?;

    let _gate = self.gate.read().await;
    self.store_item(key, value);
    Ok(())
  }

  /// Runs outside `gate`: a slow origin only holds up its own caller.
  async fn fetch_item(&self, key: &K) -> Result<V, CacheError> {
    let Some(on_demand) = self.on_demand() else {
      return Err(CacheError::NoFetcherConfigured);
    };

    debug!(key = ?key, "Refreshing record");
    on_demand
      .fetcher
      .fetch_by_key(key)
      .await
      .map_err(CacheError::FetchFailed)
  }

  /// Caller must hold `gate`.
  fn store_item(&self, key: &K, value: V) {
    if !self.storage.set(key, CacheEntry::new(value)) {
      warn!(key = ?key, "Could not store refreshed record");
    }
  }

  async fn sweep(&self) {
    let _sweeping = self.sweeping.lock().await;

    if let Some(on_demand) = self.on_demand() {
      self.remove_stale(on_demand.ttl).await;
    }

    if let Some(bulk) = self.bulk() {
      if self.bulk_due(bulk.ttl) {
        self.refresh_all(&bulk).await;
      }
    }
  }

  fn bulk_due(&self, ttl: Duration) -> bool {
    match self.last_bulk_refresh() {
      Some(last) => elapsed(last, Utc::now()) >= ttl,
      None => true,
    }
  }

  async fn remove_stale(&self, ttl: Duration) {
    let _gate = self.gate.write().await;
    let now = Utc::now();

    let mut removed = 0usize;
    for (key, entry) in self.storage.all() {
      if !entry.is_stale_at(ttl, now) {
        continue;
      }
      if self.storage.delete(&key) {
        removed += 1;
      } else {
        warn!(key = ?key, "Could not remove stale record");
      }
    }

    if removed > 0 {
      debug!(removed, "Removed stale records");
    }
  }

  async fn refresh_all(&self, bulk: &Strategy<dyn BulkFetcher<K, V>>) {
    info!("Refreshing all records");

    let latest: HashMap<K, V> = match bulk.fetcher.fetch_all().await {
      Ok(latest) => latest,
      Err(e) => {
        warn!(error = %e, "Bulk fetch failed, keeping cached records");
        return;
      }
    };

    let _gate = self.gate.write().await;
    if !self.storage.clear() {
      warn!("Could not empty cache when refreshing all");
    }

    let now = Utc::now();
    let count = latest.len();
    for (key, value) in latest {
      if !self.storage.set(&key, CacheEntry::captured(value, now)) {
        warn!(key = ?key, "Could not store record");
      }
    }

    *self
      .last_bulk_refresh
      .lock()
      .unwrap_or_else(PoisonError::into_inner) = Some(now);
    info!(count, "Cache refreshed");
  }
}

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
  lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
  lock.write().unwrap_or_else(PoisonError::into_inner)
}
