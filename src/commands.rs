//! Subcommands of the `recache` binary.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use recache::cache::{CacheEntry, RecordCache};
use recache::origin::HttpOrigin;
use recache::storage::{MemoryStorage, RedisStorage, SqliteStorage, Storage};

use crate::config::{Backend, Config, StorageConfig};

pub type DynStorage = dyn Storage<String, CacheEntry<Value>>;

/// Open the configured backend.
pub fn open_storage(config: &StorageConfig) -> Result<Arc<DynStorage>> {
  let storage: Arc<DynStorage> = match config.backend {
    Backend::Memory => Arc::new(MemoryStorage::new()),
    Backend::Sqlite => {
      let path = match &config.path {
        Some(p) => p.clone(),
        None => SqliteStorage::<String, CacheEntry<Value>>::default_path()?,
      };
      info!(path = %path.display(), namespace = %config.namespace, "Opening SQLite cache");
      Arc::new(SqliteStorage::open(&path, &config.namespace)?)
    }
    Backend::Redis => {
      let url = config
        .redis_url
        .as_deref()
        .ok_or_else(|| eyre!("storage.redis_url is not set"))?;
      info!(hash_key = %config.hash_key, "Opening Redis cache");
      Arc::new(
        RedisStorage::open(url, &config.hash_key)?
          .with_timeout(Duration::from_secs(config.timeout_secs)),
      )
    }
  };
  Ok(storage)
}

/// Build an engine with the configured origin attached.
async fn attach_origin(
  config: &Config,
  storage: Arc<DynStorage>,
) -> Result<RecordCache<String, Value, DynStorage>> {
  let origin_config = config.require_origin()?;
  let origin = Arc::new(HttpOrigin::new(
    &origin_config.url,
    Duration::from_secs(origin_config.timeout_secs),
  )?);

  let cache = RecordCache::new(storage)
    .with_name("recache")
    .with_sweep_interval(config.refresh.sweep_interval());

  cache
    .set_on_demand_fetcher(origin.clone(), config.refresh.on_demand_ttl())
    .await;
  if origin_config.bulk {
    cache.set_bulk_fetcher(origin, config.refresh.bulk_ttl()).await;
  }
  Ok(cache)
}

/// Print each key's value, fetching from the origin when needed.
pub async fn get(config: &Config, storage: Arc<DynStorage>, keys: &[String]) -> Result<()> {
  let cache = attach_origin(config, storage).await?;

  let mut failed = 0;
  for key in keys {
    match cache.get(key).await {
      Ok(value) => println!("{}\t{}", key, value),
      Err(e) => {
        failed += 1;
        eprintln!("{}\terror: {}", key, e);
      }
    }
  }

  if failed > 0 {
    return Err(eyre!("{} of {} keys could not be read", failed, keys.len()));
  }
  Ok(())
}

/// List stored entries with their age.
pub fn entries(config: &Config, storage: &DynStorage) -> Result<()> {
  let lines = render_entries(storage.all(), config.refresh.on_demand_ttl(), Utc::now());
  if lines.is_empty() {
    println!("(empty)");
  }
  for line in lines {
    println!("{}", line);
  }
  Ok(())
}

fn render_entries(
  entries: std::collections::HashMap<String, CacheEntry<Value>>,
  ttl: Duration,
  now: DateTime<Utc>,
) -> Vec<String> {
  let mut entries: Vec<_> = entries.into_iter().collect();
  entries.sort_by(|a, b| a.0.cmp(&b.0));

  entries
    .into_iter()
    .map(|(key, entry)| {
      let age = (now - entry.captured_at).num_seconds().max(0);
      let state = if entry.is_stale_at(ttl, now) { "stale" } else { "fresh" };
      format!("{}\t{}s\t{}\t{}", key, age, state, entry.value)
    })
    .collect()
}

pub fn clear(storage: &DynStorage) -> Result<()> {
  if !storage.clear() {
    return Err(eyre!("Failed to clear the cache"));
  }
  info!("Cache cleared");
  Ok(())
}

/// Keep the configured strategies running until Ctrl-C.
pub async fn watch(config: &Config, storage: Arc<DynStorage>) -> Result<()> {
  let cache = attach_origin(config, storage).await?;
  if config.require_origin()?.bulk && cache.last_bulk_refresh().is_none() {
    warn!("Initial bulk refresh failed, will retry on the next sweep");
  }
  info!(
    interval_secs = config.refresh.sweep_interval_secs,
    "Watching, press Ctrl-C to stop"
  );

  tokio::signal::ctrl_c()
    .await
    .map_err(|e| eyre!("Failed to listen for Ctrl-C: {}", e))?;

  info!(entries = cache.storage().all().len(), "Stopping");
  Ok(())
}
