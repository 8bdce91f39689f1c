use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use recache::cache::DEFAULT_INTERVAL;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub storage: StorageConfig,
  pub origin: Option<OriginConfig>,
  #[serde(default)]
  pub refresh: RefreshConfig,
  #[serde(default)]
  pub log: LogConfig,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
  /// In-process table, lost on exit
  Memory,
  /// SQLite file shared between runs
  #[default]
  Sqlite,
  /// Redis hash
  Redis,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
  pub backend: Backend,
  /// SQLite database file (defaults to the platform data dir)
  pub path: Option<PathBuf>,
  /// SQLite namespace
  pub namespace: String,
  pub redis_url: Option<String>,
  /// Redis hash holding the entries
  pub hash_key: String,
  /// Redis connect/read/write timeout
  pub timeout_secs: u64,
}

impl Default for StorageConfig {
  fn default() -> Self {
    Self {
      backend: Backend::default(),
      path: None,
      namespace: "default".to_string(),
      redis_url: None,
      hash_key: "recache".to_string(),
      timeout_secs: 2,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OriginConfig {
  /// Base URL; keys are fetched from `{url}/{key}`
  pub url: String,
  #[serde(default = "default_origin_timeout")]
  pub timeout_secs: u64,
  /// Also use `GET {url}` as the bulk source
  #[serde(default)]
  pub bulk: bool,
}

fn default_origin_timeout() -> u64 {
  10
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RefreshConfig {
  pub on_demand_ttl_secs: u64,
  pub bulk_ttl_secs: u64,
  pub sweep_interval_secs: u64,
}

impl Default for RefreshConfig {
  fn default() -> Self {
    Self {
      on_demand_ttl_secs: 300,
      bulk_ttl_secs: 3600,
      sweep_interval_secs: DEFAULT_INTERVAL.as_secs(),
    }
  }
}

impl RefreshConfig {
  pub fn on_demand_ttl(&self) -> Duration {
    Duration::from_secs(self.on_demand_ttl_secs)
  }

  pub fn bulk_ttl(&self) -> Duration {
    Duration::from_secs(self.bulk_ttl_secs)
  }

  pub fn sweep_interval(&self) -> Duration {
    Duration::from_secs(self.sweep_interval_secs)
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
  /// Filter used when RUST_LOG is not set
  pub level: String,
  /// Also write logs to daily files with this path prefix
  pub file: Option<PathBuf>,
}

impl Default for LogConfig {
  fn default() -> Self {
    Self {
      level: "info".to_string(),
      file: None,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./recache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/recache/config.yaml
  ///
  /// Without an explicit path and with no file found, defaults are used.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    let mut config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Config::default(),
    };
    config.apply_env();
    config.validate()?;
    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("recache.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("recache").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    Ok(serde_yaml::from_str(contents)?)
  }

  /// RECACHE_REDIS_URL overrides storage.redis_url.
  fn apply_env(&mut self) {
    if let Ok(url) = std::env::var("RECACHE_REDIS_URL") {
      self.storage.redis_url = Some(url);
    }
  }

  fn validate(&self) -> Result<()> {
    if self.storage.backend == Backend::Redis && self.storage.redis_url.is_none() {
      return Err(eyre!(
        "Redis backend needs storage.redis_url or the RECACHE_REDIS_URL environment variable"
      ));
    }
    if self.refresh.sweep_interval_secs == 0 {
      return Err(eyre!("refresh.sweep_interval_secs must be at least 1"));
    }
    Ok(())
  }

  /// The origin, for commands that fetch.
  pub fn require_origin(&self) -> Result<&OriginConfig> {
    self
      .origin
      .as_ref()
      .ok_or_else(|| eyre!("No origin configured. Add an `origin.url` to the config file."))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_defaults_from_empty_document() {
    let config = Config::parse("{}").unwrap();
    assert_eq!(config.storage.backend, Backend::Sqlite);
    assert_eq!(config.storage.namespace, "default");
    assert_eq!(config.refresh.sweep_interval(), DEFAULT_INTERVAL);
    assert!(config.origin.is_none());
    assert!(config.require_origin().is_err());
  }

  #[test]
  fn test_full_document() {
    let config = Config::parse(
      r#"
storage:
  backend: redis
  redis_url: redis://127.0.0.1/
  hash_key: prices
origin:
  url: https://example.com/prices
  bulk: true
refresh:
  on_demand_ttl_secs: 30
  bulk_ttl_secs: 600
log:
  level: debug
  file: /tmp/recache.log
"#,
    )
    .unwrap();

    assert_eq!(config.storage.backend, Backend::Redis);
    assert_eq!(config.storage.hash_key, "prices");
    assert_eq!(config.storage.timeout_secs, 2);
    let origin = config.require_origin().unwrap();
    assert!(origin.bulk);
    assert_eq!(origin.timeout_secs, 10);
    assert_eq!(config.refresh.on_demand_ttl(), Duration::from_secs(30));
    assert_eq!(config.refresh.bulk_ttl(), Duration::from_secs(600));
    assert_eq!(config.log.level, "debug");
    assert!(config.validate().is_ok());
  }

  #[test]
  fn test_unknown_backend_rejected() {
    assert!(Config::parse("storage:\n  backend: etcd\n").is_err());
  }

  #[test]
  fn test_redis_without_url_is_invalid() {
    let config = Config::parse("storage:\n  backend: redis\n").unwrap();
    assert!(config.validate().is_err());
  }

  #[test]
  fn test_zero_sweep_interval_is_invalid() {
    let config = Config::parse("refresh:\n  sweep_interval_secs: 0\n").unwrap();
    assert!(config.validate().is_err());
  }

  #[test]
  fn test_explicit_missing_path() {
    let err = Config::load(Some(Path::new("/nonexistent/recache.yaml"))).unwrap_err();
    assert!(err.to_string().contains("Config file not found"));
  }

  #[test]
  fn test_load_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.yaml");
    std::fs::write(&path, "storage:\n  backend: memory\n").unwrap();

    let config = Config::load(Some(&path)).unwrap();
    assert_eq!(config.storage.backend, Backend::Memory);
  }
}
