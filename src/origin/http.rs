use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::cache::{BulkFetcher, OnDemandFetcher};

/// JSON-over-HTTP origin.
///
/// - single key: `GET {base}/{key}`, body is any JSON value
/// - bulk: `GET {base}`, body is a JSON object of key to value
///
/// Every request is bounded by the configured timeout.
#[derive(Debug, Clone)]
pub struct HttpOrigin {
  client: reqwest::Client,
  base: Url,
}

impl HttpOrigin {
  pub fn new(base: &str, timeout: Duration) -> Result<Self> {
    let base = Url::parse(base).map_err(|e| eyre!("Invalid origin URL {}: {}", base, e))?;
    if base.cannot_be_a_base() {
      return Err(eyre!("Origin URL cannot have a path: {}", base));
    }

    let client = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client, base })
  }

  pub fn base(&self) -> &Url {
    &self.base
  }

  /// URL for a single key. The key is percent-encoded as one path segment.
  pub fn key_url(&self, key: &str) -> Url {
    let mut url = self.base.clone();
    if let Ok(mut segments) = url.path_segments_mut() {
      segments.pop_if_empty().push(key);
    }
    url
  }

  async fn get_json<T: serde::de::DeserializeOwned>(&self, url: Url) -> Result<T> {
    debug!(url = %url, "Fetching from origin");

    let response = self
      .client
      .get(url.clone())
      .send()
      .await
      .map_err(|e| eyre!("Request to {} failed: {}", url, e))?;

    let status = response.status();
    if !status.is_success() {
      return Err(eyre!("Origin returned {} for {}", status, url));
    }

    response
      .json()
      .await
      .map_err(|e| eyre!("Failed to decode response from {}: {}", url, e))
  }
}

#[async_trait]
impl OnDemandFetcher<String, Value> for HttpOrigin {
  async fn fetch_by_key(&self, key: &String) -> Result<Value> {
    self.get_json(self.key_url(key)).await
  }
}

#[async_trait]
impl BulkFetcher<String, Value> for HttpOrigin {
  async fn fetch_all(&self) -> Result<HashMap<String, Value>> {
    self.get_json(self.base.clone()).await
  }
}
