//! Error types returned by the cache engine.

use color_eyre::eyre::Report;

/// Errors surfaced by a synchronous read through the cache.
///
/// Background sweeps never produce these; their failures are logged and the
/// previous store contents are kept.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
  /// The fetch strategy returned an error. The origin's report is carried
  /// unchanged.
  #[error("fetch failed: {0}")]
  FetchFailed(Report),

  /// A refresh was needed but no on-demand fetcher is attached.
  #[error("value not in cache and no on-demand fetcher is configured")]
  NoFetcherConfigured,

  /// The record was still absent from storage after a successful refresh.
  #[error("record not in cache after refresh")]
  RecordNotFound,
}

impl CacheError {
  /// The origin's error, for [`CacheError::FetchFailed`].
  pub fn fetch_error(&self) -> Option<&Report> {
    match self {
      CacheError::FetchFailed(report) => Some(report),
      _ => None,
    }
  }
}
