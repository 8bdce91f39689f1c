//! Cache entries and staleness.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A cached value paired with the moment it was captured from the origin.
///
/// Entries are replaced wholesale on refresh, never updated in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry<V> {
  /// The cached value
  pub value: V,
  /// When the value was fetched
  pub captured_at: DateTime<Utc>,
}

impl<V> CacheEntry<V> {
  /// Create an entry captured now.
  pub fn new(value: V) -> Self {
    Self::captured(value, Utc::now())
  }

  /// Create an entry with an explicit capture time.
  pub fn captured(value: V, captured_at: DateTime<Utc>) -> Self {
    Self { value, captured_at }
  }

  /// Time elapsed since capture. Zero for entries captured in the future.
  pub fn age(&self) -> Duration {
    elapsed(self.captured_at, Utc::now())
  }

  /// Whether the entry is at least `ttl` old.
  ///
  /// The boundary counts as stale, so a zero `ttl` makes every entry stale.
  pub fn is_stale(&self, ttl: Duration) -> bool {
    self.is_stale_at(ttl, Utc::now())
  }

  /// [`is_stale`](Self::is_stale) evaluated at `now`.
  pub fn is_stale_at(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
    elapsed(self.captured_at, now) >= ttl
  }
}

/// Non-negative duration between `since` and `now`.
pub(crate) fn elapsed(since: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
  (now - since).to_std().unwrap_or(Duration::ZERO)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_fresh_entry_is_not_stale() {
    let entry = CacheEntry::new(1);
    assert!(!entry.is_stale(Duration::from_secs(60)));
  }

  #[test]
  fn test_old_entry_is_stale() {
    let entry = CacheEntry::captured(1, Utc::now() - chrono::Duration::hours(1));
    assert!(entry.is_stale(Duration::from_secs(10)));
    assert!(!entry.is_stale(Duration::from_secs(2 * 3600)));
  }

  #[test]
  fn test_exact_boundary_is_stale() {
    let captured_at = Utc::now();
    let entry = CacheEntry::captured("v", captured_at);
    let now = captured_at + chrono::Duration::seconds(30);

    assert!(entry.is_stale_at(Duration::from_secs(30), now));
    assert!(!entry.is_stale_at(Duration::from_secs(31), now));
  }

  #[test]
  fn test_zero_ttl_is_always_stale() {
    let captured_at = Utc::now();
    let entry = CacheEntry::captured("v", captured_at);
    assert!(entry.is_stale_at(Duration::ZERO, captured_at));
  }

  #[test]
  fn test_future_capture_has_zero_age() {
    let entry = CacheEntry::captured("v", Utc::now() + chrono::Duration::hours(1));
    assert_eq!(entry.age(), Duration::ZERO);
    assert!(!entry.is_stale(Duration::from_secs(1)));
  }
}
