//! Read-through record cache with per-entry TTLs.
//!
//! A [`RecordCache`] sits in front of a slow or rate-limited origin. Reads are
//! answered from a pluggable [`Storage`] backend and refreshed on demand when
//! an entry is missing or stale; a background sweep purges stale entries and
//! periodically reloads the whole data set from a bulk source.

pub mod cache;
pub mod error;
pub mod origin;
pub mod storage;

pub use cache::{
  BulkFetcher, CacheEntry, KeylessFetcher, KeylessRecordCache, OnDemandFetcher, RecordCache,
};
pub use error::CacheError;
pub use storage::Storage;
