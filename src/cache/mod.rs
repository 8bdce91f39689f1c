//! Read-through record cache with TTL-based staleness.
//!
//! - [`RecordCache`] answers reads from a [`Storage`](crate::storage::Storage)
//!   and refreshes absent or stale entries through an [`OnDemandFetcher`]
//! - a background sweep purges stale entries and periodically replaces the
//!   whole store from a [`BulkFetcher`]
//! - [`KeylessRecordCache`] covers the single global value case

mod entry;
mod keyless;
mod record;
mod scheduler;
mod traits;

pub use entry::CacheEntry;
pub use keyless::{BulkAdapter, KeylessRecordCache, OnDemandAdapter};
pub use record::RecordCache;
pub use scheduler::{Scheduler, DEFAULT_INTERVAL, MIN_INTERVAL};
pub use traits::{BulkFetcher, KeylessFetcher, OnDemandFetcher};
