//! Offline tile cache management.
//!
//! This module provides the `OfflineCacheManager`, which seeds, purges and
//! measures the tile stores of every registered layer, one layer at a time.
//! Progress and the aggregate disk usage are published as `CacheStatus`
//! values for a UI to display.
//!
//! The last committed usage snapshot can be persisted with a
//! `SnapshotStore` so that it is available before the first scan.

pub mod manager;
pub mod snapshot;
pub mod status;

#[cfg(test)]
mod testing;

pub use manager::{LayerSeedReport, OfflineCacheManager, PurgeReport, SeedReport};
pub use snapshot::{Recorded, SnapshotStore};
pub(crate) use snapshot::SNAPSHOT_FILE;
pub use status::{CacheStatus, CacheUsageSnapshot, Operation};
