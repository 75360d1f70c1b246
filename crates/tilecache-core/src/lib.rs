//! tilecache core - offline map tile caching.
//!
//! This crate contains the pieces shared by every tilecache front end:
//!
//! - `tile`: Web Mercator tile coordinates and pyramid expansion
//! - `layer`: the `TileLayer` capability, the ordered `LayerRegistry`,
//!   and the HTTP/filesystem implementation `HttpTileLayer`
//! - `cache`: the `OfflineCacheManager` that seeds, purges and measures
//!   caches one layer at a time, and the `CacheStatus` it publishes
//! - `config`: basemap definitions and offline zoom bounds
//! - `error`: typed errors for layers and cache operations

pub mod cache;
pub mod config;
pub mod error;
pub mod layer;
pub mod tile;
pub mod utils;

pub use cache::{CacheStatus, CacheUsageSnapshot, OfflineCacheManager, Operation, SnapshotStore};
pub use config::{BasemapLayer, Config, ZoomBounds};
pub use error::{CacheError, LayerError};
pub use layer::{DiskUsage, DownloadProgress, DownloadSummary, HttpTileLayer, LayerRegistry, TileLayer};
pub use tile::{TileCoord, Viewport};
