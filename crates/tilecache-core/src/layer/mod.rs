//! Tile layer capability.
//!
//! A `TileLayer` is one offline-capable basemap. The cache manager only ever
//! talks to layers through this trait, so storage and transport stay behind
//! it. `HttpTileLayer` is the bundled implementation; `LayerRegistry` keeps
//! layers in registration order.

pub mod http;
pub mod registry;

pub use http::HttpTileLayer;
pub use registry::LayerRegistry;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::LayerError;
use crate::tile::{self, TileCoord};

/// Progress after one tile of a download has settled.
///
/// `done` is the zero-based index of the tile that just finished, so the
/// last report of a download has `done == total - 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadProgress {
    pub done: usize,
    pub total: usize,
}

impl DownloadProgress {
    /// Tiles finished so far, counting from one.
    pub fn completed(&self) -> usize {
        self.done + 1
    }

    /// Rounded completion percentage.
    pub fn percent(&self) -> u32 {
        if self.total == 0 {
            return 100;
        }
        (self.completed() as f64 * 100.0 / self.total as f64).round() as u32
    }
}

/// Outcome of a completed layer download.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DownloadSummary {
    pub total: usize,
    /// Tiles fetched from the tile server
    pub fetched: usize,
    /// Tiles already on disk and left alone
    pub skipped: usize,
}

/// Files and bytes a layer currently occupies on disk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskUsage {
    pub file_count: u64,
    pub file_size_bytes: u64,
}

/// Progress callback handed to `TileLayer::download`.
pub type ProgressFn<'a> = &'a (dyn Fn(DownloadProgress) + Send + Sync);

/// One basemap's offline tile store.
#[async_trait]
pub trait TileLayer: Send + Sync {
    /// Unique layer name, used as the registry key and in status messages.
    fn name(&self) -> &str;

    /// Tiles covering a point across a zoom range.
    ///
    /// Must be deterministic for the same inputs.
    fn tile_set(&self, lat: f64, lon: f64, zoom_min: u8, zoom_max: u8) -> Vec<TileCoord> {
        tile::pyramid(lat, lon, zoom_min, zoom_max)
    }

    /// Download `tiles` into the store.
    ///
    /// Calls `on_progress` once per settled tile, in completion order, and
    /// returns once every tile has settled or the first failure occurs.
    /// With `overwrite == false`, tiles already stored are skipped. The
    /// cancellation token is checked between tiles.
    async fn download(
        &self,
        tiles: &[TileCoord],
        overwrite: bool,
        on_progress: ProgressFn<'_>,
        cancel: &CancellationToken,
    ) -> Result<DownloadSummary, LayerError>;

    /// Delete every stored tile.
    async fn purge(&self) -> Result<(), LayerError>;

    /// Current on-disk footprint.
    async fn disk_usage(&self) -> Result<DiskUsage, LayerError>;
}
