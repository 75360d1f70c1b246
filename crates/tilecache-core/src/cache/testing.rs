//! In-memory `TileLayer` used by the manager tests.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{watch, Notify};
use tokio_util::sync::CancellationToken;

use super::status::CacheStatus;
use crate::error::LayerError;
use crate::layer::{DiskUsage, DownloadProgress, DownloadSummary, ProgressFn, TileLayer};
use crate::tile::TileCoord;

const BYTES_PER_TILE: u64 = 100;

pub type SharedLog = Arc<Mutex<Vec<String>>>;

#[derive(Default)]
pub struct FakeLayer {
    name: String,
    log: SharedLog,
    stored: Mutex<HashSet<TileCoord>>,
    downloads: Mutex<Vec<(usize, bool)>>,
    purges: Mutex<usize>,
    fixed_tiles: Option<u32>,
    usage: Mutex<Option<DiskUsage>>,
    usage_failing: Mutex<bool>,
    fail_download: bool,
    fail_purge: bool,
    gate: Option<Arc<Notify>>,
    usage_gate: Option<Arc<Notify>>,
    observer: Mutex<Option<watch::Receiver<CacheStatus>>>,
    observed: Mutex<Vec<String>>,
}

impl FakeLayer {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            ..Default::default()
        })
    }

    pub fn shared_log() -> SharedLog {
        Arc::new(Mutex::new(Vec::new()))
    }

    pub fn with_log(self: Arc<Self>, log: &SharedLog) -> Arc<Self> {
        Self::rebuild(self, |layer| layer.log = Arc::clone(log))
    }

    /// Report exactly `count` tiles regardless of the viewport.
    pub fn with_fixed_tiles(self: Arc<Self>, count: u32) -> Arc<Self> {
        Self::rebuild(self, |layer| layer.fixed_tiles = Some(count))
    }

    pub fn with_usage(self: Arc<Self>, usage: DiskUsage) -> Arc<Self> {
        Self::rebuild(self, |layer| layer.usage = Mutex::new(Some(usage)))
    }

    /// Block each download until `gate` is notified.
    pub fn with_gate(self: Arc<Self>, gate: &Arc<Notify>) -> Arc<Self> {
        Self::rebuild(self, |layer| layer.gate = Some(Arc::clone(gate)))
    }

    /// Block each usage scan until `gate` is notified.
    pub fn with_usage_gate(self: Arc<Self>, gate: &Arc<Notify>) -> Arc<Self> {
        Self::rebuild(self, |layer| layer.usage_gate = Some(Arc::clone(gate)))
    }

    pub fn failing_download(self: Arc<Self>) -> Arc<Self> {
        Self::rebuild(self, |layer| layer.fail_download = true)
    }

    pub fn failing_purge(self: Arc<Self>) -> Arc<Self> {
        Self::rebuild(self, |layer| layer.fail_purge = true)
    }

    fn rebuild(layer: Arc<Self>, change: impl FnOnce(&mut Self)) -> Arc<Self> {
        let mut layer = Arc::try_unwrap(layer).unwrap_or_else(|_| panic!("layer already shared"));
        change(&mut layer);
        Arc::new(layer)
    }

    pub fn set_usage(&self, usage: DiskUsage) {
        *self.usage.lock().unwrap() = Some(usage);
    }

    pub fn set_usage_failing(&self, failing: bool) {
        *self.usage_failing.lock().unwrap() = failing;
    }

    /// Record the manager's busy text at download start and after each tile.
    pub fn observe(&self, receiver: watch::Receiver<CacheStatus>) {
        *self.observer.lock().unwrap() = Some(receiver);
    }

    pub fn observed(&self) -> Vec<String> {
        self.observed.lock().unwrap().clone()
    }

    /// `(tile count, overwrite)` per download call.
    pub fn downloads(&self) -> Vec<(usize, bool)> {
        self.downloads.lock().unwrap().clone()
    }

    pub fn purges(&self) -> usize {
        *self.purges.lock().unwrap()
    }

    fn record(&self, event: &str) {
        self.log.lock().unwrap().push(format!("{}:{}", event, self.name));
    }

    fn snapshot_busy(&self) {
        let busy = self
            .observer
            .lock()
            .unwrap()
            .as_ref()
            .and_then(|rx| rx.borrow().busy.clone());
        if let Some(busy) = busy {
            self.observed.lock().unwrap().push(busy);
        }
    }
}

#[async_trait]
impl TileLayer for FakeLayer {
    fn name(&self) -> &str {
        &self.name
    }

    fn tile_set(&self, lat: f64, lon: f64, zoom_min: u8, zoom_max: u8) -> Vec<TileCoord> {
        match self.fixed_tiles {
            Some(count) => (0..count)
                .map(|col| TileCoord { zoom: zoom_min, col, row: 0 })
                .collect(),
            None => crate::tile::pyramid(lat, lon, zoom_min, zoom_max),
        }
    }

    async fn download(
        &self,
        tiles: &[TileCoord],
        overwrite: bool,
        on_progress: ProgressFn<'_>,
        _cancel: &CancellationToken,
    ) -> Result<DownloadSummary, LayerError> {
        self.record("download:start");
        self.downloads.lock().unwrap().push((tiles.len(), overwrite));
        self.snapshot_busy();

        if let Some(ref gate) = self.gate {
            gate.notified().await;
        }
        if self.fail_download {
            return Err(LayerError::Other("tile server unreachable".to_string()));
        }

        let mut summary = DownloadSummary {
            total: tiles.len(),
            ..Default::default()
        };
        for (done, tile) in tiles.iter().enumerate() {
            let inserted = {
                let mut stored = self.stored.lock().unwrap();
                if overwrite {
                    stored.insert(*tile);
                    true
                } else {
                    stored.insert(*tile)
                }
            };
            if inserted {
                summary.fetched += 1;
            } else {
                summary.skipped += 1;
            }
            on_progress(DownloadProgress {
                done,
                total: tiles.len(),
            });
            self.snapshot_busy();
        }

        self.record("download:end");
        Ok(summary)
    }

    async fn purge(&self) -> Result<(), LayerError> {
        self.record("purge");
        if self.fail_purge {
            return Err(LayerError::Other("store locked".to_string()));
        }
        self.stored.lock().unwrap().clear();
        *self.usage.lock().unwrap() = None;
        *self.purges.lock().unwrap() += 1;
        Ok(())
    }

    async fn disk_usage(&self) -> Result<DiskUsage, LayerError> {
        self.record("usage");
        if let Some(ref gate) = self.usage_gate {
            gate.notified().await;
        }
        if *self.usage_failing.lock().unwrap() {
            return Err(LayerError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "storage unavailable",
            )));
        }
        if let Some(usage) = *self.usage.lock().unwrap() {
            return Ok(usage);
        }
        let count = self.stored.lock().unwrap().len() as u64;
        Ok(DiskUsage {
            file_count: count,
            file_size_bytes: count * BYTES_PER_TILE,
        })
    }
}
