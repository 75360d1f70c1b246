//! Offline cache manager.
//!
//! Runs seed, purge and usage scans over the registered layers one layer at
//! a time and publishes a `CacheStatus` after every step. Only one operation
//! may run at once; a second request is rejected rather than queued.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::snapshot::{Recorded, SnapshotStore};
use super::status::{
    done_message, emptying_message, progress_message, CacheStatus, CacheUsageSnapshot, Operation,
    MEASURING_MESSAGE,
};
use crate::config::ZoomBounds;
use crate::error::{CacheError, LayerError};
use crate::layer::{DownloadProgress, DownloadSummary, LayerRegistry};
use crate::tile::{Viewport, MAX_PYRAMID_DEPTH};

/// Result of seeding one layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerSeedReport {
    pub layer: String,
    pub summary: DownloadSummary,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedReport {
    pub layers: Vec<LayerSeedReport>,
    /// Usage after seeding; `None` when the follow-up scan failed
    pub usage: Option<CacheUsageSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurgeReport {
    pub layers: Vec<String>,
    /// Usage after purging; `None` when the follow-up scan failed
    pub usage: Option<CacheUsageSnapshot>,
}

struct RunningOperation {
    operation: Operation,
    cancel: CancellationToken,
}

/// Marks the manager busy for as long as it lives.
///
/// Dropping it, including when an operation future is dropped part way,
/// returns the manager to idle.
struct OperationGuard<'a> {
    manager: &'a OfflineCacheManager,
    cancel: CancellationToken,
}

impl Drop for OperationGuard<'_> {
    fn drop(&mut self) {
        *self.manager.lock_running() = None;
        self.manager.status.send_modify(|status| status.busy = None);
    }
}

pub struct OfflineCacheManager {
    layers: Arc<LayerRegistry>,
    zoom: ZoomBounds,
    status: watch::Sender<CacheStatus>,
    running: Mutex<Option<RunningOperation>>,
    store: Option<SnapshotStore>,
}

impl OfflineCacheManager {
    pub fn new(layers: Arc<LayerRegistry>, zoom: ZoomBounds) -> Self {
        let (status, _) = watch::channel(CacheStatus::default());
        Self {
            layers,
            zoom,
            status,
            running: Mutex::new(None),
            store: None,
        }
    }

    /// Persist committed snapshots to `store`, starting from the one it holds.
    pub fn with_snapshot_store(mut self, store: SnapshotStore) -> Self {
        match store.load() {
            Ok(Some(recorded)) => {
                debug!(files = recorded.data.file_count, "Loaded last usage snapshot");
                self.status.send_modify(|status| {
                    status.usage = recorded.data;
                    status.usage_computed_at = Some(recorded.recorded_at);
                });
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Failed to load usage snapshot"),
        }
        self.store = Some(store);
        self
    }

    /// Receive every status change.
    pub fn subscribe(&self) -> watch::Receiver<CacheStatus> {
        self.status.subscribe()
    }

    pub fn status(&self) -> CacheStatus {
        self.status.borrow().clone()
    }

    pub fn current_operation(&self) -> Option<Operation> {
        self.lock_running().as_ref().map(|running| running.operation)
    }

    /// Cancel the running operation. Returns false when idle.
    pub fn cancel(&self) -> bool {
        match self.lock_running().as_ref() {
            Some(running) => {
                info!(operation = %running.operation, "Cancelling cache operation");
                running.cancel.cancel();
                true
            }
            None => false,
        }
    }

    // =========================================================================
    // Operations
    // =========================================================================

    /// Download every layer's tiles for `viewport`, from its zoom down to the
    /// offline maximum. Tiles already cached are left alone.
    pub async fn seed_current_view(&self, viewport: Viewport) -> Result<SeedReport, CacheError> {
        let guard = self.begin(Operation::Seeding)?;
        let result = self.run_seed(viewport, &guard.cancel).await;
        self.finish(result)
    }

    /// Empty every layer's tile store.
    pub async fn purge_all(&self) -> Result<PurgeReport, CacheError> {
        let guard = self.begin(Operation::Purging)?;
        let result = self.run_purge(&guard.cancel).await;
        self.finish(result)
    }

    /// Sum every layer's disk usage and publish it as the new snapshot.
    pub async fn compute_usage(&self) -> Result<CacheUsageSnapshot, CacheError> {
        let guard = self.begin(Operation::ComputingUsage)?;
        let result = self.measure(&guard.cancel).await;
        self.finish(result)
    }

    async fn run_seed(
        &self,
        viewport: Viewport,
        cancel: &CancellationToken,
    ) -> Result<SeedReport, CacheError> {
        if !self.zoom.contains(viewport.zoom) {
            return Err(if viewport.zoom > self.zoom.max {
                CacheError::ZoomTooDeep {
                    zoom: viewport.zoom,
                    max: self.zoom.max,
                }
            } else {
                CacheError::ZoomTooShallow {
                    zoom: viewport.zoom,
                    min: self.zoom.min,
                }
            });
        }
        let depth = self.zoom.max - viewport.zoom;
        if depth > MAX_PYRAMID_DEPTH {
            return Err(CacheError::AreaTooLarge {
                zoom: viewport.zoom,
                depth,
                limit: MAX_PYRAMID_DEPTH,
            });
        }

        info!(
            lat = viewport.lat,
            lon = viewport.lon,
            zoom = viewport.zoom,
            max_zoom = self.zoom.max,
            layers = self.layers.len(),
            "Seeding current view"
        );

        let mut reports = Vec::with_capacity(self.layers.len());
        for layer in self.layers.iter() {
            if cancel.is_cancelled() {
                return Err(CacheError::Cancelled);
            }

            let name = layer.name();
            let tiles = layer.tile_set(viewport.lat, viewport.lon, viewport.zoom, self.zoom.max);
            debug!(layer = %name, tiles = tiles.len(), "Seeding layer");

            let on_progress = |progress: DownloadProgress| {
                self.set_busy(progress_message(name, progress));
            };

            match layer.download(&tiles, false, &on_progress, cancel).await {
                Ok(summary) => {
                    self.set_busy(done_message(name));
                    reports.push(LayerSeedReport {
                        layer: name.to_string(),
                        summary,
                    });
                }
                Err(LayerError::Cancelled) => return Err(CacheError::Cancelled),
                Err(source) => {
                    error!(layer = %name, error = %source, "Tile download failed");
                    return Err(CacheError::LayerDownloadFailed {
                        layer: name.to_string(),
                        source,
                    });
                }
            }
        }

        let usage = self.measure_after(cancel).await?;
        Ok(SeedReport {
            layers: reports,
            usage,
        })
    }

    async fn run_purge(&self, cancel: &CancellationToken) -> Result<PurgeReport, CacheError> {
        info!(layers = self.layers.len(), "Emptying tile caches");

        let mut emptied = Vec::with_capacity(self.layers.len());
        for layer in self.layers.iter() {
            if cancel.is_cancelled() {
                return Err(CacheError::Cancelled);
            }

            let name = layer.name();
            self.set_busy(emptying_message(name));

            match layer.purge().await {
                Ok(()) => emptied.push(name.to_string()),
                Err(LayerError::Cancelled) => return Err(CacheError::Cancelled),
                Err(source) => {
                    error!(layer = %name, error = %source, "Purge failed");
                    return Err(CacheError::LayerPurgeFailed {
                        layer: name.to_string(),
                        source,
                    });
                }
            }
        }

        let usage = self.measure_after(cancel).await?;
        Ok(PurgeReport {
            layers: emptied,
            usage,
        })
    }

    /// Scan every layer, then commit the totals in one update.
    async fn measure(&self, cancel: &CancellationToken) -> Result<CacheUsageSnapshot, CacheError> {
        self.set_busy(MEASURING_MESSAGE.to_string());

        let mut total = CacheUsageSnapshot::default();
        for layer in self.layers.iter() {
            if cancel.is_cancelled() {
                return Err(CacheError::Cancelled);
            }
            let usage = layer.disk_usage().await.map_err(|source| {
                warn!(layer = %layer.name(), error = %source, "Disk usage scan failed");
                CacheError::StorageUnavailable {
                    layer: layer.name().to_string(),
                    source,
                }
            })?;
            total.add(usage);
        }

        self.commit_usage(total);
        Ok(total)
    }

    /// Usage refresh at the end of a seed or purge. A failed scan does not
    /// fail the operation that preceded it; a cancel does.
    async fn measure_after(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Option<CacheUsageSnapshot>, CacheError> {
        match self.measure(cancel).await {
            Ok(usage) => Ok(Some(usage)),
            Err(CacheError::Cancelled) => Err(CacheError::Cancelled),
            Err(e) => {
                self.set_notice(&e);
                Ok(None)
            }
        }
    }

    // =========================================================================
    // State
    // =========================================================================

    fn begin(&self, operation: Operation) -> Result<OperationGuard<'_>, CacheError> {
        let cancel = CancellationToken::new();
        {
            let mut running = self.lock_running();
            if let Some(current) = running.as_ref().map(|r| r.operation) {
                drop(running);
                // The running operation owns the status; only the caller hears about this
                warn!(requested = %operation, running = %current, "Cache operation rejected");
                return Err(CacheError::OperationAlreadyInProgress(current));
            }
            *running = Some(RunningOperation {
                operation,
                cancel: cancel.clone(),
            });
        }

        self.status.send_modify(|status| {
            status.busy = Some(operation.label().to_string());
            status.notice = None;
        });
        Ok(OperationGuard {
            manager: self,
            cancel,
        })
    }

    fn finish<T>(&self, result: Result<T, CacheError>) -> Result<T, CacheError> {
        if let Err(ref e) = result {
            self.set_notice(e);
        }
        result
    }

    fn commit_usage(&self, usage: CacheUsageSnapshot) {
        let recorded = Recorded::new(usage);
        self.status.send_modify(|status| {
            status.usage = usage;
            status.usage_computed_at = Some(recorded.recorded_at);
        });
        info!(files = usage.file_count, bytes = usage.file_size_bytes, "Usage snapshot updated");

        if let Some(ref store) = self.store {
            if let Err(e) = store.save(&recorded) {
                warn!(error = %e, "Failed to save usage snapshot");
            }
        }
    }

    fn set_busy(&self, message: String) {
        self.status.send_modify(|status| status.busy = Some(message));
    }

    fn set_notice(&self, err: &CacheError) {
        let message = err.user_message();
        self.status.send_modify(|status| status.notice = Some(message));
    }

    fn lock_running(&self) -> MutexGuard<'_, Option<RunningOperation>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ============================================================================
// Tests
// ============================================================================
