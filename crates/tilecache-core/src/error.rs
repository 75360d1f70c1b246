use thiserror::Error;

use crate::cache::Operation;
use crate::tile::TileCoord;

/// Failure reported by a single tile layer.
#[derive(Error, Debug)]
pub enum LayerError {
    #[error("Network error fetching {tile}: {source}")]
    Network {
        tile: TileCoord,
        #[source]
        source: reqwest::Error,
    },

    #[error("Tile server returned {status} for {tile}")]
    Status {
        tile: TileCoord,
        status: reqwest::StatusCode,
    },

    #[error("Rate limited fetching {tile} - gave up after retrying")]
    RateLimited { tile: TileCoord },

    #[error("Storage error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

/// Failure of an `OfflineCacheManager` operation.
///
/// Every variant is recoverable: the manager is idle again once one of
/// these has been returned.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Zoom level {zoom} is deeper than the offline cache maximum of {max}")]
    ZoomTooDeep { zoom: u8, max: u8 },

    #[error("Zoom level {zoom} is shallower than the offline cache minimum of {min}")]
    ZoomTooShallow { zoom: u8, min: u8 },

    #[error("Seeding from zoom {zoom} would expand {depth} levels; the limit is {limit}")]
    AreaTooLarge { zoom: u8, depth: u8, limit: u8 },

    #[error("Could not download tiles for {layer}: {source}")]
    LayerDownloadFailed {
        layer: String,
        #[source]
        source: LayerError,
    },

    #[error("Could not empty {layer}: {source}")]
    LayerPurgeFailed {
        layer: String,
        #[source]
        source: LayerError,
    },

    #[error("Could not read disk usage for {layer}: {source}")]
    StorageUnavailable {
        layer: String,
        #[source]
        source: LayerError,
    },

    #[error("{0} is already in progress")]
    OperationAlreadyInProgress(Operation),

    #[error("Operation cancelled")]
    Cancelled,
}

impl CacheError {
    /// Message suitable for showing to the person operating the map.
    pub fn user_message(&self) -> String {
        match self {
            CacheError::ZoomTooDeep { max, .. } => {
                format!("Zoom out to level {} or lower to cache this area", max)
            }
            CacheError::ZoomTooShallow { min, .. } => {
                format!("Zoom in to level {} or higher to cache this area", min)
            }
            CacheError::AreaTooLarge { zoom, depth, limit } => {
                format!(
                    "Too many tiles to cache from here. Zoom in to level {} or higher",
                    zoom + (depth - limit)
                )
            }
            CacheError::LayerDownloadFailed { .. } => {
                "Could not download tiles. Check your connection and try again.".to_string()
            }
            CacheError::LayerPurgeFailed { layer, .. } => {
                format!("Could not empty the {} cache", layer)
            }
            CacheError::StorageUnavailable { .. } => {
                "Could not read disk usage; showing the last known figures".to_string()
            }
            CacheError::OperationAlreadyInProgress(op) => {
                format!("{} is still running. Please wait for it to finish.", op.label())
            }
            CacheError::Cancelled => "Cancelled".to_string(),
        }
    }

    /// Whether the person can fix this by adjusting the map view.
    pub fn is_user_correctable(&self) -> bool {
        matches!(
            self,
            CacheError::ZoomTooDeep { .. }
                | CacheError::ZoomTooShallow { .. }
                | CacheError::AreaTooLarge { .. }
        )
    }
}
