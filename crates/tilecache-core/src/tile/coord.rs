use std::f64::consts::PI;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Web Mercator valid latitude range
pub const MIN_LAT: f64 = -85.05112878;
pub const MAX_LAT: f64 = 85.05112878;

/// Deepest zoom level any layer may cache
pub const MAX_ZOOM: u8 = 20;

/// One raster tile: zoom level, column (x) and row (y).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileCoord {
    pub zoom: u8,
    /// X coordinate (east-west), 0 at west
    pub col: u32,
    /// Y coordinate (north-south), 0 at north
    pub row: u32,
}

impl fmt::Display for TileCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.zoom, self.col, self.row)
    }
}

/// Convert a point to the tile containing it at `zoom`.
///
/// Latitude is clamped to the Web Mercator range and longitude to
/// [-180, 180], so every input maps to a tile on the grid.
pub fn to_tile_coords(lat: f64, lon: f64, zoom: u8) -> TileCoord {
    let zoom = zoom.min(MAX_ZOOM);
    let lat = lat.clamp(MIN_LAT, MAX_LAT);
    let lon = lon.clamp(-180.0, 180.0);

    let n = f64::from(1u32 << zoom);
    let last = (1u32 << zoom) - 1;

    let col = ((lon + 180.0) / 360.0 * n) as u32;

    let lat_rad = lat.to_radians();
    let row = ((1.0 - lat_rad.tan().asinh() / PI) / 2.0 * n).max(0.0) as u32;

    TileCoord {
        zoom,
        col: col.min(last),
        row: row.min(last),
    }
}
