//! Tile coordinates in the Web Mercator / slippy map scheme.
//!
//! Provides conversion from latitude/longitude to tile coordinates and the
//! pyramid expansion used when seeding a view for offline use.

mod coord;

pub use coord::{to_tile_coords, TileCoord, MAX_LAT, MAX_ZOOM, MIN_LAT};

use serde::{Deserialize, Serialize};

/// Deepest pyramid one seed may expand, counted in zoom levels below the
/// apex. Eight levels is 87,381 tiles per layer.
pub const MAX_PYRAMID_DEPTH: u8 = 8;

/// The map view to seed: a center point and the zoom it is shown at.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct Viewport {
    pub lat: f64,
    pub lon: f64,
    pub zoom: u8,
}

impl Viewport {
    pub fn new(lat: f64, lon: f64, zoom: u8) -> Self {
        Self { lat, lon, zoom }
    }
}

/// Expand a point into a tile pyramid.
///
/// The tile containing (`lat`, `lon`) at `zoom_min` is the apex; every
/// descendant of that tile down to `zoom_max` is included. At zoom `z` the
/// apex covers a square of `2^(z - zoom_min)` tiles per side.
///
/// Tiles are ordered by zoom, then row, then column. An inverted range
/// yields an empty list.
pub fn pyramid(lat: f64, lon: f64, zoom_min: u8, zoom_max: u8) -> Vec<TileCoord> {
    let zoom_max = zoom_max.min(MAX_ZOOM);
    if zoom_min > zoom_max {
        return Vec::new();
    }

    let apex = to_tile_coords(lat, lon, zoom_min);
    let mut tiles = Vec::with_capacity(pyramid_len(zoom_min, zoom_max));

    for zoom in zoom_min..=zoom_max {
        let shift = u32::from(zoom - zoom_min);
        let side = 1u32 << shift;
        let first_row = apex.row << shift;
        let first_col = apex.col << shift;
        for row in first_row..first_row + side {
            for col in first_col..first_col + side {
                tiles.push(TileCoord { zoom, col, row });
            }
        }
    }

    tiles
}

/// Number of tiles `pyramid` produces for a zoom range.
pub fn pyramid_len(zoom_min: u8, zoom_max: u8) -> usize {
    if zoom_min > zoom_max {
        return 0;
    }
    (0..=u32::from(zoom_max - zoom_min))
        .map(|depth| 1usize << (2 * depth))
        .sum()
}
