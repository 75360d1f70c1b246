//! Application configuration management.
//!
//! This module handles loading and saving the tilecache configuration:
//! the basemap layers available for offline use, the zoom range the
//! offline cache covers, and where tiles are stored.
//!
//! Configuration is stored at `~/.config/tilecache/config.json`.

use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::cache::SNAPSHOT_FILE;
use crate::tile::{MAX_PYRAMID_DEPTH, MAX_ZOOM};

/// Application name used for config/cache directory paths
const APP_NAME: &str = "tilecache";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Environment variable overriding the tile cache root
pub const CACHE_DIR_ENV: &str = "TILECACHE_CACHE_DIR";

const DEFAULT_OFFLINE_MIN_ZOOM: u8 = 10;
const DEFAULT_OFFLINE_MAX_ZOOM: u8 = 16;
const DEFAULT_FOLLOW_ZOOM: u8 = 14;

/// Inclusive zoom range the offline cache is allowed to seed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoomBounds {
    pub min: u8,
    pub max: u8,
}

impl ZoomBounds {
    pub fn new(min: u8, max: u8) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, zoom: u8) -> bool {
        (self.min..=self.max).contains(&zoom)
    }
}

impl Default for ZoomBounds {
    fn default() -> Self {
        Self::new(DEFAULT_OFFLINE_MIN_ZOOM, DEFAULT_OFFLINE_MAX_ZOOM)
    }
}

/// One offline-cacheable map source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasemapLayer {
    pub name: String,
    /// Tile URL with `{s}`, `{z}`, `{x}` and `{y}` placeholders
    pub url_template: String,
    #[serde(default = "default_subdomains")]
    pub subdomains: Vec<String>,
    /// Folder under the cache root; defaults to the layer name
    #[serde(default)]
    pub storage_folder: Option<String>,
    #[serde(default)]
    pub min_zoom: u8,
    #[serde(default = "default_layer_max_zoom")]
    pub max_zoom: u8,
}

fn default_subdomains() -> Vec<String> {
    vec!["a".to_string(), "b".to_string(), "c".to_string()]
}

fn default_layer_max_zoom() -> u8 {
    MAX_ZOOM
}

impl BasemapLayer {
    pub fn new(name: &str, url_template: &str) -> Self {
        Self {
            name: name.to_string(),
            url_template: url_template.to_string(),
            subdomains: default_subdomains(),
            storage_folder: None,
            min_zoom: 0,
            max_zoom: MAX_ZOOM,
        }
    }

    pub fn storage_folder(&self) -> &str {
        self.storage_folder.as_deref().unwrap_or(&self.name)
    }

    /// The storage folder must name a single directory directly under the
    /// cache root. Purging removes that directory recursively.
    pub fn check_storage_folder(&self) -> Result<()> {
        let folder = self.storage_folder();
        let mut components = Path::new(folder).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) if folder != SNAPSHOT_FILE => Ok(()),
            _ => bail!(
                "Basemap '{}' has storage folder '{}'; it must be a plain folder name inside the cache directory",
                self.name,
                folder
            ),
        }
    }
}

/// The stock basemap list: OpenStreetMap plus ArcGIS Online topo and imagery.
pub fn default_basemaps() -> Vec<BasemapLayer> {
    vec![
        BasemapLayer::new("osm", "https://{s}.tile.openstreetmap.org/{z}/{x}/{y}.png"),
        BasemapLayer::new(
            "esritopo",
            "https://server.arcgisonline.com/ArcGIS/rest/services/World_Topo_Map/MapServer/tile/{z}/{y}/{x}",
        ),
        BasemapLayer::new(
            "esriimagery",
            "https://server.arcgisonline.com/ArcGIS/rest/services/World_Imagery/MapServer/tile/{z}/{y}/{x}",
        ),
    ]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub offline_cache_zoom: ZoomBounds,
    #[serde(default = "default_basemaps")]
    pub basemaps: Vec<BasemapLayer>,
    #[serde(default)]
    pub starting_basemap: Option<String>,
    /// Zoom used when centering the map on the device's position
    #[serde(default = "default_follow_zoom")]
    pub map_follow_zoom: u8,
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
}

fn default_follow_zoom() -> u8 {
    DEFAULT_FOLLOW_ZOOM
}

impl Default for Config {
    fn default() -> Self {
        Self {
            offline_cache_zoom: ZoomBounds::default(),
            basemaps: default_basemaps(),
            starting_basemap: Some("esritopo".to_string()),
            map_follow_zoom: DEFAULT_FOLLOW_ZOOM,
            cache_dir: None,
        }
    }
}

impl Config {
    /// Load from the default location, falling back to defaults if absent.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let config: Self = if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Root folder for tile storage.
    ///
    /// `TILECACHE_CACHE_DIR` wins over the `cache_dir` field, which wins over
    /// the platform cache directory.
    pub fn cache_dir(&self) -> Result<PathBuf> {
        if let Ok(dir) = std::env::var(CACHE_DIR_ENV) {
            if !dir.is_empty() {
                return Ok(PathBuf::from(dir));
            }
        }
        if let Some(ref dir) = self.cache_dir {
            return Ok(dir.clone());
        }
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    pub fn validate(&self) -> Result<()> {
        let zoom = self.offline_cache_zoom;
        if zoom.min > zoom.max {
            bail!(
                "offline_cache_zoom.min ({}) is greater than offline_cache_zoom.max ({})",
                zoom.min,
                zoom.max
            );
        }
        if zoom.max > MAX_ZOOM {
            bail!("offline_cache_zoom.max ({}) exceeds {}", zoom.max, MAX_ZOOM);
        }
        if zoom.max - zoom.min > MAX_PYRAMID_DEPTH {
            bail!(
                "offline_cache_zoom spans {} levels ({}-{}); at most {} are allowed",
                zoom.max - zoom.min,
                zoom.min,
                zoom.max,
                MAX_PYRAMID_DEPTH
            );
        }

        let mut seen = HashSet::new();
        let mut folders = HashSet::new();
        for basemap in &self.basemaps {
            if basemap.name.trim().is_empty() {
                bail!("Basemap with an empty name");
            }
            if !seen.insert(basemap.name.as_str()) {
                bail!("Basemap '{}' is defined more than once", basemap.name);
            }
            basemap.check_storage_folder()?;
            if !folders.insert(basemap.storage_folder()) {
                bail!(
                    "Basemap '{}' shares storage folder '{}' with another basemap",
                    basemap.name,
                    basemap.storage_folder()
                );
            }
            if basemap.min_zoom > basemap.max_zoom {
                bail!(
                    "Basemap '{}' has min_zoom {} above max_zoom {}",
                    basemap.name,
                    basemap.min_zoom,
                    basemap.max_zoom
                );
            }
            if basemap.url_template.contains("{s}") && basemap.subdomains.is_empty() {
                bail!("Basemap '{}' uses {{s}} but lists no subdomains", basemap.name);
            }
        }

        if let Some(ref start) = self.starting_basemap {
            if !seen.contains(start.as_str()) {
                bail!("starting_basemap '{}' is not a configured basemap", start);
            }
        }
        Ok(())
    }
}
