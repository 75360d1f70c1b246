use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Result};

use super::{HttpTileLayer, TileLayer};
use crate::config::BasemapLayer;

/// Layers keyed by name, iterated in registration order.
#[derive(Default, Clone)]
pub struct LayerRegistry {
    layers: Vec<Arc<dyn TileLayer>>,
}

impl LayerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an `HttpTileLayer` for each basemap, sharing one HTTP client.
    ///
    /// Basemaps whose storage folder would leave `cache_root` are refused.
    pub fn from_basemaps(
        basemaps: &[BasemapLayer],
        cache_root: &Path,
        client: reqwest::Client,
    ) -> Result<Self> {
        let mut registry = Self::new();
        for basemap in basemaps {
            basemap.check_storage_folder()?;
            let layer = HttpTileLayer::new(basemap, cache_root, client.clone());
            registry.register(Arc::new(layer))?;
        }
        Ok(registry)
    }

    /// Add a layer at the end of the iteration order.
    ///
    /// Names must be unique.
    pub fn register(&mut self, layer: Arc<dyn TileLayer>) -> Result<()> {
        if self.get(layer.name()).is_some() {
            bail!("Layer '{}' is already registered", layer.name());
        }
        self.layers.push(layer);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn TileLayer>> {
        self.layers.iter().find(|layer| layer.name() == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn TileLayer>> {
        self.layers.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.layers.iter().map(|layer| layer.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}

impl std::fmt::Debug for LayerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}
