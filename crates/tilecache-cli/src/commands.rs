//! Subcommand handlers.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::debug;

use tilecache_core::layer::http::build_client;
use tilecache_core::{
    CacheError, CacheStatus, Config, LayerRegistry, OfflineCacheManager, SnapshotStore, Viewport,
};

use crate::progress::run_with_progress;

fn build_manager(config: &Config) -> Result<OfflineCacheManager> {
    let cache_dir = config.cache_dir()?;
    debug!(?cache_dir, "Cache directory configured");

    let client = build_client().context("Failed to create HTTP client")?;
    let registry = LayerRegistry::from_basemaps(&config.basemaps, &cache_dir, client)?;

    Ok(OfflineCacheManager::new(Arc::new(registry), config.offline_cache_zoom)
        .with_snapshot_store(SnapshotStore::new(&cache_dir)))
}

/// Turn a failed operation into the process error, leading with the
/// message meant for people. Errors fixed by choosing another view carry
/// no cause chain.
fn operation_error(err: CacheError) -> anyhow::Error {
    let message = err.user_message();
    if err.is_user_correctable() {
        debug!(error = %err, "Operation refused");
        return anyhow::anyhow!(message);
    }
    anyhow::Error::new(err).context(message)
}

fn print_usage(status: &CacheStatus) {
    println!("Cached: {}", status.usage.display());
}

pub async fn seed(config: &Config, viewport: Viewport) -> Result<()> {
    let manager = build_manager(config)?;
    let report = run_with_progress(&manager, manager.seed_current_view(viewport))
        .await
        .map_err(operation_error)?;

    for layer in &report.layers {
        println!(
            "{:<14} {} downloaded, {} already cached",
            layer.layer, layer.summary.fetched, layer.summary.skipped
        );
    }

    let status = manager.status();
    if let Some(notice) = status.notice.as_deref() {
        eprintln!("{}", notice);
    }
    print_usage(&status);
    Ok(())
}

pub async fn purge(config: &Config) -> Result<()> {
    let manager = build_manager(config)?;
    let report = run_with_progress(&manager, manager.purge_all())
        .await
        .map_err(operation_error)?;

    println!("Emptied {}", report.layers.join(", "));
    print_usage(&manager.status());
    Ok(())
}

pub async fn usage(config: &Config, cached: bool, json: bool) -> Result<()> {
    if cached {
        let store = SnapshotStore::new(&config.cache_dir()?);
        match store.load()? {
            Some(recorded) if json => println!("{}", serde_json::to_string_pretty(&recorded)?),
            Some(recorded) => println!(
                "Cached: {} (measured {})",
                recorded.data.display(),
                recorded.age_display()
            ),
            None => println!("Disk usage has not been measured yet"),
        }
        return Ok(());
    }

    let manager = build_manager(config)?;
    let snapshot = run_with_progress(&manager, manager.compute_usage())
        .await
        .map_err(operation_error)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    } else {
        print_usage(&manager.status());
    }
    Ok(())
}

pub fn layers(config: &Config) -> Result<()> {
    let cache_dir = config.cache_dir()?;
    let zoom = config.offline_cache_zoom;
    println!("Offline zoom {}-{}, tiles in {}", zoom.min, zoom.max, cache_dir.display());

    for basemap in &config.basemaps {
        let marker = if config.starting_basemap.as_deref() == Some(basemap.name.as_str()) {
            "*"
        } else {
            " "
        };
        println!(
            "{} {:<14} {}  ({})",
            marker,
            basemap.name,
            basemap.url_template,
            cache_dir.join(basemap.storage_folder()).display()
        );
    }
    Ok(())
}

pub fn config(path: Option<&Path>, config: &Config, write_default: bool) -> Result<()> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => Config::config_path()?,
    };

    if write_default {
        if path.exists() {
            println!("{} already exists", path.display());
        } else {
            Config::default().save_to(&path)?;
            println!("Wrote default config to {}", path.display());
        }
        return Ok(());
    }

    println!("{}", path.display());
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}
