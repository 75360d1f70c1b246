//! tilecache - seed, purge and measure offline map tile caches.
//!
//! Drives the `OfflineCacheManager` from the command line: one operation per
//! invocation, with progress written to stderr and Ctrl+C cancelling the
//! running operation.

mod commands;
mod progress;

use std::io;
use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use tilecache_core::{Config, Viewport};

/// Directory for a log file in addition to stderr
const LOG_DIR_ENV: &str = "TILECACHE_LOG_DIR";

/// Log file name prefix inside `TILECACHE_LOG_DIR`
const LOG_FILE_PREFIX: &str = "tilecache.log";

#[derive(Parser)]
#[command(name = "tilecache")]
#[command(version, about = "Offline map tile cache manager", long_about = None)]
struct Cli {
    /// Config file (defaults to the platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download every basemap's tiles for a map view
    Seed {
        /// Latitude of the view center
        #[arg(long, allow_negative_numbers = true)]
        lat: f64,
        /// Longitude of the view center
        #[arg(long, allow_negative_numbers = true)]
        lon: f64,
        /// Current zoom level; tiles are cached from here to the offline maximum
        #[arg(long)]
        zoom: u8,
    },
    /// Delete every cached tile
    Purge,
    /// Show how many tiles are cached and how much space they use
    Usage {
        /// Show the last recorded figures instead of scanning
        #[arg(long)]
        cached: bool,
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// List configured basemaps
    Layers,
    /// Show the config file location
    Config {
        /// Write the default config if no file exists yet
        #[arg(long)]
        write_default: bool,
    },
}

/// Initialize the tracing subscriber for logging.
///
/// Use RUST_LOG to control the level (e.g., RUST_LOG=tilecache_core=debug).
fn init_tracing() -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match std::env::var(LOG_DIR_ENV) {
        Ok(dir) if !dir.is_empty() => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(fmt::layer().with_writer(writer).with_ansi(false)), Some(guard))
        }
        _ => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let _log_guard = init_tracing();
    let cli = Cli::parse();
    info!("tilecache starting");

    let config = match cli.config {
        Some(ref path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    match cli.command {
        Commands::Seed { lat, lon, zoom } => {
            commands::seed(&config, Viewport::new(lat, lon, zoom)).await
        }
        Commands::Purge => commands::purge(&config).await,
        Commands::Usage { cached, json } => commands::usage(&config, cached, json).await,
        Commands::Layers => commands::layers(&config),
        Commands::Config { write_default } => {
            commands::config(cli.config.as_deref(), &config, write_default)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_seed_accepts_negative_coordinates() {
        let cli = Cli::try_parse_from([
            "tilecache", "seed", "--lat", "-33.86", "--lon", "-74.006", "--zoom", "12",
        ])
        .unwrap();
        match cli.command {
            Commands::Seed { lat, lon, zoom } => {
                assert_eq!(lat, -33.86);
                assert_eq!(lon, -74.006);
                assert_eq!(zoom, 12);
            }
            _ => panic!("expected seed"),
        }
    }
}
