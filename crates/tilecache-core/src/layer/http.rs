//! HTTP tile layer backed by a folder of tile files.
//!
//! Tiles are fetched from a `{s}`/`{z}`/`{x}`/`{y}` URL template and stored
//! flat as `<z>-<x>-<y>.png` inside the layer's storage folder.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use reqwest::{Client, StatusCode};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{DiskUsage, DownloadProgress, DownloadSummary, ProgressFn, TileLayer};
use crate::config::BasemapLayer;
use crate::error::LayerError;
use crate::tile::{self, TileCoord};

// ============================================================================
// Constants
// ============================================================================

/// HTTP request timeout in seconds.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Maximum tiles in flight at once for a single layer.
const MAX_CONCURRENT_REQUESTS: usize = 8;

/// Maximum number of retries for rate-limited (429) requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

/// Extension of stored tiles
const TILE_EXT: &str = "png";

/// Extension of tiles still being written
const PARTIAL_EXT: &str = "part";

/// Tile servers such as OpenStreetMap refuse requests without a user agent.
const USER_AGENT: &str = concat!("tilecache/", env!("CARGO_PKG_VERSION"));

/// Build the HTTP client shared by all layers.
pub fn build_client() -> Result<Client, reqwest::Error> {
    Client::builder()
        .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
        .user_agent(USER_AGENT)
        .build()
}

enum TileOutcome {
    Fetched,
    Skipped,
}

/// A basemap whose tiles come from an HTTP tile server.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct HttpTileLayer {
    name: String,
    url_template: String,
    subdomains: Vec<String>,
    folder: PathBuf,
    min_zoom: u8,
    max_zoom: u8,
    client: Client,
}

impl HttpTileLayer {
    pub fn new(basemap: &BasemapLayer, cache_root: &Path, client: Client) -> Self {
        Self {
            name: basemap.name.clone(),
            url_template: basemap.url_template.clone(),
            subdomains: basemap.subdomains.clone(),
            folder: cache_root.join(basemap.storage_folder()),
            min_zoom: basemap.min_zoom,
            max_zoom: basemap.max_zoom,
            client,
        }
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    /// Fill the URL template for one tile.
    pub fn tile_url(&self, tile: &TileCoord) -> String {
        let mut url = self
            .url_template
            .replace("{z}", &tile.zoom.to_string())
            .replace("{x}", &tile.col.to_string())
            .replace("{y}", &tile.row.to_string());
        if !self.subdomains.is_empty() {
            let index = (tile.col as usize + tile.row as usize) % self.subdomains.len();
            url = url.replace("{s}", &self.subdomains[index]);
        }
        url
    }

    pub fn tile_path(&self, tile: &TileCoord) -> PathBuf {
        self.folder
            .join(format!("{}-{}-{}.{}", tile.zoom, tile.col, tile.row, TILE_EXT))
    }

    async fn fetch_tile(&self, tile: TileCoord, overwrite: bool) -> Result<TileOutcome, LayerError> {
        let path = self.tile_path(&tile);
        if !overwrite && tokio::fs::try_exists(&path).await? {
            return Ok(TileOutcome::Skipped);
        }

        let bytes = self.get_with_retry(tile).await?;

        let partial = path.with_extension(format!("{}.{}", TILE_EXT, PARTIAL_EXT));
        let stored = async {
            tokio::fs::write(&partial, &bytes).await?;
            tokio::fs::rename(&partial, &path).await
        }
        .await;
        if let Err(e) = stored {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(e.into());
        }

        debug!(layer = %self.name, %tile, bytes = bytes.len(), "Tile stored");
        Ok(TileOutcome::Fetched)
    }

    /// Delete `.part` files left behind by interrupted writes.
    async fn remove_partials(&self) {
        let Ok(mut entries) = tokio::fs::read_dir(&self.folder).await else {
            return;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if is_partial(&path) {
                if let Err(e) = tokio::fs::remove_file(&path).await {
                    debug!(layer = %self.name, ?path, error = %e, "Could not remove partial tile");
                }
            }
        }
    }

    async fn get_with_retry(&self, tile: TileCoord) -> Result<Vec<u8>, LayerError> {
        let url = self.tile_url(&tile);
        let mut retries = 0;
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            let response = self
                .client
                .get(&url)
                .send()
                .await
                .map_err(|source| LayerError::Network { tile, source })?;

            let status = response.status();
            if status == StatusCode::TOO_MANY_REQUESTS {
                retries += 1;
                if retries > MAX_RATE_LIMIT_RETRIES {
                    return Err(LayerError::RateLimited { tile });
                }
                warn!(url = %url, retry = retries, backoff_ms = backoff_ms, "Rate limited, backing off");
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                backoff_ms *= 2;
                continue;
            }
            if !status.is_success() {
                return Err(LayerError::Status { tile, status });
            }

            let bytes = response
                .bytes()
                .await
                .map_err(|source| LayerError::Network { tile, source })?;
            return Ok(bytes.to_vec());
        }
    }
}

#[async_trait]
impl TileLayer for HttpTileLayer {
    fn name(&self) -> &str {
        &self.name
    }

    fn tile_set(&self, lat: f64, lon: f64, zoom_min: u8, zoom_max: u8) -> Vec<TileCoord> {
        tile::pyramid(lat, lon, zoom_min.max(self.min_zoom), zoom_max.min(self.max_zoom))
    }

    async fn download(
        &self,
        tiles: &[TileCoord],
        overwrite: bool,
        on_progress: ProgressFn<'_>,
        cancel: &CancellationToken,
    ) -> Result<DownloadSummary, LayerError> {
        let total = tiles.len();
        let mut summary = DownloadSummary {
            total,
            ..Default::default()
        };
        if total == 0 {
            return Ok(summary);
        }

        tokio::fs::create_dir_all(&self.folder).await?;
        self.remove_partials().await;
        info!(layer = %self.name, total, overwrite, "Downloading tiles");

        let mut results = stream::iter(tiles.iter().copied())
            .map(|tile| self.fetch_tile(tile, overwrite))
            .buffer_unordered(MAX_CONCURRENT_REQUESTS);

        let mut done = 0;
        let failure = loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!(layer = %self.name, done, total, "Download cancelled");
                    break LayerError::Cancelled;
                }
                next = results.next() => next,
            };
            let Some(result) = next else {
                info!(
                    layer = %self.name,
                    fetched = summary.fetched,
                    skipped = summary.skipped,
                    "Download complete"
                );
                return Ok(summary);
            };

            match result {
                Ok(TileOutcome::Fetched) => summary.fetched += 1,
                Ok(TileOutcome::Skipped) => summary.skipped += 1,
                Err(e) => break e,
            }
            on_progress(DownloadProgress { done, total });
            done += 1;
        };

        // Stops the in-flight fetches before sweeping what they wrote
        drop(results);
        self.remove_partials().await;
        Err(failure)
    }

    async fn purge(&self) -> Result<(), LayerError> {
        match tokio::fs::remove_dir_all(&self.folder).await {
            Ok(()) => {
                info!(layer = %self.name, folder = ?self.folder, "Tile store emptied");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn disk_usage(&self) -> Result<DiskUsage, LayerError> {
        let mut usage = DiskUsage::default();

        let mut entries = match tokio::fs::read_dir(&self.folder).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(usage),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            if is_partial(&entry.path()) {
                continue;
            }
            let metadata = entry.metadata().await?;
            if metadata.is_file() {
                usage.file_count += 1;
                usage.file_size_bytes += metadata.len();
            }
        }

        debug!(layer = %self.name, files = usage.file_count, bytes = usage.file_size_bytes, "Disk usage");
        Ok(usage)
    }
}

fn is_partial(path: &Path) -> bool {
    path.extension().and_then(|ext| ext.to_str()) == Some(PARTIAL_EXT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Minimal tile server: answers every GET with the request path as body,
    /// or 404 when the path contains `missing`.
    async fn spawn_tile_server() -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);

        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else { return };
                let counter = Arc::clone(&counter);
                tokio::spawn(async move {
                    let mut buf = vec![0u8; 4096];
                    let mut read = 0;
                    while !buf[..read].windows(4).any(|w| w == b"\r\n\r\n") {
                        match socket.read(&mut buf[read..]).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => read += n,
                        }
                    }
                    counter.fetch_add(1, Ordering::SeqCst);
                    let request = String::from_utf8_lossy(&buf[..read]);
                    let path = request.split_whitespace().nth(1).unwrap_or("/").to_string();
                    let response = if path.contains("missing") {
                        "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
                            .to_string()
                    } else {
                        format!(
                            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            path.len(),
                            path
                        )
                    };
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.shutdown().await;
                });
            }
        });

        (format!("http://{}", addr), hits)
    }

    fn layer(root: &Path, template: &str) -> HttpTileLayer {
        HttpTileLayer::new(&BasemapLayer::new("osm", template), root, build_client().unwrap())
    }

    fn no_progress() -> impl Fn(DownloadProgress) + Send + Sync {
        |_| {}
    }

    #[test]
    fn test_tile_url_fills_template() {
        let layer = layer(Path::new("/tmp"), "https://{s}.tile.example/{z}/{x}/{y}.png");
        let tile = TileCoord { zoom: 12, col: 2, row: 3 };
        // (2 + 3) % 3 == 2 -> "c"
        assert_eq!(layer.tile_url(&tile), "https://c.tile.example/12/2/3.png");
    }

    #[test]
    fn test_tile_url_row_before_col_template() {
        let layer = layer(Path::new("/tmp"), "https://server/tile/{z}/{y}/{x}");
        let tile = TileCoord { zoom: 5, col: 7, row: 9 };
        assert_eq!(layer.tile_url(&tile), "https://server/tile/5/9/7");
    }

    #[test]
    fn test_tile_path_is_flat() {
        let layer = layer(Path::new("/cache"), "https://t/{z}/{x}/{y}");
        let tile = TileCoord { zoom: 12, col: 2, row: 3 };
        assert_eq!(layer.tile_path(&tile), PathBuf::from("/cache/osm/12-2-3.png"));
    }

    #[test]
    fn test_tile_set_clamped_to_layer_zoom() {
        let mut basemap = BasemapLayer::new("topo", "https://t/{z}/{x}/{y}");
        basemap.max_zoom = 11;
        let layer = HttpTileLayer::new(&basemap, Path::new("/tmp"), Client::new());
        let tiles = layer.tile_set(45.0, 7.0, 10, 16);
        assert_eq!(tiles.len(), 1 + 4);
        assert!(tiles.iter().all(|t| t.zoom <= 11));
    }

    #[tokio::test]
    async fn test_download_fetches_and_reports_progress() {
        let (base, hits) = spawn_tile_server().await;
        let dir = tempfile::tempdir().unwrap();
        let layer = layer(dir.path(), &format!("{}/{{z}}/{{x}}/{{y}}.png", base));

        let tiles = tile::pyramid(45.0, 7.0, 10, 11);
        let seen = Mutex::new(Vec::new());
        let on_progress = |p: DownloadProgress| seen.lock().unwrap().push(p);

        let summary = layer
            .download(&tiles, false, &on_progress, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary, DownloadSummary { total: 5, fetched: 5, skipped: 0 });
        assert_eq!(hits.load(Ordering::SeqCst), 5);

        let seen = seen.into_inner().unwrap();
        let dones: Vec<usize> = seen.iter().map(|p| p.done).collect();
        assert_eq!(dones, vec![0, 1, 2, 3, 4]);
        assert!(seen.iter().all(|p| p.total == 5));

        let body = std::fs::read_to_string(layer.tile_path(&tiles[0])).unwrap();
        assert_eq!(body, format!("/{}/{}/{}.png", tiles[0].zoom, tiles[0].col, tiles[0].row));
    }

    #[tokio::test]
    async fn test_download_skips_existing_without_overwrite() {
        let (base, hits) = spawn_tile_server().await;
        let dir = tempfile::tempdir().unwrap();
        let layer = layer(dir.path(), &format!("{}/{{z}}/{{x}}/{{y}}.png", base));
        let tiles = tile::pyramid(45.0, 7.0, 10, 11);

        let cancel = CancellationToken::new();
        layer.download(&tiles, false, &no_progress(), &cancel).await.unwrap();
        let before = layer.disk_usage().await.unwrap();

        let summary = layer.download(&tiles, false, &no_progress(), &cancel).await.unwrap();
        assert_eq!(summary.skipped, 5);
        assert_eq!(summary.fetched, 0);
        assert_eq!(hits.load(Ordering::SeqCst), 5);
        assert_eq!(layer.disk_usage().await.unwrap(), before);

        let summary = layer.download(&tiles, true, &no_progress(), &cancel).await.unwrap();
        assert_eq!(summary.fetched, 5);
        assert_eq!(hits.load(Ordering::SeqCst), 10);
    }

    #[tokio::test]
    async fn test_download_error_keeps_completed_tiles() {
        let (base, _) = spawn_tile_server().await;
        let dir = tempfile::tempdir().unwrap();
        let layer = layer(dir.path(), &format!("{}/{{z}}/{{x}}/{{y}}.png", base));
        let good = TileCoord { zoom: 3, col: 1, row: 1 };
        layer.download(&[good], false, &no_progress(), &CancellationToken::new()).await.unwrap();

        let broken = layer_with_missing(dir.path(), &base);
        let err = broken
            .download(&[TileCoord { zoom: 3, col: 2, row: 2 }], false, &no_progress(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, LayerError::Status { status, .. } if status == StatusCode::NOT_FOUND));
        assert!(layer.tile_path(&good).exists());
        assert_eq!(partial_files(&layer), Vec::<PathBuf>::new());
    }

    fn partial_files(layer: &HttpTileLayer) -> Vec<PathBuf> {
        std::fs::read_dir(layer.folder())
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .filter(|path| is_partial(path))
            .collect()
    }

    #[tokio::test]
    async fn test_interrupted_download_removes_partial_files() {
        let dir = tempfile::tempdir().unwrap();
        let layer = layer(dir.path(), "http://127.0.0.1:9/{z}/{x}/{y}.png");
        std::fs::create_dir_all(layer.folder()).unwrap();
        std::fs::write(layer.folder().join("4-8-8.png.part"), vec![0u8; 64]).unwrap();
        std::fs::write(layer.folder().join("4-8-9.png"), vec![0u8; 64]).unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let tiles = tile::pyramid(0.0, 0.0, 4, 5);
        let err = layer.download(&tiles, false, &no_progress(), &cancel).await.unwrap_err();

        assert!(matches!(err, LayerError::Cancelled));
        assert!(partial_files(&layer).is_empty());
        assert!(layer.folder().join("4-8-9.png").exists());
    }

    #[tokio::test]
    async fn test_failed_write_leaves_no_partial_file() {
        let (base, _) = spawn_tile_server().await;
        let dir = tempfile::tempdir().unwrap();
        let layer = layer(dir.path(), &format!("{}/{{z}}/{{x}}/{{y}}.png", base));
        let tile = TileCoord { zoom: 3, col: 1, row: 1 };

        // A directory where the tile file should go makes the rename fail
        std::fs::create_dir_all(layer.tile_path(&tile).join("blocker")).unwrap();

        let err = layer
            .download(&[tile], true, &no_progress(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, LayerError::Io(_)));
        assert!(partial_files(&layer).is_empty());
    }

    fn layer_with_missing(root: &Path, base: &str) -> HttpTileLayer {
        layer(root, &format!("{}/missing/{{z}}/{{x}}/{{y}}.png", base))
    }

    #[tokio::test]
    async fn test_download_cancelled_before_start() {
        let dir = tempfile::tempdir().unwrap();
        let layer = layer(dir.path(), "http://127.0.0.1:9/{z}/{x}/{y}.png");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let tiles = tile::pyramid(0.0, 0.0, 4, 5);
        let err = layer.download(&tiles, false, &no_progress(), &cancel).await.unwrap_err();
        assert!(matches!(err, LayerError::Cancelled));
    }

    #[tokio::test]
    async fn test_disk_usage_and_purge() {
        let dir = tempfile::tempdir().unwrap();
        let layer = layer(dir.path(), "https://t/{z}/{x}/{y}");

        assert_eq!(layer.disk_usage().await.unwrap(), DiskUsage::default());

        std::fs::create_dir_all(layer.folder()).unwrap();
        std::fs::write(layer.folder().join("10-1-1.png"), vec![0u8; 100]).unwrap();
        std::fs::write(layer.folder().join("10-1-2.png"), vec![0u8; 250]).unwrap();
        std::fs::write(layer.folder().join("10-1-3.png.part"), vec![0u8; 999]).unwrap();

        let usage = layer.disk_usage().await.unwrap();
        assert_eq!(usage, DiskUsage { file_count: 2, file_size_bytes: 350 });

        layer.purge().await.unwrap();
        assert_eq!(layer.disk_usage().await.unwrap(), DiskUsage::default());

        // Purging an already empty store succeeds
        layer.purge().await.unwrap();
    }
}
