use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use super::status::CacheUsageSnapshot;

/// File holding the last committed usage snapshot
pub(crate) const SNAPSHOT_FILE: &str = "usage.json";

const MINUTES_PER_HOUR: i64 = 60;
const MINUTES_PER_DAY: i64 = 24 * MINUTES_PER_HOUR;

/// A value and the time it was recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recorded<T> {
    pub data: T,
    pub recorded_at: DateTime<Utc>,
}

impl<T> Recorded<T> {
    pub fn new(data: T) -> Self {
        Self::at(data, Utc::now())
    }

    pub fn at(data: T, recorded_at: DateTime<Utc>) -> Self {
        Self { data, recorded_at }
    }

    pub fn age_minutes(&self) -> i64 {
        (Utc::now() - self.recorded_at).num_minutes()
    }

    /// Whole units elapsed, e.g. "5m ago", "2h ago", "3d ago".
    pub fn age_display(&self) -> String {
        match self.age_minutes() {
            // Negative when the clock moved backwards
            minutes if minutes < 1 => "just now".to_string(),
            minutes if minutes < MINUTES_PER_HOUR => format!("{}m ago", minutes),
            minutes if minutes < MINUTES_PER_DAY => format!("{}h ago", minutes / MINUTES_PER_HOUR),
            minutes => format!("{}d ago", minutes / MINUTES_PER_DAY),
        }
    }
}

/// Persists the last usage snapshot next to the tile folders so it
/// survives restarts.
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(cache_dir: &Path) -> Self {
        Self {
            path: cache_dir.join(SNAPSHOT_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Option<Recorded<CacheUsageSnapshot>>> {
        load_json(&self.path)
    }

    pub fn save(&self, snapshot: &Recorded<CacheUsageSnapshot>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(snapshot)?;
        std::fs::write(&self.path, contents)
            .with_context(|| format!("Failed to write {}", self.path.display()))?;
        Ok(())
    }
}

fn load_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let value = serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    Ok(Some(value))
}
