use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::layer::{DiskUsage, DownloadProgress};
use crate::utils::format_bytes;

/// Busy text while layers are being measured
pub const MEASURING_MESSAGE: &str = "Calculating disk usage";

/// The operation a manager is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub enum Operation {
    Seeding,
    Purging,
    ComputingUsage,
}

impl Operation {
    pub fn label(&self) -> &'static str {
        match self {
            Operation::Seeding => "Downloading tiles",
            Operation::Purging => "Emptying tile caches",
            Operation::ComputingUsage => MEASURING_MESSAGE,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Files and bytes across every registered layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct CacheUsageSnapshot {
    pub file_count: u64,
    pub file_size_bytes: u64,
}

impl CacheUsageSnapshot {
    pub fn add(&mut self, usage: DiskUsage) {
        self.file_count += usage.file_count;
        self.file_size_bytes += usage.file_size_bytes;
    }

    pub fn is_empty(&self) -> bool {
        self.file_count == 0
    }

    /// e.g. "1,204 tiles, 18.3 MB"
    pub fn display(&self) -> String {
        let noun = if self.file_count == 1 { "tile" } else { "tiles" };
        format!(
            "{} {}, {}",
            crate::utils::format_count(self.file_count),
            noun,
            format_bytes(self.file_size_bytes)
        )
    }
}

impl From<DiskUsage> for CacheUsageSnapshot {
    fn from(usage: DiskUsage) -> Self {
        Self {
            file_count: usage.file_count,
            file_size_bytes: usage.file_size_bytes,
        }
    }
}

/// What the cache manager is doing, as shown to a UI.
///
/// Published whole on every change; `usage` only ever holds the result of a
/// completed scan.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct CacheStatus {
    /// Progress text; `None` when idle
    pub busy: Option<String>,
    /// Last error or actionable message
    pub notice: Option<String>,
    pub usage: CacheUsageSnapshot,
    pub usage_computed_at: Option<DateTime<Utc>>,
}

impl CacheStatus {
    pub fn is_busy(&self) -> bool {
        self.busy.is_some()
    }
}

/// `"<layer> <percent>%, <n> / <total>"` with `n` counted from one.
pub fn progress_message(layer: &str, progress: DownloadProgress) -> String {
    format!(
        "{} {}%, {} / {}",
        layer,
        progress.percent(),
        progress.completed(),
        progress.total
    )
}

pub fn done_message(layer: &str) -> String {
    format!("Done with {}", layer)
}

pub fn emptying_message(layer: &str) -> String {
    format!("Emptying {}", layer)
}
