use std::{
    fmt,
    path::{Path, PathBuf},
    time::Duration,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Which detection strategy produced a candidate.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// OS-level disk-type query (lsblk, wmic).
    DiskTypeQuery,
    /// Mount table / drive-root classification.
    MountTable,
    /// Mount points found under media directories.
    MediaDirectory,
    /// Roots listed explicitly in configuration.
    Configured,
}

impl StrategyKind {
    pub fn label(&self) -> &'static str {
        match self {
            StrategyKind::DiskTypeQuery => "disk-type",
            StrategyKind::MountTable => "mount-table",
            StrategyKind::MediaDirectory => "media-dir",
            StrategyKind::Configured => "configured",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A filesystem root believed to be removable storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriveCandidate {
    /// Normalized root path; the dedup key.
    pub path: PathBuf,
    /// First strategy that reported this root.
    pub source: StrategyKind,
}

impl DriveCandidate {
    pub fn new(raw: impl AsRef<Path>, source: StrategyKind) -> Self {
        Self {
            path: normalize_root(raw),
            source,
        }
    }
}

#[derive(Debug, Error)]
pub enum StrategyError {
    #[error("not supported on {platform}")]
    Unsupported { platform: &'static str },
    #[error("`{program}` failed: {reason}")]
    Command { program: String, reason: String },
    #[error("`{program}` did not finish within {}ms", after.as_millis())]
    TimedOut { program: String, after: Duration },
    #[error("unexpected output: {0}")]
    Parse(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// One independent way of discovering removable roots.
#[async_trait]
pub trait DriveStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    /// Raw root paths, in the strategy's own order. Normalization happens in
    /// the caller.
    async fn enumerate(&self) -> Result<Vec<PathBuf>, StrategyError>;
}

/// Lexical normalization of a drive root; never touches the filesystem.
///
/// `d:`, `d:/` and `D:\` all become `D:\`. Other paths lose trailing
/// separators, except a bare `/`.
pub fn normalize_root(raw: impl AsRef<Path>) -> PathBuf {
    let raw = raw.as_ref().to_string_lossy();
    let trimmed = raw.trim();

    let bytes = trimmed.as_bytes();
    let is_designator = bytes.len() >= 2
        && bytes[0].is_ascii_alphabetic()
        && bytes[1] == b':'
        && trimmed[2..].chars().all(|c| c == '\\' || c == '/');
    if is_designator {
        let letter = (bytes[0] as char).to_ascii_uppercase();
        return PathBuf::from(format!("{letter}:\\"));
    }

    let stripped = trimmed.trim_end_matches(['/', '\\']);
    if stripped.is_empty() && !trimmed.is_empty() {
        return PathBuf::from("/");
    }
    PathBuf::from(stripped)
}
