use std::{
    fs,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use cryptoshield_core::{DriveStrategy, StrategyError, StrategyKind};
use tracing::instrument;

/// Lists mount points directly below media parents such as `/media/$USER`.
pub struct MediaDirectoryScan {
    parents: Vec<PathBuf>,
}

impl MediaDirectoryScan {
    pub fn new(parents: Vec<PathBuf>) -> Self {
        Self { parents }
    }
}

#[async_trait]
impl DriveStrategy for MediaDirectoryScan {
    fn kind(&self) -> StrategyKind {
        StrategyKind::MediaDirectory
    }

    #[instrument(skip_all, fields(strategy = "media-dir", parents = self.parents.len()))]
    async fn enumerate(&self) -> Result<Vec<PathBuf>, StrategyError> {
        let parents = self.parents.clone();
        tokio::task::spawn_blocking(move || {
            let mut out = Vec::new();
            for parent in &parents {
                scan_parent(parent, &mut out);
            }
            out
        })
        .await
        .map_err(|e| StrategyError::Parse(format!("media scan task failed: {e}")))
    }
}

fn scan_parent(parent: &Path, out: &mut Vec<PathBuf>) {
    // Absent parents are normal (no desktop automounter, wrong platform).
    let Ok(entries) = fs::read_dir(parent) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() && is_mount_point(&path, parent) {
            out.push(path);
        }
    }
}

#[cfg(unix)]
fn is_mount_point(dir: &Path, parent: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;

    match (fs::metadata(dir), fs::metadata(parent)) {
        (Ok(child), Ok(parent)) => child.dev() != parent.dev(),
        _ => false,
    }
}

#[cfg(not(unix))]
fn is_mount_point(_dir: &Path, _parent: &Path) -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_parents_yield_nothing() {
        let strategy = MediaDirectoryScan::new(vec![PathBuf::from(
            "/definitely/not/a/media/dir",
        )]);
        assert_eq!(strategy.kind(), StrategyKind::MediaDirectory);
        assert!(strategy.enumerate().await.expect("enumerate").is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn plain_subdirectories_are_not_mount_points() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::create_dir(dir.path().join("STALE")).expect("mkdir");
        let strategy = MediaDirectoryScan::new(vec![dir.path().to_path_buf()]);
        assert!(strategy.enumerate().await.expect("enumerate").is_empty());
    }
}
