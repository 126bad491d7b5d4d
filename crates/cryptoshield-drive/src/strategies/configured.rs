use std::path::PathBuf;

use async_trait::async_trait;
use cryptoshield_core::{DriveStrategy, StrategyError, StrategyKind};

/// Roots named in configuration, reported only while they exist.
pub struct ConfiguredRoots {
    roots: Vec<PathBuf>,
}

impl ConfiguredRoots {
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self { roots }
    }
}

#[async_trait]
impl DriveStrategy for ConfiguredRoots {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Configured
    }

    async fn enumerate(&self) -> Result<Vec<PathBuf>, StrategyError> {
        let roots = self.roots.clone();
        tokio::task::spawn_blocking(move || roots.into_iter().filter(|r| r.is_dir()).collect())
            .await
            .map_err(|e| StrategyError::Parse(format!("configured roots task failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reports_only_existing_roots() {
        let dir = tempfile::tempdir().expect("tempdir");
        let strategy = ConfiguredRoots::new(vec![
            dir.path().to_path_buf(),
            dir.path().join("unplugged"),
        ]);
        let roots = strategy.enumerate().await.expect("enumerate");
        assert_eq!(roots, vec![dir.path().to_path_buf()]);
    }
}
