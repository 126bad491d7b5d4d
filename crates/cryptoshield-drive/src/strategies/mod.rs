//! Concrete detection strategies. Each one is independent; the enumerator
//! merges their output without knowing how any of them works.

mod configured;
mod disk_type;
mod media_dir;
mod mount_table;

pub use configured::ConfiguredRoots;
pub use disk_type::DiskTypeQuery;
pub use media_dir::MediaDirectoryScan;
pub use mount_table::MountTableScan;

use std::{path::PathBuf, process::Stdio, sync::Arc, time::Duration};

use cryptoshield_core::{DriveStrategy, StrategyError, StrategyKind};
use tokio::{process::Command, time::timeout};

/// Knobs shared by the built-in strategies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrategySettings {
    /// Strategies to run, in priority order.
    pub order: Vec<StrategyKind>,
    /// Bound on each external command.
    pub command_timeout: Duration,
    /// Roots always offered by the `Configured` strategy (when present).
    pub extra_roots: Vec<PathBuf>,
    /// Parents scanned by the `MediaDirectory` strategy.
    pub media_dirs: Vec<PathBuf>,
}

impl Default for StrategySettings {
    fn default() -> Self {
        Self {
            order: vec![
                StrategyKind::DiskTypeQuery,
                StrategyKind::MountTable,
                StrategyKind::MediaDirectory,
                StrategyKind::Configured,
            ],
            command_timeout: Duration::from_millis(1000),
            extra_roots: Vec::new(),
            media_dirs: default_media_dirs(),
        }
    }
}

/// Media mount parents for the current user and platform.
pub fn default_media_dirs() -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    if let Ok(user) = std::env::var("USER") {
        dirs.push(PathBuf::from("/media").join(&user));
        dirs.push(PathBuf::from("/run/media").join(&user));
    }
    dirs.push(PathBuf::from("/media"));
    dirs.push(PathBuf::from("/Volumes"));
    dirs
}

/// Build the strategies named in `settings.order`, skipping duplicates.
pub fn build_strategies(settings: &StrategySettings) -> Vec<Arc<dyn DriveStrategy>> {
    let mut seen = Vec::new();
    let mut out: Vec<Arc<dyn DriveStrategy>> = Vec::new();
    for kind in &settings.order {
        if seen.contains(kind) {
            continue;
        }
        seen.push(*kind);
        let strategy: Arc<dyn DriveStrategy> = match kind {
            StrategyKind::DiskTypeQuery => Arc::new(DiskTypeQuery::new(settings.command_timeout)),
            StrategyKind::MountTable => Arc::new(MountTableScan::new(settings.command_timeout)),
            StrategyKind::MediaDirectory => {
                Arc::new(MediaDirectoryScan::new(settings.media_dirs.clone()))
            }
            StrategyKind::Configured => Arc::new(ConfiguredRoots::new(settings.extra_roots.clone())),
        };
        out.push(strategy);
    }
    out
}

/// Run a short-lived external query and return stdout.
///
/// The binary is executed directly (no shell interpolation) and killed if it
/// outlives `limit`.
pub(crate) async fn run_command(
    program: &str,
    args: &[&str],
    limit: Duration,
) -> Result<String, StrategyError> {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    tracing::debug!(program, args = ?args, "running drive query");

    let child = cmd.spawn().map_err(|e| StrategyError::Command {
        program: program.to_string(),
        reason: e.to_string(),
    })?;

    match timeout(limit, child.wait_with_output()).await {
        Ok(Ok(output)) if output.status.success() => {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        }
        Ok(Ok(output)) => Err(StrategyError::Command {
            program: program.to_string(),
            reason: format!(
                "exit {}: {}",
                output.status.code().unwrap_or(-1),
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        }),
        Ok(Err(e)) => Err(StrategyError::Io(e)),
        Err(_) => Err(StrategyError::TimedOut {
            program: program.to_string(),
            after: limit,
        }),
    }
}
