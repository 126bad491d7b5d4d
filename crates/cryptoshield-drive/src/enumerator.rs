use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use cryptoshield_core::{normalize_root, DriveCandidate, DriveStrategy, StrategyKind};
use tokio::time::timeout;
use tracing::{debug, instrument, warn};

use crate::strategies::{build_strategies, StrategySettings};

/// How a single strategy fared during one enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StrategyOutcome {
    Responded { count: usize },
    Failed { reason: String },
    TimedOut,
}

/// Per-strategy result, in priority order.
#[derive(Debug, Clone)]
pub struct StrategyReport {
    pub kind: StrategyKind,
    pub outcome: StrategyOutcome,
    /// Normalized roots this strategy reported (empty unless it responded).
    pub roots: Vec<PathBuf>,
}

/// Merged candidates plus what each strategy said.
#[derive(Debug, Clone, Default)]
pub struct Enumeration {
    pub candidates: Vec<DriveCandidate>,
    pub reports: Vec<StrategyReport>,
}

impl Enumeration {
    /// At least one strategy produced an answer.
    pub fn any_responded(&self) -> bool {
        self.reports
            .iter()
            .any(|r| matches!(r.outcome, StrategyOutcome::Responded { .. }))
    }

    /// Some strategy that responded lists `root`. Silent strategies neither
    /// confirm nor deny.
    pub fn confirms(&self, root: &Path) -> bool {
        let wanted = normalize_root(root);
        self.reports.iter().any(|r| {
            matches!(r.outcome, StrategyOutcome::Responded { .. }) && r.roots.contains(&wanted)
        })
    }
}

/// Runs every strategy concurrently, each under its own timeout, and merges
/// the results by normalized root.
pub struct DriveEnumerator {
    strategies: Vec<Arc<dyn DriveStrategy>>,
    strategy_timeout: Duration,
}

impl DriveEnumerator {
    pub fn new(strategies: Vec<Arc<dyn DriveStrategy>>, strategy_timeout: Duration) -> Self {
        Self {
            strategies,
            strategy_timeout,
        }
    }

    /// Built-in strategies in the configured order, sharing one timeout.
    pub fn from_settings(settings: &StrategySettings) -> Self {
        Self::new(build_strategies(settings), settings.command_timeout)
    }

    pub fn strategy_timeout(&self) -> Duration {
        self.strategy_timeout
    }

    /// Current candidates. Never fails; total failure is an empty list.
    pub async fn list_candidates(&self) -> Vec<DriveCandidate> {
        self.enumerate().await.candidates
    }

    #[instrument(skip_all, fields(strategies = self.strategies.len()))]
    pub async fn enumerate(&self) -> Enumeration {
        let limit = self.strategy_timeout;
        let handles: Vec<_> = self
            .strategies
            .iter()
            .map(|strategy| {
                let strategy = Arc::clone(strategy);
                let kind = strategy.kind();
                let handle =
                    tokio::spawn(async move { timeout(limit, strategy.enumerate()).await });
                (kind, handle)
            })
            .collect();

        let mut reports = Vec::with_capacity(handles.len());
        for (kind, handle) in handles {
            let report = match handle.await {
                Ok(Ok(Ok(raw))) => {
                    let roots: Vec<PathBuf> = raw.iter().map(normalize_root).collect();
                    debug!(strategy = %kind, count = roots.len(), "strategy responded");
                    StrategyReport {
                        kind,
                        outcome: StrategyOutcome::Responded { count: roots.len() },
                        roots,
                    }
                }
                Ok(Ok(Err(err))) => {
                    warn!(strategy = %kind, error = %err, "drive strategy failed");
                    failed(kind, err.to_string())
                }
                Ok(Err(_)) => {
                    warn!(strategy = %kind, timeout_ms = limit.as_millis() as u64, "drive strategy timed out");
                    StrategyReport {
                        kind,
                        outcome: StrategyOutcome::TimedOut,
                        roots: Vec::new(),
                    }
                }
                Err(join_err) => {
                    warn!(strategy = %kind, error = %join_err, "drive strategy task aborted");
                    failed(kind, join_err.to_string())
                }
            };
            reports.push(report);
        }

        let candidates = merge(&reports);
        debug!(count = candidates.len(), "enumeration complete");
        Enumeration {
            candidates,
            reports,
        }
    }
}

fn failed(kind: StrategyKind, reason: String) -> StrategyReport {
    StrategyReport {
        kind,
        outcome: StrategyOutcome::Failed { reason },
        roots: Vec::new(),
    }
}

/// Concatenate in report order, keeping the first occurrence of each root.
fn merge(reports: &[StrategyReport]) -> Vec<DriveCandidate> {
    let mut out: Vec<DriveCandidate> = Vec::new();
    for report in reports {
        for root in &report.roots {
            if !out.iter().any(|c| &c.path == root) {
                out.push(DriveCandidate {
                    path: root.clone(),
                    source: report.kind,
                });
            }
        }
    }
    out
}
