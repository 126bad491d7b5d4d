use std::{sync::Arc, time::Duration};

use cryptoshield_core::{SessionContext, Verification};
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{interval, MissedTickBehavior},
};
use tracing::{debug, info, instrument, warn};

use crate::{authorization::AuthorizationManager, enumerator::DriveEnumerator};

/// Floor for the polling interval.
pub const MIN_MONITOR_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Watching,
    /// Terminal.
    Revoked,
}

/// Periodic presence check for the drive a session was opened on.
pub struct DriveMonitor {
    context: Arc<SessionContext>,
    enumerator: Arc<DriveEnumerator>,
    auth: AuthorizationManager,
}

impl DriveMonitor {
    pub fn new(context: Arc<SessionContext>, enumerator: Arc<DriveEnumerator>) -> Self {
        Self {
            context,
            enumerator,
            auth: AuthorizationManager::new(),
        }
    }

    pub fn context(&self) -> &Arc<SessionContext> {
        &self.context
    }

    /// One evaluation. Revokes the session when the drive fails any check.
    pub async fn check_once(&self) -> MonitorState {
        match self.evaluate().await {
            Verification::StillValid => MonitorState::Watching,
            Verification::Revoked | Verification::AlreadyRevoked => MonitorState::Revoked,
        }
    }

    #[instrument(skip_all, fields(session = %self.context.id()))]
    async fn evaluate(&self) -> Verification {
        if self.context.is_revoked() {
            return Verification::AlreadyRevoked;
        }
        // Enumeration can take up to the strategy timeout, so it runs before
        // the guard is taken.
        let enumeration = self.enumerator.enumerate().await;

        self.context.verify_or_revoke(|root| {
            if !root.is_dir() {
                warn!(root = %root.display(), "authorized drive root is gone");
                return false;
            }
            if !self.auth.is_authorized(root) {
                warn!(root = %root.display(), "authorization token is gone");
                return false;
            }
            if !enumeration.any_responded() {
                warn!("no detection strategy responded");
                return false;
            }
            if !enumeration.confirms(root) {
                warn!(root = %root.display(), "drive no longer reported as removable");
                return false;
            }
            debug!("drive still present");
            true
        })
    }

    /// Spawn the polling loop. `on_revoked` runs at most once, and only when
    /// this monitor performed the revoke; a stop never triggers it.
    ///
    /// `every` is raised to [`MIN_MONITOR_INTERVAL`]. If the loop dies or its
    /// handle is dropped without `stop`, the session is revoked.
    pub fn start<F>(self, every: Duration, on_revoked: F) -> MonitorHandle
    where
        F: FnOnce() + Send + 'static,
    {
        let every = every.max(MIN_MONITOR_INTERVAL);
        let (stop_tx, stop_rx) = watch::channel(false);
        let (state_tx, state_rx) = watch::channel(MonitorState::Watching);
        let context = Arc::clone(&self.context);

        let task = tokio::spawn(async move {
            let exit = match tokio::spawn(self.poll(every, stop_rx)).await {
                Ok(exit) => exit,
                Err(err) => {
                    warn!(error = %err, "drive monitor failed");
                    LoopExit::Abandoned
                }
            };
            let revoked_here = match exit {
                LoopExit::Stopped => return,
                LoopExit::Revoked => true,
                LoopExit::AlreadyRevoked => false,
                LoopExit::Abandoned => context.revoke(),
            };
            warn!("session revoked");
            let _ = state_tx.send(MonitorState::Revoked);
            if revoked_here {
                on_revoked();
            }
        });

        MonitorHandle {
            stop_tx,
            state_rx,
            task,
        }
    }

    async fn poll(self, every: Duration, mut stop_rx: watch::Receiver<bool>) -> LoopExit {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; the session already
        // verified the drive when it opened.
        ticker.tick().await;

        info!(interval_ms = every.as_millis() as u64, "drive monitor started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = stop_rx.changed() => {
                    if changed.is_err() {
                        warn!("drive monitor handle dropped without stop");
                        return LoopExit::Abandoned;
                    }
                    debug!("drive monitor stopped");
                    return LoopExit::Stopped;
                }
            }

            match self.evaluate().await {
                Verification::StillValid => {}
                Verification::Revoked => return LoopExit::Revoked,
                Verification::AlreadyRevoked => return LoopExit::AlreadyRevoked,
            }
        }
    }
}

/// How the polling loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopExit {
    Stopped,
    Revoked,
    AlreadyRevoked,
    /// Panicked or lost its owner; the drive is no longer watched.
    Abandoned,
}

/// Owner's side of a running monitor.
pub struct MonitorHandle {
    stop_tx: watch::Sender<bool>,
    state_rx: watch::Receiver<MonitorState>,
    task: JoinHandle<()>,
}

impl MonitorHandle {
    pub fn state(&self) -> MonitorState {
        *self.state_rx.borrow()
    }

    /// Receiver that observes the `Watching → Revoked` transition.
    pub fn subscribe(&self) -> watch::Receiver<MonitorState> {
        self.state_rx.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Watching only while the loop is alive and has not revoked.
    pub fn is_watching(&self) -> bool {
        self.state() == MonitorState::Watching && !self.is_finished()
    }

    /// Stop polling without revoking and wait for the loop to exit.
    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        if let Err(err) = self.task.await {
            warn!(error = %err, "drive monitor task ended abnormally");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        path::Path,
        sync::atomic::{AtomicUsize, Ordering},
    };

    use cryptoshield_core::{DriveStrategy, StrategyKind};

    use super::*;
    use crate::{enumerator::testing::FixedStrategy, strategies::ConfiguredRoots};

    fn monitor_for(root: &Path, strategies: Vec<Arc<dyn DriveStrategy>>) -> DriveMonitor {
        let context = Arc::new(SessionContext::new(root));
        let enumerator = Arc::new(DriveEnumerator::new(
            strategies,
            Duration::from_millis(100),
        ));
        DriveMonitor::new(context, enumerator)
    }

    fn authorized_drive() -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path().join("KEY");
        std::fs::create_dir(&root).expect("mkdir");
        assert!(AuthorizationManager::new().create_token(&root));
        (dir, root)
    }

    #[tokio::test]
    async fn present_drive_keeps_watching() {
        let (_dir, root) = authorized_drive();
        let monitor = monitor_for(
            &root,
            vec![Arc::new(ConfiguredRoots::new(vec![root.clone()]))],
        );
        assert_eq!(monitor.check_once().await, MonitorState::Watching);
        assert!(!monitor.context().is_revoked());
    }

    #[tokio::test]
    async fn timed_out_strategy_does_not_deny_when_another_confirms() {
        let (_dir, root) = authorized_drive();
        let monitor = monitor_for(
            &root,
            vec![
                Arc::new(FixedStrategy::hanging(StrategyKind::DiskTypeQuery)),
                Arc::new(FixedStrategy::new(StrategyKind::MountTable, &[root.as_path()])),
            ],
        );
        assert_eq!(monitor.check_once().await, MonitorState::Watching);
    }

    #[tokio::test]
    async fn nobody_answering_fails_closed() {
        let (_dir, root) = authorized_drive();
        let monitor = monitor_for(
            &root,
            vec![
                Arc::new(FixedStrategy::hanging(StrategyKind::DiskTypeQuery)),
                Arc::new(FixedStrategy::failing(StrategyKind::MountTable)),
            ],
        );
        assert_eq!(monitor.check_once().await, MonitorState::Revoked);
        assert!(monitor.context().is_revoked());
    }

    #[tokio::test]
    async fn missing_token_revokes_even_if_listed() {
        let (_dir, root) = authorized_drive();
        std::fs::remove_file(root.join(crate::authorization::TOKEN_FILENAME)).expect("rm token");
        let monitor = monitor_for(
            &root,
            vec![Arc::new(FixedStrategy::new(
                StrategyKind::MountTable,
                &[root.as_path()],
            ))],
        );
        assert_eq!(monitor.check_once().await, MonitorState::Revoked);
    }

    #[tokio::test]
    async fn removed_drive_revokes_once_on_next_tick() {
        let (_dir, root) = authorized_drive();
        let monitor = monitor_for(
            &root,
            vec![Arc::new(FixedStrategy::new(
                StrategyKind::MountTable,
                &[root.as_path()],
            ))],
        );
        let context = Arc::clone(monitor.context());
        let signals = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&signals);

        let handle = monitor.start(Duration::from_millis(20), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let mut state = handle.subscribe();

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(handle.state(), MonitorState::Watching);

        std::fs::remove_dir_all(&root).expect("unplug");
        tokio::time::timeout(Duration::from_secs(2), state.wait_for(|s| *s == MonitorState::Revoked))
            .await
            .expect("revoke in time")
            .expect("state channel open");

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(handle.is_finished());
        assert_eq!(signals.load(Ordering::SeqCst), 1);
        assert!(context.is_revoked());
        handle.stop().await;
        assert_eq!(signals.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stop_does_not_signal_revoke() {
        let (_dir, root) = authorized_drive();
        let monitor = monitor_for(
            &root,
            vec![Arc::new(ConfiguredRoots::new(vec![root.clone()]))],
        );
        let context = Arc::clone(monitor.context());
        let signals = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&signals);

        let handle = monitor.start(Duration::from_millis(20), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.stop().await;

        std::fs::remove_dir_all(&root).expect("unplug");
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(signals.load(Ordering::SeqCst), 0);
        assert!(!context.is_revoked());
    }

    #[tokio::test]
    async fn zero_interval_is_clamped_and_still_revokes() {
        let (_dir, root) = authorized_drive();
        let monitor = monitor_for(
            &root,
            vec![Arc::new(ConfiguredRoots::new(vec![root.clone()]))],
        );
        let context = Arc::clone(monitor.context());
        let handle = monitor.start(Duration::ZERO, || {});
        let mut state = handle.subscribe();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(handle.is_watching());

        std::fs::remove_file(root.join(crate::authorization::TOKEN_FILENAME)).expect("rm token");
        tokio::time::timeout(Duration::from_secs(2), state.wait_for(|s| *s == MonitorState::Revoked))
            .await
            .expect("revoke in time")
            .expect("state channel open");
        assert!(context.is_revoked());
        assert!(!handle.is_watching());
    }

    #[tokio::test]
    async fn dropped_handle_revokes_the_session() {
        let (_dir, root) = authorized_drive();
        let monitor = monitor_for(
            &root,
            vec![Arc::new(ConfiguredRoots::new(vec![root.clone()]))],
        );
        let context = Arc::clone(monitor.context());
        let signals = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&signals);

        let handle = monitor.start(Duration::from_millis(20), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        tokio::time::sleep(Duration::from_millis(30)).await;
        drop(handle);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(context.is_revoked());
        assert_eq!(signals.load(Ordering::SeqCst), 1);
    }
}
