use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use chrono::{DateTime, Utc};
use cryptoshield_core::{DriveCandidate, SessionContext, ShieldError};
use cryptoshield_drive::{
    AuthorizationManager, DriveEnumerator, DriveMonitor, MonitorHandle, MonitorState,
};
use cryptoshield_storage::{CredentialStore, DriveSalt, KeyCheck, KeyProvider, SealedCodec};
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::heartbeat::{Heartbeat, HeartbeatHandle, HeartbeatSettings};

/// Timers for an open session.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub monitor_interval: Duration,
    /// `None` disables the heartbeat.
    pub heartbeat: Option<HeartbeatSettings>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            monitor_interval: Duration::from_secs(2),
            heartbeat: None,
        }
    }
}

/// What startup found on the attached drives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Discovery {
    Authorized {
        root: PathBuf,
        candidates: Vec<DriveCandidate>,
    },
    Unauthorized {
        candidates: Vec<DriveCandidate>,
    },
    NoDrive,
}

impl Discovery {
    /// The authorized root, or the error the user should see.
    pub fn into_root(self) -> Result<PathBuf, ShieldError> {
        match self {
            Discovery::Authorized { root, .. } => Ok(root),
            Discovery::Unauthorized { candidates } => Err(ShieldError::NotAuthorized {
                candidates: candidates.len(),
            }),
            Discovery::NoDrive => Err(ShieldError::NoDriveFound),
        }
    }

    pub fn candidates(&self) -> &[DriveCandidate] {
        match self {
            Discovery::Authorized { candidates, .. } | Discovery::Unauthorized { candidates } => {
                candidates
            }
            Discovery::NoDrive => &[],
        }
    }
}

/// Enumerate → authorize → open store → start monitor.
pub struct SessionController {
    enumerator: Arc<DriveEnumerator>,
    auth: AuthorizationManager,
    settings: SessionSettings,
}

impl SessionController {
    pub fn new(enumerator: Arc<DriveEnumerator>, settings: SessionSettings) -> Self {
        Self {
            enumerator,
            auth: AuthorizationManager::new(),
            settings,
        }
    }

    pub fn enumerator(&self) -> &Arc<DriveEnumerator> {
        &self.enumerator
    }

    pub fn authorization(&self) -> &AuthorizationManager {
        &self.auth
    }

    #[instrument(skip_all)]
    pub async fn discover(&self) -> Discovery {
        let candidates = self.enumerator.list_candidates().await;
        if candidates.is_empty() {
            return Discovery::NoDrive;
        }
        match self.auth.find_authorized(&candidates) {
            Some(root) => {
                let root = root.to_path_buf();
                info!(root = %root.display(), "authorized drive found");
                Discovery::Authorized { root, candidates }
            }
            None => Discovery::Unauthorized { candidates },
        }
    }

    /// Put a token on `target`, or on the first candidate when none is given.
    #[instrument(skip_all)]
    pub async fn setup(&self, target: Option<&Path>) -> Result<PathBuf, ShieldError> {
        let root = match target {
            Some(path) => path.to_path_buf(),
            None => self
                .enumerator
                .list_candidates()
                .await
                .into_iter()
                .next()
                .map(|c| c.path)
                .ok_or(ShieldError::NoDriveFound)?,
        };
        if self.auth.create_token(&root) {
            Ok(root)
        } else {
            Err(ShieldError::TokenCreateFailed { path: root })
        }
    }

    /// Open a session on an authorized root. The drive is verified once
    /// before the store is handed out.
    #[instrument(skip_all, fields(root = %root.display()))]
    pub async fn open(&self, root: PathBuf, keys: &dyn KeyProvider) -> Result<Session, ShieldError> {
        if !self.auth.is_authorized(&root) {
            return Err(ShieldError::NotAuthorized { candidates: 1 });
        }
        let salt = DriveSalt::load_or_create(&root)?;
        let key = keys.key_for(&salt).await?;
        let codec = SealedCodec::new(&key)?;
        let check = KeyCheck::at(&root).verify_or_enroll(&codec)?;
        debug!(?check, "drive key accepted");

        let context = Arc::new(SessionContext::new(root));
        let monitor = DriveMonitor::new(Arc::clone(&context), Arc::clone(&self.enumerator));
        if monitor.check_once().await == MonitorState::Revoked {
            warn!("drive failed verification at open");
            return Err(ShieldError::SessionRevoked);
        }

        let store = CredentialStore::new(Arc::clone(&context), Arc::new(codec));
        let session_id = context.id();
        let monitor = monitor.start(self.settings.monitor_interval, move || {
            warn!(session = %session_id, "authorized drive lost; session revoked");
        });

        let heartbeat = match &self.settings.heartbeat {
            Some(settings) => match Heartbeat::new(settings.clone()) {
                Ok(hb) => Some(hb.spawn(monitor.subscribe())),
                Err(err) => {
                    warn!(error = %err, "heartbeat disabled: client setup failed");
                    None
                }
            },
            None => None,
        };

        info!(session = %context.id(), codec = store.codec_name(), "session opened");
        Ok(Session {
            context,
            store,
            monitor,
            heartbeat,
        })
    }
}

/// An open, monitored session on one drive.
pub struct Session {
    context: Arc<SessionContext>,
    store: CredentialStore,
    monitor: MonitorHandle,
    heartbeat: Option<HeartbeatHandle>,
}

impl Session {
    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    pub fn id(&self) -> Uuid {
        self.context.id()
    }

    pub fn root(&self) -> &Path {
        self.context.root()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.context.started_at()
    }

    pub fn state(&self) -> MonitorState {
        self.monitor.state()
    }

    /// True once the drive is lost or the monitor is no longer running.
    pub fn is_revoked(&self) -> bool {
        self.context.is_revoked() || !self.monitor.is_watching()
    }

    /// Observe the revoke transition.
    pub fn revoked(&self) -> watch::Receiver<MonitorState> {
        self.monitor.subscribe()
    }

    /// Resolves once the monitor revokes the session.
    pub async fn wait_revoked(&self) {
        let mut state = self.monitor.subscribe();
        // A closed channel means the monitor is gone; the session cannot
        // recover from that either.
        let _ = state.wait_for(|s| *s == MonitorState::Revoked).await;
    }

    /// User-initiated end. Stops timers without signalling a revoke.
    #[instrument(skip_all, fields(session = %self.context.id()))]
    pub async fn close(self) {
        if let Some(heartbeat) = self.heartbeat {
            heartbeat.stop().await;
        }
        self.monitor.stop().await;
        info!("session closed");
    }
}

#[cfg(test)]
mod tests {
    use cryptoshield_core::{CredentialEntry, DriveStrategy};
    use cryptoshield_drive::strategies::ConfiguredRoots;
    use cryptoshield_storage::InMemoryKeyProvider;

    use super::*;

    fn controller(roots: Vec<PathBuf>, interval: Duration) -> SessionController {
        let strategies: Vec<Arc<dyn DriveStrategy>> = vec![Arc::new(ConfiguredRoots::new(roots))];
        SessionController::new(
            Arc::new(DriveEnumerator::new(strategies, Duration::from_millis(200))),
            SessionSettings {
                monitor_interval: interval,
                heartbeat: None,
            },
        )
    }

    #[tokio::test]
    async fn discovery_distinguishes_no_drive_from_unauthorized() {
        let dir = tempfile::tempdir().expect("tempdir");
        let missing = controller(vec![dir.path().join("absent")], Duration::from_secs(1));
        assert_eq!(missing.discover().await, Discovery::NoDrive);
        assert_eq!(
            missing.discover().await.into_root(),
            Err(ShieldError::NoDriveFound)
        );

        let present = controller(vec![dir.path().to_path_buf()], Duration::from_secs(1));
        let found = present.discover().await;
        assert_eq!(found.candidates().len(), 1);
        assert_eq!(
            found.into_root(),
            Err(ShieldError::NotAuthorized { candidates: 1 })
        );
    }

    #[tokio::test]
    async fn setup_then_discover_then_use_store() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ctl = controller(vec![dir.path().to_path_buf()], Duration::from_secs(1));

        assert_eq!(ctl.setup(None).await.expect("setup"), dir.path());
        let root = ctl.discover().await.into_root().expect("authorized");

        let keys = InMemoryKeyProvider::default();
        let session = ctl.open(root, &keys).await.expect("open");
        assert_eq!(session.state(), MonitorState::Watching);
        session
            .store()
            .upsert(&CredentialEntry::new("github.com", "alice", "pa55"))
            .expect("upsert");
        assert_eq!(session.store().load().expect("load").len(), 1);
        assert!(dir.path().join(cryptoshield_storage::SALT_FILENAME).is_file());

        session.close().await;
    }

    #[tokio::test]
    async fn setup_without_candidates_is_no_drive() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ctl = controller(vec![dir.path().join("absent")], Duration::from_secs(1));
        assert_eq!(ctl.setup(None).await, Err(ShieldError::NoDriveFound));
    }

    #[tokio::test]
    async fn open_refuses_unauthorized_root() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ctl = controller(vec![dir.path().to_path_buf()], Duration::from_secs(1));
        let keys = InMemoryKeyProvider::default();
        let err = ctl
            .open(dir.path().to_path_buf(), &keys)
            .await
            .err()
            .expect("refused");
        assert!(err.is_recoverable());
    }

    #[tokio::test]
    async fn wrong_key_is_refused_before_touching_the_log() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ctl = controller(vec![dir.path().to_path_buf()], Duration::from_secs(1));
        ctl.setup(None).await.expect("setup");

        let owner = InMemoryKeyProvider::default();
        let session = ctl
            .open(dir.path().to_path_buf(), &owner)
            .await
            .expect("open");
        session
            .store()
            .upsert(&CredentialEntry::new("site", "user", "a"))
            .expect("upsert");
        session.close().await;

        let intruder = InMemoryKeyProvider::default();
        let err = ctl
            .open(dir.path().to_path_buf(), &intruder)
            .await
            .err()
            .expect("refused");
        assert_eq!(err, ShieldError::WrongPassphrase);

        let session = ctl
            .open(dir.path().to_path_buf(), &owner)
            .await
            .expect("reopen");
        assert_eq!(
            session.store().load().expect("load"),
            vec![CredentialEntry::new("site", "user", "a")]
        );
        session.close().await;
    }

    #[tokio::test]
    async fn zero_monitor_interval_still_fails_closed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path().join("KEY");
        std::fs::create_dir(&root).expect("mkdir");
        let ctl = controller(vec![root.clone()], Duration::ZERO);
        ctl.setup(Some(&root)).await.expect("setup");

        let keys = InMemoryKeyProvider::default();
        let session = ctl.open(root.clone(), &keys).await.expect("open");
        std::fs::remove_file(root.join(cryptoshield_drive::TOKEN_FILENAME)).expect("rm token");

        tokio::time::timeout(Duration::from_secs(2), session.wait_revoked())
            .await
            .expect("revoked in time");
        assert!(session.is_revoked());
        assert_eq!(
            session.store().upsert(&CredentialEntry::new("s", "u", "p")),
            Err(ShieldError::SessionRevoked)
        );
        session.close().await;
    }

    #[tokio::test]
    async fn unplugging_revokes_session_and_store() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path().join("KEY");
        std::fs::create_dir(&root).expect("mkdir");
        let ctl = controller(vec![root.clone()], Duration::from_millis(20));
        ctl.setup(Some(&root)).await.expect("setup");

        let keys = InMemoryKeyProvider::default();
        let session = ctl.open(root.clone(), &keys).await.expect("open");
        std::fs::remove_dir_all(&root).expect("unplug");

        tokio::time::timeout(Duration::from_secs(2), session.wait_revoked())
            .await
            .expect("revoked in time");
        assert!(session.is_revoked());
        assert_eq!(session.store().load(), Err(ShieldError::SessionRevoked));
        session.close().await;
    }
}
