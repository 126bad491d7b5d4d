use std::{
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        RwLock, RwLockReadGuard, RwLockWriteGuard,
    },
};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::ShieldError;

/// Outcome of a guarded presence check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verification {
    StillValid,
    /// This call revoked the session.
    Revoked,
    /// A previous call already revoked it.
    AlreadyRevoked,
}

/// Explicit per-session state shared by the store and the monitor.
///
/// Reads share the guard; mutations and the monitor's re-check hold it
/// exclusively, so a revoke decision never interleaves with a write. Once
/// revoked, every guard acquisition fails with `ShieldError::SessionRevoked`.
#[derive(Debug)]
pub struct SessionContext {
    id: Uuid,
    root: PathBuf,
    started_at: DateTime<Utc>,
    guard: RwLock<()>,
    revoked: AtomicBool,
}

impl SessionContext {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            id: Uuid::new_v4(),
            root: root.into(),
            started_at: Utc::now(),
            guard: RwLock::new(()),
            revoked: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn is_revoked(&self) -> bool {
        self.revoked.load(Ordering::SeqCst)
    }

    /// Shared access for loads and searches.
    pub fn read(&self) -> Result<RwLockReadGuard<'_, ()>, ShieldError> {
        let guard = self
            .guard
            .read()
            .map_err(|err| ShieldError::store_io(format!("lock poisoned: {err}")))?;
        self.ensure_active()?;
        Ok(guard)
    }

    /// Exclusive access for mutations.
    pub fn write(&self) -> Result<RwLockWriteGuard<'_, ()>, ShieldError> {
        let guard = self
            .guard
            .write()
            .map_err(|err| ShieldError::store_io(format!("lock poisoned: {err}")))?;
        self.ensure_active()?;
        Ok(guard)
    }

    /// Run `still_present` under the exclusive guard and revoke when it fails.
    ///
    /// A poisoned guard counts as a failed check.
    pub fn verify_or_revoke(&self, still_present: impl FnOnce(&Path) -> bool) -> Verification {
        let guard = self.guard.write().ok();
        if self.is_revoked() {
            return Verification::AlreadyRevoked;
        }
        if guard.is_some() && still_present(&self.root) {
            return Verification::StillValid;
        }
        self.revoked.store(true, Ordering::SeqCst);
        Verification::Revoked
    }

    /// Revoke without a check, for when verification can no longer run.
    /// Returns whether this call did the revoking.
    pub fn revoke(&self) -> bool {
        let _guard = self.guard.write();
        !self.revoked.swap(true, Ordering::SeqCst)
    }

    fn ensure_active(&self) -> Result<(), ShieldError> {
        if self.is_revoked() {
            Err(ShieldError::SessionRevoked)
        } else {
            Ok(())
        }
    }
}
