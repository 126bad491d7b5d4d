use std::{
    fs::OpenOptions,
    io::Write,
    path::{Path, PathBuf},
    process::{Child, ExitStatus},
    time::{Duration, Instant},
};

#[cfg(windows)]
use std::process::Stdio;

use cryptoshield_core::DriveCandidate;
use tracing::{debug, info, instrument, warn};

/// Canonical token name, hidden by the dot prefix on unix.
pub const TOKEN_FILENAME: &str = ".cryptoshield.key";
/// Fallback when the canonical name cannot be written.
pub const TOKEN_ALT_FILENAME: &str = "cryptoshield.key";
/// Every name accepted during verification.
pub const ACCEPTED_TOKEN_NAMES: [&str; 4] = [
    TOKEN_FILENAME,
    TOKEN_ALT_FILENAME,
    ".cryptoshield.key.txt",
    "cryptoshield.key.txt",
];
/// Written on creation, ignored when verifying.
pub const TOKEN_MARKER: &str = "authorized\n";

/// Checks for and creates the possession token on a drive root.
///
/// Existence of any accepted name is the truth signal; content never matters.
#[derive(Debug, Clone, Copy, Default)]
pub struct AuthorizationManager;

impl AuthorizationManager {
    pub fn new() -> Self {
        Self
    }

    pub fn is_authorized(&self, root: &Path) -> bool {
        self.token_path(root).is_some()
    }

    /// The token file present at `root`, if any.
    pub fn token_path(&self, root: &Path) -> Option<PathBuf> {
        ACCEPTED_TOKEN_NAMES
            .iter()
            .map(|name| root.join(name))
            .find(|path| path.is_file())
    }

    /// First candidate, in input order, that carries a token.
    pub fn find_authorized<'a>(&self, candidates: &'a [DriveCandidate]) -> Option<&'a Path> {
        candidates
            .iter()
            .map(|c| c.path.as_path())
            .find(|root| self.is_authorized(root))
    }

    /// Write the token unless one is already there. Returns whether a token
    /// exists afterwards.
    #[instrument(skip_all, fields(root = %root.display()))]
    pub fn create_token(&self, root: &Path) -> bool {
        if self.is_authorized(root) {
            debug!("drive already authorized");
            return true;
        }
        if !root.is_dir() {
            warn!("drive root missing; token not created");
            return false;
        }

        for name in [TOKEN_FILENAME, TOKEN_ALT_FILENAME] {
            let path = root.join(name);
            match write_marker(&path) {
                Ok(()) => {
                    hide(&path);
                    info!(token = name, "authorization token created");
                    return self.is_authorized(root);
                }
                Err(err) => warn!(token = name, error = %err, "could not write token"),
            }
        }
        false
    }
}

fn write_marker(path: &Path) -> std::io::Result<()> {
    let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
    file.write_all(TOKEN_MARKER.as_bytes())?;
    file.sync_all()
}

/// Bound on the `attrib` call that hides the token.
#[cfg_attr(not(windows), allow(dead_code))]
const HIDE_TIMEOUT: Duration = Duration::from_secs(1);

#[cfg(windows)]
fn hide(path: &Path) {
    let child = std::process::Command::new("attrib")
        .arg("+h")
        .arg(path)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn();
    match child.and_then(|child| wait_bounded(child, HIDE_TIMEOUT)) {
        Ok(Some(s)) if s.success() => {}
        Ok(Some(s)) => debug!(code = ?s.code(), "attrib +h failed; token left visible"),
        Ok(None) => debug!("attrib +h timed out; token left visible"),
        Err(err) => debug!(error = %err, "attrib unavailable; token left visible"),
    }
}

/// Wait for `child` up to `limit`, killing it on expiry. `None` means it
/// was killed.
#[cfg_attr(not(windows), allow(dead_code))]
fn wait_bounded(mut child: Child, limit: Duration) -> std::io::Result<Option<ExitStatus>> {
    let deadline = Instant::now() + limit;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            return Ok(None);
        }
        std::thread::sleep(Duration::from_millis(20));
    }
}

#[cfg(not(windows))]
fn hide(_path: &Path) {}

#[cfg(test)]
mod tests {
    use std::fs;

    use cryptoshield_core::StrategyKind;

    use super::*;

    fn artifacts(root: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(root)
            .expect("read dir")
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|n| ACCEPTED_TOKEN_NAMES.contains(&n.as_str()))
            .collect();
        names.sort();
        names
    }

    #[test]
    fn create_token_is_idempotent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let auth = AuthorizationManager::new();

        assert!(!auth.is_authorized(dir.path()));
        assert!(auth.create_token(dir.path()));
        assert!(auth.create_token(dir.path()));
        assert_eq!(artifacts(dir.path()), vec![TOKEN_FILENAME.to_string()]);

        let content = fs::read_to_string(dir.path().join(TOKEN_FILENAME)).expect("read token");
        assert_eq!(content, TOKEN_MARKER);
    }

    #[test]
    fn any_accepted_name_authorizes_regardless_of_content() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("cryptoshield.key.txt"), "").expect("write");
        let auth = AuthorizationManager::new();
        assert!(auth.is_authorized(dir.path()));
        assert!(auth.create_token(dir.path()));
        assert_eq!(artifacts(dir.path()).len(), 1);
    }

    #[test]
    fn directory_named_like_token_does_not_count() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::create_dir(dir.path().join(TOKEN_FILENAME)).expect("mkdir");
        let auth = AuthorizationManager::new();
        assert!(!auth.is_authorized(dir.path()));
        // Canonical name is blocked, so the alternate is written.
        assert!(auth.create_token(dir.path()));
        assert!(dir.path().join(TOKEN_ALT_FILENAME).is_file());
    }

    #[test]
    fn missing_root_is_not_authorized_and_cannot_be_set_up() {
        let dir = tempfile::tempdir().expect("tempdir");
        let gone = dir.path().join("unplugged");
        let auth = AuthorizationManager::new();
        assert!(!auth.is_authorized(&gone));
        assert!(!auth.create_token(&gone));
        assert!(!gone.exists());
    }

    #[test]
    fn find_authorized_returns_first_in_input_order() {
        let a = tempfile::tempdir().expect("tempdir");
        let b = tempfile::tempdir().expect("tempdir");
        let c = tempfile::tempdir().expect("tempdir");
        let auth = AuthorizationManager::new();
        auth.create_token(b.path());
        auth.create_token(c.path());

        let candidates = vec![
            DriveCandidate::new(a.path(), StrategyKind::MountTable),
            DriveCandidate::new(c.path(), StrategyKind::MountTable),
            DriveCandidate::new(b.path(), StrategyKind::Configured),
        ];
        assert_eq!(auth.find_authorized(&candidates), Some(c.path()));
        assert_eq!(auth.find_authorized(&candidates[..1]), None);
    }

    #[cfg(unix)]
    #[test]
    fn slow_helper_is_killed_at_the_deadline() {
        let child = std::process::Command::new("sleep")
            .arg("5")
            .spawn()
            .expect("spawn sleep");
        let started = Instant::now();
        let status = wait_bounded(child, Duration::from_millis(100)).expect("wait");
        assert!(status.is_none());
        assert!(started.elapsed() < Duration::from_secs(2));

        let quick = std::process::Command::new("true").spawn().expect("spawn true");
        let status = wait_bounded(quick, Duration::from_secs(2)).expect("wait");
        assert!(status.expect("exited").success());
    }
}
