use std::{
    io::{self, BufRead, Write},
    sync::Arc,
};

use color_eyre::{eyre::Report, Result, Section};
use cryptoshield_core::ShieldError;
use cryptoshield_drive::DriveEnumerator;
use cryptoshield_session::{Session, SessionController};
use cryptoshield_storage::{DriveSalt, KeyCheck, PassphraseKeyProvider, PassphraseKeyring};
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, warn};

use crate::config::Config;

pub const PASSPHRASE_ENV: &str = "CRYPTOSHIELD_PASSPHRASE";
const KEYRING_SERVICE: &str = "cryptoshield";

pub fn controller(config: &Config, long_lived: bool) -> SessionController {
    let enumerator = Arc::new(DriveEnumerator::from_settings(&config.strategy_settings()));
    SessionController::new(enumerator, config.session_settings(long_lived))
}

/// Discover the authorized drive, unlock it and start monitoring.
pub async fn open_session(config: &Config, long_lived: bool) -> Result<Session> {
    let controller = controller(config, long_lived);
    let root = controller
        .discover()
        .await
        .into_root()
        .map_err(with_guidance)?;

    let salt = DriveSalt::load_or_create(&root)
        .map_err(|e| with_guidance(ShieldError::from(e)))?;
    let remember = config.security.remember_passphrase;
    let keyring = PassphraseKeyring::new(KEYRING_SERVICE);
    let first_use = !KeyCheck::at(&root).is_enrolled();
    let (passphrase, source) = resolve_passphrase(&keyring, &salt, remember, first_use)?;
    let keys = PassphraseKeyProvider::new(passphrase);

    match controller.open(root, &keys).await {
        Ok(session) => {
            // Only a passphrase the drive accepted is worth keeping.
            if remember && source == PassphraseSource::Prompt {
                if let Err(err) = keyring.remember(&salt, keys.passphrase()) {
                    warn!(error = %err, "could not store passphrase in keyring");
                }
            }
            Ok(session)
        }
        Err(ShieldError::WrongPassphrase) if source == PassphraseSource::Keyring => {
            if let Err(err) = keyring.forget(&salt) {
                warn!(error = %err, "could not drop stale keyring passphrase");
            }
            Err(with_guidance(ShieldError::WrongPassphrase))
        }
        Err(err) => Err(with_guidance(err)),
    }
}

/// Attach a user-facing hint to the errors a user can act on.
pub fn with_guidance(err: ShieldError) -> Report {
    let hint = guidance(&err);
    let report = Report::new(err);
    match hint {
        Some(hint) => report.suggestion(hint),
        None => report,
    }
}

fn guidance(err: &ShieldError) -> Option<&'static str> {
    match err {
        ShieldError::NoDriveFound => {
            Some("insert the USB drive (or list it under [drives] extra_roots) and retry")
        }
        ShieldError::NotAuthorized { .. } => {
            Some("run `cryptoshield setup [PATH]` to authorize a drive")
        }
        ShieldError::TokenCreateFailed { .. } => {
            Some("check that the drive is mounted read-write and retry")
        }
        ShieldError::WrongPassphrase => Some(
            "retry with the passphrase this drive was set up with (check CRYPTOSHIELD_PASSPHRASE if set)",
        ),
        ShieldError::SessionRevoked => Some("reinsert the authorized drive and open a new session"),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PassphraseSource {
    Environment,
    Keyring,
    Prompt,
}

/// Environment, then keyring (when remembering), then an interactive prompt.
/// A drive without an enrolled key asks twice.
fn resolve_passphrase(
    keyring: &PassphraseKeyring,
    salt: &DriveSalt,
    remember: bool,
    first_use: bool,
) -> Result<(SecretString, PassphraseSource)> {
    if let Some(secret) = non_empty(std::env::var(PASSPHRASE_ENV).ok()) {
        debug!("passphrase taken from environment");
        return Ok((secret, PassphraseSource::Environment));
    }

    if remember {
        match keyring.recall(salt) {
            Ok(Some(secret)) => {
                debug!(salt = %salt.id(), "passphrase taken from keyring");
                return Ok((secret, PassphraseSource::Keyring));
            }
            Ok(None) => {}
            Err(err) => warn!(error = %err, "keyring unavailable"),
        }
    }

    let secret = prompt_passphrase(&mut io::stdin().lock(), &mut io::stderr(), first_use)?;
    Ok((secret, PassphraseSource::Prompt))
}

fn prompt_passphrase(
    input: &mut impl BufRead,
    prompt: &mut impl Write,
    confirm: bool,
) -> Result<SecretString> {
    let label = if confirm {
        "New drive passphrase: "
    } else {
        "Drive passphrase: "
    };
    let secret = read_passphrase(input, prompt, label)?;
    if confirm {
        let again = read_passphrase(input, prompt, "Repeat passphrase: ")?;
        if again.expose_secret() != secret.expose_secret() {
            color_eyre::eyre::bail!("passphrases do not match");
        }
    }
    Ok(secret)
}

fn read_passphrase(
    input: &mut impl BufRead,
    prompt: &mut impl Write,
    label: &str,
) -> Result<SecretString> {
    write!(prompt, "{label}")?;
    prompt.flush()?;
    let mut line = String::new();
    input.read_line(&mut line)?;
    non_empty(Some(line)).ok_or_else(|| color_eyre::eyre::eyre!("empty passphrase"))
}

fn non_empty(value: Option<String>) -> Option<SecretString> {
    let value = value?;
    let trimmed = value.trim_end_matches(['\r', '\n']);
    if trimmed.is_empty() {
        None
    } else {
        Some(SecretString::from(trimmed.to_string()))
    }
}

/// Read one line of secret input (used by `add` when no secret is given).
pub fn read_secret_line(input: &mut impl BufRead) -> Result<String> {
    let mut line = String::new();
    input.read_line(&mut line)?;
    let secret = line.trim_end_matches(['\r', '\n']).to_string();
    if secret.is_empty() {
        color_eyre::eyre::bail!("no secret given on stdin");
    }
    Ok(secret)
}
