use std::{
    fmt,
    fs::{self, OpenOptions},
    io::{ErrorKind, Write},
    path::Path,
    sync::{Arc, Mutex},
};

use argon2::Argon2;
use async_trait::async_trait;
use base64::{
    engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
    Engine as _,
};
use cryptoshield_core::ShieldError;
use rand::{rngs::OsRng, RngCore};
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use tracing::{debug, info, instrument};
use zeroize::Zeroizing;

/// Salt file kept next to the credential log on the drive.
pub const SALT_FILENAME: &str = "cryptoshield.salt";
const SALT_LEN: usize = 16;

/// 256-bit store key. Bytes are wiped on drop.
#[derive(Clone)]
pub struct KeyMaterial {
    /// Identifier for logging (never log key bytes).
    pub id: String,
    pub bytes: Zeroizing<[u8; 32]>,
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("id", &self.id)
            .field("bytes", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("keyring error: {0}")]
    Keyring(String),
    #[error("salt error: {0}")]
    Salt(String),
    #[error("key derivation failed: {0}")]
    Derivation(String),
    #[error("key check failed: {0}")]
    Check(String),
    #[error("key does not match this drive")]
    Mismatch,
}

impl From<KeyError> for ShieldError {
    fn from(err: KeyError) -> Self {
        match err {
            KeyError::Mismatch => ShieldError::WrongPassphrase,
            other => ShieldError::Key {
                reason: other.to_string(),
            },
        }
    }
}

/// Per-drive random salt. Created once and never rewritten.
#[derive(Clone, PartialEq, Eq)]
pub struct DriveSalt {
    bytes: [u8; SALT_LEN],
}

impl DriveSalt {
    /// Read `cryptoshield.salt` at `root`, creating it on first use.
    #[instrument(skip_all, fields(root = %root.display()))]
    pub fn load_or_create(root: &Path) -> Result<Self, KeyError> {
        let path = root.join(SALT_FILENAME);
        match fs::read_to_string(&path) {
            Ok(text) => return Self::decode(&text),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(KeyError::Salt(err.to_string())),
        }

        let mut bytes = [0u8; SALT_LEN];
        OsRng.fill_bytes(&mut bytes);
        let salt = Self { bytes };

        let written = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .and_then(|mut file| {
                file.write_all(STANDARD.encode(bytes).as_bytes())?;
                file.sync_all()
            });
        match written {
            Ok(()) => {
                info!(salt = %salt.id(), "drive salt created");
                Ok(salt)
            }
            // Lost a race with another writer; theirs wins.
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                let text = fs::read_to_string(&path).map_err(|e| KeyError::Salt(e.to_string()))?;
                Self::decode(&text)
            }
            Err(err) => Err(KeyError::Salt(err.to_string())),
        }
    }

    fn decode(text: &str) -> Result<Self, KeyError> {
        let raw = STANDARD
            .decode(text.trim())
            .map_err(|e| KeyError::Salt(format!("base64: {e}")))?;
        let bytes: [u8; SALT_LEN] = raw
            .try_into()
            .map_err(|v: Vec<u8>| KeyError::Salt(format!("expected 16 bytes, got {}", v.len())))?;
        Ok(Self { bytes })
    }

    /// Stable, non-secret label for this salt (keyring account, logs).
    pub fn id(&self) -> String {
        URL_SAFE_NO_PAD.encode(&self.bytes[..8])
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl fmt::Debug for DriveSalt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("DriveSalt").field(&self.id()).finish()
    }
}

/// Produces the store key for a given drive.
#[async_trait]
pub trait KeyProvider: Send + Sync {
    async fn key_for(&self, salt: &DriveSalt) -> Result<KeyMaterial, KeyError>;
}

/// Argon2id over the user's passphrase and the drive salt.
pub struct PassphraseKeyProvider {
    passphrase: SecretString,
}

impl PassphraseKeyProvider {
    pub fn new(passphrase: SecretString) -> Self {
        Self { passphrase }
    }

    pub fn passphrase(&self) -> &SecretString {
        &self.passphrase
    }
}

#[async_trait]
impl KeyProvider for PassphraseKeyProvider {
    #[instrument(skip_all, fields(salt = %salt.id()))]
    async fn key_for(&self, salt: &DriveSalt) -> Result<KeyMaterial, KeyError> {
        let passphrase = Zeroizing::new(self.passphrase.expose_secret().as_bytes().to_vec());
        let salt = salt.clone();
        // Argon2 is deliberately slow; keep it off the async workers.
        tokio::task::spawn_blocking(move || derive_key(&passphrase, &salt))
            .await
            .map_err(|e| KeyError::Derivation(format!("derivation task failed: {e}")))?
    }
}

fn derive_key(passphrase: &[u8], salt: &DriveSalt) -> Result<KeyMaterial, KeyError> {
    let mut bytes = Zeroizing::new([0u8; 32]);
    Argon2::default()
        .hash_password_into(passphrase, salt.as_bytes(), bytes.as_mut_slice())
        .map_err(|e| KeyError::Derivation(e.to_string()))?;
    debug!("store key derived");
    Ok(KeyMaterial {
        id: salt.id(),
        bytes,
    })
}

/// Random key held in memory; ignores the salt. For tests and throwaway
/// sessions.
#[derive(Debug, Default, Clone)]
pub struct InMemoryKeyProvider {
    inner: Arc<Mutex<Option<KeyMaterial>>>,
}

#[async_trait]
impl KeyProvider for InMemoryKeyProvider {
    async fn key_for(&self, _salt: &DriveSalt) -> Result<KeyMaterial, KeyError> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|err| KeyError::Derivation(format!("lock poisoned: {err}")))?;

        if let Some(existing) = guard.clone() {
            return Ok(existing);
        }

        let mut bytes = Zeroizing::new([0u8; 32]);
        OsRng.fill_bytes(bytes.as_mut_slice());
        let material = KeyMaterial {
            id: "memory".to_string(),
            bytes,
        };
        *guard = Some(material.clone());
        Ok(material)
    }
}

/// Remembers passphrases in the OS keyring, one account per drive salt.
pub struct PassphraseKeyring {
    service: String,
}

impl PassphraseKeyring {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, salt: &DriveSalt) -> Result<keyring::Entry, KeyError> {
        keyring::Entry::new(&self.service, &salt.id()).map_err(|e| KeyError::Keyring(e.to_string()))
    }

    /// Stored passphrase for this drive, if any.
    pub fn recall(&self, salt: &DriveSalt) -> Result<Option<SecretString>, KeyError> {
        match self.entry(salt)?.get_password() {
            Ok(secret) => Ok(Some(SecretString::from(secret))),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(err) => Err(KeyError::Keyring(err.to_string())),
        }
    }

    pub fn remember(&self, salt: &DriveSalt, passphrase: &SecretString) -> Result<(), KeyError> {
        self.entry(salt)?
            .set_password(passphrase.expose_secret())
            .map_err(|e| KeyError::Keyring(e.to_string()))
    }

    pub fn forget(&self, salt: &DriveSalt) -> Result<(), KeyError> {
        match self.entry(salt)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(err) => Err(KeyError::Keyring(err.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn salt_is_created_once_and_reused() {
        let dir = tempfile::tempdir().expect("tempdir");
        let first = DriveSalt::load_or_create(dir.path()).expect("create");
        let second = DriveSalt::load_or_create(dir.path()).expect("load");
        assert_eq!(first, second);

        let on_disk = fs::read_to_string(dir.path().join(SALT_FILENAME)).expect("read salt");
        assert_eq!(STANDARD.decode(on_disk.trim()).expect("b64").len(), SALT_LEN);
    }

    #[test]
    fn truncated_salt_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join(SALT_FILENAME), STANDARD.encode([1u8; 4])).expect("write");
        let err = DriveSalt::load_or_create(dir.path()).expect_err("should reject");
        assert!(matches!(err, KeyError::Salt(_)));
    }

    #[tokio::test]
    async fn passphrase_key_depends_on_passphrase_and_salt() {
        let a = tempfile::tempdir().expect("tempdir");
        let b = tempfile::tempdir().expect("tempdir");
        let salt_a = DriveSalt::load_or_create(a.path()).expect("salt a");
        let salt_b = DriveSalt::load_or_create(b.path()).expect("salt b");

        let right = PassphraseKeyProvider::new(SecretString::from("correct horse".to_string()));
        let wrong = PassphraseKeyProvider::new(SecretString::from("battery staple".to_string()));

        let k1 = right.key_for(&salt_a).await.expect("derive");
        let k2 = right.key_for(&salt_a).await.expect("derive again");
        let k3 = wrong.key_for(&salt_a).await.expect("derive wrong");
        let k4 = right.key_for(&salt_b).await.expect("derive other drive");

        assert_eq!(*k1.bytes, *k2.bytes);
        assert_ne!(*k1.bytes, *k3.bytes);
        assert_ne!(*k1.bytes, *k4.bytes);
        assert_eq!(k1.id, salt_a.id());
    }

    #[tokio::test]
    async fn memory_provider_returns_same_key() {
        let dir = tempfile::tempdir().expect("tempdir");
        let salt = DriveSalt::load_or_create(dir.path()).expect("salt");
        let provider = InMemoryKeyProvider::default();
        let first = provider.key_for(&salt).await.expect("first");
        let second = provider.key_for(&salt).await.expect("second");
        assert_eq!(*first.bytes, *second.bytes);
    }

    #[test]
    fn debug_never_prints_key_bytes() {
        let material = KeyMaterial {
            id: "abc".into(),
            bytes: Zeroizing::new([7u8; 32]),
        };
        assert!(format!("{material:?}").contains("<redacted>"));
    }
}
