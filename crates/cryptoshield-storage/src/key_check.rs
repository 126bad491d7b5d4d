use std::{
    fs::{self, OpenOptions},
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
};

use tracing::{info, instrument, warn};

use crate::{key_provider::KeyError, sealed_codec::SealedCodec};

/// Sealed marker stored next to the salt; proves a key belongs to the drive.
pub const KEY_CHECK_FILENAME: &str = "cryptoshield.check";
const CHECK_AAD: &[u8] = b"cryptoshield/key-check/v1";
const CHECK_PLAINTEXT: &[u8] = b"cryptoshield key check";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyCheckOutcome {
    /// No marker existed; one was written with this key.
    Enrolled,
    Verified,
}

/// Guards a drive against opening its log under the wrong key.
#[derive(Debug, Clone)]
pub struct KeyCheck {
    path: PathBuf,
}

impl KeyCheck {
    pub fn at(root: &Path) -> Self {
        Self {
            path: root.join(KEY_CHECK_FILENAME),
        }
    }

    /// Whether a key was already fixed for this drive.
    pub fn is_enrolled(&self) -> bool {
        self.path.is_file()
    }

    /// Compare `codec`'s key with the enrolled one, enrolling it when the
    /// drive has none yet.
    #[instrument(skip_all, fields(path = %self.path.display()))]
    pub fn verify_or_enroll(&self, codec: &SealedCodec) -> Result<KeyCheckOutcome, KeyError> {
        match fs::read_to_string(&self.path) {
            Ok(line) => return self.verify(codec, &line),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(KeyError::Check(err.to_string())),
        }

        let marker = codec
            .seal(CHECK_PLAINTEXT, CHECK_AAD)
            .map_err(|e| KeyError::Check(e.to_string()))?;
        let written = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
            .and_then(|mut file| {
                file.write_all(marker.as_bytes())?;
                file.write_all(b"\n")?;
                file.sync_all()
            });
        match written {
            Ok(()) => {
                info!("drive key enrolled");
                Ok(KeyCheckOutcome::Enrolled)
            }
            // Someone enrolled first; their key is the drive's key.
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                let line =
                    fs::read_to_string(&self.path).map_err(|e| KeyError::Check(e.to_string()))?;
                self.verify(codec, &line)
            }
            Err(err) => Err(KeyError::Check(err.to_string())),
        }
    }

    fn verify(&self, codec: &SealedCodec, line: &str) -> Result<KeyCheckOutcome, KeyError> {
        match codec.open(line, CHECK_AAD) {
            Ok(plain) if plain.as_slice() == CHECK_PLAINTEXT => Ok(KeyCheckOutcome::Verified),
            _ => {
                warn!("key does not match the drive");
                Err(KeyError::Mismatch)
            }
        }
    }
}
