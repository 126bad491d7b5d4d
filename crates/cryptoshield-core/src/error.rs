use std::path::PathBuf;

use thiserror::Error;

/// Failure taxonomy shared by every CryptoShield component.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ShieldError {
    /// Enumeration produced zero removable candidates.
    #[error("no removable drive found")]
    NoDriveFound,
    /// Candidates exist but none carries the authorization token.
    #[error("{candidates} removable drive(s) found but none is authorized")]
    NotAuthorized { candidates: usize },
    /// Writing the token failed under every accepted name.
    #[error("could not create authorization token on {}", path.display())]
    TokenCreateFailed { path: PathBuf },
    /// Reading or writing the credential log failed (absence is not an error).
    #[error("credential store i/o failure: {reason}")]
    StoreIo { reason: String },
    /// A log line could not be decoded. Recovered by the store, never fatal.
    #[error("corrupt credential entry: {reason}")]
    CorruptEntry { reason: String },
    /// The monitor lost the authorized drive; the session is over.
    #[error("session revoked: authorized drive removed or token missing")]
    SessionRevoked,
    /// The derived key does not match the one this drive was set up with.
    #[error("wrong passphrase for this drive")]
    WrongPassphrase,
    /// Key derivation or salt handling failed.
    #[error("key error: {reason}")]
    Key { reason: String },
}

impl ShieldError {
    pub fn store_io<E: ToString>(err: E) -> Self {
        Self::StoreIo {
            reason: err.to_string(),
        }
    }

    pub fn corrupt<E: ToString>(err: E) -> Self {
        Self::CorruptEntry {
            reason: err.to_string(),
        }
    }

    /// True for failures the user can fix by plugging in or setting up a drive.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::NoDriveFound | Self::NotAuthorized { .. } | Self::TokenCreateFailed { .. }
        )
    }
}
