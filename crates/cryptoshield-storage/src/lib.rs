//! Encrypted credential log on the authorized drive.
//! Keys come from Argon2id over the user's passphrase and a per-drive salt.

pub mod credential_store;
pub mod key_check;
pub mod key_provider;
pub mod sealed_codec;

pub use credential_store::{CredentialStore, MigrationReport, UpsertOutcome, LOG_FILENAME};
pub use key_check::{KeyCheck, KeyCheckOutcome, KEY_CHECK_FILENAME};
pub use key_provider::{
    DriveSalt, InMemoryKeyProvider, KeyError, KeyMaterial, KeyProvider, PassphraseKeyProvider,
    PassphraseKeyring, SALT_FILENAME,
};
pub use sealed_codec::SealedCodec;
