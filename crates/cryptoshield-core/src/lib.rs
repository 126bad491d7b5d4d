//! Core model for CryptoShield: credential entries, drive candidates, the
//! strategy and codec contracts, and the explicit session context.
//! This crate is intentionally small to keep dependency surface minimal.

pub mod codec;
pub mod drive;
pub mod entry;
pub mod error;
pub mod session;

pub use codec::{EntryCodec, LegacyCodec};
pub use drive::{normalize_root, DriveCandidate, DriveStrategy, StrategyError, StrategyKind};
pub use entry::CredentialEntry;
pub use error::ShieldError;
pub use session::{SessionContext, Verification};
