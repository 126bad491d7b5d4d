use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::{entry::CredentialEntry, error::ShieldError};

/// Turns one credential into one log line and back.
///
/// Implementations must never emit a line containing `\n` or `\r`.
pub trait EntryCodec: Send + Sync {
    /// Short name used for logging.
    fn name(&self) -> &'static str;

    fn encode(&self, entry: &CredentialEntry) -> Result<String, ShieldError>;

    /// Decode a single line. Failures are `ShieldError::CorruptEntry`.
    fn decode(&self, line: &str) -> Result<CredentialEntry, ShieldError>;
}

/// The historical log format: base64 of `website,username,secret`.
///
/// This is a reversible transform, not protection. It is kept so old logs can
/// be read and migrated; new entries are written with an authenticated codec.
/// A website or username containing `,` cannot round-trip through this format.
#[derive(Debug, Default, Clone, Copy)]
pub struct LegacyCodec;

const FIELD_DELIMITER: char = ',';

impl EntryCodec for LegacyCodec {
    fn name(&self) -> &'static str {
        "legacy-base64"
    }

    fn encode(&self, entry: &CredentialEntry) -> Result<String, ShieldError> {
        let joined = format!(
            "{}{FIELD_DELIMITER}{}{FIELD_DELIMITER}{}",
            entry.website, entry.username, entry.secret
        );
        Ok(STANDARD.encode(joined.as_bytes()))
    }

    fn decode(&self, line: &str) -> Result<CredentialEntry, ShieldError> {
        let bytes = STANDARD.decode(line.trim()).map_err(ShieldError::corrupt)?;
        let text = String::from_utf8(bytes).map_err(ShieldError::corrupt)?;
        split_fields(&text)
    }
}

/// Split on the first two delimiters only; the secret keeps any later commas.
fn split_fields(text: &str) -> Result<CredentialEntry, ShieldError> {
    let mut parts = text.splitn(3, FIELD_DELIMITER);
    match (parts.next(), parts.next(), parts.next()) {
        (Some(website), Some(username), Some(secret)) => {
            Ok(CredentialEntry::new(website, username, secret))
        }
        _ => Err(ShieldError::corrupt("expected 3 comma-delimited fields")),
    }
}
