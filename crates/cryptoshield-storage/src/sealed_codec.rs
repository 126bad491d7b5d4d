use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng, Payload},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use cryptoshield_core::{CredentialEntry, EntryCodec, ShieldError};
use zeroize::Zeroizing;

use crate::key_provider::{KeyError, KeyMaterial};

/// Bound into every line so ciphertext from another context never decodes.
const ASSOCIATED_DATA: &[u8] = b"cryptoshield/passwords/v1";
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// AES-256-GCM line codec.
///
/// Plaintext is the JSON array `[website, username, secret]`; the line is
/// base64url(nonce ‖ ciphertext ‖ tag) without padding.
pub struct SealedCodec {
    cipher: Aes256Gcm,
}

impl SealedCodec {
    pub fn new(material: &KeyMaterial) -> Result<Self, KeyError> {
        let cipher = Aes256Gcm::new_from_slice(material.bytes.as_slice())
            .map_err(|e| KeyError::Derivation(format!("cipher init failed: {e}")))?;
        Ok(Self { cipher })
    }

    /// base64url(nonce ‖ ciphertext ‖ tag) of `msg` bound to `aad`.
    pub(crate) fn seal(&self, msg: &[u8], aad: &[u8]) -> Result<String, ShieldError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let sealed = self
            .cipher
            .encrypt(&nonce, Payload { msg, aad })
            .map_err(|e| ShieldError::store_io(format!("encrypt failed: {e}")))?;

        let mut line = Vec::with_capacity(NONCE_LEN + sealed.len());
        line.extend_from_slice(nonce.as_slice());
        line.extend_from_slice(&sealed);
        Ok(URL_SAFE_NO_PAD.encode(line))
    }

    pub(crate) fn open(&self, line: &str, aad: &[u8]) -> Result<Zeroizing<Vec<u8>>, ShieldError> {
        let raw = URL_SAFE_NO_PAD
            .decode(line.trim())
            .map_err(ShieldError::corrupt)?;
        if raw.len() < NONCE_LEN + TAG_LEN {
            return Err(ShieldError::corrupt("line too short"));
        }
        let (nonce, sealed) = raw.split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), Payload { msg: sealed, aad })
            .map(Zeroizing::new)
            .map_err(|_| ShieldError::corrupt("authentication failed"))
    }
}

impl EntryCodec for SealedCodec {
    fn name(&self) -> &'static str {
        "aes-256-gcm"
    }

    fn encode(&self, entry: &CredentialEntry) -> Result<String, ShieldError> {
        let fields = [&entry.website, &entry.username, &entry.secret];
        let plaintext = Zeroizing::new(serde_json::to_vec(&fields).map_err(ShieldError::store_io)?);
        self.seal(plaintext.as_slice(), ASSOCIATED_DATA)
    }

    fn decode(&self, line: &str) -> Result<CredentialEntry, ShieldError> {
        let plaintext = self.open(line, ASSOCIATED_DATA)?;
        let [website, username, secret]: [String; 3] =
            serde_json::from_slice(&plaintext).map_err(ShieldError::corrupt)?;
        Ok(CredentialEntry {
            website,
            username,
            secret,
        })
    }
}
