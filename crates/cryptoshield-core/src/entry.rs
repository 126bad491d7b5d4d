use std::fmt;

use serde::{Deserialize, Serialize};

/// One stored credential. Identity is `(website, username)`, compared exactly.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CredentialEntry {
    pub website: String,
    pub username: String,
    pub secret: String,
}

impl CredentialEntry {
    pub fn new(
        website: impl Into<String>,
        username: impl Into<String>,
        secret: impl Into<String>,
    ) -> Self {
        Self {
            website: website.into(),
            username: username.into(),
            secret: secret.into(),
        }
    }

    /// Case-sensitive identity match.
    pub fn has_key(&self, website: &str, username: &str) -> bool {
        self.website == website && self.username == username
    }

    /// Case-insensitive substring match on website or username.
    /// `needle` must already be lowercased.
    pub fn matches_lowercase(&self, needle: &str) -> bool {
        self.website.to_lowercase().contains(needle)
            || self.username.to_lowercase().contains(needle)
    }
}

// Secrets never reach logs through Debug.
impl fmt::Debug for CredentialEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialEntry")
            .field("website", &self.website)
            .field("username", &self.username)
            .field("secret", &"<redacted>")
            .finish()
    }
}
