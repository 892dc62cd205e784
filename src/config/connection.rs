//! Connection credential table.
//!
//! Each configured connection is a `(name, password, connection string)`
//! triple. A client proves knowledge of a credential by sending
//! `HMAC(name/AND/password, challenge)` as its token; the matching entry
//! decides which physical database the session is bound to.

use super::settings::{Settings, SettingsError};
use crate::crypto::{digests_match, hmac_hex};

/// Separator between connection name and password in the composite key.
pub const COMPOSITE_SEPARATOR: &str = "/AND/";

/// A single resolved credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    /// Connection name, as known to clients.
    pub name: String,
    /// Connection password.
    pub password: String,
    /// Physical connection string for the database driver.
    pub connection_string: String,
}

impl Credential {
    pub fn new(
        name: impl Into<String>,
        password: impl Into<String>,
        connection_string: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            password: password.into(),
            connection_string: connection_string.into(),
        }
    }

    /// The key both sides derive once this credential is proven.
    pub fn composite_key(&self) -> String {
        format!("{}{}{}", self.name, COMPOSITE_SEPARATOR, self.password)
    }

    /// The token a client must send to prove this credential.
    pub fn token_for(&self, challenge: &str) -> String {
        hmac_hex(self.composite_key().as_bytes(), challenge.as_bytes())
    }
}

/// Immutable set of credentials shared by every worker.
#[derive(Debug, Clone, Default)]
pub struct CredentialTable {
    entries: Vec<Credential>,
}

impl CredentialTable {
    pub fn new(mut entries: Vec<Credential>) -> Self {
        // Stable order so token matching is deterministic across runs.
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Self { entries }
    }

    /// Build the table from loaded settings, expanding environment variables.
    pub fn from_settings(settings: &Settings) -> Result<Self, SettingsError> {
        let mut entries = Vec::with_capacity(settings.connections.len());
        for (name, conn) in &settings.connections {
            entries.push(Credential {
                name: name.clone(),
                password: conn.resolved_password()?,
                connection_string: conn.resolved_connection_string()?,
            });
        }
        Ok(Self::new(entries))
    }

    /// Find the credential whose token for `challenge` equals `token`.
    pub fn match_token(&self, challenge: &str, token: &str) -> Option<&Credential> {
        self.entries
            .iter()
            .find(|cred| digests_match(&cred.token_for(challenge), token))
    }

    /// Look up a credential by connection name.
    pub fn get(&self, name: &str) -> Option<&Credential> {
        self.entries.iter().find(|cred| cred.name == name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Credential> {
        self.entries.iter()
    }
}
