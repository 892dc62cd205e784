//! Challenge/response authentication.
//!
//! # State machine
//!
//! ```text
//!                HELLO                 token matches a credential
//! UNAUTHENTICATED ───► CHALLENGED ─────────────────────────────► AUTHENTICATED
//!   (no key)         (shared secret)                          (name/AND/password)
//!                                                                     │ CONNECT
//!                                                                     ▼
//!                       CLOSED ◄──────────── BYE ─────────────── KEY-ROTATED
//!                                                                 (md5 of key)
//! ```
//!
//! Every reply except `CLOSED` carries a fresh challenge; the next request
//! must be signed with the current key and carry `HMAC(key, challenge)` as
//! its token. Key rotation is one way, so a captured composite key stops
//! working once the connection is established.

use serde::{Deserialize, Serialize};

use crate::config::CredentialTable;
use crate::crypto::{digests_match, hmac_hex, rotate_key};
use crate::protocol::{Envelope, Signature};
use crate::session::SessionState;

/// How the current session key was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyPhase {
    /// The server-wide shared secret (after HELLO).
    Shared,
    /// A credential composite `name/AND/password`.
    Credential,
    /// A one-way rotation of a credential key.
    Rotated,
}

/// The key a session signs with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionKey {
    pub secret: String,
    pub phase: KeyPhase,
}

impl SessionKey {
    pub fn shared(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            phase: KeyPhase::Shared,
        }
    }
}

/// Coarse authentication state, derived from the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Unauthenticated,
    Challenged,
    Authenticated,
    KeyRotated,
    Closed,
}

impl AuthState {
    pub fn of(session: &SessionState) -> Self {
        if session.closed {
            return AuthState::Closed;
        }
        match session.key.as_ref().map(|k| k.phase) {
            None => AuthState::Unauthenticated,
            Some(KeyPhase::Shared) => AuthState::Challenged,
            Some(KeyPhase::Credential) => AuthState::Authenticated,
            Some(KeyPhase::Rotated) => AuthState::KeyRotated,
        }
    }
}

/// Authentication failures, mapped to reply errors by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    /// Signature or token did not verify.
    Rejected,
    /// The token matched no configured credential.
    UnknownCredential,
}

/// Check an inbound envelope's signature against the session.
///
/// Unsigned envelopes are accepted only while the session holds neither a
/// key nor an outstanding challenge. A signed envelope arriving before any
/// key exists is checked against the shared secret.
pub fn verify_envelope(
    session: &SessionState,
    shared_secret: &str,
    envelope: &Envelope,
) -> Result<(), AuthFailure> {
    match (&envelope.signature, &session.key) {
        (Signature::Unsigned, None) if session.challenge.is_none() => Ok(()),
        (Signature::Unsigned, _) => Err(AuthFailure::Rejected),
        (sig, Some(key)) if sig.verifies(&key.secret, &envelope.payload) => Ok(()),
        (sig, None) if sig.verifies(shared_secret, &envelope.payload) => Ok(()),
        _ => Err(AuthFailure::Rejected),
    }
}

/// Validate a `<token>` and escalate the key when it proves a credential.
pub fn accept_token(
    session: &mut SessionState,
    credentials: &CredentialTable,
    token: &str,
) -> Result<(), AuthFailure> {
    let Some(challenge) = session.challenge.clone() else {
        return Err(AuthFailure::Rejected);
    };
    let Some(key) = session.key.as_ref() else {
        return Err(AuthFailure::Rejected);
    };

    match key.phase {
        KeyPhase::Shared => {
            let cred = credentials
                .match_token(&challenge, token)
                .ok_or(AuthFailure::UnknownCredential)?;
            session.key = Some(SessionKey {
                secret: cred.composite_key(),
                phase: KeyPhase::Credential,
            });
            session.connection_string = Some(cred.connection_string.clone());
            Ok(())
        }
        KeyPhase::Credential | KeyPhase::Rotated => {
            let expected = hmac_hex(key.secret.as_bytes(), challenge.as_bytes());
            if digests_match(&expected, token) {
                Ok(())
            } else {
                Err(AuthFailure::Rejected)
            }
        }
    }
}

/// Irreversibly rehash the session key (after a successful CONNECT).
pub fn rotate(session: &mut SessionState) {
    if let Some(key) = session.key.as_mut() {
        key.secret = rotate_key(&key.secret);
        key.phase = KeyPhase::Rotated;
    }
}
