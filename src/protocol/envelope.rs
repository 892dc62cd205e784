//! Signed message envelopes.
//!
//! ```text
//! <signature-line>\n<payload>
//! ```
//!
//! The signature line is the lowercase hex HMAC-MD5 of the payload bytes
//! under the sender's current key, or [`UNSIGNED`].

use thiserror::Error;

use crate::crypto::{digests_match, hmac_hex};

/// Marker used in place of a signature by a client that holds no key yet.
pub const UNSIGNED: &str = "NOHASH";

/// Envelope-level framing failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EnvelopeError {
    #[error("Missing message hash")]
    MissingSignature,

    #[error("Bad message hash")]
    MalformedSignature,

    #[error("Bad message format")]
    MalformedPayload,
}

/// Signature line of an envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signature {
    Unsigned,
    Digest(String),
}

impl Signature {
    /// Whether this signature is a valid digest of `payload` under `key`.
    pub fn verifies(&self, key: &str, payload: &str) -> bool {
        match self {
            Signature::Unsigned => false,
            Signature::Digest(digest) => {
                digests_match(&hmac_hex(key.as_bytes(), payload.as_bytes()), digest)
            }
        }
    }
}

/// A parsed inbound or outbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub signature: Signature,
    pub payload: String,
}

impl Envelope {
    /// Split a raw message into signature and payload.
    pub fn parse(raw: &str) -> Result<Self, EnvelopeError> {
        let (line, payload) = raw
            .split_once('\n')
            .ok_or(EnvelopeError::MissingSignature)?;
        let line = line.trim_end_matches('\r');

        if line.is_empty() || line.starts_with('<') {
            return Err(EnvelopeError::MalformedSignature);
        }
        if !payload.starts_with('<') {
            return Err(EnvelopeError::MalformedPayload);
        }

        let signature = if line == UNSIGNED {
            Signature::Unsigned
        } else {
            Signature::Digest(line.to_string())
        };

        Ok(Self {
            signature,
            payload: payload.to_string(),
        })
    }

    /// Wire form of the envelope.
    pub fn to_wire(&self) -> String {
        let line = match &self.signature {
            Signature::Unsigned => UNSIGNED,
            Signature::Digest(d) => d.as_str(),
        };
        format!("{}\n{}", line, self.payload)
    }
}

/// Sign `payload` with `key` and frame it.
pub fn seal(key: &str, payload: &str) -> String {
    format!("{}\n{}", hmac_hex(key.as_bytes(), payload.as_bytes()), payload)
}

/// Frame `payload` without a signature.
pub fn seal_unsigned(payload: &str) -> String {
    format!("{}\n{}", UNSIGNED, payload)
}
