//! Keyed digests, key rotation and challenge generation.
//!
//! The wire protocol fixes the primitives:
//!
//! ```text
//!   signature = hex(HMAC-MD5(key, payload))
//!   token     = hex(HMAC-MD5(key, challenge))
//!   rotation  = hex(MD5(key))            (after CONNECT, one way)
//! ```
//!
//! All hex output is lowercase. Digest comparisons go through
//! [`digests_match`], which runs in constant time.
//!
//! # Example
//!
//! ```rust
//! use dbrelay::crypto::{generate_challenge, hmac_hex, digests_match};
//!
//! let challenge = generate_challenge().expect("rng available");
//! let token = hmac_hex(b"sales/AND/secret", challenge.as_bytes());
//! assert!(digests_match(&token, &hmac_hex(b"sales/AND/secret", challenge.as_bytes())));
//! ```

use base64::{engine::general_purpose::URL_SAFE_NO_PAD as BASE64, Engine};
use hmac::{Hmac, Mac};
use md5::{Digest, Md5};
use ring::rand::{SecureRandom, SystemRandom};
use subtle::ConstantTimeEq;
use thiserror::Error;

type HmacMd5 = Hmac<Md5>;

/// Number of random bytes behind each challenge.
pub const CHALLENGE_BYTES: usize = 18;

/// Result type for cryptographic operations.
pub type CryptoResult<T> = Result<T, CryptoError>;

/// Errors that can occur during cryptographic operations.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// The system random number generator failed.
    #[error("random number generation failed")]
    RandomFailed,
}

/// Lowercase hex HMAC-MD5 of `data` under `key`.
pub fn hmac_hex(key: &[u8], data: &[u8]) -> String {
    // HMAC accepts keys of any length; the error arm is unreachable in practice.
    let mut mac = match HmacMd5::new_from_slice(key) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(data);
    format!("{:x}", mac.finalize().into_bytes())
}

/// One-way key rotation: lowercase hex MD5 of the current key.
pub fn rotate_key(key: &str) -> String {
    format!("{:x}", Md5::digest(key.as_bytes()))
}

/// Generates a fresh, unpredictable challenge string.
///
/// Uses `ring::rand::SystemRandom`; the bytes are base64url encoded so the
/// challenge is safe inside XML text and HTTP bodies.
pub fn generate_challenge() -> CryptoResult<String> {
    let rng = SystemRandom::new();
    let mut bytes = [0u8; CHALLENGE_BYTES];
    rng.fill(&mut bytes).map_err(|_| CryptoError::RandomFailed)?;
    Ok(BASE64.encode(bytes))
}

/// Constant-time comparison of two hex digests.
///
/// Empty digests never match.
pub fn digests_match(expected: &str, provided: &str) -> bool {
    if expected.is_empty() || provided.is_empty() {
        return false;
    }
    expected.as_bytes().ct_eq(provided.as_bytes()).into()
}
