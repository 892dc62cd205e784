//! Content hashing for prepared statement keys.

use sha2::{Digest, Sha256};

/// Compute the SHA256 digest of a SQL text.
///
/// The text is hashed byte for byte, so identical statements always map to
/// the same key. Returns a 64-character lowercase hexadecimal string.
pub fn sql_digest(sql: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(sql.as_bytes());
    format!("{:x}", hasher.finalize())
}
