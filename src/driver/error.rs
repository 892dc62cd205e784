//! Normalized driver errors.

use thiserror::Error;

/// Result type for driver operations.
pub type DriverResult<T> = Result<T, DriverError>;

/// Library prefixes stripped from driver messages before they reach a reply.
const NOISE_PREFIXES: &[&str] = &["MDB2 Error: ", "SQLite failure: ", "SQLITE_ERROR: "];

/// A failure reported by the database collaborator.
///
/// The message is sanitized on construction so it can be sent to clients
/// as is.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct DriverError {
    message: String,
}

impl DriverError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: sanitize(&message.into()),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<rusqlite::Error> for DriverError {
    fn from(err: rusqlite::Error) -> Self {
        Self::new(err.to_string())
    }
}

fn sanitize(message: &str) -> String {
    let mut text = message.trim();
    for prefix in NOISE_PREFIXES {
        if let Some(rest) = text.strip_prefix(prefix) {
            text = rest;
        }
    }
    text.to_string()
}
