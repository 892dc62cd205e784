//! Per-worker prepared statement cache.
//!
//! Maps the digest of a SQL text to the driver handle compiled for it.
//! The cache lives inside one worker and is never shared across sessions.
//!
//! # Key Format
//!
//! ```text
//! sha256_hex(sql)  -> PreparedOperation { handle, returns_rows, sql }
//! ```
//!
//! Preparing the same text twice yields the same key and keeps the first
//! handle. Removing an unknown key is a no-op.

mod hash;
pub use hash::sql_digest;

use std::collections::HashMap;

use crate::driver::StatementHandle;

/// A compiled statement held by the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedOperation {
    /// Driver handle for the compiled statement.
    pub handle: StatementHandle,
    /// Whether execution produces rows rather than an affected count.
    pub returns_rows: bool,
    /// Source text, kept for logging.
    pub sql: String,
}

/// Prepared statements for one worker, keyed by SQL digest.
#[derive(Debug, Default)]
pub struct StatementCache {
    entries: HashMap<String, PreparedOperation>,
}

impl StatementCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a prepared operation by key.
    pub fn get(&self, key: &str) -> Option<&PreparedOperation> {
        self.entries.get(key)
    }

    /// Whether `key` is cached.
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Insert an operation under the digest of its SQL text.
    ///
    /// Returns the key. If the key is already present the existing entry is
    /// kept and the rejected operation is handed back so the caller can
    /// release its handle.
    pub fn insert(&mut self, op: PreparedOperation) -> (String, Option<PreparedOperation>) {
        let key = sql_digest(&op.sql);
        if self.entries.contains_key(&key) {
            return (key, Some(op));
        }
        self.entries.insert(key.clone(), op);
        (key, None)
    }

    /// Remove and return the operation under `key`, if any.
    pub fn remove(&mut self, key: &str) -> Option<PreparedOperation> {
        self.entries.remove(key)
    }

    /// Empty the cache, returning every operation so handles can be released.
    pub fn drain(&mut self) -> Vec<PreparedOperation> {
        self.entries.drain().map(|(_, op)| op).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
