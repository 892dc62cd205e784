//! Session state and the registry that replaces per-session pipes.
//!
//! A session outlives any single worker: a worker that dies (time limit,
//! crash, supervisor restart) can be replaced by a new one that picks the
//! state up from the registry, or from `state_dir` when configured.

mod registry;

pub use registry::{SessionError, SessionRegistry, SessionResult, SharedSession};

use serde::{Deserialize, Serialize};

use crate::auth::SessionKey;

/// Persistent per-session state.
///
/// The physical database connection is not part of it: that belongs to
/// the worker currently serving the session and is reopened lazily from
/// `connection_string`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    pub id: String,
    /// Signing key; absent until HELLO.
    pub key: Option<SessionKey>,
    /// Last challenge issued to the client.
    pub challenge: Option<String>,
    /// Number of workers started for this session.
    pub counter: u64,
    pub closed: bool,
    /// Connection string bound by the credential token.
    pub connection_string: Option<String>,
}

impl SessionState {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            key: None,
            challenge: None,
            counter: 0,
            closed: false,
            connection_string: None,
        }
    }
}

/// Generate a fresh session id.
pub fn new_session_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Session ids end up in file names, so only a safe alphabet is allowed.
pub fn is_valid_session_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 128
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}
