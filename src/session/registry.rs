//! In-memory session registry with optional on-disk persistence.
//!
//! # Layout
//!
//! ```text
//! {state_dir}/{session_id}.json   -> SessionState
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::Mutex;

use super::{is_valid_session_id, new_session_id, SessionState};

/// Session state shared between the registry and the worker serving it.
pub type SharedSession = Arc<Mutex<SessionState>>;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("invalid session id: {0}")]
    InvalidId(String),

    #[error("session state I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("session state is corrupt: {0}")]
    Json(#[from] serde_json::Error),
}

pub type SessionResult<T> = Result<T, SessionError>;

/// All sessions known to this process.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<String, SharedSession>,
    state_dir: Option<PathBuf>,
}

impl SessionRegistry {
    pub fn new(state_dir: Option<PathBuf>) -> Self {
        Self {
            sessions: DashMap::new(),
            state_dir,
        }
    }

    pub fn state_dir(&self) -> Option<&Path> {
        self.state_dir.as_deref()
    }

    /// Create a new, empty session.
    pub fn create(&self) -> (String, SharedSession) {
        let id = new_session_id();
        let shared = Arc::new(Mutex::new(SessionState::new(id.clone())));
        self.sessions.insert(id.clone(), shared.clone());
        (id, shared)
    }

    pub fn get(&self, id: &str) -> Option<SharedSession> {
        self.sessions.get(id).map(|entry| entry.value().clone())
    }

    /// Find a session in memory, then on disk; start a new one under `id`
    /// when neither has it.
    pub fn load_or_create(&self, id: &str) -> SessionResult<SharedSession> {
        if !is_valid_session_id(id) {
            return Err(SessionError::InvalidId(id.to_string()));
        }
        if let Some(shared) = self.get(id) {
            return Ok(shared);
        }

        let state = match self.read_state(id)? {
            Some(state) => {
                tracing::debug!(session = %id, counter = state.counter, "restored session state");
                state
            }
            None => SessionState::new(id),
        };

        let shared = self
            .sessions
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(state)))
            .value()
            .clone();
        Ok(shared)
    }

    /// Write a session snapshot to `state_dir`, if one is configured.
    pub fn persist(&self, state: &SessionState) -> SessionResult<()> {
        let Some(path) = self.state_path(&state.id)? else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        // Write then rename so a crashed writer never leaves half a file.
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(state)?)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Forget a session, in memory and on disk.
    pub fn remove(&self, id: &str) -> SessionResult<()> {
        self.sessions.remove(id);
        if let Some(path) = self.state_path(id)? {
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Drop a closed session from memory once its closed state is on disk.
    ///
    /// Without a `state_dir` the in-memory entry is the only closed marker,
    /// so it stays until [`purge_closed`](Self::purge_closed).
    pub fn release_closed(&self, id: &str) {
        if self.state_dir.is_some() && self.sessions.remove(id).is_some() {
            tracing::debug!(session = %id, "released closed session");
        }
    }

    /// Drop closed sessions from memory. Returns how many were removed.
    pub fn purge_closed(&self) -> usize {
        let closed: Vec<String> = self
            .sessions
            .iter()
            .filter(|entry| {
                entry
                    .value()
                    .try_lock()
                    .map(|state| state.closed)
                    .unwrap_or(false)
            })
            .map(|entry| entry.key().clone())
            .collect();

        for id in &closed {
            self.sessions.remove(id);
        }
        closed.len()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn state_path(&self, id: &str) -> SessionResult<Option<PathBuf>> {
        if !is_valid_session_id(id) {
            return Err(SessionError::InvalidId(id.to_string()));
        }
        Ok(self
            .state_dir
            .as_ref()
            .map(|dir| dir.join(format!("{}.json", id))))
    }

    fn read_state(&self, id: &str) -> SessionResult<Option<SessionState>> {
        let Some(path) = self.state_path(id)? else {
            return Ok(None);
        };
        match std::fs::read(&path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
