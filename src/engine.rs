//! Top-level wiring: configuration, credentials, driver and sessions.
//!
//! [`Engine`] is what a host embeds. It owns the session registry and
//! starts one [`Worker`] per session, either on an in-process channel
//! ([`Engine::open_session`]) or on a byte stream ([`Engine::serve_stream`]).

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::config::{CredentialTable, EngineConfig, Settings, SettingsError};
use crate::driver::{Driver, SqliteDriver};
use crate::session::{SessionRegistry, SharedSession};
use crate::worker::{
    channel_pair, ChannelEndpoint, EngineResult, ExitReason, StreamTransport, Transport, Worker,
};

/// A worker running on an in-process channel.
pub struct SessionHandle {
    pub id: String,
    /// Client side of the worker's channels.
    pub endpoint: ChannelEndpoint,
    /// Resolves when the worker stops.
    pub task: JoinHandle<ExitReason>,
}

#[derive(Clone)]
pub struct Engine {
    config: Arc<EngineConfig>,
    credentials: Arc<CredentialTable>,
    driver: Arc<dyn Driver>,
    registry: Arc<SessionRegistry>,
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        credentials: CredentialTable,
        driver: Arc<dyn Driver>,
    ) -> Self {
        let registry = SessionRegistry::new(config.state_dir.clone());
        Self {
            config: Arc::new(config),
            credentials: Arc::new(credentials),
            driver,
            registry: Arc::new(registry),
        }
    }

    /// Build an engine backed by SQLite from loaded settings.
    pub fn from_settings(settings: &Settings) -> Result<Self, SettingsError> {
        let config = settings.server.resolve()?;
        let credentials = CredentialTable::from_settings(settings)?;
        Ok(Self::new(config, credentials, Arc::new(SqliteDriver::new())))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Build a worker for a session on the given transport.
    pub fn worker<T: Transport>(&self, session: SharedSession, transport: T) -> Worker<T> {
        Worker::new(
            self.config.clone(),
            self.credentials.clone(),
            self.driver.clone(),
            self.registry.clone(),
            session,
            transport,
        )
    }

    /// Start a new session and its first worker.
    ///
    /// Closed sessions still held in memory are dropped first.
    pub fn open_session(&self) -> SessionHandle {
        let (id, shared) = self.create_session();
        self.spawn(id, shared)
    }

    fn create_session(&self) -> (String, SharedSession) {
        let purged = self.registry.purge_closed();
        if purged > 0 {
            tracing::debug!(purged, "dropped closed sessions");
        }
        self.registry.create()
    }

    /// Start a replacement worker for an existing session.
    ///
    /// The session is looked up in memory, then in `state_dir`. A worker
    /// started on a closed session exits after `respawn_pause`.
    pub fn respawn(&self, id: &str) -> EngineResult<SessionHandle> {
        let shared = self.registry.load_or_create(id)?;
        Ok(self.spawn(id.to_string(), shared))
    }

    fn spawn(&self, id: String, shared: SharedSession) -> SessionHandle {
        let (transport, endpoint) = channel_pair();
        let worker = self.worker(shared, transport);
        let span = tracing::info_span!("worker", session = %id);
        let task = tokio::spawn(worker.run().instrument(span));
        SessionHandle { id, endpoint, task }
    }

    /// Serve one worker over a framed byte stream, resuming `session` when
    /// given. Returns when the worker stops.
    pub async fn serve_stream<R, W>(
        &self,
        reader: R,
        writer: W,
        session: Option<&str>,
    ) -> EngineResult<ExitReason>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send,
    {
        let (id, shared) = match session {
            Some(id) => (id.to_string(), self.registry.load_or_create(id)?),
            None => self.create_session(),
        };
        let worker = self.worker(shared, StreamTransport::new(reader, writer));
        let span = tracing::info_span!("worker", session = %id);
        Ok(worker.run().instrument(span).await)
    }
}
