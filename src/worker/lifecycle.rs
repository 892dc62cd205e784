//! The per-session worker loop.

use std::sync::Arc;

use crate::config::{CredentialTable, EngineConfig};
use crate::dispatch::{self, Dispatcher, Flow, Handled};
use crate::driver::Driver;
use crate::session::{SessionRegistry, SharedSession};

use super::error::{EngineError, TransportError};
use super::transport::{DirectOutput, Transport};

/// Why a worker stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// BYE was handled; the session is closed.
    Closed,
    /// The peer went away or stopped reading.
    ClientGone,
    /// The session was already closed when the worker started.
    AlreadyClosed,
    /// A request exceeded the execution limit.
    TimeLimit,
    /// The transport failed; the session was closed.
    TransportFailed,
}

/// Serves one session over one transport until the session ends.
pub struct Worker<T> {
    config: Arc<EngineConfig>,
    credentials: Arc<CredentialTable>,
    driver: Arc<dyn Driver>,
    registry: Arc<SessionRegistry>,
    session: SharedSession,
    transport: T,
    dispatcher: Option<Dispatcher>,
}

impl<T: Transport> Worker<T> {
    pub fn new(
        config: Arc<EngineConfig>,
        credentials: Arc<CredentialTable>,
        driver: Arc<dyn Driver>,
        registry: Arc<SessionRegistry>,
        session: SharedSession,
        transport: T,
    ) -> Self {
        Self {
            config,
            credentials,
            driver,
            registry,
            session,
            transport,
            dispatcher: None,
        }
    }

    /// Run the worker to completion.
    pub async fn run(mut self) -> ExitReason {
        {
            let state = self.session.lock().await;
            if state.closed {
                let id = state.id.clone();
                drop(state);
                tracing::debug!("session already closed, not serving");
                self.registry.release_closed(&id);
                tokio::time::sleep(self.config.respawn_pause).await;
                return ExitReason::AlreadyClosed;
            }
        }

        let greeting = {
            let mut state = self.session.lock().await;
            state.counter += 1;
            tracing::info!(session = %state.id, counter = state.counter, "worker started");
            dispatch::greeting(&self.config, &state)
        };

        let reason = match self
            .transport
            .write_direct(DirectOutput::Message(greeting))
            .await
        {
            Ok(()) => self.serve().await,
            Err(_) => ExitReason::ClientGone,
        };

        self.finalize().await;
        tracing::info!(?reason, "worker stopped");
        reason
    }

    async fn serve(&mut self) -> ExitReason {
        loop {
            let raw = match self
                .transport
                .recv_command(self.config.heartbeat_interval)
                .await
            {
                Ok(Some(raw)) => raw,
                Ok(None) => {
                    if self
                        .transport
                        .write_direct(DirectOutput::KeepAlive)
                        .await
                        .is_err()
                    {
                        return ExitReason::ClientGone;
                    }
                    continue;
                }
                Err(TransportError::Closed) => return ExitReason::ClientGone,
                Err(e) => {
                    let handled = {
                        let mut state = self.session.lock().await;
                        dispatch::error_reply(&self.config, &mut state, &EngineError::Transport(e))
                    };
                    self.deliver(&handled.message).await;
                    return ExitReason::TransportFailed;
                }
            };

            let (handled, timed_out) = self.handle(raw).await;
            if !self.deliver(&handled.message).await {
                return ExitReason::ClientGone;
            }
            if timed_out {
                return ExitReason::TimeLimit;
            }
            if handled.flow == Flow::Quit {
                return ExitReason::Closed;
            }
        }
    }

    /// Handle one message on the blocking pool, under the execution limit.
    ///
    /// The dispatcher works on a snapshot of the session that is committed
    /// only if it finishes in time.
    async fn handle(&mut self, raw: String) -> (Handled, bool) {
        let mut dispatcher = match self.dispatcher.take() {
            Some(d) => d,
            None => Dispatcher::new(
                self.config.clone(),
                self.credentials.clone(),
                self.driver.clone(),
            ),
        };
        let snapshot = self.session.lock().await.clone();

        let task = tokio::task::spawn_blocking(move || {
            let mut state = snapshot;
            let result = dispatcher.dispatch(&mut state, &raw);
            (dispatcher, state, result)
        });

        match tokio::time::timeout(self.config.execution_limit, task).await {
            Ok(Ok((dispatcher, mut state, result))) => {
                self.dispatcher = Some(dispatcher);
                let handled = match result {
                    Ok(handled) => handled,
                    Err(e) => dispatch::error_reply(&self.config, &mut state, &e),
                };
                *self.session.lock().await = state;
                (handled, false)
            }
            Ok(Err(join_err)) => {
                // The dispatcher and its connection are gone; the next
                // request reconnects lazily.
                tracing::error!(error = %join_err, "request handler panicked");
                let mut state = self.session.lock().await;
                let err = EngineError::Internal("request handler failed".to_string());
                (dispatch::error_reply(&self.config, &mut state, &err), false)
            }
            Err(_) => {
                tracing::warn!(limit = ?self.config.execution_limit, "execution limit exceeded");
                let mut state = self.session.lock().await;
                (
                    dispatch::error_reply(&self.config, &mut state, &EngineError::TimeLimit),
                    true,
                )
            }
        }
    }

    /// Write a reply, falling back to the direct output. Returns whether
    /// either write succeeded.
    async fn deliver(&mut self, message: &str) -> bool {
        match self.transport.send_reply(message).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "reply write failed, using direct output");
                self.transport
                    .write_direct(DirectOutput::Message(message.to_string()))
                    .await
                    .is_ok()
            }
        }
    }

    async fn finalize(&mut self) {
        if let Some(mut dispatcher) = self.dispatcher.take() {
            if let Err(e) = tokio::task::spawn_blocking(move || dispatcher.shutdown()).await {
                tracing::warn!(error = %e, "connection shutdown failed");
            }
        }
        if let Err(e) = self.transport.flush().await {
            tracing::debug!(error = %e, "flush failed");
        }

        let state = self.session.lock().await.clone();
        match self.registry.persist(&state) {
            Ok(()) if state.closed => self.registry.release_closed(&state.id),
            Ok(()) => {}
            Err(e) => {
                tracing::warn!(session = %state.id, error = %e, "could not persist session");
            }
        }
    }
}
