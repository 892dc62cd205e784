//! Request dispatcher.
//!
//! Turns one raw inbound message into one signed reply:
//!
//! ```text
//! raw ─► Envelope::parse ─► verify signature ─► Request::parse
//!                                                     │
//!          ┌──────────────── for each child ──────────┘
//!          ▼
//!   <token>  accept_token (may escalate the key)
//!   <cmd>    guard (key present, token accepted) ─► handler
//!          │
//!          ▼
//! challenge (unless CLOSED), status, counter ─► seal ─► rotate after CONNECT
//! ```
//!
//! The dispatcher owns the worker's physical connection and statement
//! cache. It is synchronous; the worker runs it on the blocking pool.

pub mod meta;

use std::sync::Arc;

use crate::auth::{self, AuthFailure};
use crate::cache::{sql_digest, PreparedOperation, StatementCache};
use crate::config::{CredentialTable, EngineConfig};
use crate::crypto::generate_challenge;
use crate::driver::{Connection, Driver, ExecOutcome, ResultKind, StatementHandle};
use crate::marshal::TabularResult;
use crate::protocol::{
    seal, Command, Envelope, EnvelopeError, Reply, Request, RequestItem, StatementSpec, Status,
};
use crate::session::SessionState;
use crate::worker::{EngineError, EngineResult};

/// What the worker loop should do after a reply is sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// A signed reply and the loop decision that goes with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handled {
    pub message: String,
    pub flow: Flow,
}

/// Per-worker resources: the physical connection and its prepared statements.
#[derive(Default)]
pub struct WorkerContext {
    connection: Option<Box<dyn Connection>>,
    statements: StatementCache,
}

impl WorkerContext {
    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    pub fn statements(&self) -> &StatementCache {
        &self.statements
    }

    /// Open the connection from `connection_string` unless one is open.
    fn ensure_connection(
        &mut self,
        driver: &dyn Driver,
        connection_string: Option<&str>,
    ) -> EngineResult<&mut Box<dyn Connection>> {
        if self.connection.is_none() {
            let cs = connection_string.ok_or(EngineError::ConnectionNotFound)?;
            tracing::debug!("opening connection lazily");
            self.connection = Some(driver.connect(cs)?);
        }
        self.connection
            .as_mut()
            .ok_or(EngineError::ConnectionNotFound)
    }

    /// Replace the current connection with a fresh one.
    fn reconnect(&mut self, driver: &dyn Driver, connection_string: &str) -> EngineResult<()> {
        self.close();
        self.connection = Some(driver.connect(connection_string)?);
        Ok(())
    }

    /// Release every prepared handle and close the connection.
    pub fn close(&mut self) {
        let ops = self.statements.drain();
        if let Some(mut conn) = self.connection.take() {
            for op in ops {
                conn.release(op.handle);
            }
            if let Err(e) = conn.disconnect() {
                tracing::warn!(error = %e, "disconnect failed");
            }
        }
    }

    /// Compile `spec` unless its text is already cached. Returns the key.
    fn prepare(&mut self, spec: &StatementSpec) -> EngineResult<String> {
        let key = sql_digest(&spec.sql);
        if self.statements.contains(&key) {
            return Ok(key);
        }

        let conn = self
            .connection
            .as_mut()
            .ok_or(EngineError::ConnectionNotFound)?;
        let kind = if spec.returns_rows {
            ResultKind::Rows
        } else {
            ResultKind::Affected
        };
        let handle = conn.prepare(&spec.sql, &spec.arg_types(), kind)?;

        let (key, rejected) = self.statements.insert(PreparedOperation {
            handle,
            returns_rows: spec.returns_rows,
            sql: spec.sql.clone(),
        });
        if let Some(op) = rejected {
            conn.release(op.handle);
        }
        Ok(key)
    }

    fn unprepare(&mut self, key: &str) {
        if let Some(op) = self.statements.remove(key) {
            if let Some(conn) = self.connection.as_mut() {
                conn.release(op.handle);
            }
        }
    }

    fn handle_for(&self, key: &str) -> Option<StatementHandle> {
        self.statements.get(key).map(|op| op.handle)
    }
}

/// Handles requests for one session on behalf of one worker.
pub struct Dispatcher {
    config: Arc<EngineConfig>,
    credentials: Arc<CredentialTable>,
    driver: Arc<dyn Driver>,
    ctx: WorkerContext,
}

impl Dispatcher {
    pub fn new(
        config: Arc<EngineConfig>,
        credentials: Arc<CredentialTable>,
        driver: Arc<dyn Driver>,
    ) -> Self {
        Self {
            config,
            credentials,
            driver,
            ctx: WorkerContext::default(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn context(&self) -> &WorkerContext {
        &self.ctx
    }

    /// Close the connection held by this worker, if any.
    pub fn shutdown(&mut self) {
        self.ctx.close();
    }

    /// Handle one raw inbound message.
    ///
    /// Session mutations made before a failure (an escalated key, say) are
    /// kept; the caller turns the error into a reply with [`error_reply`].
    pub fn dispatch(&mut self, session: &mut SessionState, raw: &str) -> EngineResult<Handled> {
        let envelope = Envelope::parse(raw).map_err(|e| match e {
            EnvelopeError::MalformedSignature => EngineError::Authentication,
            other => EngineError::BadInput(other.to_string()),
        })?;

        auth::verify_envelope(session, &self.config.shared_secret, &envelope).map_err(|_| {
            tracing::debug!(session = %session.id, "signature rejected");
            EngineError::Authentication
        })?;

        let request = Request::parse(&envelope.payload).map_err(|e| {
            tracing::debug!(session = %session.id, detail = %e.detail(), "bad request");
            EngineError::BadInput(e.to_string())
        })?;

        let mut reply = Reply::new();
        let mut status = None;
        let mut token_accepted = false;
        let mut rotate_after = false;
        let mut flow = Flow::Continue;

        for item in request.items {
            let command = match item {
                RequestItem::Token(token) => {
                    auth::accept_token(session, &self.credentials, &token).map_err(|f| match f {
                        AuthFailure::UnknownCredential => EngineError::ConnectionNotFound,
                        AuthFailure::Rejected => EngineError::Authentication,
                    })?;
                    token_accepted = true;
                    continue;
                }
                RequestItem::Command(command) => command,
            };

            if !matches!(command, Command::Hello | Command::Unknown(_)) {
                if session.key.is_none() {
                    return Err(EngineError::Protocol);
                }
                if !token_accepted {
                    return Err(EngineError::NotAuthenticated);
                }
            }

            tracing::debug!(session = %session.id, command = command.name(), "handling command");
            status = Some(Status::Ok);

            match command {
                Command::Hello => {
                    session.key = Some(auth::SessionKey::shared(self.config.shared_secret.as_str()));
                    reply.push_text("session", session.id.as_str());
                }
                Command::Connect => {
                    let cs = session
                        .connection_string
                        .clone()
                        .ok_or(EngineError::ConnectionNotFound)?;
                    self.ctx.reconnect(self.driver.as_ref(), &cs)?;
                    if let Some(conn) = self.ctx.connection.as_ref() {
                        if let Some(server_type) = conn.server_type() {
                            reply.push_text("servertype", server_type);
                        }
                        reply.push_text("serverversion", conn.server_version());
                    }
                    rotate_after = true;
                }
                Command::Bye => {
                    self.ctx.close();
                    session.closed = true;
                    status = Some(Status::Closed);
                    flow = Flow::Quit;
                    break;
                }
                Command::Prepare(spec) => {
                    self.connect_lazily(session)?;
                    let key = self.ctx.prepare(&spec)?;
                    reply.push_text("preparehash", key);
                }
                Command::Unprepare { prepare_hash } => {
                    if let Some(key) = prepare_hash {
                        self.ctx.unprepare(&key);
                    }
                }
                Command::Exec {
                    statement,
                    prepare_hash,
                } => {
                    self.connect_lazily(session)?;
                    self.exec(&mut reply, &statement, prepare_hash.as_deref())?;
                }
                Command::Begin { savepoint } => {
                    self.connect_lazily(session)?
                        .begin_transaction(savepoint.as_deref())?;
                }
                Command::Commit => {
                    self.connect_lazily(session)?.commit()?;
                }
                Command::Rollback { savepoint } => {
                    self.connect_lazily(session)?
                        .rollback(savepoint.as_deref())?;
                }
                Command::Meta { kind, args } => {
                    let conn = self.connect_lazily(session)?;
                    reply.push(meta::run(&**conn, &kind, &args)?);
                }
                Command::Unknown(name) => return Err(EngineError::UnknownCommand(name)),
            }
        }

        if status != Some(Status::Closed) {
            let challenge = generate_challenge()?;
            session.challenge = Some(challenge.clone());
            reply.challenge = Some(challenge);
        }
        reply.status = status;
        reply.counter = Some(session.counter);
        if self.config.debug && status != Some(Status::Closed) {
            reply.session = Some(session.id.clone());
        }

        let message = seal(signing_key(&self.config, session), &reply.to_xml());
        if rotate_after {
            auth::rotate(session);
        }

        tracing::info!(
            session = %session.id,
            status = status.map(|s| s.as_str()).unwrap_or("-"),
            "request handled"
        );
        Ok(Handled { message, flow })
    }

    fn connect_lazily(&mut self, session: &SessionState) -> EngineResult<&mut Box<dyn Connection>> {
        self.ctx
            .ensure_connection(self.driver.as_ref(), session.connection_string.as_deref())
    }

    fn exec(
        &mut self,
        reply: &mut Reply,
        statement: &StatementSpec,
        prepare_hash: Option<&str>,
    ) -> EngineResult<()> {
        let handle = match prepare_hash.and_then(|key| self.ctx.handle_for(key)) {
            Some(handle) => handle,
            None => {
                let key = self.ctx.prepare(statement)?;
                let handle = self
                    .ctx
                    .handle_for(&key)
                    .ok_or_else(|| EngineError::Internal("prepared statement vanished".into()))?;
                reply.push_text("preparehash", key);
                handle
            }
        };

        let args = statement
            .args
            .iter()
            .map(|a| a.arg_type.coerce(a.value.as_deref()))
            .collect::<Result<Vec<_>, _>>()?;

        let conn = self
            .ctx
            .connection
            .as_mut()
            .ok_or(EngineError::ConnectionNotFound)?;
        match conn.execute(handle, &args)? {
            ExecOutcome::Rows(rows) => reply.push(TabularResult::from_row_set(rows).to_node()),
            ExecOutcome::Affected(n) => reply.push_text("impacted_rows", n.to_string()),
        }
        Ok(())
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.ctx.close();
    }
}

/// Key replies are signed with: the session key, or the shared secret
/// before HELLO.
pub fn signing_key<'a>(config: &'a EngineConfig, session: &'a SessionState) -> &'a str {
    session
        .key
        .as_ref()
        .map(|k| k.secret.as_str())
        .unwrap_or(config.shared_secret.as_str())
}

/// Build the reply for a failed request.
///
/// Non-closing errors carry a fresh challenge so the client can retry;
/// closing errors mark the session closed and carry none.
pub fn error_reply(config: &EngineConfig, session: &mut SessionState, err: &EngineError) -> Handled {
    let mut reply = Reply::new();
    let closing = err.closes_connection();

    if closing {
        session.closed = true;
        reply.status = Some(Status::Closed);
    } else {
        match generate_challenge() {
            Ok(challenge) => {
                session.challenge = Some(challenge.clone());
                reply.challenge = Some(challenge);
            }
            Err(e) => tracing::error!(error = %e, "could not issue a challenge"),
        }
        reply.status = Some(Status::Error);
    }
    reply.error = Some(err.reply_message());
    reply.counter = Some(session.counter);
    if config.debug && !closing {
        reply.session = Some(session.id.clone());
    }

    tracing::warn!(session = %session.id, error = %err, "request failed");
    Handled {
        message: seal(signing_key(config, session), &reply.to_xml()),
        flow: if closing { Flow::Quit } else { Flow::Continue },
    }
}

/// The unsolicited reply a worker writes when it starts.
pub fn greeting(config: &EngineConfig, session: &SessionState) -> String {
    let mut reply = Reply::new();
    reply.push_text("session", session.id.as_str());
    reply.status = Some(Status::Ok);
    reply.counter = Some(session.counter);
    seal(&config.shared_secret, &reply.to_xml())
}
