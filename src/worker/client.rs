//! Async protocol client for a session worker.

use std::time::Duration;

use super::error::{ClientError, ClientResult};
use super::transport::ChannelEndpoint;
use crate::config::COMPOSITE_SEPARATOR;
use crate::crypto::{hmac_hex, rotate_key};
use crate::marshal::{TabularResult, ARRAY_TAG};
use crate::protocol::{
    seal, seal_unsigned, Argument, Command, Envelope, Reply, Request, StatementSpec, Status,
};

/// Default timeout for requests (30 seconds).
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Outcome of an EXEC.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecResult {
    /// Key of the statement, present when the worker had to prepare it.
    pub prepare_hash: Option<String>,
    /// Rows, for statements that return rows.
    pub rows: Option<TabularResult>,
    /// Affected row count, for everything else.
    pub impacted_rows: Option<u64>,
}

/// Client side of the challenge/response protocol.
///
/// The client signs each request with the current key, answers the last
/// challenge with a token, verifies reply signatures and follows the key
/// through escalation (credential) and rotation (after CONNECT).
///
/// # Example
///
/// ```ignore
/// let mut client = WorkerClient::attach(handle.endpoint, "secret").await?;
/// client.hello().await?;
/// client.connect("sales", "pw").await?;
/// let result = client.exec_sql("SELECT 1", true).await?;
/// ```
pub struct WorkerClient {
    endpoint: ChannelEndpoint,
    shared_secret: String,
    /// Current signing key; `None` until HELLO.
    key: Option<String>,
    challenge: Option<String>,
    session_id: Option<String>,
    counter: u64,
    timeout: Duration,
}

impl WorkerClient {
    /// Attach to a freshly started worker and read its greeting.
    pub async fn attach(endpoint: ChannelEndpoint, shared_secret: &str) -> ClientResult<Self> {
        let mut client = Self {
            endpoint,
            shared_secret: shared_secret.to_string(),
            key: None,
            challenge: None,
            session_id: None,
            counter: 0,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        };
        client.read_greeting().await?;
        Ok(client)
    }

    /// Switch to a replacement worker for the same session, keeping the
    /// key and the outstanding challenge.
    pub async fn reattach(&mut self, endpoint: ChannelEndpoint) -> ClientResult<()> {
        self.endpoint = endpoint;
        self.read_greeting().await
    }

    async fn read_greeting(&mut self) -> ClientResult<()> {
        let raw = tokio::time::timeout(self.timeout, self.endpoint.recv_direct())
            .await
            .map_err(|_| ClientError::Timeout(self.timeout.as_secs()))?
            .ok_or(ClientError::ChannelClosed)?;

        let envelope = Envelope::parse(&raw).map_err(|e| ClientError::Malformed(e.to_string()))?;
        if !envelope.signature.verifies(&self.shared_secret, &envelope.payload) {
            return Err(ClientError::BadSignature);
        }
        let reply = Reply::parse(&envelope.payload)?;
        self.session_id = reply.text_of("session").map(str::to_string);
        self.counter = reply.counter.unwrap_or_default();
        Ok(())
    }

    /// Send a raw message and wait for the next message back.
    async fn roundtrip(&mut self, message: String) -> ClientResult<String> {
        self.endpoint.send_command(message).await?;
        tokio::time::timeout(self.timeout, self.endpoint.recv_message())
            .await
            .map_err(|_| ClientError::Timeout(self.timeout.as_secs()))?
            .ok_or(ClientError::ChannelClosed)
    }

    /// Decode a reply signed with one of `keys`. Returns the reply and the
    /// index of the key that verified it.
    fn open(&mut self, raw: &str, keys: &[&str]) -> ClientResult<(Reply, usize)> {
        let envelope = Envelope::parse(raw).map_err(|e| ClientError::Malformed(e.to_string()))?;
        let idx = keys
            .iter()
            .position(|k| envelope.signature.verifies(k, &envelope.payload))
            .ok_or(ClientError::BadSignature)?;

        let reply = Reply::parse(&envelope.payload)?;
        if let Some(challenge) = &reply.challenge {
            self.challenge = Some(challenge.clone());
        }
        if let Some(counter) = reply.counter {
            self.counter = counter;
        }
        Ok((reply, idx))
    }

    fn check(reply: Reply) -> ClientResult<Reply> {
        match reply.status {
            Some(Status::Error) => Err(ClientError::Remote(reply.error.unwrap_or_default())),
            Some(Status::Closed) => Err(ClientError::Closed(reply.error.unwrap_or_default())),
            _ => Ok(reply),
        }
    }

    fn token(&self, key: &str) -> ClientResult<String> {
        let challenge = self.challenge.as_ref().ok_or(ClientError::NoChallenge)?;
        Ok(hmac_hex(key.as_bytes(), challenge.as_bytes()))
    }

    /// Send one authenticated command and return the successful reply.
    ///
    /// A CONNECT sent this way reopens the connection under the current
    /// key, which is rotated once more on success.
    pub async fn call(&mut self, command: Command) -> ClientResult<Reply> {
        let key = self.key.clone().ok_or(ClientError::NoChallenge)?;
        let rotates = matches!(command, Command::Connect);
        let request = Request::new().token(self.token(&key)?).command(command);
        let raw = self.roundtrip(seal(&key, &request.to_xml())).await?;
        let (reply, _) = self.open(&raw, &[key.as_str()])?;
        let reply = Self::check(reply)?;
        if rotates {
            self.key = Some(rotate_key(&key));
        }
        Ok(reply)
    }

    /// Send a pre-built message as is. The reply is returned whatever its
    /// status; its signature must verify under the current key (or the
    /// shared secret before HELLO).
    pub async fn send_raw(&mut self, message: impl Into<String>) -> ClientResult<Reply> {
        let raw = self.roundtrip(message.into()).await?;
        let key = self.current_key().to_string();
        let (reply, _) = self.open(&raw, &[key.as_str()])?;
        Ok(reply)
    }

    /// HELLO: obtain a session challenge; the shared secret becomes the key.
    pub async fn hello(&mut self) -> ClientResult<Reply> {
        let request = Request::new().command(Command::Hello);
        let raw = self.roundtrip(seal_unsigned(&request.to_xml())).await?;
        let secret = self.shared_secret.clone();
        let (reply, _) = self.open(&raw, &[secret.as_str()])?;
        let reply = Self::check(reply)?;
        self.key = Some(secret);
        if let Some(id) = reply.text_of("session") {
            self.session_id = Some(id.to_string());
        }
        Ok(reply)
    }

    /// CONNECT with a credential.
    ///
    /// On success the key becomes the one-way rotation of
    /// `name/AND/password`.
    pub async fn connect(&mut self, name: &str, password: &str) -> ClientResult<Reply> {
        let key = self.key.clone().ok_or(ClientError::NoChallenge)?;
        let composite = format!("{}{}{}", name, COMPOSITE_SEPARATOR, password);
        let request = Request::new()
            .token(self.token(&composite)?)
            .command(Command::Connect);

        let raw = self.roundtrip(seal(&key, &request.to_xml())).await?;
        let (reply, idx) = self.open(&raw, &[composite.as_str(), key.as_str()])?;
        if idx == 0 {
            // The worker accepted the credential, even if CONNECT then failed.
            self.key = Some(composite.clone());
        }
        let reply = Self::check(reply)?;
        self.key = Some(rotate_key(&composite));
        Ok(reply)
    }

    /// PREPARE a statement; returns its key.
    pub async fn prepare(&mut self, statement: StatementSpec) -> ClientResult<String> {
        let reply = self.call(Command::Prepare(statement)).await?;
        reply
            .text_of("preparehash")
            .map(str::to_string)
            .ok_or_else(|| ClientError::Malformed("missing <preparehash>".into()))
    }

    pub async fn unprepare(&mut self, prepare_hash: &str) -> ClientResult<()> {
        self.call(Command::Unprepare {
            prepare_hash: Some(prepare_hash.to_string()),
        })
        .await?;
        Ok(())
    }

    /// EXEC a statement, optionally naming a previously prepared key.
    pub async fn exec(
        &mut self,
        statement: StatementSpec,
        prepare_hash: Option<String>,
    ) -> ClientResult<ExecResult> {
        let reply = self
            .call(Command::Exec {
                statement,
                prepare_hash,
            })
            .await?;

        let rows = match reply.find(ARRAY_TAG) {
            Some(node) => Some(TabularResult::from_node(node)?),
            None => None,
        };
        let impacted_rows = match reply.text_of("impacted_rows") {
            Some(text) => Some(
                text.trim()
                    .parse()
                    .map_err(|_| ClientError::Malformed(format!("bad impacted_rows '{}'", text)))?,
            ),
            None => None,
        };
        Ok(ExecResult {
            prepare_hash: reply.text_of("preparehash").map(str::to_string),
            rows,
            impacted_rows,
        })
    }

    pub async fn begin(&mut self, savepoint: Option<&str>) -> ClientResult<()> {
        self.call(Command::Begin {
            savepoint: savepoint.map(str::to_string),
        })
        .await?;
        Ok(())
    }

    pub async fn commit(&mut self) -> ClientResult<()> {
        self.call(Command::Commit).await?;
        Ok(())
    }

    pub async fn rollback(&mut self, savepoint: Option<&str>) -> ClientResult<()> {
        self.call(Command::Rollback {
            savepoint: savepoint.map(str::to_string),
        })
        .await?;
        Ok(())
    }

    /// META request; returns the decoded result table.
    pub async fn meta(&mut self, kind: &str, args: &[(&str, &str)]) -> ClientResult<TabularResult> {
        let reply = self
            .call(Command::Meta {
                kind: kind.to_string(),
                args: args
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            })
            .await?;
        let node = reply
            .find(ARRAY_TAG)
            .ok_or_else(|| ClientError::Malformed("missing <gda_array>".into()))?;
        Ok(TabularResult::from_node(node)?)
    }

    /// BYE: close the session.
    pub async fn bye(&mut self) -> ClientResult<()> {
        let key = self.key.clone().ok_or(ClientError::NoChallenge)?;
        let request = Request::new().token(self.token(&key)?).command(Command::Bye);
        let raw = self.roundtrip(seal(&key, &request.to_xml())).await?;
        let (reply, _) = self.open(&raw, &[key.as_str()])?;
        match reply.status {
            Some(Status::Closed) => Ok(()),
            _ => Self::check(reply).map(|_| ()),
        }
    }

    /// Session id announced by the worker.
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Worker generation counter from the last reply.
    pub fn counter(&self) -> u64 {
        self.counter
    }

    pub fn challenge(&self) -> Option<&str> {
        self.challenge.as_deref()
    }

    /// Key the next request will be signed with.
    pub fn current_key(&self) -> &str {
        self.key.as_deref().unwrap_or(&self.shared_secret)
    }

    /// Get the current request timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Set the request timeout.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }
}

// Convenience methods for common operations
impl WorkerClient {
    /// EXEC a SQL text without arguments.
    pub async fn exec_sql(&mut self, sql: &str, returns_rows: bool) -> ClientResult<ExecResult> {
        self.exec(StatementSpec::new(sql, returns_rows), None).await
    }

    /// EXEC a SQL text with arguments.
    pub async fn exec_with_args(
        &mut self,
        sql: &str,
        returns_rows: bool,
        args: Vec<Argument>,
    ) -> ClientResult<ExecResult> {
        let mut statement = StatementSpec::new(sql, returns_rows);
        statement.args = args;
        self.exec(statement, None).await
    }

    /// EXEC a previously prepared statement by key.
    pub async fn exec_prepared(
        &mut self,
        prepare_hash: &str,
        statement: StatementSpec,
    ) -> ClientResult<ExecResult> {
        self.exec(statement, Some(prepare_hash.to_string())).await
    }
}
