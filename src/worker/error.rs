//! Worker-specific error types.

use std::io;
use thiserror::Error;

use crate::crypto::CryptoError;
use crate::driver::DriverError;
use crate::session::SessionError;

/// Result type for request handling.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors raised while handling one request.
///
/// The `Display` text of each variant is what the client sees in
/// `status/@error`.
#[derive(Error, Debug)]
pub enum EngineError {
    /// A command arrived before HELLO established a key.
    #[error("Protocol error")]
    Protocol,

    /// A command arrived without an accepted token in the same request.
    #[error("Not authenticated")]
    NotAuthenticated,

    /// A signature or token did not verify.
    #[error("Authentication error")]
    Authentication,

    /// The token matched no credential, or no connection is bound.
    #[error("Connection not found")]
    ConnectionNotFound,

    /// Structurally invalid message.
    #[error("{0}")]
    BadInput(String),

    #[error("Unknown command {0}")]
    UnknownCommand(String),

    /// Unknown META `type`; reported like any other unknown command.
    #[error("Unknown META command {0}")]
    UnknownMeta(String),

    /// Failure reported by the database collaborator.
    #[error(transparent)]
    Driver(#[from] DriverError),

    /// The command or reply channel is unusable.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Handling a command exceeded the execution limit.
    #[error("Execution time limit exceeded")]
    TimeLimit,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Whether this error ends the session with a `CLOSED` reply.
    pub fn closes_connection(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// Whether the request named a command or META type this engine lacks.
    pub fn is_unknown_command(&self) -> bool {
        matches!(self, Self::UnknownCommand(_) | Self::UnknownMeta(_))
    }

    /// Text placed in `status/@error`.
    pub fn reply_message(&self) -> String {
        self.to_string()
    }
}

impl From<CryptoError> for EngineError {
    fn from(err: CryptoError) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<SessionError> for EngineError {
    fn from(err: SessionError) -> Self {
        Self::Internal(err.to_string())
    }
}

/// Failures of the command/reply channels.
#[derive(Error, Debug)]
pub enum TransportError {
    /// The peer went away.
    #[error("channel closed")]
    Closed,

    #[error("transport I/O failed: {0}")]
    Io(#[from] io::Error),

    #[error("frame of {0} bytes exceeds the limit")]
    FrameTooLarge(usize),

    #[error("frame is not valid UTF-8")]
    InvalidUtf8,

    /// The peer is not draining the direct output.
    #[error("direct output is full")]
    Stalled,
}

/// Result type for protocol client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors seen by [`WorkerClient`](super::WorkerClient).
#[derive(Error, Debug)]
pub enum ClientError {
    /// Request timed out waiting for a reply.
    #[error("request timed out after {0} seconds")]
    Timeout(u64),

    /// The worker is gone.
    #[error("worker channel closed")]
    ChannelClosed,

    /// The reply signature did not verify under the expected key.
    #[error("reply signature mismatch")]
    BadSignature,

    /// The reply could not be decoded.
    #[error("malformed reply: {0}")]
    Malformed(String),

    /// The worker answered `ERROR`.
    #[error("worker error: {0}")]
    Remote(String),

    /// The worker answered `CLOSED`.
    #[error("session closed: {0}")]
    Closed(String),

    /// No challenge is available to compute a token.
    #[error("no outstanding challenge")]
    NoChallenge,
}

impl ClientError {
    /// Check if this error indicates the worker has exited.
    pub fn is_worker_exited(&self) -> bool {
        matches!(self, Self::ChannelClosed | Self::Closed(_))
    }
}

impl From<TransportError> for ClientError {
    fn from(_: TransportError) -> Self {
        Self::ChannelClosed
    }
}

impl From<crate::protocol::XmlError> for ClientError {
    fn from(err: crate::protocol::XmlError) -> Self {
        Self::Malformed(err.to_string())
    }
}

impl From<crate::marshal::MarshalError> for ClientError {
    fn from(err: crate::marshal::MarshalError) -> Self {
        Self::Malformed(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_messages() {
        assert_eq!(EngineError::Protocol.reply_message(), "Protocol error");
        assert_eq!(
            EngineError::UnknownCommand("DANCE".into()).reply_message(),
            "Unknown command DANCE"
        );
        assert_eq!(
            EngineError::Driver(DriverError::new("MDB2 Error: no such table: t")).reply_message(),
            "no such table: t"
        );
    }

    #[test]
    fn test_only_transport_closes() {
        assert!(EngineError::Transport(TransportError::Closed).closes_connection());
        assert!(!EngineError::Authentication.closes_connection());
        assert!(!EngineError::TimeLimit.closes_connection());
        assert!(!EngineError::BadInput("Bad XML input".into()).closes_connection());
    }

    #[test]
    fn test_unknown_meta_is_unknown_command() {
        assert!(EngineError::UnknownMeta("rainbows".into()).is_unknown_command());
        assert!(!EngineError::Protocol.is_unknown_command());
    }
}
