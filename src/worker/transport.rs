//! Command, reply and direct-output channels of a worker.
//!
//! A worker reads commands and writes replies over its [`Transport`]. The
//! direct output is a side channel for the greeting, keep-alives and
//! replies that could not be written to the reply channel.
//!
//! Two implementations:
//!
//! - [`ChannelTransport`]: in-process, tokio `mpsc` queues of capacity 1
//!   for commands and replies and [`DIRECT_CAPACITY`] for the direct
//!   output; the peer holds a [`ChannelEndpoint`]. A direct output the
//!   peer has stopped draining fails with [`TransportError::Stalled`].
//! - [`StreamTransport`]: any `AsyncRead`/`AsyncWrite` pair carrying
//!   length-prefixed frames. Replies and direct output share the writer.
//!
//! # Frame Format
//!
//! ```text
//! +----------------+-------------------+
//! | len: u32 (LE)  | payload (UTF-8)   |
//! +----------------+-------------------+
//! ```
//!
//! A zero-length frame is a keep-alive.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::error::TransportError;

/// Largest accepted frame payload (16 MiB).
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Items the in-process direct output holds before writes fail.
pub const DIRECT_CAPACITY: usize = 8;

/// Something written to the direct output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectOutput {
    Message(String),
    KeepAlive,
}

/// The channels a worker talks through.
#[async_trait]
pub trait Transport: Send {
    /// Wait up to `wait` for the next command.
    ///
    /// Returns `Ok(None)` when the wait elapsed and
    /// [`TransportError::Closed`] once the peer has gone away.
    async fn recv_command(&mut self, wait: Duration) -> Result<Option<String>, TransportError>;

    /// Write a reply on the reply channel.
    async fn send_reply(&mut self, message: &str) -> Result<(), TransportError>;

    /// Write to the direct output.
    async fn write_direct(&mut self, output: DirectOutput) -> Result<(), TransportError>;

    /// Flush anything buffered.
    async fn flush(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
}

// ============================================================================
// In-process channels
// ============================================================================

/// Worker side of an in-process session.
pub struct ChannelTransport {
    commands: mpsc::Receiver<String>,
    replies: mpsc::Sender<String>,
    direct: mpsc::Sender<DirectOutput>,
}

/// Peer side of an in-process session.
pub struct ChannelEndpoint {
    commands: mpsc::Sender<String>,
    replies: mpsc::Receiver<String>,
    direct: mpsc::Receiver<DirectOutput>,
}

/// Create a connected transport/endpoint pair.
pub fn channel_pair() -> (ChannelTransport, ChannelEndpoint) {
    let (cmd_tx, cmd_rx) = mpsc::channel(1);
    let (reply_tx, reply_rx) = mpsc::channel(1);
    let (direct_tx, direct_rx) = mpsc::channel(DIRECT_CAPACITY);
    (
        ChannelTransport {
            commands: cmd_rx,
            replies: reply_tx,
            direct: direct_tx,
        },
        ChannelEndpoint {
            commands: cmd_tx,
            replies: reply_rx,
            direct: direct_rx,
        },
    )
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn recv_command(&mut self, wait: Duration) -> Result<Option<String>, TransportError> {
        match tokio::time::timeout(wait, self.commands.recv()).await {
            Ok(Some(message)) => Ok(Some(message)),
            Ok(None) => Err(TransportError::Closed),
            Err(_) => Ok(None),
        }
    }

    async fn send_reply(&mut self, message: &str) -> Result<(), TransportError> {
        self.replies
            .send(message.to_string())
            .await
            .map_err(|_| TransportError::Closed)
    }

    async fn write_direct(&mut self, output: DirectOutput) -> Result<(), TransportError> {
        self.direct.try_send(output).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => TransportError::Stalled,
            mpsc::error::TrySendError::Closed(_) => TransportError::Closed,
        })
    }
}

impl ChannelEndpoint {
    /// Queue a command for the worker.
    pub async fn send_command(&self, message: impl Into<String>) -> Result<(), TransportError> {
        self.commands
            .send(message.into())
            .await
            .map_err(|_| TransportError::Closed)
    }

    /// Next message from either the reply channel or the direct output.
    ///
    /// Keep-alives are skipped. Returns `None` once both are closed and
    /// drained.
    pub async fn recv_message(&mut self) -> Option<String> {
        let mut replies_open = true;
        let mut direct_open = true;

        while replies_open || direct_open {
            tokio::select! {
                reply = self.replies.recv(), if replies_open => match reply {
                    Some(message) => return Some(message),
                    None => replies_open = false,
                },
                direct = self.direct.recv(), if direct_open => match direct {
                    Some(DirectOutput::Message(message)) => return Some(message),
                    Some(DirectOutput::KeepAlive) => {}
                    None => direct_open = false,
                },
            }
        }
        None
    }

    /// Next message written to the direct output, skipping keep-alives.
    pub async fn recv_direct(&mut self) -> Option<String> {
        loop {
            match self.direct.recv().await? {
                DirectOutput::Message(message) => return Some(message),
                DirectOutput::KeepAlive => continue,
            }
        }
    }

    /// Next raw direct output item, keep-alives included.
    pub async fn recv_direct_raw(&mut self) -> Option<DirectOutput> {
        self.direct.recv().await
    }
}

// ============================================================================
// Framed byte streams
// ============================================================================

/// Read one frame. Returns `Ok(None)` on a clean end of stream.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Vec<u8>>, TransportError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; 4];
    if let Err(err) = reader.read_exact(&mut header).await {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            return Ok(None);
        }
        return Err(err.into());
    }
    let size = u32::from_le_bytes(header) as usize;
    if size > MAX_FRAME_SIZE {
        return Err(TransportError::FrameTooLarge(size));
    }
    let mut buf = vec![0u8; size];
    reader.read_exact(&mut buf).await?;
    Ok(Some(buf))
}

/// Write one frame and flush.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
{
    if payload.len() > MAX_FRAME_SIZE {
        return Err(TransportError::FrameTooLarge(payload.len()));
    }
    let size = payload.len() as u32;
    writer.write_all(&size.to_le_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// A worker transport over a framed byte stream (stdin/stdout, a socket).
///
/// Frames are read by a background task so that a timed-out wait never
/// loses half a frame.
pub struct StreamTransport<W> {
    frames: mpsc::Receiver<Result<String, TransportError>>,
    writer: W,
    reader_task: JoinHandle<()>,
}

impl<W> StreamTransport<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new<R>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(1);
        let reader_task = tokio::spawn(read_loop(reader, tx));
        Self {
            frames: rx,
            writer,
            reader_task,
        }
    }
}

async fn read_loop<R>(mut reader: R, tx: mpsc::Sender<Result<String, TransportError>>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    loop {
        let item = match read_frame(&mut reader).await {
            Ok(Some(buf)) if buf.is_empty() => continue,
            Ok(Some(buf)) => String::from_utf8(buf).map_err(|_| TransportError::InvalidUtf8),
            Ok(None) => break,
            Err(e) => Err(e),
        };
        let failed = item.is_err();
        if tx.send(item).await.is_err() || failed {
            break;
        }
    }
}

impl<W> Drop for StreamTransport<W> {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}

#[async_trait]
impl<W> Transport for StreamTransport<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn recv_command(&mut self, wait: Duration) -> Result<Option<String>, TransportError> {
        match tokio::time::timeout(wait, self.frames.recv()).await {
            Ok(Some(Ok(message))) => Ok(Some(message)),
            Ok(Some(Err(e))) => Err(e),
            Ok(None) => Err(TransportError::Closed),
            Err(_) => Ok(None),
        }
    }

    async fn send_reply(&mut self, message: &str) -> Result<(), TransportError> {
        write_frame(&mut self.writer, message.as_bytes()).await
    }

    async fn write_direct(&mut self, output: DirectOutput) -> Result<(), TransportError> {
        match output {
            DirectOutput::Message(message) => write_frame(&mut self.writer, message.as_bytes()).await,
            DirectOutput::KeepAlive => write_frame(&mut self.writer, &[]).await,
        }
    }

    async fn flush(&mut self) -> Result<(), TransportError> {
        self.writer.flush().await?;
        Ok(())
    }
}
