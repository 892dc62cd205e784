//! Session workers.
//!
//! A worker serves exactly one session: it greets, then reads commands with
//! a bounded wait, hands each to the [`Dispatcher`](crate::dispatch::Dispatcher)
//! under an execution limit, and writes one reply per command.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐   commands (cap 1)   ┌──────────────────────────┐
//! │  WorkerClient        │ ───────────────────► │  Worker                  │
//! │  (ChannelEndpoint)   │ ◄─────────────────── │   heartbeat / time limit │
//! │                      │   replies  (cap 1)   │   spawn_blocking         │
//! │                      │ ◄ ─ ─ ─ ─ ─ ─ ─ ─ ─  │     └─► Dispatcher       │
//! └──────────────────────┘   direct output      └────────────┬─────────────┘
//!                            (greeting, keep-alive)          │
//!                                                            ▼
//!                                                 SessionRegistry (state_dir)
//! ```
//!
//! # Lifecycle
//!
//! 1. A worker started on a closed session waits `respawn_pause` and exits.
//! 2. Otherwise it increments the session counter and writes the greeting.
//! 3. Every `heartbeat_interval` without a command it writes a keep-alive;
//!    a failed keep-alive or a closed command channel ends the worker.
//! 4. A command running past `execution_limit` gets an `ERROR` reply and
//!    the worker exits, leaving the session open for a replacement.
//! 5. On exit the connection is closed and the session state persisted.
//!
//! # Example
//!
//! ```ignore
//! use dbrelay::worker::WorkerClient;
//!
//! let handle = engine.open_session();
//! let mut client = WorkerClient::attach(handle.endpoint, "secret").await?;
//! client.hello().await?;
//! client.connect("sales", "pw").await?;
//! let result = client.exec_sql("SELECT 1", true).await?;
//! client.bye().await?;
//! ```

mod client;
mod error;
mod lifecycle;
pub mod transport;

pub use client::{ExecResult, WorkerClient};
pub use error::{ClientError, ClientResult, EngineError, EngineResult, TransportError};
pub use lifecycle::{ExitReason, Worker};
pub use transport::{
    channel_pair, ChannelEndpoint, ChannelTransport, DirectOutput, StreamTransport, Transport,
};
