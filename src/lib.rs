//! # dbrelay
//!
//! Per-session database workers speaking a signed challenge/response
//! protocol over XML messages.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │          Client (HMAC-signed <request> envelopes)        │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [worker: transport, heartbeat, time limit]
//! ┌─────────────────────────────────────────────────────────┐
//! │        Dispatcher (auth, command routing, replies)       │
//! │        + SessionRegistry (key, challenge, counter)       │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [statement cache, META introspection]
//! ┌─────────────────────────────────────────────────────────┐
//! │                Driver / Connection (SQLite)              │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [marshal]
//! ┌─────────────────────────────────────────────────────────┐
//! │                 <gda_array> result tables                │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod auth;
pub mod cache;
pub mod config;
pub mod crypto;
pub mod dispatch;
pub mod driver;
pub mod engine;
pub mod marshal;
pub mod protocol;
pub mod session;
pub mod worker;

pub use engine::{Engine, SessionHandle};

/// Re-exports for convenient usage.
pub mod prelude {
    pub use crate::config::{Credential, CredentialTable, EngineConfig, Settings};
    pub use crate::driver::{Driver, SqliteDriver, Value};
    pub use crate::engine::{Engine, SessionHandle};
    pub use crate::marshal::TabularResult;
    pub use crate::protocol::{Argument, Command, StatementSpec};
    pub use crate::worker::{ClientError, ExecResult, ExitReason, WorkerClient};
}
