//! Configuration module for dbrelay.
//!
//! Handles the TOML settings file, environment expansion and the
//! connection credential table.

mod connection;
mod settings;

pub use connection::{Credential, CredentialTable, COMPOSITE_SEPARATOR};
pub use settings::{
    expand_env_vars, parse_duration, ConnectionSettings, EngineConfig, ServerSettings, Settings,
    SettingsError,
};
