//! TOML-based configuration for dbrelay.
//!
//! Supports a config file (dbrelay.toml) with environment variable expansion.
//!
//! Example configuration:
//! ```toml
//! [server]
//! shared_secret = "${DBRELAY_SECRET}"
//! heartbeat_interval = "5s"
//! execution_limit = "10s"
//! respawn_pause = "50ms"
//! debug = false
//! state_dir = "/var/lib/dbrelay/sessions"
//!
//! [connections.sales]
//! password = "${SALES_PASSWORD}"
//! connection_string = "sqlite://./data/sales.db"
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Error type for settings.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Config file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Connection not found: {0}")]
    ConnectionNotFound(String),

    #[error("Invalid duration format: {0}")]
    InvalidDuration(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct Settings {
    /// Worker engine settings.
    pub server: ServerSettings,

    /// Named connection credentials.
    pub connections: HashMap<String, ConnectionSettings>,
}

/// Credential entry: what a client must prove, and where it leads.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConnectionSettings {
    /// Password combined with the connection name to derive the session key.
    pub password: String,

    /// Physical connection string handed to the database driver
    /// (supports ${ENV_VAR} expansion).
    pub connection_string: String,
}

impl ConnectionSettings {
    /// Get the password with environment variables expanded.
    pub fn resolved_password(&self) -> Result<String, SettingsError> {
        expand_env_vars(&self.password)
    }

    /// Get the connection string with environment variables expanded.
    pub fn resolved_connection_string(&self) -> Result<String, SettingsError> {
        expand_env_vars(&self.connection_string)
    }
}

/// Raw worker engine settings, as written in the config file.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Secret shared with clients for the first handshake round.
    pub shared_secret: String,

    /// How long a worker waits for a command before sending a keep-alive.
    pub heartbeat_interval: String,

    /// Ceiling on the time spent handling a single command.
    pub execution_limit: String,

    /// How long a worker started on a closed session waits before exiting.
    pub respawn_pause: String,

    /// Echo the session id in every reply.
    pub debug: bool,

    /// Directory where session state is persisted between workers.
    pub state_dir: Option<String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            shared_secret: String::new(),
            heartbeat_interval: "5s".to_string(),
            execution_limit: "10s".to_string(),
            respawn_pause: "50ms".to_string(),
            debug: false,
            state_dir: None,
        }
    }
}

/// Resolved engine configuration: secrets expanded, durations parsed.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub shared_secret: String,
    pub heartbeat_interval: Duration,
    pub execution_limit: Duration,
    pub respawn_pause: Duration,
    pub debug: bool,
    pub state_dir: Option<PathBuf>,
}

impl EngineConfig {
    /// Configuration with the default timings and the given shared secret.
    pub fn with_secret(shared_secret: impl Into<String>) -> Self {
        Self {
            shared_secret: shared_secret.into(),
            heartbeat_interval: Duration::from_secs(5),
            execution_limit: Duration::from_secs(10),
            respawn_pause: Duration::from_millis(50),
            debug: false,
            state_dir: None,
        }
    }
}

impl ServerSettings {
    /// Expand and parse the raw settings.
    pub fn resolve(&self) -> Result<EngineConfig, SettingsError> {
        let shared_secret = expand_env_vars(&self.shared_secret)?;
        if shared_secret.is_empty() {
            return Err(SettingsError::InvalidConfig(
                "server.shared_secret must be set".to_string(),
            ));
        }

        let state_dir = match &self.state_dir {
            Some(dir) => Some(PathBuf::from(expand_env_vars(dir)?)),
            None => None,
        };

        Ok(EngineConfig {
            shared_secret,
            heartbeat_interval: parse_duration(&self.heartbeat_interval)?,
            execution_limit: parse_duration(&self.execution_limit)?,
            respawn_pause: parse_duration(&self.respawn_pause)?,
            debug: self.debug,
            state_dir,
        })
    }
}

impl Settings {
    /// Load settings from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(SettingsError::FileNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        let settings: Settings = toml::from_str(&content)?;
        Ok(settings)
    }

    /// Load settings from the default config file locations.
    ///
    /// Searches in order:
    /// 1. Environment variable `DBRELAY_CONFIG`
    /// 2. `./dbrelay.toml`
    /// 3. `~/.config/dbrelay/config.toml`
    pub fn load() -> Result<Self, SettingsError> {
        if let Ok(path) = env::var("DBRELAY_CONFIG") {
            return Self::from_file(&path);
        }

        let local_config = PathBuf::from("dbrelay.toml");
        if local_config.exists() {
            return Self::from_file(&local_config);
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("dbrelay").join("config.toml");
            if user_config.exists() {
                return Self::from_file(&user_config);
            }
        }

        Ok(Settings::default())
    }

    /// Get a connection by name.
    pub fn get_connection(&self, name: &str) -> Result<&ConnectionSettings, SettingsError> {
        self.connections
            .get(name)
            .ok_or_else(|| SettingsError::ConnectionNotFound(name.to_string()))
    }
}

/// Parse a duration such as `"50ms"`, `"5s"`, `"1m"` or `"2h"`.
///
/// A bare number is taken as seconds.
pub fn parse_duration(s: &str) -> Result<Duration, SettingsError> {
    let trimmed = s.trim();
    let split = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(trimmed.len());
    let (digits, unit) = trimmed.split_at(split);

    let value: u64 = digits
        .parse()
        .map_err(|_| SettingsError::InvalidDuration(s.to_string()))?;

    match unit.trim() {
        "ms" => Ok(Duration::from_millis(value)),
        "" | "s" => Ok(Duration::from_secs(value)),
        "m" => Ok(Duration::from_secs(value * 60)),
        "h" => Ok(Duration::from_secs(value * 3600)),
        _ => Err(SettingsError::InvalidDuration(s.to_string())),
    }
}

/// Expand environment variables in a string.
///
/// Supports `${VAR}` and `$VAR` syntax.
pub fn expand_env_vars(s: &str) -> Result<String, SettingsError> {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '$' {
            result.push(c);
            continue;
        }

        let mut var_name = String::new();
        if chars.peek() == Some(&'{') {
            chars.next();
            for ch in chars.by_ref() {
                if ch == '}' {
                    break;
                }
                var_name.push(ch);
            }
        } else {
            while let Some(&ch) = chars.peek() {
                if ch.is_alphanumeric() || ch == '_' {
                    var_name.push(ch);
                    chars.next();
                } else {
                    break;
                }
            }
            if var_name.is_empty() {
                // Just a lone $, keep it
                result.push('$');
                continue;
            }
        }

        let value =
            env::var(&var_name).map_err(|_| SettingsError::MissingEnvVar(var_name.clone()))?;
        result.push_str(&value);
    }

    Ok(result)
}
