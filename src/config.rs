//! Configuration loading and management.
//!
//! Configuration is a single TOML file. The `mode` field under `[server]`
//! selects the deployment variant: `room` runs one implicit ephemeral scope
//! with in-memory history, `channels` serves many persisted scopes backed by
//! SQLite with bearer-token admission.

use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("channels mode requires {0}")]
    MissingSection(&'static str),
}

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Server identity and mode.
    pub server: ServerConfig,
    /// WebSocket listener configuration.
    pub listen: ListenConfig,
    /// History buffer configuration.
    #[serde(default)]
    pub history: HistoryConfig,
    /// Broadcast delivery configuration.
    #[serde(default)]
    pub delivery: DeliveryConfig,
    /// Bearer-token verification (required in channels mode).
    pub auth: Option<AuthConfig>,
    /// Database configuration (required in channels mode).
    pub database: Option<DatabaseConfig>,
}

impl Config {
    /// Load configuration from a TOML file and validate mode requirements.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.server.mode == Mode::Channels {
            if self.auth.is_none() {
                return Err(ConfigError::MissingSection("[auth]"));
            }
            if self.database.is_none() {
                return Err(ConfigError::MissingSection("[database]"));
            }
        }
        Ok(())
    }
}

/// Deployment variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Single implicit scope, ephemeral history, join-by-name admission.
    Room,
    /// Persisted channels, token admission at connect time.
    Channels,
}

/// Server identity configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Server name shown in the welcome banner (e.g. "relaychat.local").
    pub name: String,
    /// Deployment variant.
    #[serde(default = "default_mode")]
    pub mode: Mode,
    /// Status HTTP port for `/health` and `/stats`. 0 disables the endpoint
    /// (used by tests).
    #[serde(default)]
    pub status_port: u16,
}

/// WebSocket listener configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ListenConfig {
    /// Address to bind (e.g. "127.0.0.1:8080").
    pub address: SocketAddr,
    /// Allowed Origin header values for the WebSocket handshake.
    /// Empty means all origins are accepted.
    #[serde(default)]
    pub allow_origins: Vec<String>,
}

/// History buffer configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryConfig {
    /// Ring-buffer capacity per scope (room mode).
    #[serde(default = "default_history_capacity")]
    pub capacity: usize,
    /// How many messages to replay to a newly admitted connection.
    #[serde(default = "default_replay_window")]
    pub replay: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            capacity: default_history_capacity(),
            replay: default_replay_window(),
        }
    }
}

/// Broadcast delivery configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DeliveryConfig {
    /// Per-recipient send timeout in milliseconds. A peer whose outbound
    /// queue stays full past this is treated as failed and pruned.
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,
    /// Outbound queue depth per connection.
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            send_timeout_ms: default_send_timeout_ms(),
            queue_depth: default_queue_depth(),
        }
    }
}

/// Bearer-token verification configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// HS256 signing secret shared with the token issuer.
    pub secret: String,
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file, or ":memory:".
    pub path: String,
}

fn default_mode() -> Mode {
    Mode::Room
}

fn default_history_capacity() -> usize {
    100
}

fn default_replay_window() -> usize {
    20
}

fn default_send_timeout_ms() -> u64 {
    1000
}

fn default_queue_depth() -> usize {
    64
}
