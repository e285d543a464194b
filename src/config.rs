//! Server configuration.
//!
//! Values come from, in increasing precedence: built-in defaults, a TOML
//! file, `SQUARELY_*` environment variables (a `.env` file is honoured by
//! the binary), and command-line flags.

use derive_getters::Getters;
use derive_more::{Display, Error};
use serde::{Deserialize, Serialize};
use squarely_rules::{DEFAULT_GRID_SIZE, DEFAULT_TURN_LIMIT, GameRules};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Which [`RoomStore`](crate::RoomStore) backend to run with.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum StoreBackend {
    /// Process-local map; rooms vanish on restart.
    #[default]
    Memory,
    /// SQLite database file.
    Sqlite,
}

/// Runtime settings for the room server.
#[derive(Debug, Clone, PartialEq, Getters, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Interface to bind.
    #[serde(default = "default_host")]
    host: String,

    /// Port to bind.
    #[serde(default = "default_port")]
    port: u16,

    /// Board side length for new rooms.
    #[serde(default = "default_grid_size")]
    grid_size: usize,

    /// Turns each slot plays before the game ends.
    #[serde(default = "default_turn_limit")]
    turn_limit: u32,

    /// Seconds a room lives after creation.
    #[serde(default = "default_room_ttl_secs")]
    room_ttl_secs: u64,

    /// Storage backend.
    #[serde(default)]
    store: StoreBackend,

    /// Database file for the SQLite backend.
    #[serde(default = "default_db_path")]
    db_path: String,

    /// Buffered broadcasts per room before slow subscribers lag.
    #[serde(default = "default_channel_capacity")]
    channel_capacity: usize,

    /// Seconds between sweeps that end streams of expired rooms.
    #[serde(default = "default_sweep_interval_secs")]
    sweep_interval_secs: u64,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3001
}

fn default_grid_size() -> usize {
    DEFAULT_GRID_SIZE
}

fn default_turn_limit() -> u32 {
    DEFAULT_TURN_LIMIT
}

fn default_room_ttl_secs() -> u64 {
    24 * 60 * 60
}

fn default_db_path() -> String {
    "squarely.db".to_string()
}

fn default_channel_capacity() -> usize {
    64
}

fn default_sweep_interval_secs() -> u64 {
    60
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            grid_size: default_grid_size(),
            turn_limit: default_turn_limit(),
            room_ttl_secs: default_room_ttl_secs(),
            store: StoreBackend::default(),
            db_path: default_db_path(),
            channel_capacity: default_channel_capacity(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

/// Command-line values that take precedence over file and environment.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    /// Interface to bind.
    pub host: Option<String>,
    /// Port to bind.
    pub port: Option<u16>,
    /// Storage backend.
    pub store: Option<StoreBackend>,
    /// SQLite database file.
    pub db_path: Option<String>,
}

impl ServerConfig {
    /// Loads configuration from a TOML file. Missing keys take defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or parsed.
    #[instrument(skip(path), fields(path = %path.as_ref().display()))]
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        debug!("Loading config from file");
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::new(format!("Failed to read config file: {}", e)))?;
        let config = Self::from_toml(&content)?;
        info!(store = %config.store, port = config.port, "Config loaded successfully");
        Ok(config)
    }

    /// Parses configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] on malformed TOML or unknown values.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::new(format!("Failed to parse config: {}", e)))
    }

    /// Applies `SQUARELY_*` variables from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a variable is set to an unparsable value.
    pub fn apply_env(self) -> Result<Self, ConfigError> {
        self.apply_vars(|key| std::env::var(key).ok())
    }

    /// Applies `SQUARELY_*` variables looked up through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a variable is set to an unparsable value.
    #[instrument(skip_all)]
    pub fn apply_vars(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        if let Some(host) = lookup("SQUARELY_HOST") {
            self.host = host;
        }
        if let Some(port) = lookup("SQUARELY_PORT") {
            self.port = parse_var("SQUARELY_PORT", &port)?;
        }
        if let Some(size) = lookup("SQUARELY_GRID_SIZE") {
            self.grid_size = parse_var("SQUARELY_GRID_SIZE", &size)?;
        }
        if let Some(limit) = lookup("SQUARELY_TURN_LIMIT") {
            self.turn_limit = parse_var("SQUARELY_TURN_LIMIT", &limit)?;
        }
        if let Some(ttl) = lookup("SQUARELY_ROOM_TTL_SECS") {
            self.room_ttl_secs = parse_var("SQUARELY_ROOM_TTL_SECS", &ttl)?;
        }
        if let Some(store) = lookup("SQUARELY_STORE") {
            self.store = parse_var("SQUARELY_STORE", &store)?;
        }
        if let Some(path) = lookup("SQUARELY_DB_PATH") {
            self.db_path = path;
        }
        if let Some(capacity) = lookup("SQUARELY_CHANNEL_CAPACITY") {
            self.channel_capacity = parse_var("SQUARELY_CHANNEL_CAPACITY", &capacity)?;
        }
        if let Some(every) = lookup("SQUARELY_SWEEP_INTERVAL_SECS") {
            self.sweep_interval_secs = parse_var("SQUARELY_SWEEP_INTERVAL_SECS", &every)?;
        }
        Ok(self)
    }

    /// Applies command-line overrides.
    pub fn with_overrides(mut self, overrides: ConfigOverrides) -> Self {
        if let Some(host) = overrides.host {
            self.host = host;
        }
        if let Some(port) = overrides.port {
            self.port = port;
        }
        if let Some(store) = overrides.store {
            self.store = store;
        }
        if let Some(db_path) = overrides.db_path {
            self.db_path = db_path;
        }
        self
    }

    /// Checks values the game cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] naming the first invalid setting.
    #[instrument(skip(self))]
    pub fn validate(self) -> Result<Self, ConfigError> {
        if self.grid_size < 2 {
            return Err(ConfigError::new(format!(
                "grid_size must be at least 2, got {}",
                self.grid_size
            )));
        }
        if self.turn_limit == 0 {
            return Err(ConfigError::new("turn_limit must be positive"));
        }
        if self.room_ttl_secs == 0 {
            return Err(ConfigError::new("room_ttl_secs must be positive"));
        }
        if self.channel_capacity == 0 {
            return Err(ConfigError::new("channel_capacity must be positive"));
        }
        if self.sweep_interval_secs == 0 {
            return Err(ConfigError::new("sweep_interval_secs must be positive"));
        }
        if self.store == StoreBackend::Sqlite && self.db_path.trim().is_empty() {
            return Err(ConfigError::new("db_path is required for the sqlite store"));
        }
        if self.grid_size > 64 {
            warn!(grid_size = self.grid_size, "Unusually large grid");
        }
        Ok(self)
    }

    /// Rules for newly created rooms.
    pub fn rules(&self) -> GameRules {
        GameRules::new(self.grid_size, self.turn_limit)
    }

    /// Room lifetime.
    pub fn room_ttl(&self) -> Duration {
        Duration::from_secs(self.room_ttl_secs)
    }

    /// Pause between room sweeps.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// Socket address string to bind.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_var<T>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| ConfigError::new(format!("Invalid {}='{}': {}", key, value, e)))
}

/// Configuration error.
#[derive(Debug, Clone, Display, Error)]
#[display("Config error: {} at {}:{}", message, file, line)]
pub struct ConfigError {
    /// Error message.
    pub message: String,
    /// Line number where error occurred.
    pub line: u32,
    /// Source file where error occurred.
    pub file: &'static str,
}

impl ConfigError {
    /// Creates a new configuration error.
    #[track_caller]
    #[instrument(skip(message))]
    pub fn new(message: impl Into<String>) -> Self {
        let loc = std::panic::Location::caller();
        Self {
            message: message.into(),
            line: loc.line(),
            file: loc.file(),
        }
    }
}
