//! Configuration for the connection pool, scheduler, and agent runner.
//!
//! Loaded from TOML with the same environment-variable-first priority chain
//! the rest of this codebase's tooling uses.

use std::path::PathBuf;

use serde::Deserialize;
use thiserror::Error;

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    IoError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file '{path}': {source}")]
    ParseError {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Top-level pool/scheduler configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Config {
    /// Reconnect/idle/backoff knobs for the connection pool.
    #[serde(default)]
    pub connection: ConnectionConfig,

    /// Dispatch/timeout knobs for the task scheduler.
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Rate-limiting knobs for the agent runner.
    #[serde(default)]
    pub agent: AgentConfig,

    /// Session blob storage location.
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Connection pool tuning.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ConnectionConfig {
    /// Max reconnect attempts per connection instance.
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    /// Base delay in seconds for the exponential backoff schedule.
    #[serde(default = "default_reconnect_base_secs")]
    pub reconnect_base_secs: u64,
    /// Cap in seconds for the exponential backoff schedule.
    #[serde(default = "default_reconnect_cap_secs")]
    pub reconnect_cap_secs: u64,
    /// How long `executeTask` waits for a connection to become ready.
    #[serde(default = "default_connect_wait_secs")]
    pub connect_wait_secs: u64,
    /// Idle timeout before a connection is eligible for reaping.
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    /// Idle-reap sweep interval.
    #[serde(default = "default_idle_sweep_interval_secs")]
    pub idle_sweep_interval_secs: u64,
}

fn default_max_reconnect_attempts() -> u32 {
    3
}
fn default_reconnect_base_secs() -> u64 {
    30
}
fn default_reconnect_cap_secs() -> u64 {
    300
}
fn default_connect_wait_secs() -> u64 {
    90
}
fn default_idle_timeout_secs() -> u64 {
    30 * 60
}
fn default_idle_sweep_interval_secs() -> u64 {
    5 * 60
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_reconnect_attempts: default_max_reconnect_attempts(),
            reconnect_base_secs: default_reconnect_base_secs(),
            reconnect_cap_secs: default_reconnect_cap_secs(),
            connect_wait_secs: default_connect_wait_secs(),
            idle_timeout_secs: default_idle_timeout_secs(),
            idle_sweep_interval_secs: default_idle_sweep_interval_secs(),
        }
    }
}

/// Task scheduler tuning.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SchedulerConfig {
    /// Tasks still `running` after this many seconds are swept to `failed` at startup.
    #[serde(default = "default_stale_running_secs")]
    pub stale_running_secs: u64,
    /// How often the dispatch loop polls `due_tasks`.
    #[serde(default = "default_dispatch_interval_ms")]
    pub dispatch_interval_ms: u64,
}

fn default_stale_running_secs() -> u64 {
    30 * 60
}
fn default_dispatch_interval_ms() -> u64 {
    1000
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            stale_running_secs: default_stale_running_secs(),
            dispatch_interval_ms: default_dispatch_interval_ms(),
        }
    }
}

/// Agent runner (scenario) tuning.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AgentConfig {
    /// Minimum separation between any two acts across all agents.
    #[serde(default = "default_min_global_interval_secs")]
    pub min_global_interval_secs: u64,
    /// Minimum separation between two acts from the same agent.
    #[serde(default = "default_min_speak_interval_secs")]
    pub min_speak_interval_secs: u64,
    /// Capacity of the message-trigger channel.
    #[serde(default = "default_trigger_channel_capacity")]
    pub trigger_channel_capacity: usize,
    /// How many messages of history are cached per account.
    #[serde(default = "default_history_cache_cap")]
    pub history_cache_cap: usize,
}

fn default_min_global_interval_secs() -> u64 {
    60
}
fn default_min_speak_interval_secs() -> u64 {
    100
}
fn default_trigger_channel_capacity() -> usize {
    100
}
fn default_history_cache_cap() -> usize {
    100
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            min_global_interval_secs: default_min_global_interval_secs(),
            min_speak_interval_secs: default_min_speak_interval_secs(),
            trigger_channel_capacity: default_trigger_channel_capacity(),
            history_cache_cap: default_history_cache_cap(),
        }
    }
}

/// Session blob storage configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StorageConfig {
    /// `sqlite:` URL (or bare path) for the session blob database.
    #[serde(default)]
    pub database_url: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { database_url: None }
    }
}

impl Config {
    /// Load configuration from the filesystem.
    ///
    /// Priority order:
    /// 1. `FLEET_CONFIG` environment variable
    /// 2. `./config.toml`
    /// 3. `~/.config/fleet/config.toml`
    ///
    /// Returns the default configuration if none of the above exist.
    pub fn load() -> Result<Self, ConfigError> {
        if let Ok(path) = std::env::var("FLEET_CONFIG") {
            let p = PathBuf::from(&path);
            if p.exists() {
                return Self::load_from(p);
            }
        }

        let local = PathBuf::from("config.toml");
        if local.exists() {
            return Self::load_from(local);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".config/fleet/config.toml");
            if user_config.exists() {
                return Self::load_from(user_config);
            }
        }

        Ok(Self::default())
    }

    pub fn load_from(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::IoError {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::ParseError {
            path: path.to_path_buf(),
            source,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            scheduler: SchedulerConfig::default(),
            agent: AgentConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}
