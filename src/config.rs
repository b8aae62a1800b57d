//! Configuration loading and management (§10.3, §6 "Client configuration").

use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the config file from disk.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    /// Failed to parse the config file as TOML.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Top-level server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// This replica's opaque identifier. Required; there is no default
    /// because two replicas sharing an id would silently corrupt clocks.
    pub replica_id: String,
    /// Address the server listens on for client connections.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent client connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Whether unauthenticated connections are rejected (§6).
    #[serde(default = "default_true")]
    pub auth_required: bool,
    /// Heartbeat/presence timing.
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
    /// Undo manager bounds.
    #[serde(default)]
    pub undo: UndoConfig,
    /// Storage adapter selection and options.
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Heartbeat and connection-liveness timing (§6 `heartbeatIntervalMs` /
/// `heartbeatTimeoutMs`).
#[derive(Debug, Clone, Deserialize)]
pub struct HeartbeatConfig {
    /// How often `PING` is sent on an idle connection.
    #[serde(default = "default_heartbeat_interval_ms")]
    pub interval_ms: u64,
    /// How long to wait for `PONG` before considering the connection dead.
    #[serde(default = "default_heartbeat_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self { interval_ms: default_heartbeat_interval_ms(), timeout_ms: default_heartbeat_timeout_ms() }
    }
}

fn default_heartbeat_interval_ms() -> u64 {
    30_000
}
fn default_heartbeat_timeout_ms() -> u64 {
    10_000
}

/// Undo manager bounds (§4.J).
#[derive(Debug, Clone, Deserialize)]
pub struct UndoConfig {
    /// Maximum depth of the undo/redo stacks.
    #[serde(default = "default_max_undo_size")]
    pub max_undo_size: usize,
    /// Consecutive edits within this window may merge into one undo step.
    #[serde(default = "default_merge_window_ms")]
    pub merge_window_ms: u64,
    /// Whether co-located replicas coordinate undo position via the
    /// cross-tab coordinator (§4.K).
    #[serde(default = "default_true")]
    pub cross_tab_enabled: bool,
}

impl Default for UndoConfig {
    fn default() -> Self {
        Self {
            max_undo_size: default_max_undo_size(),
            merge_window_ms: default_merge_window_ms(),
            cross_tab_enabled: true,
        }
    }
}

fn default_max_undo_size() -> usize {
    100
}
fn default_merge_window_ms() -> u64 {
    1000
}

/// Storage adapter selection (§6 "Storage adapter").
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Which adapter to use. Only `memory` ships with this crate;
    /// other directives name adapters a deployment supplies itself.
    #[serde(default = "default_storage_kind")]
    pub kind: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { kind: default_storage_kind() }
    }
}

fn default_storage_kind() -> String {
    "memory".to_string()
}

fn default_max_connections() -> usize {
    1000
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}
