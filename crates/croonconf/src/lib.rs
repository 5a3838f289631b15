//! Minimal configuration loading for Crooner.
//!
//! This crate provides configuration loading with minimal dependencies,
//! designed to be imported by the other Crooner crates without causing
//! circular dependency issues.
//!
//! # Configuration Philosophy
//!
//! Configuration is supplied once at startup and is immutable thereafter:
//!
//! - **Identity** (`IdentityConfig`): who this client is when it handshakes
//!   with a node - user id and shard count.
//!
//! - **Nodes** (`NodeDescriptor`): the audio nodes to connect to. These seed
//!   the node registry; after startup the registry is the source of truth.
//!
//! - **Telemetry** (`TelemetryConfig`): log level for the tracing setup.
//!
//! # Usage
//!
//! ```rust,no_run
//! use croonconf::CroonConfig;
//!
//! let config = CroonConfig::load().expect("Failed to load config");
//!
//! println!("user id: {}", config.identity.user_id);
//! for node in &config.nodes {
//!     println!("node {}: {}:{}", node.name, node.host, node.port);
//! }
//! ```
//!
//! # Config File Locations
//!
//! Files are loaded in order (later wins):
//! 1. `/etc/crooner/config.toml` (system)
//! 2. `~/.config/crooner/config.toml` (user)
//! 3. `./crooner.toml` (local override)
//! 4. Environment variables (`CROONER_*`)
//!
//! # Example Config
//!
//! ```toml
//! [identity]
//! user_id = 506381097473310721
//! shard_count = 1
//!
//! [telemetry]
//! log_level = "info"
//!
//! [[nodes]]
//! name = "nearby"
//! host = "127.0.0.1"
//! port = 2333
//! password = "youshallnotpass"
//! ```

pub mod loader;

pub use loader::{discover_config_files, discover_config_files_with_override, ConfigSources};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

/// Address and credential of one remote audio node.
///
/// Immutable for the lifetime of the node it describes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeDescriptor {
    /// Unique label for the node, used in logs and registry lookups.
    pub name: String,

    /// Hostname or address the node listens on.
    pub host: String,

    /// WebSocket port.
    pub port: u16,

    /// Opaque credential sent as the `Authorization` header.
    pub password: String,
}

impl NodeDescriptor {
    /// The `ws://` URL for this node's WebSocket endpoint.
    pub fn ws_url(&self) -> String {
        format!("ws://{}:{}", self.host, self.port)
    }
}

/// Client identity sent during the connection handshake.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Bot user id, sent as the `User-Id` header.
    #[serde(default)]
    pub user_id: u64,

    /// Total shard count, sent as the `Num-Shards` header.
    /// Default: 1
    #[serde(default = "IdentityConfig::default_shard_count")]
    pub shard_count: u32,
}

impl IdentityConfig {
    fn default_shard_count() -> u32 {
        1
    }
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            user_id: 0,
            shard_count: Self::default_shard_count(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log level filter (e.g. "info", "crooner=debug").
    /// Default: info
    #[serde(default = "TelemetryConfig::default_log_level")]
    pub log_level: String,
}

impl TelemetryConfig {
    fn default_log_level() -> String {
        "info".to_string()
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Self::default_log_level(),
        }
    }
}

/// Complete Crooner configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CroonConfig {
    /// Handshake identity.
    #[serde(default)]
    pub identity: IdentityConfig,

    /// Logging setup.
    #[serde(default)]
    pub telemetry: TelemetryConfig,

    /// Audio nodes to register at startup.
    #[serde(default)]
    pub nodes: Vec<NodeDescriptor>,
}

impl CroonConfig {
    /// Load configuration from all sources.
    ///
    /// Load order (later wins):
    /// 1. Compiled defaults
    /// 2. `/etc/crooner/config.toml`
    /// 3. `~/.config/crooner/config.toml`
    /// 4. `./crooner.toml`
    /// 5. Environment variables
    pub fn load() -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(None)?;
        Ok(config)
    }

    /// Load configuration from a specific file path, then apply env overrides.
    ///
    /// If `config_path` is provided, it takes precedence over the local
    /// `./crooner.toml` override. System and user configs still load first.
    pub fn load_from(config_path: Option<&std::path::Path>) -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(config_path)?;
        Ok(config)
    }

    /// Load configuration and return information about sources.
    pub fn load_with_sources() -> Result<(Self, ConfigSources), ConfigError> {
        Self::load_with_sources_from(None)
    }

    /// Load configuration from optional path and return information about sources.
    pub fn load_with_sources_from(
        config_path: Option<&std::path::Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let mut sources = ConfigSources::default();
        let mut config = CroonConfig::default();

        // Load config files in order
        for path in loader::discover_config_files_with_override(config_path) {
            let file_config = loader::load_from_file(&path)?;
            config = loader::merge_configs(config, file_config);
            sources.files.push(path);
        }

        // Apply environment variable overrides
        loader::apply_env_overrides(&mut config, &mut sources);

        Ok((config, sources))
    }
}
