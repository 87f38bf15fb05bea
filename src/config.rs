//! Configuration system for fieldmesh
//!
//! Supports multiple configuration sources with the following precedence (highest to lowest):
//! 1. CLI arguments
//! 2. Environment variables (FIELDMESH_* prefix)
//! 3. Configuration file (TOML)
//! 4. Default values

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Main configuration, shared by the server and the reference peer
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldmeshConfig {
    /// Coordination server settings
    pub server: ServerSettings,

    /// Stream relay settings
    pub relay: RelaySettings,

    /// Smart data scheduler settings
    pub smart_data: SmartDataSettings,

    /// Task distributor settings
    pub tasks: TaskSettings,

    /// Reference peer settings
    pub peer: PeerSettings,

    /// Logging configuration
    pub logging: LoggingSettings,
}

/// Coordination server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Address the WebSocket listener binds to
    pub listen_addr: String,

    /// Directory that relative file paths in requests resolve against
    pub data_dir: String,

    /// Per-connection outbound queue length
    pub outbox_capacity: usize,

    /// Largest accepted inbound frame in bytes
    pub max_message_size: usize,
}

/// Stream relay settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelaySettings {
    /// Bytes per `data-stream` block
    pub block_size: usize,
}

/// Smart data scheduler settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SmartDataSettings {
    /// Smallest accepted emission period in seconds
    pub min_period_secs: u64,
    /// Largest accepted emission period in seconds
    pub max_period_secs: u64,
}

/// Task distributor settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskSettings {
    /// JSON file holding the task pool (an array); re-read on SIGHUP
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

/// Reference peer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerSettings {
    /// Server WebSocket URL
    pub server_url: String,

    /// Peer name (defaults to the hostname)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Address the direct-channel listener binds to (port 0 = auto-assign)
    pub direct_listen_addr: String,

    /// Host advertised to other peers; defaults to the bound address
    #[serde(skip_serializing_if = "Option::is_none")]
    pub advertise_host: Option<String>,

    /// Where received streams and transfers are written
    pub cache_dir: String,

    /// Bytes per direct-channel transfer chunk
    pub chunk_size: usize,

    /// Delay before closing a rejected second direct connection
    pub reject_grace_ms: u64,

    /// Reconnection interval in milliseconds
    pub reconnect_interval_ms: u64,

    /// Maximum reconnection attempts (0 = infinite)
    pub max_reconnect_attempts: u32,

    /// Connection timeout in milliseconds
    pub connect_timeout_ms: u64,
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Log level: trace, debug, info, warn, error
    pub level: String,

    /// Log file path (empty = no file logging)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,

    /// Maximum log file size in MB before rotation
    pub max_file_size_mb: u64,

    /// Number of rotated log files to keep
    pub max_files: u32,

    /// Enable JSON formatted logging
    pub json_format: bool,
}

// Default implementations

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
            data_dir: ".".to_string(),
            outbox_capacity: 256,
            max_message_size: 16 * 1024 * 1024,
        }
    }
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            block_size: 16 * 1024,
        }
    }
}

impl Default for SmartDataSettings {
    fn default() -> Self {
        Self {
            min_period_secs: 1,
            max_period_secs: 24 * 60 * 60,
        }
    }
}

impl Default for PeerSettings {
    fn default() -> Self {
        Self {
            server_url: "ws://127.0.0.1:8080".to_string(),
            name: None,
            direct_listen_addr: "0.0.0.0:0".to_string(),
            advertise_host: None,
            cache_dir: "~/.fieldmesh/cache".to_string(),
            chunk_size: 64 * 1024,
            reject_grace_ms: 500,
            reconnect_interval_ms: 2000,
            max_reconnect_attempts: 0, // Infinite
            connect_timeout_ms: 10000,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
            max_file_size_mb: 100,
            max_files: 5,
            json_format: false,
        }
    }
}

impl FieldmeshConfig {
    /// Load configuration from file with environment variable overrides
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut config = Self::default();

        // 1. Load from config file if it exists
        let config_file = Self::find_config_file(config_path)?;
        if let Some(path) = config_file {
            debug!(path = %path.display(), "Loading configuration file");
            config = Self::from_file(&path)?;
            info!(path = %path.display(), "Configuration loaded from file");
        }

        // 2. Apply environment variable overrides
        config.apply_env_overrides();

        // 3. Expand paths
        config.expand_paths();

        // 4. Validate
        config.validate()?;

        Ok(config)
    }

    /// Parse a configuration file without overrides or validation
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| Error::io_read(path, e))?;
        toml::from_str(&content).map_err(|e| Error::ConfigParse {
            message: format!("{}: {}", path.display(), e.message()),
            source: Some(e),
        })
    }

    /// Find the configuration file to use
    fn find_config_file(explicit_path: Option<&str>) -> Result<Option<PathBuf>> {
        // If explicit path provided, use it (error if not found)
        if let Some(path) = explicit_path {
            let expanded = shellexpand::tilde(path);
            let path = PathBuf::from(expanded.as_ref());
            if path.exists() {
                return Ok(Some(path));
            } else {
                return Err(Error::config_not_found(path));
            }
        }

        for path in &search_paths() {
            if path.exists() {
                debug!(path = %path.display(), "Found configuration file");
                return Ok(Some(path.clone()));
            }
        }

        debug!("No configuration file found, using defaults");
        Ok(None)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        // Server settings
        if let Ok(val) = std::env::var("FIELDMESH_LISTEN_ADDR") {
            self.server.listen_addr = val;
        }
        if let Ok(val) = std::env::var("FIELDMESH_DATA_DIR") {
            self.server.data_dir = val;
        }
        if let Ok(val) = std::env::var("FIELDMESH_BLOCK_SIZE") {
            if let Ok(n) = val.parse() {
                self.relay.block_size = n;
            }
        }
        if let Ok(val) = std::env::var("FIELDMESH_TASKS_FILE") {
            self.tasks.file = Some(val);
        }

        // Peer settings
        if let Ok(val) = std::env::var("FIELDMESH_SERVER_URL") {
            self.peer.server_url = val;
        }
        if let Ok(val) = std::env::var("FIELDMESH_PEER_NAME") {
            self.peer.name = Some(val);
        }
        if let Ok(val) = std::env::var("FIELDMESH_DIRECT_ADDR") {
            self.peer.direct_listen_addr = val;
        }
        if let Ok(val) = std::env::var("FIELDMESH_ADVERTISE_HOST") {
            self.peer.advertise_host = Some(val);
        }
        if let Ok(val) = std::env::var("FIELDMESH_CACHE_DIR") {
            self.peer.cache_dir = val;
        }
        if let Ok(val) = std::env::var("FIELDMESH_MAX_RECONNECT_ATTEMPTS") {
            if let Ok(n) = val.parse() {
                self.peer.max_reconnect_attempts = n;
            }
        }

        // Logging settings
        if let Ok(val) = std::env::var("FIELDMESH_LOG_LEVEL") {
            self.logging.level = val;
        }
        if let Ok(val) = std::env::var("FIELDMESH_LOG_FILE") {
            self.logging.file = Some(val);
        }
        if let Ok(val) = std::env::var("FIELDMESH_LOG_JSON") {
            self.logging.json_format = val.to_lowercase() == "true" || val == "1";
        }
    }

    /// Expand ~ and other path variables
    fn expand_paths(&mut self) {
        self.server.data_dir = expand_path(&self.server.data_dir);
        self.peer.cache_dir = expand_path(&self.peer.cache_dir);

        if let Some(ref file) = self.tasks.file {
            self.tasks.file = Some(expand_path(file));
        }
        if let Some(ref file) = self.logging.file {
            self.logging.file = Some(expand_path(file));
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.server.listen_addr.parse::<SocketAddr>().is_err() {
            return Err(Error::config_field_invalid(
                "server.listen_addr",
                format!("'{}' is not a socket address", self.server.listen_addr),
            ));
        }
        if self.server.outbox_capacity == 0 {
            return Err(Error::config_field_invalid(
                "server.outbox_capacity",
                "outbox_capacity must be greater than 0",
            ));
        }

        // A block is base64-encoded into one frame
        if self.relay.block_size == 0 || self.relay.block_size.saturating_mul(2) > self.server.max_message_size {
            return Err(Error::config_field_invalid(
                "relay.block_size",
                "block_size must be positive and at most half of max_message_size",
            ));
        }

        if self.smart_data.min_period_secs == 0 {
            return Err(Error::config_field_invalid(
                "smart_data.min_period_secs",
                "min_period_secs must be at least 1",
            ));
        }
        if self.smart_data.max_period_secs < self.smart_data.min_period_secs {
            return Err(Error::config_field_invalid(
                "smart_data.max_period_secs",
                "max_period_secs must not be below min_period_secs",
            ));
        }

        match url::Url::parse(&self.peer.server_url) {
            Ok(url) if url.scheme() == "ws" || url.scheme() == "wss" => {}
            _ => {
                return Err(Error::config_field_invalid(
                    "peer.server_url",
                    "Server URL must start with ws:// or wss://",
                ))
            }
        }
        if self.peer.direct_listen_addr.parse::<SocketAddr>().is_err() {
            return Err(Error::config_field_invalid(
                "peer.direct_listen_addr",
                format!("'{}' is not a socket address", self.peer.direct_listen_addr),
            ));
        }
        if self.peer.chunk_size == 0 {
            return Err(Error::config_field_invalid(
                "peer.chunk_size",
                "chunk_size must be greater than 0",
            ));
        }

        // Validate log level
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(Error::config_field_invalid(
                "logging.level",
                format!(
                    "Invalid log level '{}'. Must be one of: {}",
                    self.logging.level,
                    valid_levels.join(", ")
                ),
            ));
        }

        Ok(())
    }

    /// Get the server data directory as a PathBuf
    pub fn data_dir(&self) -> PathBuf {
        PathBuf::from(&self.server.data_dir)
    }

    /// Get the peer cache directory as a PathBuf
    pub fn cache_dir(&self) -> PathBuf {
        PathBuf::from(&self.peer.cache_dir)
    }

    /// Peer name, falling back to the hostname
    pub fn peer_name(&self) -> String {
        self.peer.name.clone().unwrap_or_else(default_peer_name)
    }
}

/// Standard configuration search locations, in order
pub fn search_paths() -> Vec<PathBuf> {
    vec![
        // Current directory
        PathBuf::from("fieldmesh.toml"),
        // User config directory
        dirs::config_dir()
            .map(|p| p.join("fieldmesh").join("config.toml"))
            .unwrap_or_default(),
        // Home directory
        dirs::home_dir()
            .map(|p| p.join(".fieldmesh").join("config.toml"))
            .unwrap_or_default(),
        // System config (Linux)
        PathBuf::from("/etc/fieldmesh/config.toml"),
    ]
}

/// Hostname, or a random `peer-xxxxxxxx` when it cannot be read
pub fn default_peer_name() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| {
            let id = uuid::Uuid::new_v4().simple().to_string();
            format!("peer-{}", &id[..8])
        })
}

/// Expand ~ and environment variables in paths
fn expand_path(path: &str) -> String {
    shellexpand::full(path)
        .unwrap_or_else(|_| std::borrow::Cow::Borrowed(path))
        .into_owned()
}

/// Initialize a new configuration file, returning where it was written
pub fn init_config(path: Option<&str>, force: bool) -> Result<PathBuf> {
    let config_path = path
        .map(|p| PathBuf::from(expand_path(p)))
        .unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".fieldmesh")
                .join("config.toml")
        });

    if config_path.exists() && !force {
        return Err(Error::config_validation(format!(
            "Configuration file already exists: {}. Use --force to overwrite.",
            config_path.display()
        )));
    }

    if let Some(parent) = config_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| Error::IoWrite {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
    }

    fs::write(&config_path, generate_default_config()).map_err(|e| Error::IoWrite {
        path: config_path.clone(),
        source: e,
    })?;

    Ok(config_path)
}

/// Generate default configuration content with comments
fn generate_default_config() -> String {
    r#"# fieldmesh configuration

[server]
# Address the WebSocket listener binds to
listen_addr = "0.0.0.0:8080"

# Directory that relative file paths in requests resolve against
data_dir = "."

# Per-connection outbound queue length
outbox_capacity = 256

# Largest accepted inbound frame in bytes
max_message_size = 16777216

[relay]
# Bytes per data-stream block
block_size = 16384

[smart_data]
# Smallest accepted emission period in seconds
min_period_secs = 1

# Largest accepted emission period in seconds
max_period_secs = 86400

[tasks]
# JSON array of tasks handed out round robin (re-read on SIGHUP)
# file = "~/.fieldmesh/tasks.json"

[peer]
# Server WebSocket URL
server_url = "ws://127.0.0.1:8080"

# Peer name (defaults to the hostname)
# name = "field-01"

# Direct-channel listener (port 0 = auto-assign)
direct_listen_addr = "0.0.0.0:0"

# Host advertised to other peers (defaults to the bound address)
# advertise_host = "192.168.1.20"

# Where received streams and transfers are written
cache_dir = "~/.fieldmesh/cache"

# Bytes per direct-channel transfer chunk
chunk_size = 65536

# Delay before closing a rejected second direct connection
reject_grace_ms = 500

# Reconnection interval in milliseconds
reconnect_interval_ms = 2000

# Maximum reconnection attempts (0 = infinite)
max_reconnect_attempts = 0

# Connection timeout in milliseconds
connect_timeout_ms = 10000

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log file path (comment out to disable file logging)
# file = "~/.fieldmesh/logs/fieldmesh.log"

# Maximum log file size in MB before rotation
max_file_size_mb = 100

# Number of rotated log files to keep
max_files = 5

# Enable JSON formatted logging
json_format = false
"#
    .to_string()
}
