//! Configuration system for Observer Zero
//!
//! Supports multiple configuration sources with the following precedence (highest to lowest):
//! 1. CLI arguments
//! 2. Environment variables (OBSERVER_* prefix)
//! 3. Configuration file (TOML)
//! 4. Default values

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ObserverConfig {
    /// Aggregator server settings
    pub server: ServerSettings,

    /// Load harness settings
    pub harness: HarnessSettings,

    /// Logging configuration
    pub logging: LoggingSettings,
}

/// Aggregator server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Address to bind the HTTP/WebSocket listener to
    pub bind_addr: String,

    /// Listen port
    pub port: u16,

    /// Enables the force-count debug endpoint
    pub testing_mode: bool,

    /// Log every connect/disconnect instead of every hundredth
    pub debug_mode: bool,

    /// Minimum time between broadcasts in milliseconds
    pub broadcast_throttle_ms: u64,

    /// Above this many observers the throttle window doubles
    pub high_load_threshold: u64,

    /// Capacity of the update fan-out channel
    pub update_channel_capacity: usize,

    /// Interval of the memory usage log in seconds (0 = disabled)
    pub memory_log_interval_secs: u64,

    /// Runtime worker threads (0 = auto)
    pub worker_threads: usize,
}

/// Load harness settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessSettings {
    /// Server WebSocket URL
    pub url: String,

    /// Target used by the "max" command
    pub max_clients: usize,

    /// Pause between opening two sessions in milliseconds
    pub ramp_interval_ms: u64,

    /// Shared heartbeat ticker interval in milliseconds
    pub heartbeat_interval_ms: u64,

    /// Reconnection attempts before a session gives up
    pub reconnect_attempts: u32,

    /// Fixed delay between reconnection attempts in milliseconds
    pub reconnect_delay_ms: u64,

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

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0".to_string(),
            port: 3000,
            testing_mode: false,
            debug_mode: false,
            broadcast_throttle_ms: 500,
            high_load_threshold: 1000,
            update_channel_capacity: 64,
            memory_log_interval_secs: 30,
            worker_threads: 0,
        }
    }
}

impl Default for HarnessSettings {
    fn default() -> Self {
        Self {
            url: "ws://localhost:3000/ws".to_string(),
            max_clients: 5000,
            ramp_interval_ms: 10,
            heartbeat_interval_ms: 10_000,
            reconnect_attempts: 10,
            reconnect_delay_ms: 1000,
            connect_timeout_ms: 5000,
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

impl ServerSettings {
    pub fn broadcast_throttle(&self) -> Duration {
        Duration::from_millis(self.broadcast_throttle_ms)
    }

    /// Socket address string for the listener
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }
}

impl HarnessSettings {
    pub fn ramp_interval(&self) -> Duration {
        Duration::from_millis(self.ramp_interval_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl ObserverConfig {
    /// Load configuration from file with environment variable overrides
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut config = Self::default();

        // 1. Load from config file if it exists
        if let Some(path) = Self::find_config_file(config_path)? {
            debug!(path = %path.display(), "Loading configuration file");
            let content = fs::read_to_string(&path)
                .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;
            config = toml::from_str(&content).map_err(|e| Error::ConfigParse {
                message: format!("{}: {}", path.display(), e),
                source: Some(e),
            })?;
            info!(path = %path.display(), "Configuration loaded from file");
        }

        // 2. Apply environment variable overrides
        config.apply_env_overrides();

        // 3. Expand paths
        if let Some(ref file) = config.logging.file {
            config.logging.file = Some(expand_path(file));
        }

        // 4. Validate
        config.validate()?;

        Ok(config)
    }

    /// Find the configuration file to use
    fn find_config_file(explicit_path: Option<&str>) -> Result<Option<PathBuf>> {
        if let Some(path) = explicit_path {
            let path = PathBuf::from(expand_path(path));
            if path.exists() {
                return Ok(Some(path));
            }
            return Err(Error::config_not_found(path));
        }

        let search_paths = [
            PathBuf::from("observer-zero.toml"),
            PathBuf::from("config.toml"),
            dirs::config_dir()
                .map(|p| p.join("observer-zero").join("config.toml"))
                .unwrap_or_default(),
            dirs::home_dir()
                .map(|p| p.join(".observer-zero").join("config.toml"))
                .unwrap_or_default(),
        ];

        for path in &search_paths {
            if !path.as_os_str().is_empty() && path.exists() {
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
        if let Ok(val) = std::env::var("OBSERVER_BIND_ADDR") {
            self.server.bind_addr = val;
        }
        if let Some(n) = env_parse("OBSERVER_PORT") {
            self.server.port = n;
        }
        if let Some(flag) = env_flag("OBSERVER_TESTING_MODE") {
            self.server.testing_mode = flag;
        }
        if let Some(flag) = env_flag("OBSERVER_DEBUG_MODE") {
            self.server.debug_mode = flag;
        }
        if let Some(n) = env_parse("OBSERVER_BROADCAST_THROTTLE_MS") {
            self.server.broadcast_throttle_ms = n;
        }
        if let Some(n) = env_parse("OBSERVER_HIGH_LOAD_THRESHOLD") {
            self.server.high_load_threshold = n;
        }

        // Harness settings
        if let Ok(val) = std::env::var("OBSERVER_SERVER_URL") {
            self.harness.url = val;
        }
        if let Some(n) = env_parse("OBSERVER_MAX_CLIENTS") {
            self.harness.max_clients = n;
        }
        if let Some(n) = env_parse("OBSERVER_RAMP_INTERVAL_MS") {
            self.harness.ramp_interval_ms = n;
        }
        if let Some(n) = env_parse("OBSERVER_RECONNECT_ATTEMPTS") {
            self.harness.reconnect_attempts = n;
        }

        // Logging settings
        if let Ok(val) = std::env::var("OBSERVER_LOG_LEVEL") {
            self.logging.level = val;
        }
        if let Ok(val) = std::env::var("OBSERVER_LOG_FILE") {
            self.logging.file = Some(val);
        }
        if let Some(flag) = env_flag("OBSERVER_LOG_JSON") {
            self.logging.json_format = flag;
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.server.broadcast_throttle_ms == 0 {
            return Err(Error::config_field_invalid(
                "server.broadcast_throttle_ms",
                "broadcast_throttle_ms must be greater than 0",
            ));
        }
        if self.server.update_channel_capacity == 0 {
            return Err(Error::config_field_invalid(
                "server.update_channel_capacity",
                "update_channel_capacity must be greater than 0",
            ));
        }

        if !self.harness.url.starts_with("ws://") {
            return Err(Error::config_field_invalid(
                "harness.url",
                "Server URL must start with ws:// (TLS is not supported)",
            ));
        }
        if self.harness.ramp_interval_ms == 0 {
            return Err(Error::config_field_invalid(
                "harness.ramp_interval_ms",
                "ramp_interval_ms must be greater than 0",
            ));
        }
        if self.harness.heartbeat_interval_ms == 0 {
            return Err(Error::config_field_invalid(
                "harness.heartbeat_interval_ms",
                "heartbeat_interval_ms must be greater than 0",
            ));
        }

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
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

fn env_flag(key: &str) -> Option<bool> {
    std::env::var(key)
        .ok()
        .map(|val| val.to_lowercase() == "true" || val == "1")
}

/// Expand ~ and environment variables in paths
fn expand_path(path: &str) -> String {
    shellexpand::full(path)
        .unwrap_or_else(|_| std::borrow::Cow::Borrowed(path))
        .into_owned()
}

/// Initialize a new configuration file
pub fn init_config(path: Option<&str>, force: bool) -> Result<()> {
    let config_path = path
        .map(|p| PathBuf::from(expand_path(p)))
        .unwrap_or_else(|| PathBuf::from("observer-zero.toml"));

    if config_path.exists() && !force {
        return Err(Error::Config(format!(
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

    println!("Configuration file created: {}", config_path.display());
    Ok(())
}

/// Generate default configuration content with comments
fn generate_default_config() -> String {
    r#"# Observer Zero Configuration

[server]
# Listener address and port
bind_addr = "0.0.0.0"
port = 3000

# Enable /force-count/:count (never enable in production)
testing_mode = false

# Log every connect/disconnect
debug_mode = false

# Minimum time between broadcasts; doubles above high_load_threshold
broadcast_throttle_ms = 500
high_load_threshold = 1000

# Update fan-out channel capacity (slow sessions skip to the latest update)
update_channel_capacity = 64

# Memory usage log interval in seconds (0 = disabled)
memory_log_interval_secs = 30

# Runtime worker threads (0 = auto)
worker_threads = 0

[harness]
# Server WebSocket URL
url = "ws://localhost:3000/ws"

# Target used by the "max" command
max_clients = 5000

# Pause between opening two sessions
ramp_interval_ms = 10

# Shared heartbeat ticker
heartbeat_interval_ms = 10000

# Fixed-delay reconnection
reconnect_attempts = 10
reconnect_delay_ms = 1000
connect_timeout_ms = 5000

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log file path (comment out to disable file logging)
# file = "~/.observer-zero/logs/observer-zero.log"

max_file_size_mb = 100
max_files = 5
json_format = false
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn test_default_config() {
        let config = ObserverConfig::default();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.server.broadcast_throttle_ms, 500);
        assert_eq!(config.server.high_load_threshold, 1000);
        assert_eq!(config.harness.max_clients, 5000);
        assert_eq!(config.harness.ramp_interval(), Duration::from_millis(10));
        assert_eq!(config.harness.reconnect_attempts, 10);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_env_override() {
        env::set_var("OBSERVER_SERVER_URL", "ws://example.test:4000/ws");
        env::set_var("OBSERVER_TESTING_MODE", "true");
        env::set_var("OBSERVER_RAMP_INTERVAL_MS", "25");

        let mut config = ObserverConfig::default();
        config.apply_env_overrides();

        assert_eq!(config.harness.url, "ws://example.test:4000/ws");
        assert!(config.server.testing_mode);
        assert_eq!(config.harness.ramp_interval_ms, 25);

        env::remove_var("OBSERVER_SERVER_URL");
        env::remove_var("OBSERVER_TESTING_MODE");
        env::remove_var("OBSERVER_RAMP_INTERVAL_MS");
    }

    #[test]
    fn test_validation_invalid_url() {
        let mut config = ObserverConfig::default();
        config.harness.url = "http://localhost:3000".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_zero_intervals() {
        let mut config = ObserverConfig::default();
        config.server.broadcast_throttle_ms = 0;
        assert!(config.validate().is_err());

        let mut config = ObserverConfig::default();
        config.harness.ramp_interval_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_invalid_log_level() {
        let mut config = ObserverConfig::default();
        config.logging.level = "loud".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("loud"));
    }

    #[test]
    fn test_validation_valid_config() {
        assert!(ObserverConfig::default().validate().is_ok());
    }

    #[test]
    fn test_generated_config_parses_to_defaults() {
        let parsed: ObserverConfig = toml::from_str(&generate_default_config()).unwrap();
        let defaults = ObserverConfig::default();
        assert_eq!(parsed.server.port, defaults.server.port);
        assert_eq!(parsed.harness.url, defaults.harness.url);
        assert_eq!(parsed.harness.heartbeat_interval_ms, defaults.harness.heartbeat_interval_ms);
    }

    #[test]
    fn test_parse_partial_config_file() {
        let config: ObserverConfig = toml::from_str(
            r#"
[server]
port = 8080
testing_mode = true

[harness]
max_clients = 200
"#,
        )
        .unwrap();

        assert_eq!(config.server.port, 8080);
        assert!(config.server.testing_mode);
        assert_eq!(config.server.broadcast_throttle_ms, 500);
        assert_eq!(config.harness.max_clients, 200);
        assert_eq!(config.harness.url, "ws://localhost:3000/ws");
    }

    #[test]
    fn test_explicit_missing_file_is_not_found() {
        let err = ObserverConfig::load(Some("/nonexistent/observer.toml")).unwrap_err();
        assert!(matches!(err, Error::ConfigNotFound { .. }));
    }
}
