//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/eventkit/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/eventkit/` (~/.config/eventkit/)
//! - Data: `$XDG_DATA_HOME/eventkit/` (~/.local/share/eventkit/)
//! - State/Logs: `$XDG_STATE_HOME/eventkit/` (~/.local/state/eventkit/)

use crate::error::{Error, Result};
use crate::settings;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_DATA_HOME or ~/.local/share
fn xdg_data_home() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Client defaults pushed into the process-wide settings
    #[serde(default)]
    pub client: ClientSection,

    /// Local queue and upload tuning
    #[serde(default)]
    pub queue: QueueConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// `[client]` section
#[derive(Debug, Deserialize, Default, Clone)]
pub struct ClientSection {
    /// Ingestion endpoint base URL
    pub api_endpoint: Option<String>,
    /// Write-only API key used when none is passed to the client
    pub api_key: Option<String>,
    /// Payload encryption key, passed through to the queue collaborator
    pub encryption_key: Option<String>,
    /// Library-level error logging switch
    pub logging_enabled: Option<bool>,
    /// Gzip request bodies
    pub compression_enabled: Option<bool>,
    /// Verbose per-request logging in the queue
    #[serde(default)]
    pub debug: bool,
    /// Append the install identity to every record
    #[serde(default)]
    pub auto_append_uniq_id: bool,
    /// Append device metadata to every record
    #[serde(default)]
    pub auto_append_model_information: bool,
}

/// `[queue]` section
#[derive(Debug, Deserialize, Clone)]
pub struct QueueConfig {
    /// Events per upload request (1..=500)
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Enqueue is refused once this many events are buffered
    #[serde(default = "default_max_queued_events")]
    pub max_queued_events: usize,

    /// Flush attempts before a rejected event is dropped
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Extra HTTP attempts for transient failures within one flush
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    /// HTTP request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_queued_events: default_max_queued_events(),
            max_attempts: default_max_attempts(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout(),
        }
    }
}

impl QueueConfig {
    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 || self.batch_size > 500 {
            return Err(Error::Config(
                "queue.batch_size must be between 1 and 500".to_string(),
            ));
        }
        if self.max_queued_events == 0 {
            return Err(Error::Config(
                "queue.max_queued_events must be positive".to_string(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(Error::Config(
                "queue.max_attempts must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_batch_size() -> usize {
    100
}

fn default_max_queued_events() -> usize {
    10_000
}

fn default_max_attempts() -> u32 {
    5
}

fn default_max_retries() -> usize {
    3
}

fn default_timeout() -> u64 {
    30
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        config.queue.validate()?;
        Ok(config)
    }

    /// Push the `[client]` values into the process-wide settings.
    ///
    /// Must run before a client is constructed for the values to take effect.
    pub fn apply_process_settings(&self) {
        let client = &self.client;
        if let Some(endpoint) = &client.api_endpoint {
            settings::set_api_endpoint(endpoint);
        }
        if let Some(api_key) = &client.api_key {
            settings::set_default_api_key(api_key);
        }
        if let Some(key) = &client.encryption_key {
            settings::set_encryption_key(key);
        }
        match client.logging_enabled {
            Some(true) => settings::enable_logging(),
            Some(false) => settings::disable_logging(),
            None => {}
        }
        match client.compression_enabled {
            Some(true) => settings::enable_event_compression(),
            Some(false) => settings::disable_event_compression(),
            None => {}
        }
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/eventkit/config.toml` (~/.config/eventkit/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("eventkit").join("config.toml")
    }

    /// Returns the data directory path (for the SQLite database)
    ///
    /// `$XDG_DATA_HOME/eventkit/` (~/.local/share/eventkit/)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("eventkit")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/eventkit/` (~/.local/state/eventkit/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("eventkit")
    }

    /// Returns the log file path
    pub fn log_path() -> PathBuf {
        Self::state_dir().join("eventkit.log")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.client.api_key.is_none());
        assert!(!config.client.auto_append_uniq_id);
        assert_eq!(config.queue.batch_size, 100);
        assert_eq!(config.queue.max_attempts, 5);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[client]
api_endpoint = "https://ingest.example.com"
api_key = "1/abcdef"
compression_enabled = false
auto_append_uniq_id = true

[queue]
batch_size = 50
max_retries = 1

[logging]
level = "debug"
"#;
        let config: Config = toml::from_str(toml).unwrap();

        assert_eq!(
            config.client.api_endpoint.as_deref(),
            Some("https://ingest.example.com")
        );
        assert_eq!(config.client.api_key.as_deref(), Some("1/abcdef"));
        assert_eq!(config.client.compression_enabled, Some(false));
        assert!(config.client.logging_enabled.is_none());
        assert!(config.client.auto_append_uniq_id);
        assert!(!config.client.auto_append_model_information);
        assert_eq!(config.queue.batch_size, 50);
        assert_eq!(config.queue.max_retries, 1);
        assert_eq!(config.queue.timeout_secs, 30);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_queue_config_validation() {
        assert!(QueueConfig::default().validate().is_ok());

        let config = QueueConfig {
            batch_size: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = QueueConfig {
            batch_size: 501,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = QueueConfig {
            max_attempts: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_rejects_bad_queue() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[queue]\nbatch_size = 0\n").unwrap();

        let err = Config::load_from(&path).unwrap_err();
        assert!(err.to_string().contains("batch_size"));
    }
}
