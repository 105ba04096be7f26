//! Configuration management for the Exile agent
//!
//! This module handles loading, parsing, validating, and managing
//! configuration from files, environment variables, and CLI overrides.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AgentError, Result};

/// Main configuration structure for the agent
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Remote Exile API connection settings
    #[serde(default)]
    pub exile: ExileConfig,
    /// Standalone configuration watcher settings
    #[serde(default)]
    pub watcher: WatcherConfig,
    /// Poll / stream / dispatch worker settings
    #[serde(default)]
    pub workers: WorkersConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Remote Exile API connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExileConfig {
    /// Base URL of the Exile API. Remote workers stay disabled without it.
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Bearer token sent with every request (prefer `EXILE_AGENT_API_TOKEN`)
    #[serde(default)]
    pub api_token: Option<String>,

    /// TCP/TLS connect timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

fn default_connect_timeout() -> u64 {
    10
}

impl Default for ExileConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_token: None,
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

/// Standalone configuration watcher settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherConfig {
    /// Attach the standalone configuration watcher
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Seconds between configuration checks
    #[serde(default = "default_watch_interval")]
    pub interval_secs: u64,

    /// Bound on a single configuration fetch, in seconds
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_watch_interval() -> u64 {
    60
}

fn default_fetch_timeout() -> u64 {
    10
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            interval_secs: default_watch_interval(),
            fetch_timeout_secs: default_fetch_timeout(),
        }
    }
}

impl WatcherConfig {
    /// Check interval as a [`Duration`]
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Fetch timeout as a [`Duration`]
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

/// Worker settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkersConfig {
    /// Fixed delay after a failed poll or stream session, in seconds
    #[serde(default = "default_retry_delay")]
    pub retry_delay_secs: u64,

    /// Bound on a single event poll, in seconds
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout_secs: u64,

    /// Pause after an empty event batch, in milliseconds
    #[serde(default = "default_poll_idle_delay")]
    pub poll_idle_delay_ms: u64,

    /// Bound on one job stream session, in seconds
    #[serde(default = "default_stream_session_timeout")]
    pub stream_session_timeout_secs: u64,

    /// Restart poll/stream/dispatch workers when the remote configuration changes
    #[serde(default = "default_true")]
    pub restart_on_configuration_change: bool,
}

fn default_retry_delay() -> u64 {
    5
}

fn default_poll_timeout() -> u64 {
    30
}

fn default_poll_idle_delay() -> u64 {
    1000
}

fn default_stream_session_timeout() -> u64 {
    300
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            retry_delay_secs: default_retry_delay(),
            poll_timeout_secs: default_poll_timeout(),
            poll_idle_delay_ms: default_poll_idle_delay(),
            stream_session_timeout_secs: default_stream_session_timeout(),
            restart_on_configuration_change: default_true(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Enable JSON-formatted logs
    #[serde(default)]
    pub json_format: bool,

    /// Log file path (if None, STDOUT only)
    #[serde(default)]
    pub file_path: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json_format: false,
            file_path: None,
        }
    }
}

impl Config {
    /// Load configuration from file with environment and CLI overrides
    ///
    /// A missing file is not an error: defaults are used and a warning is
    /// logged.
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be read or parsed
    pub fn load(path: &str, cli: &crate::cli::Cli) -> Result<Self> {
        let mut config = if Path::new(path).exists() {
            Self::from_file(path)?
        } else {
            tracing::warn!("Config file not found at {}, using defaults", path);
            Self::default()
        };

        config.apply_env_vars();
        config.apply_cli_overrides(cli);

        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| AgentError::Config(format!("Failed to read config file: {}", e)))?;
        serde_yaml::from_str(&contents)
            .map_err(|e| AgentError::Config(format!("Failed to parse config: {}", e)).into())
    }

    fn apply_env_vars(&mut self) {
        if let Ok(endpoint) = std::env::var("EXILE_AGENT_ENDPOINT") {
            tracing::debug!(endpoint = %endpoint, "Env override: EXILE_AGENT_ENDPOINT");
            self.exile.endpoint = Some(endpoint);
        }

        if let Ok(token) = std::env::var("EXILE_AGENT_API_TOKEN") {
            tracing::debug!("Env override: EXILE_AGENT_API_TOKEN");
            self.exile.api_token = Some(token);
        }

        if let Ok(interval) = std::env::var("EXILE_AGENT_WATCH_INTERVAL_SECS") {
            match interval.parse::<u64>() {
                Ok(v) => {
                    self.watcher.interval_secs = v;
                    tracing::debug!(interval_secs = v, "Env override: EXILE_AGENT_WATCH_INTERVAL_SECS");
                }
                Err(_) => {
                    tracing::warn!("Invalid EXILE_AGENT_WATCH_INTERVAL_SECS: {}", interval);
                }
            }
        }

        if let Ok(delay) = std::env::var("EXILE_AGENT_RETRY_DELAY_SECS") {
            match delay.parse::<u64>() {
                Ok(v) => {
                    self.workers.retry_delay_secs = v;
                    tracing::debug!(retry_delay_secs = v, "Env override: EXILE_AGENT_RETRY_DELAY_SECS");
                }
                Err(_) => {
                    tracing::warn!("Invalid EXILE_AGENT_RETRY_DELAY_SECS: {}", delay);
                }
            }
        }

        if let Ok(level) = std::env::var("EXILE_AGENT_LOG_LEVEL") {
            tracing::debug!(level = %level, "Env override: EXILE_AGENT_LOG_LEVEL");
            self.logging.level = level;
        }

        if let Ok(json_logs) = std::env::var("EXILE_AGENT_JSON_LOGS") {
            match json_logs.parse::<bool>() {
                Ok(v) => {
                    self.logging.json_format = v;
                    tracing::debug!(json_logs = v, "Env override: EXILE_AGENT_JSON_LOGS");
                }
                Err(_) => {
                    tracing::warn!("Invalid value for EXILE_AGENT_JSON_LOGS: {}", json_logs);
                }
            }
        }

        if let Ok(log_file) = std::env::var("EXILE_AGENT_LOG_FILE") {
            tracing::debug!(log_file = %log_file, "Env override: EXILE_AGENT_LOG_FILE");
            self.logging.file_path = Some(PathBuf::from(log_file));
        }
    }

    fn apply_cli_overrides(&mut self, cli: &crate::cli::Cli) {
        if cli.verbose {
            self.logging.level = "debug".to_string();
        }
        if let Some(endpoint) = &cli.endpoint {
            self.exile.endpoint = Some(endpoint.clone());
        }
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns error if the endpoint is not a URL or an interval, timeout or
    /// delay is zero
    pub fn validate(&self) -> Result<()> {
        if let Some(endpoint) = &self.exile.endpoint {
            let url = url::Url::parse(endpoint).map_err(|e| {
                AgentError::Config(format!("Invalid exile.endpoint '{}': {}", endpoint, e))
            })?;
            if url.scheme() != "http" && url.scheme() != "https" {
                return Err(AgentError::Config(format!(
                    "exile.endpoint must use http or https, got '{}'",
                    url.scheme()
                ))
                .into());
            }
        }

        let non_zero = [
            ("exile.connect_timeout_secs", self.exile.connect_timeout_secs),
            ("watcher.interval_secs", self.watcher.interval_secs),
            ("watcher.fetch_timeout_secs", self.watcher.fetch_timeout_secs),
            ("workers.retry_delay_secs", self.workers.retry_delay_secs),
            ("workers.poll_timeout_secs", self.workers.poll_timeout_secs),
            ("workers.poll_idle_delay_ms", self.workers.poll_idle_delay_ms),
            (
                "workers.stream_session_timeout_secs",
                self.workers.stream_session_timeout_secs,
            ),
        ];
        for (name, value) in non_zero {
            if value == 0 {
                return Err(AgentError::Config(format!("{} must be greater than 0", name)).into());
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn cli() -> crate::cli::Cli {
        crate::cli::Cli {
            config: None,
            verbose: false,
            endpoint: None,
            command: crate::cli::Commands::Validate,
        }
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.exile.endpoint.is_none());
        assert!(config.watcher.enabled);
        assert_eq!(config.watcher.interval_secs, 60);
        assert_eq!(config.watcher.fetch_timeout_secs, 10);
        assert_eq!(config.workers.retry_delay_secs, 5);
        assert!(config.workers.restart_on_configuration_change);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_config_validation_success() {
        let mut config = Config::default();
        config.exile.endpoint = Some("https://exile.example.com".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation_bad_endpoint() {
        let mut config = Config::default();
        config.exile.endpoint = Some("not a url".to_string());
        assert!(config.validate().is_err());

        config.exile.endpoint = Some("ftp://exile.example.com".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_zero_interval() {
        let mut config = Config::default();
        config.watcher.interval_secs = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("watcher.interval_secs"));
    }

    #[test]
    fn test_config_validation_zero_stream_timeout() {
        let mut config = Config::default();
        config.workers.stream_session_timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_zero_delays() {
        let mut config = Config::default();
        config.workers.retry_delay_secs = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("workers.retry_delay_secs"));

        let mut config = Config::default();
        config.workers.poll_idle_delay_ms = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("workers.poll_idle_delay_ms"));
    }

    #[test]
    fn test_config_from_yaml() {
        let yaml = r#"
exile:
  endpoint: http://localhost:8080
  api_token: abc
watcher:
  interval_secs: 30
workers:
  retry_delay_secs: 2
  restart_on_configuration_change: false
logging:
  level: debug
  json_format: true
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.exile.endpoint.as_deref(), Some("http://localhost:8080"));
        assert_eq!(config.exile.api_token.as_deref(), Some("abc"));
        assert_eq!(config.exile.connect_timeout_secs, 10);
        assert_eq!(config.watcher.interval(), Duration::from_secs(30));
        assert_eq!(config.watcher.fetch_timeout(), Duration::from_secs(10));
        assert_eq!(config.workers.retry_delay_secs, 2);
        assert_eq!(config.workers.poll_idle_delay_ms, 1000);
        assert!(!config.workers.restart_on_configuration_change);
        assert!(config.logging.json_format);
    }

    #[test]
    fn test_empty_yaml_uses_defaults() {
        let config: Config = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config.workers.stream_session_timeout_secs, 300);
        assert_eq!(config.workers.poll_timeout_secs, 30);
    }

    #[test]
    #[serial]
    fn test_load_nonexistent_file_uses_defaults() {
        let config = Config::load("nonexistent.yaml", &cli()).unwrap();
        assert_eq!(config.watcher.interval_secs, 60);
    }

    #[test]
    #[serial]
    fn test_load_reads_file_and_cli_overrides() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("agent.yaml");
        std::fs::write(&path, "exile:\n  endpoint: http://file:8080\n").unwrap();

        let mut cli = cli();
        cli.verbose = true;
        cli.endpoint = Some("http://cli:9090".to_string());

        let config = Config::load(path.to_str().unwrap(), &cli).unwrap();
        assert_eq!(config.exile.endpoint.as_deref(), Some("http://cli:9090"));
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    #[serial]
    fn test_load_invalid_yaml_fails() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("agent.yaml");
        std::fs::write(&path, "watcher: [unclosed").unwrap();

        assert!(Config::load(path.to_str().unwrap(), &cli()).is_err());
    }

    #[test]
    #[serial]
    fn test_apply_env_vars_overrides_fields() {
        std::env::set_var("EXILE_AGENT_ENDPOINT", "http://env:8080");
        std::env::set_var("EXILE_AGENT_WATCH_INTERVAL_SECS", "15");
        std::env::set_var("EXILE_AGENT_RETRY_DELAY_SECS", "not-a-number");
        std::env::set_var("EXILE_AGENT_JSON_LOGS", "true");

        let mut config = Config::default();
        config.apply_env_vars();

        assert_eq!(config.exile.endpoint.as_deref(), Some("http://env:8080"));
        assert_eq!(config.watcher.interval_secs, 15);
        assert_eq!(config.workers.retry_delay_secs, 5);
        assert!(config.logging.json_format);

        std::env::remove_var("EXILE_AGENT_ENDPOINT");
        std::env::remove_var("EXILE_AGENT_WATCH_INTERVAL_SECS");
        std::env::remove_var("EXILE_AGENT_RETRY_DELAY_SECS");
        std::env::remove_var("EXILE_AGENT_JSON_LOGS");
    }
}
