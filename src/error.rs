//! Error types for the Exile agent
//!
//! This module defines the error types used throughout the agent,
//! using `thiserror` for ergonomic error handling.

use std::time::Duration;

use thiserror::Error;

/// Main error type for agent operations
///
/// Covers configuration loading, remote API calls, the job stream,
/// and watcher/supervisor lifecycle failures.
#[derive(Error, Debug)]
pub enum AgentError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// The remote API returned an error or an unexpected response
    #[error("Remote error: {0}")]
    Remote(String),

    /// The remote API rejected our credentials (401/403)
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// A bounded remote call did not finish in time
    #[error("Timeout after {after:?} while waiting for {operation}")]
    Timeout {
        /// Name of the remote operation that timed out
        operation: &'static str,
        /// The bound that was exceeded
        after: Duration,
    },

    /// The job stream delivered an error item or broke mid-stream
    #[error("Stream error: {0}")]
    Stream(String),

    /// Configuration watcher lifecycle errors
    #[error("Watcher error: {0}")]
    Watcher(String),

    /// The supervisor's parent token was cancelled; no new workers start
    #[error("Supervisor is shut down, cannot start {0}")]
    ShutDown(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Result type alias for agent operations
///
/// Uses `anyhow::Error` so callers can attach context while the
/// underlying [`AgentError`] stays reachable through `downcast_ref`.
pub type Result<T> = anyhow::Result<T>;
