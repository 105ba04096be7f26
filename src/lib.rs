//! Exile agent library
//!
//! This library provides the supervision core of the Exile agent: a remote
//! configuration watcher, a supervisor that owns the agent's long-running
//! workers, and the poll, stream and dispatch workers themselves.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - `exile`: Remote API client trait, HTTP implementation and test fake
//! - `watcher`: Periodic configuration watcher and change detection
//! - `supervisor`: Worker lifecycle and the restart-on-change protocol
//! - `workers`: Event poll, job stream and host-plugin dispatch workers
//! - `config`: Configuration management and validation
//! - `logging` / `metrics`: Tracing subscriber setup and process metrics
//! - `error`: Error types and result aliases
//! - `cli` / `commands`: Command-line interface and its handlers
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use exile_agent::{Config, HttpExileClient, Supervisor, WorkerSettings};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut config = Config::default();
//!     config.exile.endpoint = Some("http://localhost:8080".to_string());
//!     config.validate()?;
//!
//!     let shutdown = CancellationToken::new();
//!     let supervisor = Supervisor::builder()
//!         .with_client(Arc::new(HttpExileClient::from_config(&config.exile)?))
//!         .with_settings(WorkerSettings::from_config(&config))
//!         .with_parent_token(shutdown.clone())
//!         .build();
//!
//!     supervisor.start_all(&shutdown).await?;
//!     tokio::signal::ctrl_c().await?;
//!     supervisor.stop_all_processes().await
//! }
//! ```

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod exile;
pub mod logging;
pub mod metrics;
pub mod supervisor;
pub mod watcher;
pub mod workers;

// Re-export commonly used types
pub use config::Config;
pub use error::{AgentError, Result};
pub use exile::{ConfigurationSnapshot, ExileClient, FakeExileClient, HttpExileClient};
pub use supervisor::{Supervisor, SupervisorEvent, WorkerKind};
pub use watcher::{ConfigChangeHandler, ConfigWatcher, FirstSnapshot};
pub use workers::{DispatchRegistry, PluginSink, WorkerSettings};
