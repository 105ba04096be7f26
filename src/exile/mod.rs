//! Remote Exile API abstraction
//!
//! This module defines the [`ExileClient`] trait that every remote client
//! implementation must satisfy, plus the value types that cross it.
//! Concrete implementations live in submodules:
//!
//! - [`http::HttpExileClient`] -- JSON over HTTP, with the job stream
//!   delivered as Server-Sent Events.
//! - [`fake::FakeExileClient`] -- in-process scripted fake used in tests.
//!
//! # Design
//!
//! The trait is intentionally minimal: one request/response call for the
//! configuration snapshot, one for pending events, and one that opens a
//! lazy stream of jobs. Timeouts are not the client's concern; the watcher
//! and workers bound every call with [`tokio::time::timeout`] so that all
//! implementations share identical timeout behaviour.

pub mod fake;
pub mod http;

use std::pin::Pin;

use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use fake::FakeExileClient;
pub use http::HttpExileClient;

/// A lazy sequence of job results returned by [`ExileClient::stream_jobs`].
///
/// The stream is not restartable: once it yields an error or ends, a new
/// call to `stream_jobs` must be issued.
pub type JobStream = Pin<Box<dyn Stream<Item = Result<Job>> + Send>>;

/// Remote configuration at a point in time.
///
/// Equality is structural over all four fields; any difference counts as
/// a configuration change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigurationSnapshot {
    /// Organization identifier
    pub org_id: String,
    /// Human readable organization name
    pub org_name: String,
    /// Name of the active configuration
    pub config_name: String,
    /// Opaque configuration payload
    pub config_payload: String,
}

/// Opaque event record produced by the remote API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Event(pub serde_json::Value);

/// Job delivered over the job stream.
///
/// `job_id` and `job_type` are used for logging and routing only; the
/// payload is forwarded untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Remote job identifier
    pub job_id: String,
    /// Job type tag
    pub job_type: String,
    /// Opaque job payload
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// Abstraction over the remote Exile API.
///
/// Used polymorphically through `Arc<dyn ExileClient>` by the watcher and
/// the workers.
#[async_trait::async_trait]
pub trait ExileClient: Send + Sync + std::fmt::Debug {
    /// Fetch the current configuration snapshot.
    async fn fetch_configuration(&self) -> Result<ConfigurationSnapshot>;

    /// Fetch pending events. An empty vector means nothing is pending.
    async fn poll_events(&self) -> Result<Vec<Event>>;

    /// Open the server-initiated job stream.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream cannot be opened. Errors that happen
    /// after the stream is open are delivered as stream items.
    async fn stream_jobs(&self) -> Result<JobStream>;
}

/// Report whether `new` differs from the last known snapshot.
///
/// An absent previous snapshot always counts as changed.
///
/// # Examples
///
/// ```
/// use exile_agent::exile::{configuration_changed, ConfigurationSnapshot};
///
/// let snapshot = ConfigurationSnapshot {
///     org_id: "org1".to_string(),
///     org_name: "Org One".to_string(),
///     config_name: "default".to_string(),
///     config_payload: "{}".to_string(),
/// };
///
/// assert!(configuration_changed(None, &snapshot));
/// assert!(!configuration_changed(Some(&snapshot), &snapshot));
/// ```
pub fn configuration_changed(
    previous: Option<&ConfigurationSnapshot>,
    current: &ConfigurationSnapshot,
) -> bool {
    match previous {
        Some(previous) => previous != current,
        None => true,
    }
}
