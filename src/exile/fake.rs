//! In-process scripted fake of the Exile API
//!
//! This module provides [`FakeExileClient`], which replaces real network
//! I/O in unit and integration tests.
//!
//! # Usage
//!
//! Script the responses up front (or while the code under test runs), wire
//! the client into a watcher or supervisor as `Arc<dyn ExileClient>`, then
//! inspect the call counters.
//!
//! Exhaustion rules keep long-running loops quiet once the script is used up:
//!
//! - configurations: the last successful snapshot is returned again;
//! - event batches: `poll_events` never completes;
//! - job sessions: `stream_jobs` returns a stream that never yields.
//!
//! # Example
//!
//! ```
//! use exile_agent::exile::{ConfigurationSnapshot, ExileClient, FakeExileClient};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let client = FakeExileClient::new();
//! client.push_configuration(ConfigurationSnapshot {
//!     org_id: "org1".to_string(),
//!     org_name: "Org One".to_string(),
//!     config_name: "default".to_string(),
//!     config_payload: String::new(),
//! });
//!
//! let first = client.fetch_configuration().await.unwrap();
//! let again = client.fetch_configuration().await.unwrap();
//! assert_eq!(first, again);
//! assert_eq!(client.configuration_fetches(), 2);
//! # }
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use futures::stream;

use crate::error::{AgentError, Result};
use crate::exile::{ConfigurationSnapshot, Event, ExileClient, Job, JobStream};

/// One scripted call to [`ExileClient::stream_jobs`].
#[derive(Debug, Clone)]
pub enum FakeJobSession {
    /// Opening the stream fails with the given message
    OpenError(String),
    /// The stream yields these items, then ends
    Items(Vec<std::result::Result<Job, String>>),
}

/// Scripted in-memory [`ExileClient`].
#[derive(Debug, Default)]
pub struct FakeExileClient {
    configurations: Mutex<VecDeque<std::result::Result<ConfigurationSnapshot, String>>>,
    last_configuration: Mutex<Option<ConfigurationSnapshot>>,
    event_batches: Mutex<VecDeque<std::result::Result<Vec<Event>, String>>>,
    job_sessions: Mutex<VecDeque<FakeJobSession>>,
    configuration_fetches: AtomicUsize,
    event_polls: AtomicUsize,
    stream_opens: AtomicUsize,
}

/// Lock a mutex, recovering the data if a panicking test poisoned it.
fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl FakeExileClient {
    /// Create a fake with nothing scripted.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful configuration fetch.
    pub fn push_configuration(&self, snapshot: ConfigurationSnapshot) {
        locked(&self.configurations).push_back(Ok(snapshot));
    }

    /// Queue a failing configuration fetch.
    pub fn push_configuration_error(&self, message: impl Into<String>) {
        locked(&self.configurations).push_back(Err(message.into()));
    }

    /// Queue a successful event poll.
    pub fn push_events(&self, events: Vec<Event>) {
        locked(&self.event_batches).push_back(Ok(events));
    }

    /// Queue a failing event poll.
    pub fn push_events_error(&self, message: impl Into<String>) {
        locked(&self.event_batches).push_back(Err(message.into()));
    }

    /// Queue a job stream session.
    pub fn push_job_session(&self, session: FakeJobSession) {
        locked(&self.job_sessions).push_back(session);
    }

    /// Number of `fetch_configuration` calls so far.
    pub fn configuration_fetches(&self) -> usize {
        self.configuration_fetches.load(Ordering::SeqCst)
    }

    /// Number of `poll_events` calls so far.
    pub fn event_polls(&self) -> usize {
        self.event_polls.load(Ordering::SeqCst)
    }

    /// Number of `stream_jobs` calls so far.
    pub fn stream_opens(&self) -> usize {
        self.stream_opens.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ExileClient for FakeExileClient {
    async fn fetch_configuration(&self) -> Result<ConfigurationSnapshot> {
        self.configuration_fetches.fetch_add(1, Ordering::SeqCst);

        let next = locked(&self.configurations).pop_front();
        match next {
            Some(Ok(snapshot)) => {
                *locked(&self.last_configuration) = Some(snapshot.clone());
                Ok(snapshot)
            }
            Some(Err(message)) => Err(AgentError::Remote(message).into()),
            None => locked(&self.last_configuration)
                .clone()
                .ok_or_else(|| {
                    anyhow::Error::from(AgentError::Remote(
                        "no configuration scripted".to_string(),
                    ))
                }),
        }
    }

    async fn poll_events(&self) -> Result<Vec<Event>> {
        self.event_polls.fetch_add(1, Ordering::SeqCst);

        let next = locked(&self.event_batches).pop_front();
        match next {
            Some(Ok(events)) => Ok(events),
            Some(Err(message)) => Err(AgentError::Remote(message).into()),
            None => std::future::pending().await,
        }
    }

    async fn stream_jobs(&self) -> Result<JobStream> {
        self.stream_opens.fetch_add(1, Ordering::SeqCst);

        let next = locked(&self.job_sessions).pop_front();
        match next {
            Some(FakeJobSession::OpenError(message)) => Err(AgentError::Remote(message).into()),
            Some(FakeJobSession::Items(items)) => {
                let items = items
                    .into_iter()
                    .map(|item| item.map_err(|message| anyhow::Error::from(AgentError::Stream(message))));
                Ok(Box::pin(stream::iter(items)))
            }
            None => Ok(Box::pin(stream::pending())),
        }
    }
}
