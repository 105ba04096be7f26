//! Periodic configuration watcher service

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{AgentError, Result};
use crate::exile::{configuration_changed, ConfigurationSnapshot, ExileClient};
use crate::metrics;

/// Default time between configuration checks.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);

/// Default bound on a single configuration fetch.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Callback invoked when the watched configuration changes.
///
/// `previous` is `None` only for watchers using [`FirstSnapshot::Notify`].
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait ConfigChangeHandler: Send + Sync {
    /// React to a configuration change.
    ///
    /// Errors are logged by the watcher; they do not roll back the stored
    /// snapshot and do not stop the watcher.
    async fn on_configuration_changed(
        &self,
        previous: Option<ConfigurationSnapshot>,
        current: ConfigurationSnapshot,
    ) -> Result<()>;
}

/// What a watcher does with the very first snapshot it fetches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FirstSnapshot {
    /// Store it without calling the handler
    #[default]
    Record,
    /// Call the handler with `previous = None`
    Notify,
}

/// Change handler that only logs. Used when nothing else needs to react.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingChangeHandler;

#[async_trait::async_trait]
impl ConfigChangeHandler for LoggingChangeHandler {
    async fn on_configuration_changed(
        &self,
        previous: Option<ConfigurationSnapshot>,
        current: ConfigurationSnapshot,
    ) -> Result<()> {
        info!(
            previous_org_id = previous.as_ref().map(|p| p.org_id.as_str()).unwrap_or("-"),
            org_id = %current.org_id,
            org_name = %current.org_name,
            config_name = %current.config_name,
            "Remote configuration changed"
        );
        Ok(())
    }
}

/// Snapshot state shared between the watcher handle and its task.
#[derive(Default)]
struct WatchState {
    last: RwLock<Option<ConfigurationSnapshot>>,
    last_fetched_at: RwLock<Option<DateTime<Utc>>>,
}

/// Everything the running task needs, cloned out of the watcher on start.
struct WatchLoop {
    name: &'static str,
    client: Arc<dyn ExileClient>,
    handler: Arc<dyn ConfigChangeHandler>,
    interval: Duration,
    fetch_timeout: Duration,
    first_snapshot: FirstSnapshot,
    state: Arc<WatchState>,
}

struct WatchTask {
    stop: CancellationToken,
    handle: JoinHandle<()>,
}

/// Periodic remote configuration watcher.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use exile_agent::exile::FakeExileClient;
/// use exile_agent::watcher::{ConfigWatcher, LoggingChangeHandler};
/// use tokio_util::sync::CancellationToken;
///
/// # #[tokio::main]
/// # async fn main() -> anyhow::Result<()> {
/// let watcher = ConfigWatcher::new(
///     Arc::new(FakeExileClient::new()),
///     Arc::new(LoggingChangeHandler),
/// );
///
/// let root = CancellationToken::new();
/// watcher.start(&root).await?;
/// assert!(watcher.is_watching().await);
///
/// watcher.stop().await?;
/// assert!(!watcher.is_watching().await);
/// # Ok(())
/// # }
/// ```
pub struct ConfigWatcher {
    name: &'static str,
    client: Arc<dyn ExileClient>,
    handler: Arc<dyn ConfigChangeHandler>,
    interval: Duration,
    fetch_timeout: Duration,
    first_snapshot: FirstSnapshot,
    state: Arc<WatchState>,
    task: RwLock<Option<WatchTask>>,
}

impl std::fmt::Debug for ConfigWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigWatcher")
            .field("name", &self.name)
            .field("interval", &self.interval)
            .field("fetch_timeout", &self.fetch_timeout)
            .field("first_snapshot", &self.first_snapshot)
            .finish()
    }
}

impl ConfigWatcher {
    /// Create a watcher with the default interval (60s), fetch timeout
    /// (10s) and [`FirstSnapshot::Record`] policy.
    pub fn new(client: Arc<dyn ExileClient>, handler: Arc<dyn ConfigChangeHandler>) -> Self {
        Self {
            name: "config_watcher",
            client,
            handler,
            interval: DEFAULT_INTERVAL,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            first_snapshot: FirstSnapshot::default(),
            state: Arc::new(WatchState::default()),
            task: RwLock::new(None),
        }
    }

    /// Set the time between checks.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Set the bound on a single fetch.
    pub fn with_fetch_timeout(mut self, fetch_timeout: Duration) -> Self {
        self.fetch_timeout = fetch_timeout;
        self
    }

    /// Set the first-snapshot policy.
    pub fn with_first_snapshot(mut self, policy: FirstSnapshot) -> Self {
        self.first_snapshot = policy;
        self
    }

    /// Set the name used in logs and metric labels.
    pub fn with_name(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }

    /// Name used in logs and metric labels.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Begin the periodic check task.
    ///
    /// Idempotent: if the task is already running a warning is logged and
    /// no second task is spawned. The task exits when `parent` is cancelled
    /// or [`stop`](Self::stop) is called.
    pub async fn start(&self, parent: &CancellationToken) -> Result<()> {
        let mut task = self.task.write().await;

        if let Some(existing) = task.as_ref() {
            if !existing.handle.is_finished() && !existing.stop.is_cancelled() {
                warn!(watcher = self.name, "Configuration watcher already running");
                return Ok(());
            }
        }

        let stop = CancellationToken::new();
        let watch_loop = WatchLoop {
            name: self.name,
            client: Arc::clone(&self.client),
            handler: Arc::clone(&self.handler),
            interval: self.interval,
            fetch_timeout: self.fetch_timeout,
            first_snapshot: self.first_snapshot,
            state: Arc::clone(&self.state),
        };
        let handle = tokio::spawn(watch_loop.run(parent.clone(), stop.clone()));
        *task = Some(WatchTask { stop, handle });

        info!(
            watcher = self.name,
            interval = ?self.interval,
            fetch_timeout = ?self.fetch_timeout,
            "Configuration watcher started"
        );
        Ok(())
    }

    /// Signal the periodic task to exit.
    ///
    /// Idempotent: returns `Ok` when not running. Does not wait for the
    /// task to finish.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::Watcher`] if the task had already died by
    /// panicking.
    pub async fn stop(&self) -> Result<()> {
        let Some(task) = self.task.write().await.take() else {
            debug!(watcher = self.name, "Configuration watcher not running");
            return Ok(());
        };

        if task.handle.is_finished() {
            if let Err(e) = task.handle.await {
                if e.is_panic() {
                    return Err(AgentError::Watcher(format!(
                        "{} task panicked: {}",
                        self.name, e
                    ))
                    .into());
                }
            }
            return Ok(());
        }

        task.stop.cancel();
        info!(watcher = self.name, "Configuration watcher stopped");
        Ok(())
    }

    /// Whether the periodic task is currently running.
    pub async fn is_watching(&self) -> bool {
        self.task
            .read()
            .await
            .as_ref()
            .map_or(false, |t| !t.handle.is_finished() && !t.stop.is_cancelled())
    }

    /// Most recently fetched snapshot, if any.
    pub async fn last_configuration(&self) -> Option<ConfigurationSnapshot> {
        self.state.last.read().await.clone()
    }

    /// Time of the most recent successful fetch, if any.
    pub async fn last_fetched_at(&self) -> Option<DateTime<Utc>> {
        *self.state.last_fetched_at.read().await
    }
}

impl WatchLoop {
    async fn run(self, parent: CancellationToken, stop: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = parent.cancelled() => {
                    debug!(watcher = self.name, "Parent context cancelled");
                    break;
                }
                _ = stop.cancelled() => {
                    debug!(watcher = self.name, "Stop requested");
                    break;
                }
                _ = ticker.tick() => {}
            }

            tokio::select! {
                biased;

                _ = parent.cancelled() => break,
                _ = stop.cancelled() => break,
                _ = self.check_once() => {}
            }
        }

        debug!(watcher = self.name, "Configuration watcher task exited");
    }

    async fn check_once(&self) {
        let current = match tokio::time::timeout(
            self.fetch_timeout,
            self.client.fetch_configuration(),
        )
        .await
        {
            Ok(Ok(snapshot)) => snapshot,
            Ok(Err(e)) => {
                metrics::record_remote_error("fetch_configuration");
                warn!(watcher = self.name, error = %e, "Failed to fetch configuration");
                return;
            }
            Err(_) => {
                metrics::record_remote_error("fetch_configuration");
                warn!(
                    watcher = self.name,
                    timeout = ?self.fetch_timeout,
                    "Timed out fetching configuration"
                );
                return;
            }
        };

        let previous = self.state.last.read().await.clone();
        let changed = configuration_changed(previous.as_ref(), &current);
        let notify =
            changed && (previous.is_some() || self.first_snapshot == FirstSnapshot::Notify);

        if notify {
            metrics::record_configuration_change(self.name);
            info!(
                watcher = self.name,
                org_id = %current.org_id,
                config_name = %current.config_name,
                "Configuration change detected"
            );
            if let Err(e) = self
                .handler
                .on_configuration_changed(previous, current.clone())
                .await
            {
                error!(watcher = self.name, error = %e, "Configuration change handler failed");
            }
        } else if changed {
            info!(
                watcher = self.name,
                org_id = %current.org_id,
                config_name = %current.config_name,
                "Initial configuration recorded"
            );
        } else {
            debug!(watcher = self.name, "Configuration unchanged");
        }

        *self.state.last.write().await = Some(current);
        *self.state.last_fetched_at.write().await = Some(Utc::now());
    }
}
