//! Worker supervisor
//!
//! The [`Supervisor`] owns every long-running task of the agent: an optional
//! standalone [`ConfigWatcher`], an internal configuration-poll task that
//! restarts the other workers when the remote configuration changes, and the
//! poll, stream and host-plugin workers.
//!
//! Each worker kind has at most one live entry in the worker map. Presence in
//! the map means "running"; removing an entry cancels its token. Stops are
//! fire-and-forget: the supervisor never joins a worker task.
//!
//! # Restart protocol
//!
//! When the internal configuration task sees a change from a known snapshot:
//!
//! 1. Under the lock, the poll, stream and host-plugin entries are removed and
//!    cancelled, and the dispatch worker is unregistered.
//! 2. After the lock is released, the three workers are started again in that
//!    order. Start failures are logged and published as
//!    [`SupervisorEvent::WorkerStartFailed`]; they do not abort the others.
//!
//! On the very first snapshot the stop phase is skipped.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use exile_agent::exile::FakeExileClient;
//! use exile_agent::supervisor::Supervisor;
//! use tokio_util::sync::CancellationToken;
//!
//! # #[tokio::main]
//! # async fn main() -> anyhow::Result<()> {
//! let supervisor = Supervisor::builder()
//!     .with_client(Arc::new(FakeExileClient::new()))
//!     .build();
//!
//! let shutdown = CancellationToken::new();
//! supervisor.start_all(&shutdown).await?;
//! assert!(supervisor.is_running().await);
//!
//! supervisor.stop_all_processes().await?;
//! assert!(!supervisor.is_running().await);
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{AgentError, Result};
use crate::exile::{ConfigurationSnapshot, ExileClient};
use crate::metrics;
use crate::watcher::{ConfigChangeHandler, ConfigWatcher, FirstSnapshot};
use crate::workers::{
    DispatchRegistry, DispatchWorker, PluginSink, PollWorker, StreamWorker, WorkerSettings,
};

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Kinds of supervised workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum WorkerKind {
    ExileConfiguration,
    PollEvents,
    StreamJobs,
    HostPlugin,
}

impl WorkerKind {
    /// Workers stopped and restarted on a configuration change, in start order.
    pub const RESTARTABLE: [WorkerKind; 3] = [
        WorkerKind::PollEvents,
        WorkerKind::StreamJobs,
        WorkerKind::HostPlugin,
    ];

    /// Every kind, in start order.
    pub const ALL: [WorkerKind; 4] = [
        WorkerKind::ExileConfiguration,
        WorkerKind::PollEvents,
        WorkerKind::StreamJobs,
        WorkerKind::HostPlugin,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerKind::ExileConfiguration => "exile_configuration",
            WorkerKind::PollEvents => "poll_events",
            WorkerKind::StreamJobs => "stream_jobs",
            WorkerKind::HostPlugin => "host_plugin",
        }
    }
}

impl fmt::Display for WorkerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Worker-specific state kept alongside the cancel token.
#[derive(Debug)]
pub enum WorkerState {
    /// The internal configuration-poll watcher
    Configuration(Arc<ConfigWatcher>),
    /// The host-plugin dispatch worker
    Dispatch(Arc<DispatchWorker>),
    /// A plain task with nothing beyond its token
    Task,
}

/// Entry in the worker map.
#[derive(Debug)]
pub struct WorkerHandle {
    pub kind: WorkerKind,
    pub token: CancellationToken,
    pub state: WorkerState,
    pub started_at: DateTime<Utc>,
}

/// Lifecycle notifications published by the supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorEvent {
    WorkerStarted(WorkerKind),
    WorkerStopped(WorkerKind),
    /// A configuration change triggered the restart protocol
    RestartRequested,
    WorkerStartFailed { kind: WorkerKind, error: String },
}

#[derive(Debug, Default)]
struct SupervisorState {
    workers: HashMap<WorkerKind, WorkerHandle>,
    running: bool,
}

/// Builder for [`Supervisor`].
#[derive(Debug, Default)]
pub struct SupervisorBuilder {
    client: Option<Arc<dyn ExileClient>>,
    config_watcher: Option<ConfigWatcher>,
    plugin: Option<Arc<dyn PluginSink>>,
    settings: WorkerSettings,
    parent: Option<CancellationToken>,
}

impl SupervisorBuilder {
    /// Remote client used by the configuration task and the poll/stream
    /// workers. Without one those workers are never started.
    pub fn with_client(mut self, client: Arc<dyn ExileClient>) -> Self {
        self.client = Some(client);
        self
    }

    /// Standalone configuration watcher started by
    /// [`Supervisor::start_config_watcher`].
    pub fn with_config_watcher(mut self, watcher: ConfigWatcher) -> Self {
        self.config_watcher = Some(watcher);
        self
    }

    /// Sink the host-plugin worker forwards to.
    pub fn with_plugin(mut self, plugin: Arc<dyn PluginSink>) -> Self {
        self.plugin = Some(plugin);
        self
    }

    pub fn with_settings(mut self, settings: WorkerSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Derive the supervisor's root token from `parent`.
    pub fn with_parent_token(mut self, parent: CancellationToken) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn build(self) -> Arc<Supervisor> {
        let root = match self.parent {
            Some(parent) => parent.child_token(),
            None => CancellationToken::new(),
        };
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Arc::new_cyclic(|weak| Supervisor {
            client: self.client,
            config_watcher: self.config_watcher.map(Arc::new),
            plugin: self.plugin,
            settings: self.settings,
            registry: DispatchRegistry::new(),
            root,
            state: Mutex::new(SupervisorState::default()),
            events,
            self_ref: weak.clone(),
        })
    }
}

/// Owner and lifecycle manager of every agent worker.
#[derive(Debug)]
pub struct Supervisor {
    client: Option<Arc<dyn ExileClient>>,
    config_watcher: Option<Arc<ConfigWatcher>>,
    plugin: Option<Arc<dyn PluginSink>>,
    settings: WorkerSettings,
    registry: DispatchRegistry,
    root: CancellationToken,
    state: Mutex<SupervisorState>,
    events: broadcast::Sender<SupervisorEvent>,
    self_ref: Weak<Supervisor>,
}

impl Supervisor {
    pub fn builder() -> SupervisorBuilder {
        SupervisorBuilder::default()
    }

    /// Start the standalone configuration watcher, if one is attached.
    pub async fn start_config_watcher(&self, parent: &CancellationToken) -> Result<()> {
        match &self.config_watcher {
            Some(watcher) => watcher.start(parent).await,
            None => {
                debug!("No configuration watcher attached");
                Ok(())
            }
        }
    }

    /// Start the internal configuration-poll task that drives restarts.
    pub async fn start_exile_client_configuration(&self) -> Result<()> {
        self.start_worker(WorkerKind::ExileConfiguration, None).await
    }

    /// Start the event poll worker. A no-op without a remote client.
    pub async fn start_poll_events(&self) -> Result<()> {
        self.start_worker(WorkerKind::PollEvents, None).await
    }

    /// Start the job stream worker. A no-op without a remote client.
    pub async fn start_stream_jobs(&self) -> Result<()> {
        self.start_worker(WorkerKind::StreamJobs, None).await
    }

    /// Start the host-plugin dispatch worker and register it.
    pub async fn start_host_plugin(&self) -> Result<()> {
        self.start_worker(WorkerKind::HostPlugin, None).await
    }

    /// Start everything in order and mark the supervisor running.
    ///
    /// # Errors
    ///
    /// Returns the first start error. Workers started before it keep
    /// running; call [`stop_all_processes`](Self::stop_all_processes) to
    /// clean up.
    pub async fn start_all(&self, parent: &CancellationToken) -> Result<()> {
        self.start_config_watcher(parent).await?;
        self.start_exile_client_configuration().await?;
        self.start_poll_events().await?;
        self.start_stream_jobs().await?;
        self.start_host_plugin().await?;

        self.state.lock().await.running = true;
        info!("Supervisor started");
        Ok(())
    }

    /// Stop every worker and the standalone watcher.
    ///
    /// Every stop is attempted even if the watcher fails to stop.
    ///
    /// # Errors
    ///
    /// Returns the standalone watcher's stop error, if any.
    pub async fn stop_all_processes(&self) -> Result<()> {
        let watcher_result = match &self.config_watcher {
            Some(watcher) => watcher.stop().await,
            None => Ok(()),
        };
        if let Err(e) = &watcher_result {
            error!(error = %e, "Failed to stop configuration watcher");
        }

        {
            let mut state = self.state.lock().await;
            for kind in WorkerKind::ALL {
                if let Some(handle) = state.workers.remove(&kind) {
                    self.stop_handle(handle).await;
                }
            }
            state.running = false;
        }
        self.registry.unregister().await;

        info!("Supervisor stopped");
        watcher_result
    }

    /// Whether [`start_all`](Self::start_all) has completed and no stop has
    /// happened since. Individual `start_*` calls do not set this, and a
    /// cancelled parent token clears it.
    pub async fn is_running(&self) -> bool {
        self.state.lock().await.running && !self.root.is_cancelled()
    }

    /// Kinds whose handles are present and not yet cancelled, in start order.
    pub async fn active_workers(&self) -> Vec<WorkerKind> {
        let state = self.state.lock().await;
        let mut kinds: Vec<WorkerKind> = state
            .workers
            .values()
            .filter(|handle| !handle.token.is_cancelled())
            .map(|handle| handle.kind)
            .collect();
        kinds.sort();
        kinds
    }

    /// Subscribe to lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<SupervisorEvent> {
        self.events.subscribe()
    }

    /// Shared handle through which workers reach the dispatch worker.
    pub fn dispatch_registry(&self) -> DispatchRegistry {
        self.registry.clone()
    }

    fn publish(&self, event: SupervisorEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Start one worker kind if it is not already running.
    ///
    /// Fails with [`AgentError::ShutDown`] once the parent token has been
    /// cancelled.
    ///
    /// `guard` is the token of the configuration task performing a restart.
    /// Once it is cancelled the start is skipped, so a restart racing with
    /// [`stop_all_processes`](Self::stop_all_processes) cannot leave workers
    /// behind.
    async fn start_worker(&self, kind: WorkerKind, guard: Option<&CancellationToken>) -> Result<()> {
        let mut state = self.state.lock().await;

        if guard.map_or(false, CancellationToken::is_cancelled) {
            debug!(worker = %kind, "Configuration task stopped, skipping start");
            return Ok(());
        }
        if self.root.is_cancelled() {
            return Err(AgentError::ShutDown(kind.to_string()).into());
        }
        if state.workers.contains_key(&kind) {
            debug!(worker = %kind, "Worker already running");
            return Ok(());
        }

        let token = self.root.child_token();
        let worker_state = match kind {
            WorkerKind::ExileConfiguration => {
                let Some(client) = &self.client else {
                    debug!(worker = %kind, "No remote client, not starting");
                    return Ok(());
                };
                if !self.settings.restart_on_configuration_change {
                    info!(worker = %kind, "Restart on configuration change disabled");
                    return Ok(());
                }

                let handler = RestartHandler {
                    supervisor: self.self_ref.clone(),
                    guard: token.clone(),
                };
                let watcher = ConfigWatcher::new(Arc::clone(client), Arc::new(handler))
                    .with_name("exile_configuration")
                    .with_interval(self.settings.configuration_interval)
                    .with_fetch_timeout(self.settings.configuration_fetch_timeout)
                    .with_first_snapshot(FirstSnapshot::Notify);
                watcher.start(&token).await?;
                WorkerState::Configuration(Arc::new(watcher))
            }
            WorkerKind::PollEvents => {
                let Some(client) = &self.client else {
                    debug!(worker = %kind, "No remote client, not starting");
                    return Ok(());
                };
                let worker =
                    PollWorker::new(Arc::clone(client), self.registry.clone(), self.settings.clone());
                tokio::spawn(worker.run(token.clone()));
                WorkerState::Task
            }
            WorkerKind::StreamJobs => {
                let Some(client) = &self.client else {
                    debug!(worker = %kind, "No remote client, not starting");
                    return Ok(());
                };
                let worker = StreamWorker::new(
                    Arc::clone(client),
                    self.registry.clone(),
                    self.settings.clone(),
                );
                tokio::spawn(worker.run(token.clone()));
                WorkerState::Task
            }
            WorkerKind::HostPlugin => {
                let worker = Arc::new(DispatchWorker::new(self.plugin.clone()));
                self.registry.register(Arc::clone(&worker)).await;

                let running = Arc::clone(&worker);
                let run_token = token.clone();
                tokio::spawn(async move { running.run(run_token).await });
                WorkerState::Dispatch(worker)
            }
        };

        state.workers.insert(
            kind,
            WorkerHandle {
                kind,
                token,
                state: worker_state,
                started_at: Utc::now(),
            },
        );
        drop(state);

        metrics::record_worker_started(kind);
        info!(worker = %kind, "Worker started");
        self.publish(SupervisorEvent::WorkerStarted(kind));
        Ok(())
    }

    /// Cancel a removed handle. Caller holds the state lock.
    async fn stop_handle(&self, handle: WorkerHandle) {
        handle.token.cancel();
        match &handle.state {
            WorkerState::Configuration(watcher) => {
                if let Err(e) = watcher.stop().await {
                    warn!(worker = %handle.kind, error = %e, "Configuration task ended abnormally");
                }
            }
            WorkerState::Dispatch(worker) => {
                worker.stop();
                self.registry.unregister_if(worker).await;
            }
            WorkerState::Task => {}
        }

        metrics::record_worker_stopped(handle.kind);
        info!(worker = %handle.kind, "Worker stopped");
        self.publish(SupervisorEvent::WorkerStopped(handle.kind));
    }

    async fn restart_workers(&self, stop_first: bool, guard: &CancellationToken) {
        self.publish(SupervisorEvent::RestartRequested);

        if stop_first {
            let mut state = self.state.lock().await;
            for kind in WorkerKind::RESTARTABLE {
                if let Some(handle) = state.workers.remove(&kind) {
                    self.stop_handle(handle).await;
                }
            }
        }

        for kind in WorkerKind::RESTARTABLE {
            if let Err(e) = self.start_worker(kind, Some(guard)).await {
                error!(worker = %kind, error = %e, "Failed to restart worker");
                self.publish(SupervisorEvent::WorkerStartFailed {
                    kind,
                    error: e.to_string(),
                });
            }
        }
    }
}

/// Change handler of the internal configuration task.
struct RestartHandler {
    supervisor: Weak<Supervisor>,
    guard: CancellationToken,
}

#[async_trait::async_trait]
impl ConfigChangeHandler for RestartHandler {
    async fn on_configuration_changed(
        &self,
        previous: Option<ConfigurationSnapshot>,
        current: ConfigurationSnapshot,
    ) -> Result<()> {
        let Some(supervisor) = self.supervisor.upgrade() else {
            debug!("Supervisor dropped, ignoring configuration change");
            return Ok(());
        };

        match &previous {
            Some(previous) => info!(
                previous_org_id = %previous.org_id,
                org_id = %current.org_id,
                config_name = %current.config_name,
                "Remote configuration changed, restarting workers"
            ),
            None => info!(
                org_id = %current.org_id,
                config_name = %current.config_name,
                "Initial remote configuration received, starting workers"
            ),
        }

        supervisor
            .restart_workers(previous.is_some(), &self.guard)
            .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exile::FakeExileClient;
    use std::time::Duration;
    use tokio::sync::broadcast::error::TryRecvError;

    fn snapshot(org: &str) -> ConfigurationSnapshot {
        ConfigurationSnapshot {
            org_id: org.to_string(),
            org_name: format!("{} name", org),
            config_name: "default".to_string(),
            config_payload: "{}".to_string(),
        }
    }

    fn drain(events: &mut broadcast::Receiver<SupervisorEvent>) -> Vec<SupervisorEvent> {
        let mut out = Vec::new();
        loop {
            match events.try_recv() {
                Ok(event) => out.push(event),
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return out,
                Err(TryRecvError::Lagged(_)) => continue,
            }
        }
    }

    #[test]
    fn test_worker_kind_display() {
        assert_eq!(WorkerKind::ExileConfiguration.to_string(), "exile_configuration");
        assert_eq!(WorkerKind::PollEvents.to_string(), "poll_events");
        assert_eq!(WorkerKind::StreamJobs.to_string(), "stream_jobs");
        assert_eq!(WorkerKind::HostPlugin.to_string(), "host_plugin");
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_is_idempotent() {
        let client = Arc::new(FakeExileClient::new());
        let supervisor = Supervisor::builder().with_client(client.clone()).build();
        let mut events = supervisor.subscribe();

        supervisor.start_poll_events().await.unwrap();
        supervisor.start_poll_events().await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(supervisor.active_workers().await, vec![WorkerKind::PollEvents]);
        assert_eq!(client.event_polls(), 1);
        assert_eq!(
            drain(&mut events),
            vec![SupervisorEvent::WorkerStarted(WorkerKind::PollEvents)]
        );
        // Individual starts leave the running flag alone.
        assert!(!supervisor.is_running().await);

        supervisor.stop_all_processes().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_all_clears_every_worker() {
        let client = Arc::new(FakeExileClient::new());
        client.push_configuration(snapshot("org1"));
        let supervisor = Supervisor::builder().with_client(client.clone()).build();
        let shutdown = CancellationToken::new();

        supervisor.start_all(&shutdown).await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(supervisor.is_running().await);
        assert_eq!(supervisor.active_workers().await, WorkerKind::ALL.to_vec());
        assert!(supervisor.dispatch_registry().is_registered().await);

        supervisor.stop_all_processes().await.unwrap();
        assert!(!supervisor.is_running().await);
        assert!(supervisor.active_workers().await.is_empty());
        assert!(!supervisor.dispatch_registry().is_registered().await);

        // A cancelled configuration task must not bring workers back.
        client.push_configuration(snapshot("org2"));
        tokio::time::sleep(Duration::from_secs(180)).await;
        assert!(supervisor.active_workers().await.is_empty());
        assert_eq!(client.configuration_fetches(), 1);
    }

    #[tokio::test]
    async fn test_stop_all_when_nothing_started() {
        let supervisor = Supervisor::builder().build();
        assert!(supervisor.stop_all_processes().await.is_ok());
        assert!(supervisor.stop_all_processes().await.is_ok());
        assert!(!supervisor.is_running().await);
    }

    #[tokio::test]
    async fn test_remote_workers_need_a_client() {
        let supervisor = Supervisor::builder().build();

        supervisor.start_exile_client_configuration().await.unwrap();
        supervisor.start_poll_events().await.unwrap();
        supervisor.start_stream_jobs().await.unwrap();
        assert!(supervisor.active_workers().await.is_empty());

        supervisor.start_host_plugin().await.unwrap();
        assert_eq!(supervisor.active_workers().await, vec![WorkerKind::HostPlugin]);
        assert!(supervisor.dispatch_registry().is_registered().await);

        supervisor.stop_all_processes().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_snapshot_starts_workers_without_stopping() {
        let client = Arc::new(FakeExileClient::new());
        client.push_configuration(snapshot("org1"));
        let supervisor = Supervisor::builder().with_client(client.clone()).build();
        let mut events = supervisor.subscribe();

        supervisor.start_exile_client_configuration().await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(supervisor.active_workers().await, WorkerKind::ALL.to_vec());
        let seen = drain(&mut events);
        assert!(!seen
            .iter()
            .any(|e| matches!(e, SupervisorEvent::WorkerStopped(_))));
        assert!(seen.contains(&SupervisorEvent::RestartRequested));
        assert!(!supervisor.is_running().await);

        supervisor.stop_all_processes().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_stops_all_before_starting_any() {
        let client = Arc::new(FakeExileClient::new());
        client.push_configuration(snapshot("org1"));
        client.push_configuration(snapshot("org2"));
        let settings = WorkerSettings {
            poll_timeout: Duration::from_secs(3600),
            ..WorkerSettings::default()
        };
        let supervisor = Supervisor::builder()
            .with_client(client.clone())
            .with_settings(settings)
            .build();
        let shutdown = CancellationToken::new();

        supervisor.start_all(&shutdown).await.unwrap();
        let mut events = supervisor.subscribe();
        tokio::time::sleep(Duration::from_secs(1)).await;
        drain(&mut events);

        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(
            drain(&mut events),
            vec![
                SupervisorEvent::RestartRequested,
                SupervisorEvent::WorkerStopped(WorkerKind::PollEvents),
                SupervisorEvent::WorkerStopped(WorkerKind::StreamJobs),
                SupervisorEvent::WorkerStopped(WorkerKind::HostPlugin),
                SupervisorEvent::WorkerStarted(WorkerKind::PollEvents),
                SupervisorEvent::WorkerStarted(WorkerKind::StreamJobs),
                SupervisorEvent::WorkerStarted(WorkerKind::HostPlugin),
            ]
        );
        assert_eq!(supervisor.active_workers().await, WorkerKind::ALL.to_vec());
        assert!(supervisor.dispatch_registry().is_registered().await);
        // The poll worker was replaced, so polling began again.
        assert_eq!(client.event_polls(), 2);

        supervisor.stop_all_processes().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_unchanged_configuration_does_not_restart() {
        let client = Arc::new(FakeExileClient::new());
        client.push_configuration(snapshot("org1"));
        let supervisor = Supervisor::builder().with_client(client.clone()).build();

        supervisor.start_all(&CancellationToken::new()).await.unwrap();
        let mut events = supervisor.subscribe();
        tokio::time::sleep(Duration::from_secs(1)).await;
        drain(&mut events);

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(drain(&mut events).is_empty());
        assert_eq!(client.configuration_fetches(), 3);

        supervisor.stop_all_processes().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_disabled_skips_configuration_task() {
        let client = Arc::new(FakeExileClient::new());
        let settings = WorkerSettings {
            restart_on_configuration_change: false,
            ..WorkerSettings::default()
        };
        let supervisor = Supervisor::builder()
            .with_client(client.clone())
            .with_settings(settings)
            .build();

        supervisor.start_all(&CancellationToken::new()).await.unwrap();
        assert_eq!(
            supervisor.active_workers().await,
            WorkerKind::RESTARTABLE.to_vec()
        );
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(client.configuration_fetches(), 0);

        supervisor.stop_all_processes().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_watcher_stop_error_is_returned_after_workers_stop() {
        struct PanickingHandler;

        #[async_trait::async_trait]
        impl ConfigChangeHandler for PanickingHandler {
            async fn on_configuration_changed(
                &self,
                _previous: Option<ConfigurationSnapshot>,
                _current: ConfigurationSnapshot,
            ) -> Result<()> {
                panic!("handler blew up");
            }
        }

        let client = Arc::new(FakeExileClient::new());
        client.push_configuration(snapshot("org1"));
        let watcher = ConfigWatcher::new(client.clone(), Arc::new(PanickingHandler))
            .with_first_snapshot(FirstSnapshot::Notify);
        let supervisor = Supervisor::builder()
            .with_config_watcher(watcher)
            .build();

        supervisor
            .start_config_watcher(&CancellationToken::new())
            .await
            .unwrap();
        supervisor.start_host_plugin().await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;

        let result = supervisor.stop_all_processes().await;
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("panicked"));
        assert!(supervisor.active_workers().await.is_empty());
        assert!(!supervisor.dispatch_registry().is_registered().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_parent_token_cancels_workers() {
        let client = Arc::new(FakeExileClient::new());
        let shutdown = CancellationToken::new();
        let supervisor = Supervisor::builder()
            .with_client(client.clone())
            .with_parent_token(shutdown.clone())
            .build();

        supervisor.start_poll_events().await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        shutdown.cancel();

        {
            let state = supervisor.state.lock().await;
            let handle = state.workers.get(&WorkerKind::PollEvents).unwrap();
            assert!(handle.token.is_cancelled());
        }
        assert!(supervisor.active_workers().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_starts_refused_after_parent_cancelled() {
        let client = Arc::new(FakeExileClient::new());
        client.push_configuration(snapshot("org1"));
        let shutdown = CancellationToken::new();
        let supervisor = Supervisor::builder()
            .with_client(client.clone())
            .with_parent_token(shutdown.clone())
            .build();

        supervisor.start_all(&CancellationToken::new()).await.unwrap();
        assert!(supervisor.is_running().await);
        shutdown.cancel();
        assert!(!supervisor.is_running().await);

        supervisor.stop_all_processes().await.unwrap();
        let err = supervisor.start_poll_events().await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<AgentError>(),
            Some(AgentError::ShutDown(_))
        ));
        assert!(supervisor.start_all(&CancellationToken::new()).await.is_err());
        assert!(!supervisor.is_running().await);
        assert!(supervisor.active_workers().await.is_empty());
    }
}
