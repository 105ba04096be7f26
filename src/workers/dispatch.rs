//! Host-plugin dispatch worker
//!
//! The dispatch worker is the addressable sink that poll and stream workers
//! forward to. It hands events and jobs to an optional [`PluginSink`]; with
//! no sink attached dispatch is a logged no-op.
//!
//! Workers never hold a dispatch worker directly. They go through the
//! [`DispatchRegistry`], so a restart can swap the worker out from under
//! them without restarting the producers first.

use std::sync::Arc;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::exile::{Event, Job};
use crate::metrics;

/// Consumer of dispatched events and jobs.
pub trait PluginSink: Send + Sync + std::fmt::Debug {
    /// Handle one batch of events.
    fn dispatch_events(&self, events: &[Event]) -> Result<()>;

    /// Handle one job.
    fn dispatch_job(&self, job: &Job) -> Result<()>;
}

/// Sink that logs everything it receives.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingPlugin;

impl PluginSink for LoggingPlugin {
    fn dispatch_events(&self, events: &[Event]) -> Result<()> {
        info!(count = events.len(), "Received event batch");
        for event in events {
            debug!(event = %event.0, "Event");
        }
        Ok(())
    }

    fn dispatch_job(&self, job: &Job) -> Result<()> {
        info!(job_id = %job.job_id, job_type = %job.job_type, "Received job");
        Ok(())
    }
}

/// The host-plugin worker.
#[derive(Debug)]
pub struct DispatchWorker {
    sink: Option<Arc<dyn PluginSink>>,
    token: CancellationToken,
}

impl DispatchWorker {
    /// Create a worker forwarding to `sink`.
    pub fn new(sink: Option<Arc<dyn PluginSink>>) -> Self {
        Self {
            sink,
            token: CancellationToken::new(),
        }
    }

    /// Forward an event batch to the sink.
    pub fn dispatch_events(&self, events: Vec<Event>) {
        debug!(count = events.len(), "Dispatching events");
        metrics::record_dispatched_events(events.len());

        if let Some(sink) = &self.sink {
            if let Err(e) = sink.dispatch_events(&events) {
                warn!(error = %e, "Plugin rejected event batch");
            }
        }
    }

    /// Forward a job to the sink.
    pub fn dispatch_job(&self, job: Job) {
        debug!(job_id = %job.job_id, "Dispatching job");
        metrics::record_dispatched_job();

        if let Some(sink) = &self.sink {
            if let Err(e) = sink.dispatch_job(&job) {
                warn!(job_id = %job.job_id, error = %e, "Plugin rejected job");
            }
        }
    }

    /// Run until `parent` is cancelled or [`stop`](Self::stop) is called.
    pub async fn run(&self, parent: CancellationToken) {
        tokio::select! {
            _ = parent.cancelled() => {}
            _ = self.token.cancelled() => {}
        }
        debug!("Dispatch worker exited");
    }

    /// Signal [`run`](Self::run) to return. Idempotent.
    pub fn stop(&self) {
        self.token.cancel();
    }

    /// Whether [`stop`](Self::stop) has been called.
    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Shared slot holding the current dispatch worker.
#[derive(Debug, Clone, Default)]
pub struct DispatchRegistry {
    current: Arc<RwLock<Option<Arc<DispatchWorker>>>>,
}

impl DispatchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `worker` the dispatch target, replacing any previous one.
    pub async fn register(&self, worker: Arc<DispatchWorker>) {
        *self.current.write().await = Some(worker);
    }

    /// Clear the slot if it still holds `worker`.
    ///
    /// Returns whether the slot was cleared.
    pub async fn unregister_if(&self, worker: &Arc<DispatchWorker>) -> bool {
        let mut current = self.current.write().await;
        match current.as_ref() {
            Some(registered) if Arc::ptr_eq(registered, worker) => {
                *current = None;
                true
            }
            _ => false,
        }
    }

    /// Clear the slot unconditionally.
    pub async fn unregister(&self) {
        *self.current.write().await = None;
    }

    pub async fn is_registered(&self) -> bool {
        self.current.read().await.is_some()
    }

    async fn worker(&self) -> Option<Arc<DispatchWorker>> {
        self.current.read().await.clone()
    }

    /// Forward events to the registered worker.
    ///
    /// Returns `false` (and drops the batch) when none is registered.
    pub async fn dispatch_events(&self, events: Vec<Event>) -> bool {
        match self.worker().await {
            Some(worker) => {
                worker.dispatch_events(events);
                true
            }
            None => {
                debug!(count = events.len(), "No dispatch worker registered, dropping events");
                false
            }
        }
    }

    /// Forward a job to the registered worker.
    ///
    /// Returns `false` (and drops the job) when none is registered.
    pub async fn dispatch_job(&self, job: Job) -> bool {
        match self.worker().await {
            Some(worker) => {
                worker.dispatch_job(job);
                true
            }
            None => {
                debug!(job_id = %job.job_id, "No dispatch worker registered, dropping job");
                false
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Sink that records everything it receives.
    #[derive(Debug, Default)]
    pub(crate) struct RecordingSink {
        pub(crate) batches: Mutex<Vec<Vec<Event>>>,
        pub(crate) jobs: Mutex<Vec<Job>>,
        pub(crate) batch_times: Mutex<Vec<tokio::time::Instant>>,
    }

    impl PluginSink for RecordingSink {
        fn dispatch_events(&self, events: &[Event]) -> Result<()> {
            self.batches.lock().unwrap().push(events.to_vec());
            self.batch_times
                .lock()
                .unwrap()
                .push(tokio::time::Instant::now());
            Ok(())
        }

        fn dispatch_job(&self, job: &Job) -> Result<()> {
            self.jobs.lock().unwrap().push(job.clone());
            Ok(())
        }
    }

    fn job(id: &str) -> Job {
        Job {
            job_id: id.to_string(),
            job_type: "test".to_string(),
            payload: serde_json::Value::Null,
        }
    }

    #[tokio::test]
    async fn test_dispatch_without_sink_is_noop() {
        let worker = DispatchWorker::new(None);
        worker.dispatch_events(vec![Event(serde_json::json!({}))]);
        worker.dispatch_job(job("j1"));
    }

    #[tokio::test]
    async fn test_registry_forwards_to_sink() {
        let sink = Arc::new(RecordingSink::default());
        let registry = DispatchRegistry::new();
        registry
            .register(Arc::new(DispatchWorker::new(Some(sink.clone()))))
            .await;

        assert!(
            registry
                .dispatch_events(vec![Event(serde_json::json!({"id": 1}))])
                .await
        );
        assert!(registry.dispatch_job(job("j1")).await);

        assert_eq!(sink.batches.lock().unwrap().len(), 1);
        assert_eq!(sink.jobs.lock().unwrap()[0].job_id, "j1");
    }

    #[tokio::test]
    async fn test_registry_without_worker_drops() {
        let registry = DispatchRegistry::new();
        assert!(!registry.is_registered().await);
        assert!(!registry.dispatch_job(job("j1")).await);
        assert!(!registry.dispatch_events(Vec::new()).await);
    }

    #[tokio::test]
    async fn test_unregister_if_ignores_stale_worker() {
        let registry = DispatchRegistry::new();
        let old = Arc::new(DispatchWorker::new(None));
        let new = Arc::new(DispatchWorker::new(None));

        registry.register(old.clone()).await;
        registry.register(new.clone()).await;

        assert!(!registry.unregister_if(&old).await);
        assert!(registry.is_registered().await);
        assert!(registry.unregister_if(&new).await);
        assert!(!registry.is_registered().await);
    }

    #[tokio::test]
    async fn test_plugin_error_does_not_propagate() {
        #[derive(Debug)]
        struct FailingSink;

        impl PluginSink for FailingSink {
            fn dispatch_events(&self, _events: &[Event]) -> Result<()> {
                Err(anyhow::anyhow!("plugin down"))
            }
            fn dispatch_job(&self, _job: &Job) -> Result<()> {
                Err(anyhow::anyhow!("plugin down"))
            }
        }

        let worker = DispatchWorker::new(Some(Arc::new(FailingSink)));
        worker.dispatch_events(vec![Event(serde_json::json!(1))]);
        worker.dispatch_job(job("j1"));
    }

    #[tokio::test]
    async fn test_run_returns_on_stop_or_parent_cancel() {
        let worker = Arc::new(DispatchWorker::new(None));
        let parent = CancellationToken::new();

        let running = {
            let worker = worker.clone();
            let parent = parent.clone();
            tokio::spawn(async move { worker.run(parent).await })
        };
        worker.stop();
        worker.stop();
        tokio::time::timeout(Duration::from_secs(1), running)
            .await
            .unwrap()
            .unwrap();
        assert!(worker.is_stopped());

        let other = DispatchWorker::new(None);
        parent.cancel();
        tokio::time::timeout(Duration::from_secs(1), other.run(parent))
            .await
            .unwrap();
    }

    #[test]
    fn test_logging_plugin_accepts_everything() {
        let plugin = LoggingPlugin;
        assert!(plugin.dispatch_events(&[Event(serde_json::json!({}))]).is_ok());
        assert!(plugin.dispatch_job(&job("j1")).is_ok());
    }
}
