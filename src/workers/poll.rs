//! Event poll worker

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::exile::ExileClient;
use crate::metrics;
use crate::workers::{DispatchRegistry, WorkerSettings};

/// Repeatedly polls the remote API for pending events.
///
/// Non-empty batches go to the [`DispatchRegistry`]. An empty batch waits
/// `poll_idle_delay` before the next poll; a failed or timed-out poll waits
/// `retry_delay`. Cancellation is observed during every wait.
#[derive(Debug)]
pub struct PollWorker {
    client: Arc<dyn ExileClient>,
    registry: DispatchRegistry,
    settings: WorkerSettings,
}

impl PollWorker {
    pub fn new(
        client: Arc<dyn ExileClient>,
        registry: DispatchRegistry,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            client,
            registry,
            settings,
        }
    }

    /// Poll until `token` is cancelled.
    pub async fn run(self, token: CancellationToken) {
        info!(worker = "poll_events", "Poll worker running");

        while !token.is_cancelled() {
            let polled = tokio::select! {
                biased;

                _ = token.cancelled() => break,
                polled = tokio::time::timeout(self.settings.poll_timeout, self.client.poll_events()) => polled,
            };

            let pause = match polled {
                Ok(Ok(events)) if events.is_empty() => {
                    debug!(worker = "poll_events", "No pending events");
                    self.settings.poll_idle_delay
                }
                Ok(Ok(events)) => {
                    debug!(worker = "poll_events", count = events.len(), "Polled events");
                    self.registry.dispatch_events(events).await;
                    continue;
                }
                Ok(Err(e)) => {
                    metrics::record_remote_error("poll_events");
                    warn!(worker = "poll_events", error = %e, "Event poll failed");
                    self.settings.retry_delay
                }
                Err(_) => {
                    metrics::record_remote_error("poll_events");
                    warn!(
                        worker = "poll_events",
                        timeout = ?self.settings.poll_timeout,
                        "Event poll timed out"
                    );
                    self.settings.retry_delay
                }
            };

            tokio::select! {
                biased;

                _ = token.cancelled() => break,
                _ = tokio::time::sleep(pause) => {}
            }
        }

        info!(worker = "poll_events", "Poll worker exited");
    }
}
