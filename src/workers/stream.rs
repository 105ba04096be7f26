//! Job stream worker

use std::sync::Arc;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::exile::ExileClient;
use crate::metrics;
use crate::workers::{DispatchRegistry, WorkerSettings};

/// Consumes the remote job stream and forwards each job to the
/// [`DispatchRegistry`].
///
/// A session is one `stream_jobs` call plus its consumption, bounded by
/// `stream_session_timeout`. A failed session, or one the remote closes
/// without delivering any job, waits `retry_delay` before reopening. A
/// session that delivered jobs or ran out its timeout is reopened
/// immediately.
#[derive(Debug)]
pub struct StreamWorker {
    client: Arc<dyn ExileClient>,
    registry: DispatchRegistry,
    settings: WorkerSettings,
}

impl StreamWorker {
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

    /// Stream until `token` is cancelled.
    pub async fn run(self, token: CancellationToken) {
        info!(worker = "stream_jobs", "Stream worker running");

        while !token.is_cancelled() {
            let session = tokio::select! {
                biased;

                _ = token.cancelled() => break,
                session = tokio::time::timeout(self.settings.stream_session_timeout, self.session()) => session,
            };

            match session {
                Ok(Ok(0)) => {
                    debug!(
                        worker = "stream_jobs",
                        delay = ?self.settings.retry_delay,
                        "Job stream closed by remote without jobs, backing off"
                    );

                    tokio::select! {
                        biased;

                        _ = token.cancelled() => break,
                        _ = tokio::time::sleep(self.settings.retry_delay) => {}
                    }
                }
                Ok(Ok(jobs)) => {
                    debug!(worker = "stream_jobs", jobs, "Job stream closed by remote, reopening");
                }
                Err(_) => {
                    debug!(
                        worker = "stream_jobs",
                        timeout = ?self.settings.stream_session_timeout,
                        "Job stream session elapsed, reopening"
                    );
                }
                Ok(Err(e)) => {
                    metrics::record_remote_error("stream_jobs");
                    warn!(worker = "stream_jobs", error = %e, "Job stream failed");

                    tokio::select! {
                        biased;

                        _ = token.cancelled() => break,
                        _ = tokio::time::sleep(self.settings.retry_delay) => {}
                    }
                }
            }
        }

        info!(worker = "stream_jobs", "Stream worker exited");
    }

    /// Open the stream and drain it. Returns the number of jobs forwarded.
    async fn session(&self) -> Result<usize> {
        let mut jobs = self.client.stream_jobs().await?;
        let mut forwarded = 0;

        while let Some(item) = jobs.next().await {
            let job = item?;
            self.registry.dispatch_job(job).await;
            forwarded += 1;
        }

        Ok(forwarded)
    }
}
