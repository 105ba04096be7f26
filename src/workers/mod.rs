//! Long-running workers started by the supervisor
//!
//! - [`poll`]: repeatedly fetches pending events
//! - [`stream`]: consumes the long-lived job stream
//! - [`dispatch`]: the host-plugin sink both of them forward to

pub mod dispatch;
pub mod poll;
pub mod stream;

use std::time::Duration;

use crate::config::Config;

pub use dispatch::{DispatchRegistry, DispatchWorker, LoggingPlugin, PluginSink};
pub use poll::PollWorker;
pub use stream::StreamWorker;

/// Timing knobs shared by the supervisor and its workers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSettings {
    /// Delay after a failed poll or stream session
    pub retry_delay: Duration,
    /// Bound on a single event poll
    pub poll_timeout: Duration,
    /// Pause after an empty event batch
    pub poll_idle_delay: Duration,
    /// Bound on one job stream session
    pub stream_session_timeout: Duration,
    /// Interval of the supervisor's configuration-poll task
    pub configuration_interval: Duration,
    /// Bound on a single configuration fetch
    pub configuration_fetch_timeout: Duration,
    /// Restart poll/stream/dispatch when the remote configuration changes
    pub restart_on_configuration_change: bool,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            retry_delay: Duration::from_secs(5),
            poll_timeout: Duration::from_secs(30),
            poll_idle_delay: Duration::from_secs(1),
            stream_session_timeout: Duration::from_secs(300),
            configuration_interval: Duration::from_secs(60),
            configuration_fetch_timeout: Duration::from_secs(10),
            restart_on_configuration_change: true,
        }
    }
}

impl WorkerSettings {
    /// Build settings from the loaded agent configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            retry_delay: Duration::from_secs(config.workers.retry_delay_secs),
            poll_timeout: Duration::from_secs(config.workers.poll_timeout_secs),
            poll_idle_delay: Duration::from_millis(config.workers.poll_idle_delay_ms),
            stream_session_timeout: Duration::from_secs(
                config.workers.stream_session_timeout_secs,
            ),
            configuration_interval: config.watcher.interval(),
            configuration_fetch_timeout: config.watcher.fetch_timeout(),
            restart_on_configuration_change: config.workers.restart_on_configuration_change,
        }
    }
}
