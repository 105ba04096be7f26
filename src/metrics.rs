//! Process metrics for the supervisor and its workers
//!
//! Thin helpers over the `metrics` facade so call sites stay one line and
//! metric names live in one place. Without an installed recorder every call
//! is a no-op.
//!
//! # Metrics
//!
//! - `exile_worker_starts_total{worker}`: workers started, by kind
//! - `exile_worker_stops_total{worker}`: worker stops requested, by kind
//! - `exile_configuration_changes_total{watcher}`: configuration changes detected
//! - `exile_remote_errors_total{operation}`: failed or timed-out remote calls
//! - `exile_dispatched_events_total`: events handed to the plugin sink
//! - `exile_dispatched_jobs_total`: jobs handed to the plugin sink
//! - `exile_active_workers`: gauge of workers currently registered

use metrics::{counter, decrement_gauge, increment_counter, increment_gauge};

use crate::supervisor::WorkerKind;

/// Record a worker start.
pub fn record_worker_started(kind: WorkerKind) {
    increment_counter!("exile_worker_starts_total", "worker" => kind.as_str());
    increment_gauge!("exile_active_workers", 1.0);
}

/// Record a worker stop request.
pub fn record_worker_stopped(kind: WorkerKind) {
    increment_counter!("exile_worker_stops_total", "worker" => kind.as_str());
    decrement_gauge!("exile_active_workers", 1.0);
}

/// Record a detected configuration change.
pub fn record_configuration_change(watcher: &'static str) {
    increment_counter!("exile_configuration_changes_total", "watcher" => watcher);
}

/// Record a failed or timed-out remote call.
pub fn record_remote_error(operation: &'static str) {
    increment_counter!("exile_remote_errors_total", "operation" => operation);
}

/// Record events handed to the plugin sink.
pub fn record_dispatched_events(count: usize) {
    counter!("exile_dispatched_events_total", count as u64);
}

/// Record a job handed to the plugin sink.
pub fn record_dispatched_job() {
    increment_counter!("exile_dispatched_jobs_total");
}

/// Initializes the metrics exporter for Prometheus
///
/// When the `prometheus` feature is enabled, this installs the Prometheus
/// exporter on its default listen address. Otherwise it does nothing but is
/// still safe to call.
pub fn init_metrics_exporter() {
    #[cfg(feature = "prometheus")]
    {
        use metrics_exporter_prometheus::PrometheusBuilder;
        let builder = PrometheusBuilder::new();
        let _ = builder.install().map_err(|e| {
            tracing::warn!("Failed to install Prometheus exporter: {}", e);
        });
    }
}
