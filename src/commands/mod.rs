/*!
Command handlers for the CLI

This module provides command handlers invoked by the CLI entrypoint.

It exposes three top-level command modules:

- `run`           - Supervise the watcher and workers until shutdown
- `configuration` - Fetch and print the remote configuration once
- `validate`      - Check a configuration file without starting anything
*/

use std::sync::Arc;

use crate::config::Config;
use crate::error::Result;
use crate::exile::{ExileClient, HttpExileClient};

/// Build the remote client, or `None` when no endpoint is configured.
pub fn build_client(config: &Config) -> Result<Option<Arc<dyn ExileClient>>> {
    if config.exile.endpoint.is_none() {
        return Ok(None);
    }
    let client: Arc<dyn ExileClient> = Arc::new(HttpExileClient::from_config(&config.exile)?);
    Ok(Some(client))
}

// Run command handler
pub mod r#run {
    //! Long-running agent mode.
    //!
    //! Builds the supervisor from the configuration, starts everything, and
    //! waits for Ctrl-C before stopping all workers.

    use super::*;
    use std::future::Future;

    use tokio_util::sync::CancellationToken;
    use tracing::{info, warn};

    use crate::metrics;
    use crate::supervisor::{Supervisor, SupervisorEvent};
    use crate::watcher::{ConfigWatcher, LoggingChangeHandler};
    use crate::workers::{LoggingPlugin, WorkerSettings};

    /// Run the agent until Ctrl-C.
    ///
    /// # Errors
    ///
    /// Returns error if the client cannot be built, a worker fails to start,
    /// or the standalone watcher fails to stop cleanly.
    pub async fn run_agent(config: Config) -> Result<()> {
        metrics::init_metrics_exporter();
        let client = build_client(&config)?;

        run_agent_until(&config, client, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for Ctrl-C, shutting down");
            }
        })
        .await
    }

    /// Run the agent with `client` until `shutdown` completes.
    pub async fn run_agent_until<F>(
        config: &Config,
        client: Option<Arc<dyn ExileClient>>,
        shutdown: F,
    ) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let token = CancellationToken::new();
        let mut builder = Supervisor::builder()
            .with_settings(WorkerSettings::from_config(config))
            .with_plugin(Arc::new(LoggingPlugin))
            .with_parent_token(token.clone());

        match &client {
            Some(client) => {
                builder = builder.with_client(Arc::clone(client));
                if config.watcher.enabled {
                    let watcher =
                        ConfigWatcher::new(Arc::clone(client), Arc::new(LoggingChangeHandler))
                            .with_interval(config.watcher.interval())
                            .with_fetch_timeout(config.watcher.fetch_timeout());
                    builder = builder.with_config_watcher(watcher);
                }
            }
            None => warn!("No exile.endpoint configured, remote workers are disabled"),
        }

        let supervisor = builder.build();
        let mut events = supervisor.subscribe();
        let failures = tokio::spawn(async move {
            while let Ok(event) = events.recv().await {
                if let SupervisorEvent::WorkerStartFailed { kind, error } = event {
                    warn!(worker = %kind, error = %error, "Worker failed to restart");
                }
            }
        });

        if let Err(e) = supervisor.start_all(&token).await {
            token.cancel();
            let _ = supervisor.stop_all_processes().await;
            failures.abort();
            return Err(e);
        }

        info!(
            workers = ?supervisor.active_workers().await,
            "Agent running, press Ctrl-C to stop"
        );

        shutdown.await;
        info!("Shutdown requested");

        let result = supervisor.stop_all_processes().await;
        token.cancel();
        failures.abort();
        result
    }
}

// Remote configuration command handler
pub mod configuration {
    //! One-shot remote configuration fetch.

    use super::*;
    use std::time::Duration;

    use crate::error::AgentError;
    use crate::exile::ConfigurationSnapshot;

    /// Fetch the remote configuration and print it to stdout.
    ///
    /// # Errors
    ///
    /// Returns error if no endpoint is configured or the fetch fails.
    pub async fn show_configuration(config: &Config, json: bool) -> Result<()> {
        let client = build_client(config)?.ok_or_else(|| {
            anyhow::Error::from(AgentError::Config(
                "exile.endpoint is required to fetch the remote configuration".to_string(),
            ))
        })?;

        let snapshot = fetch_snapshot(client.as_ref(), config.watcher.fetch_timeout()).await?;
        println!("{}", render_snapshot(&snapshot, json)?);
        Ok(())
    }

    /// Fetch one snapshot, bounded by `timeout`.
    pub async fn fetch_snapshot(
        client: &dyn ExileClient,
        timeout: Duration,
    ) -> Result<ConfigurationSnapshot> {
        match tokio::time::timeout(timeout, client.fetch_configuration()).await {
            Ok(result) => result,
            Err(_) => Err(AgentError::Timeout {
                operation: "fetch_configuration",
                after: timeout,
            }
            .into()),
        }
    }

    /// Format a snapshot as pretty JSON or as aligned text.
    pub fn render_snapshot(snapshot: &ConfigurationSnapshot, json: bool) -> Result<String> {
        if json {
            return Ok(serde_json::to_string_pretty(snapshot)?);
        }

        Ok(format!(
            "Organization:  {} ({})\nConfiguration: {}\nPayload:       {} bytes",
            snapshot.org_name,
            snapshot.org_id,
            snapshot.config_name,
            snapshot.config_payload.len()
        ))
    }
}

// Validate command handler
pub mod validate {
    //! Offline configuration check.

    use super::*;

    /// Validate `config` and print a short summary.
    ///
    /// # Errors
    ///
    /// Returns the validation error, if any.
    pub fn validate_configuration(config: &Config, path: &str) -> Result<()> {
        config.validate()?;

        println!("Configuration OK: {}", path);
        println!(
            "  endpoint: {}",
            config.exile.endpoint.as_deref().unwrap_or("(none, remote workers disabled)")
        );
        println!(
            "  watcher:  {} (every {}s)",
            if config.watcher.enabled { "enabled" } else { "disabled" },
            config.watcher.interval_secs
        );
        println!("  retry:    {}s", config.workers.retry_delay_secs);
        Ok(())
    }
}
