//! Structured logging setup
//!
//! JSON or human-readable output on stderr, optionally mirrored to an
//! append-mode log file. Stdout is left to command output. `RUST_LOG`
//! takes precedence over the configured level.

use std::fs::OpenOptions;
use std::sync::Arc;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;
use crate::error::Result;

/// Install the global tracing subscriber described by `config`.
///
/// # Errors
///
/// Returns an error if the level cannot be parsed, the log file cannot be
/// opened, or a global subscriber is already installed.
///
/// # Examples
///
/// ```no_run
/// use exile_agent::config::LoggingConfig;
/// use exile_agent::logging::init_logging;
///
/// init_logging(&LoggingConfig::default()).unwrap();
/// ```
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let env_filter = build_filter(&config.level)?;
    let registry = tracing_subscriber::registry().with(env_filter);

    let file = match &config.file_path {
        Some(path) => Some(Arc::new(
            OpenOptions::new().create(true).append(true).open(path)?,
        )),
        None => None,
    };

    if config.json_format {
        let console_layer = fmt::layer()
            .json()
            .with_current_span(true)
            .with_writer(std::io::stderr);
        let file_layer = file.map(|file| {
            fmt::layer()
                .json()
                .with_current_span(true)
                .with_writer(file)
        });
        registry.with(console_layer).with(file_layer).try_init()?;
    } else {
        let console_layer = fmt::layer()
            .with_target(true)
            .with_level(true)
            .with_writer(std::io::stderr);
        let file_layer = file.map(|file| {
            fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_ansi(false)
                .with_writer(file)
        });
        registry.with(console_layer).with(file_layer).try_init()?;
    }

    Ok(())
}

/// Subscriber used while the configuration is still being loaded.
///
/// Writes plain text to stderr at `warn` (or `debug` with `--verbose`) so
/// load diagnostics such as a missing config file are not lost. Scope it
/// with [`tracing::subscriber::with_default`] until [`init_logging`] runs.
pub fn bootstrap_subscriber(verbose: bool) -> impl tracing::Subscriber + Send + Sync + 'static {
    let level = if verbose { "debug" } else { "warn" };
    let env_filter = build_filter(level).unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry().with(env_filter).with(
        fmt::layer()
            .with_target(true)
            .with_level(true)
            .with_ansi(false)
            .with_writer(std::io::stderr),
    )
}

fn build_filter(level: &str) -> Result<EnvFilter> {
    Ok(EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?)
}
