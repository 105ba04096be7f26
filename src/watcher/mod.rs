//! Remote configuration watching
//!
//! This module provides [`ConfigWatcher`], a periodic task that fetches the
//! remote configuration snapshot, compares it with the last one it saw, and
//! hands changes to a [`ConfigChangeHandler`].
//!
//! # Overview
//!
//! 1. A `tokio::time::interval` ticks (first tick immediately)
//! 2. The snapshot is fetched with a bounded timeout
//! 3. The snapshot is diffed with [`configuration_changed`]
//! 4. On change the handler runs, then the stored snapshot is replaced
//!
//! Fetch failures and handler failures are logged and never stop the loop.
//!
//! The same type backs both the standalone watcher attached to the
//! supervisor and the supervisor's own restart-poll task; they differ only
//! in their [`FirstSnapshot`] policy and handler.
//!
//! [`configuration_changed`]: crate::exile::configuration_changed

pub mod config_watcher;

pub use config_watcher::{ConfigChangeHandler, ConfigWatcher, FirstSnapshot, LoggingChangeHandler};
