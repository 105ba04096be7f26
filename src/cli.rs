//! Command-line interface definition for the Exile agent
//!
//! This module defines the CLI structure using clap's derive API.

use clap::{Parser, Subcommand};

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "config/agent.yaml";

/// Exile agent - supervises the Exile poll, stream and plugin workers
///
/// Watches the remote Exile configuration and restarts its workers whenever
/// the configuration changes.
#[derive(Parser, Debug, Clone)]
#[command(name = "exile-agent")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, env = "EXILE_AGENT_CONFIG")]
    pub config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Override the Exile API endpoint from the configuration file
    #[arg(short, long)]
    pub endpoint: Option<String>,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Start the watcher, the configuration task and all workers until Ctrl-C
    Run,

    /// Fetch the remote configuration once and print it
    Config {
        /// Print the snapshot as JSON
        #[arg(long)]
        json: bool,
    },

    /// Load and validate the configuration file, then exit
    Validate,
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Configuration path, falling back to [`DEFAULT_CONFIG_PATH`].
    pub fn config_path(&self) -> &str {
        self.config.as_deref().unwrap_or(DEFAULT_CONFIG_PATH)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_run() {
        let cli = Cli::try_parse_from(["exile-agent", "run"]).unwrap();
        assert_eq!(cli.command, Commands::Run);
        assert!(!cli.verbose);
        assert!(cli.endpoint.is_none());
    }

    #[test]
    fn test_cli_parse_config_json() {
        let cli = Cli::try_parse_from(["exile-agent", "config", "--json"]).unwrap();
        assert_eq!(cli.command, Commands::Config { json: true });
    }

    #[test]
    fn test_cli_parse_global_flags() {
        let cli = Cli::try_parse_from([
            "exile-agent",
            "--config",
            "custom.yaml",
            "--verbose",
            "--endpoint",
            "http://exile.local",
            "validate",
        ])
        .unwrap();
        assert_eq!(cli.config_path(), "custom.yaml");
        assert!(cli.verbose);
        assert_eq!(cli.endpoint.as_deref(), Some("http://exile.local"));
        assert_eq!(cli.command, Commands::Validate);
    }

    #[test]
    fn test_cli_default_config_path() {
        let cli = Cli {
            config: None,
            verbose: false,
            endpoint: None,
            command: Commands::Validate,
        };
        assert_eq!(cli.config_path(), DEFAULT_CONFIG_PATH);
    }

    #[test]
    fn test_cli_requires_subcommand() {
        assert!(Cli::try_parse_from(["exile-agent"]).is_err());
    }
}
