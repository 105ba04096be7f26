//! Exile agent - configuration watcher and worker supervisor
//!
#![doc = "Exile agent"]
#![doc = "Main entry point for the Exile agent application."]

use anyhow::Result;

use exile_agent::cli::{Cli, Commands};
use exile_agent::commands;
use exile_agent::config::Config;
use exile_agent::logging::{bootstrap_subscriber, init_logging};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse_args();

    // Load configuration, with a stderr subscriber so load warnings show
    let config_path = cli.config_path().to_string();
    let config = tracing::subscriber::with_default(bootstrap_subscriber(cli.verbose), || {
        Config::load(&config_path, &cli)
    })?;

    init_logging(&config.logging)?;

    match cli.command {
        Commands::Validate => {
            commands::validate::validate_configuration(&config, &config_path)?;
            Ok(())
        }
        Commands::Config { json } => {
            config.validate()?;
            tracing::debug!("Fetching remote configuration");
            commands::configuration::show_configuration(&config, json).await?;
            Ok(())
        }
        Commands::Run => {
            config.validate()?;
            tracing::info!(config = %config_path, "Starting exile agent");
            commands::run::run_agent(config).await?;
            Ok(())
        }
    }
}
