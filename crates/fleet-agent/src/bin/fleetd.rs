//! fleetd - the fleetmesh agent daemon.
//!
//! Loads configuration, initializes logging, and runs one agent until
//! shutdown. Exits non-zero when the registry stays unreachable through
//! the configured registration retries.

use anyhow::Context;
use clap::Parser;
use fleet_agent::{init_logging, AgentBuilder, AgentConfig};
use std::path::PathBuf;
use tracing::info;

/// fleetmesh agent daemon
#[derive(Debug, Parser)]
#[command(name = "fleetd")]
#[command(about = "fleetmesh agent daemon")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override the agent name
    #[arg(short, long)]
    name: Option<String>,

    /// Capabilities to advertise (comma-separated)
    #[arg(long, value_delimiter = ',')]
    capabilities: Vec<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => AgentConfig::load_from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => AgentConfig::load().context("loading config")?,
    };

    if let Some(name) = cli.name {
        config.agent.name = Some(name);
    }
    if !cli.capabilities.is_empty() {
        config.agent.capabilities = cli.capabilities;
    }
    if cli.verbose {
        config.core.logging.level = "debug".to_string();
    }

    init_logging(&config.core.logging)?;
    info!(version = env!("CARGO_PKG_VERSION"), "fleetd starting");

    let mut agent = AgentBuilder::new().with_config(config).build()?;
    agent.run().await?;

    Ok(())
}
