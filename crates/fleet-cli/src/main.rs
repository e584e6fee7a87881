//! fleet - command-line interface for the fleetmesh control plane.
//!
//! Exit code is 0 on success and non-zero once retries against the
//! registry, lease server, or bus are exhausted.

use anyhow::Context;
use clap::{Parser, Subcommand};
use fleet_core::config::{LeaseConfig, ResilienceConfig};
use fleet_lease::{LeaseClient, LeaseSpec};
use fleet_resilience::ResilienceLayer;
use fleet_telemetry::BusPublisher;
use std::time::Duration;

mod client;
mod output;

use client::FleetClient;
use output::OutputFormat;

/// Command-line interface for the fleetmesh control plane
#[derive(Debug, Parser)]
#[command(name = "fleet")]
#[command(about = "Command-line interface for the fleetmesh control plane")]
#[command(version)]
struct Cli {
    /// Registry address
    #[arg(long, default_value = "127.0.0.1:7400")]
    registry: String,

    /// Lease server address
    #[arg(long, default_value = "127.0.0.1:7410")]
    lease_server: String,

    /// Bus address
    #[arg(long, default_value = "127.0.0.1:7430")]
    bus: String,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    output: OutputFormat,

    /// Timeout for requests in seconds
    #[arg(long, default_value = "5")]
    timeout: u64,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Resolve an agent's endpoints
    Lookup {
        /// Agent name
        name: String,
    },

    /// Poll an agent's health endpoint
    Health {
        /// Agent name
        name: String,
    },

    /// Registry statistics
    #[command(name = "registry-stats")]
    RegistryStats,

    /// GPU lease operations
    Lease {
        #[command(subcommand)]
        command: LeaseCommands,
    },

    /// Publish a payload onto the shared bus
    Publish {
        /// Subject to publish under
        subject: String,

        /// JSON payload
        data: String,
    },
}

#[derive(Debug, Subcommand)]
enum LeaseCommands {
    /// Acquire a VRAM lease
    Acquire {
        /// Requesting client name
        #[arg(long, default_value = "fleet-cli")]
        client: String,

        /// Model the memory is for
        model: String,

        /// VRAM estimate in megabytes
        #[arg(long)]
        vram_mb: u64,

        /// Priority (lower = more urgent)
        #[arg(long, default_value = "5")]
        priority: u32,

        /// Lease TTL in seconds
        #[arg(long, default_value = "300")]
        ttl: u64,
    },

    /// Release a lease by id
    Release {
        /// Lease id from a previous acquire
        lease_id: String,
    },

    /// Lease server statistics
    Stats,
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let timeout = Duration::from_secs(cli.timeout);
    let fleet = FleetClient::new(&cli.registry, timeout);

    match cli.command {
        Commands::Lookup { name } => {
            let identity = fleet.lookup(&name.as_str().into()).await?;
            output::print_kv(
                cli.output,
                &format!("agent {}", identity.name),
                &[
                    ("host", identity.host.clone()),
                    ("main_port", identity.main_port.to_string()),
                    ("health_port", identity.health_port.to_string()),
                ],
            )?;
        }

        Commands::Health { name } => {
            let report = fleet.health(&name.as_str().into()).await?;
            output::print_value(cli.output, &format!("health of {}", name), &report)?;
        }

        Commands::RegistryStats => {
            let stats = fleet.registry_stats().await?;
            output::print_value(cli.output, "registry", &stats)?;
        }

        Commands::Lease { command } => {
            let lease_config = LeaseConfig {
                addr: cli.lease_server.clone(),
                request_timeout_ms: timeout.as_millis() as u64,
                ..Default::default()
            };
            let resilience = ResilienceLayer::new(ResilienceConfig::default());
            let client = LeaseClient::new(&lease_config, &resilience);

            match command {
                LeaseCommands::Acquire {
                    client: client_name,
                    model,
                    vram_mb,
                    priority,
                    ttl,
                } => {
                    let lease = client
                        .acquire(LeaseSpec {
                            client: client_name,
                            model_name: model,
                            vram_estimate_mb: vram_mb,
                            priority,
                            ttl_seconds: ttl,
                        })
                        .await
                        .map_err(fleet_core::Error::from)
                        .context("acquiring lease")?;
                    output::print_kv(
                        cli.output,
                        "lease granted",
                        &[
                            ("lease_id", lease.lease_id.clone()),
                            ("expires_in_secs", lease.remaining().as_secs().to_string()),
                        ],
                    )?;
                }

                LeaseCommands::Release { lease_id } => {
                    client
                        .release(&lease_id)
                        .await
                        .map_err(fleet_core::Error::from)
                        .context("releasing lease")?;
                    output::print_ok(&format!("released {}", lease_id));
                }

                LeaseCommands::Stats => {
                    let stats = client
                        .stats()
                        .await
                        .map_err(fleet_core::Error::from)
                        .context("fetching lease statistics")?;
                    output::print_value(cli.output, "lease server", &stats)?;
                }
            }
        }

        Commands::Publish { subject, data } => {
            let payload: serde_json::Value =
                serde_json::from_str(&data).context("payload must be valid JSON")?;
            let publisher = BusPublisher::for_addr(cli.bus.clone(), timeout);
            if publisher.publish(&subject, &payload).await {
                output::print_ok(&format!("published to {}", subject));
            } else {
                anyhow::bail!("bus at {} unreachable", cli.bus);
            }
        }
    }

    Ok(())
}
