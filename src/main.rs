//! Sensorhub node entrypoint.
//!
//! Configuration comes from the environment (see [`sensorhub::Config`]);
//! the CLI only selects what to do with it:
//!
//!   sensorhub start          run the node until SIGINT
//!   sensorhub config check   validate the environment and print a summary

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sensorhub::core::logging;
use sensorhub::{Config, Runtime};
use tracing::Instrument;

/// Sensorhub - peer-to-peer sensor cluster node.
#[derive(Parser, Debug)]
#[command(name = "sensorhub")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log level override (trace, debug, info, warn, error).
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// Available commands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the node (default).
    Start,
    /// Configuration operations.
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Validate the environment and print the effective configuration.
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::from_env().context("startup configuration invalid")?;
    if let Some(level) = cli.log_level {
        config.log_level = level;
    }

    match cli.command.unwrap_or(Commands::Start) {
        Commands::Config {
            command: ConfigCommands::Check,
        } => {
            println!("node_id:        {}", config.node_id);
            println!("listen:         {}:{}", config.host, config.port);
            println!("web api port:   {}", config.web_api_port);
            println!(
                "bootstrap:      {}",
                if config.bootstrap_peers.is_empty() {
                    "(none)".to_string()
                } else {
                    config
                        .bootstrap_peers
                        .iter()
                        .map(|(h, p)| format!("{h}:{p}"))
                        .collect::<Vec<_>>()
                        .join(", ")
                }
            );
            println!("sensors:        {}", config.sensors.len());
            for spec in &config.sensors {
                println!(
                    "  - {} ({}, every {} ms)",
                    spec.name,
                    spec.params.kind(),
                    spec.period_ms
                );
            }
            println!("configuration OK");
            Ok(())
        }
        Commands::Start => {
            logging::init(&config).context("failed to initialize logging")?;
            let span = tracing::info_span!("node", node_id = %config.node_id);
            let mut runtime = Runtime::new(config)?;
            runtime.run().instrument(span).await
        }
    }
}
