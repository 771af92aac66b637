mod client;
mod schedule;

use anyhow::{bail, Result};
use clap::Parser;
use client::OrchestratorClient;
use relay_shared::{defaults, AckStatus};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Submits a command schedule to the relay
#[derive(Debug, Parser)]
#[command(name = "relay-orchestrator", version)]
struct Cli {
    /// Relay address
    #[arg(long, env = "RELAY_ADDR", default_value = defaults::RELAY_ADDR)]
    relay: String,

    /// Peer id that claims the orchestrator role on the relay
    #[arg(long, env = "RELAY_ORCHESTRATOR_ID", default_value = defaults::ORCHESTRATOR_ID)]
    orchestrator_id: String,

    /// JSON-lines schedule of commands to submit
    #[arg(long)]
    schedule: PathBuf,

    /// Start over from the top when the schedule is exhausted
    #[arg(long)]
    repeat: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let entries = schedule::load(&cli.schedule)?;
    if entries.is_empty() {
        bail!("schedule {} is empty", cli.schedule.display());
    }

    let mut client = OrchestratorClient::connect(&cli.relay, &cli.orchestrator_id).await?;
    info!("Connected to relay at {}", cli.relay);

    loop {
        for entry in &entries {
            let ack = client.submit(entry.to_submission()).await?;
            match (ack.status, ack.command_id) {
                (AckStatus::Added, Some(command_id)) => {
                    info!(%command_id, command = %entry.command, "command added");
                }
                _ => {
                    warn!(
                        command = %entry.command,
                        reason = ack.reason.as_deref().unwrap_or("unknown"),
                        "command refused"
                    );
                }
            }

            let wait = entry.wait();
            if !wait.is_zero() {
                info!("Waiting for {:.1} seconds...", wait.as_secs_f64());
                tokio::time::sleep(wait).await;
            }
        }

        if !cli.repeat {
            break;
        }
        info!("Reached end of schedule. Restarting from beginning...");
    }

    Ok(())
}
