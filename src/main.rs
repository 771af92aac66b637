mod command;
mod connection;

use clap::Parser;
use command::{CommandExecutor, CommandRunner, EchoRunner, ShellRunner};
use connection::{ConnectionConfig, ConnectionEvent, ConnectionManager};
use relay_shared::{defaults, Event};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Device agent: executes relay commands one at a time
#[derive(Debug, Parser)]
#[command(name = "device-agent", version)]
struct Cli {
    /// Relay address
    #[arg(long, env = "RELAY_ADDR", default_value = defaults::RELAY_ADDR)]
    relay: String,

    /// Device id announced to the relay (random if omitted)
    #[arg(long, env = "DEVICE_ID")]
    device_id: Option<String>,

    /// Program run as `<script> <command>` for each command.
    /// Without it every command is acknowledged with "ok".
    #[arg(long)]
    script: Option<PathBuf>,

    /// Initial reconnect delay in milliseconds
    #[arg(long, default_value_t = defaults::RECONNECT_DELAY_MS)]
    reconnect_ms: u64,

    /// Maximum reconnect delay in milliseconds
    #[arg(long, default_value_t = defaults::MAX_RECONNECT_DELAY_MS)]
    max_reconnect_ms: u64,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let cli = Cli::parse();

    let config = ConnectionConfig {
        device_id: cli
            .device_id
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        relay_addr: cli.relay,
        reconnect_delay: Duration::from_millis(cli.reconnect_ms),
        max_reconnect_delay: Duration::from_millis(cli.max_reconnect_ms),
        ..Default::default()
    };

    let runner: Arc<dyn CommandRunner> = match cli.script {
        Some(script) => Arc::new(ShellRunner::new(script)),
        None => Arc::new(EchoRunner),
    };

    let relay_addr = config.relay_addr.clone();
    let mut conn = ConnectionManager::new(config);

    info!("Device agent starting: {}", conn.device_id());
    info!("  relay: {}", relay_addr);
    info!("  runner: {}", runner.name());

    let executor = CommandExecutor::new(conn.device_id().to_string(), runner);

    loop {
        match conn.recv().await {
            Some(ConnectionEvent::Connected) => {
                info!("Connected to relay");
            }
            Some(ConnectionEvent::Rejected { reason }) => {
                warn!("Relay rejected connection: {}", reason);
            }
            Some(ConnectionEvent::Disconnected { reason }) => {
                warn!("Disconnected: {}", reason);
            }
            Some(ConnectionEvent::ConnectionFailed { reason }) => {
                error!("Connection failed: {}", reason);
            }
            Some(ConnectionEvent::Received(event)) => {
                handle_relay_event(event, &conn, &executor).await;
            }
            None => {
                error!("Connection manager closed");
                break;
            }
        }
    }
}

async fn handle_relay_event(event: Event, conn: &ConnectionManager, executor: &CommandExecutor) {
    match event {
        Event::ExecuteCommand(cmd) => {
            let reply = executor.execute(&cmd).await;
            if let Err(e) = conn.send(reply).await {
                error!("Failed to send result: {}", e);
            }
            debug!(executed = executor.executed_count(), "ready for next command");
        }
        Event::Status { status } => {
            info!("Relay status: {}", status);
        }
        other => {
            debug!("Unhandled event: {}", other.kind());
        }
    }
}
