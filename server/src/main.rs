mod command;
mod config;
mod error;
mod listener;
mod relay;
mod session;

use clap::Parser;
use command::TimeoutTracker;
use config::Cli;
use relay::Relay;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Cli::parse().into_config();

    let relay = Arc::new(Relay::new(config.orchestrator_id.clone()));

    if let Some(busy_timeout) = config.busy_timeout {
        let tracker = TimeoutTracker::new(relay.clone(), busy_timeout, config.reap_interval);
        tokio::spawn(async move { tracker.run().await });
    }

    let listener = TcpListener::bind(&config.listen_addr).await?;
    info!("Relay listening on {}", config.listen_addr);
    info!("  orchestrator id: {}", config.orchestrator_id);

    listener::serve(listener, relay).await
}
