//! Relay configuration and command-line parsing

use clap::Parser;
use relay_shared::defaults;
use std::time::Duration;

/// Command-line interface of the relay
#[derive(Debug, Parser)]
#[command(name = "relay-server", version, about = "Device command relay")]
pub struct Cli {
    /// Address to listen on
    #[arg(long, env = "RELAY_LISTEN", default_value = defaults::RELAY_LISTEN_ADDR)]
    pub listen: String,

    /// Peer id that claims the orchestrator role
    #[arg(long, env = "RELAY_ORCHESTRATOR_ID", default_value = defaults::ORCHESTRATOR_ID)]
    pub orchestrator_id: String,

    /// Revert a device to ready when its command has been in flight this long.
    /// Unset means devices wait for their result forever.
    #[arg(long, env = "RELAY_BUSY_TIMEOUT_SECS")]
    pub busy_timeout_secs: Option<u64>,

    /// How often stuck devices are checked for, in milliseconds
    #[arg(
        long,
        env = "RELAY_REAP_INTERVAL_MS",
        default_value_t = defaults::REAP_INTERVAL_MS,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub reap_interval_ms: u64,
}

impl Cli {
    pub fn into_config(self) -> RelayConfig {
        RelayConfig {
            listen_addr: self.listen,
            orchestrator_id: self.orchestrator_id,
            busy_timeout: self.busy_timeout_secs.map(Duration::from_secs),
            reap_interval: Duration::from_millis(self.reap_interval_ms),
        }
    }
}

/// Configuration for the relay
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub listen_addr: String,
    pub orchestrator_id: String,
    /// `None` disables the busy-timeout reaper
    pub busy_timeout: Option<Duration>,
    pub reap_interval: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen_addr: defaults::RELAY_LISTEN_ADDR.into(),
            orchestrator_id: defaults::ORCHESTRATOR_ID.into(),
            busy_timeout: None,
            reap_interval: Duration::from_millis(defaults::REAP_INTERVAL_MS),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let config = Cli::parse_from(["relay-server"]).into_config();
        let fallback = RelayConfig::default();
        assert_eq!(config.listen_addr, "0.0.0.0:5000");
        assert_eq!(config.listen_addr, fallback.listen_addr);
        assert_eq!(config.orchestrator_id, fallback.orchestrator_id);
        assert!(config.busy_timeout.is_none());
        assert_eq!(config.reap_interval, Duration::from_millis(1000));
    }

    #[test]
    fn test_cli_busy_timeout() {
        let config = Cli::parse_from([
            "relay-server",
            "--listen",
            "127.0.0.1:7000",
            "--busy-timeout-secs",
            "30",
        ])
        .into_config();
        assert_eq!(config.listen_addr, "127.0.0.1:7000");
        assert_eq!(config.busy_timeout, Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_cli_rejects_zero_reap_interval() {
        let err = Cli::try_parse_from([
            "relay-server",
            "--busy-timeout-secs",
            "5",
            "--reap-interval-ms",
            "0",
        ])
        .unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);

        let config = Cli::try_parse_from(["relay-server", "--reap-interval-ms", "1"])
            .unwrap()
            .into_config();
        assert_eq!(config.reap_interval, Duration::from_millis(1));
    }
}
