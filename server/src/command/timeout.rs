//! Busy-timeout tracking for in-flight commands

use crate::relay::Relay;
use std::sync::Arc;
use tokio::time::{interval, Duration};
use tracing::{info, warn};

/// Reclaims devices whose in-flight command never produced a result
pub struct TimeoutTracker {
    relay: Arc<Relay>,
    busy_timeout: Duration,
    check_interval: Duration,
}

impl TimeoutTracker {
    /// `check_interval` is raised to at least 1ms; a zero period would
    /// panic the ticker.
    pub fn new(relay: Arc<Relay>, busy_timeout: Duration, check_interval: Duration) -> Self {
        Self {
            relay,
            busy_timeout,
            check_interval: check_interval.max(Duration::from_millis(1)),
        }
    }

    /// Start the timeout monitoring loop
    pub async fn run(&self) {
        info!(
            busy_timeout_ms = self.busy_timeout.as_millis() as u64,
            "busy timeout enabled"
        );
        let mut ticker = interval(self.check_interval);

        loop {
            ticker.tick().await;

            let reclaimed = self.relay.reclaim_stuck(self.busy_timeout).await;
            if !reclaimed.is_empty() {
                warn!("Reclaimed {} stuck devices", reclaimed.len());
            }
        }
    }
}
