//! Relay Shared Protocol Types
//!
//! This crate provides the wire events, framing codec and device state
//! machine shared by the relay server, the device agent and the
//! orchestrator client.

pub mod codec;
pub mod state_machine;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Get current timestamp in milliseconds since Unix epoch
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Default parameters for the system
pub mod defaults {
    /// Address the relay listens on
    pub const RELAY_LISTEN_ADDR: &str = "0.0.0.0:5000";

    /// Address clients connect to
    pub const RELAY_ADDR: &str = "127.0.0.1:5000";

    /// Peer id that claims the orchestrator role
    pub const ORCHESTRATOR_ID: &str = "orchestrator";

    /// Status text sent to a peer once it is registered
    pub const CONNECTED_STATUS: &str = "Connected to server";

    /// How often the busy-timeout reaper runs
    pub const REAP_INTERVAL_MS: u64 = 1000;

    /// Initial client reconnection delay
    pub const RECONNECT_DELAY_MS: u64 = 1000;

    /// Maximum client reconnection delay
    pub const MAX_RECONNECT_DELAY_MS: u64 = 30000;

    /// Client connection timeout
    pub const CONNECT_TIMEOUT_MS: u64 = 5000;
}

/// Relay-assigned command identity (`c1`, `c2`, ...)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommandId(String);

impl CommandId {
    /// Build the id for the n-th command issued by the relay
    pub fn from_sequence(seq: u64) -> Self {
        Self(format!("c{seq}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CommandId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for CommandId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Device readiness as seen by the relay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    Ready,
    Busy,
    Offline,
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceStatus::Ready => write!(f, "ready"),
            DeviceStatus::Busy => write!(f, "busy"),
            DeviceStatus::Offline => write!(f, "offline"),
        }
    }
}

/// Outcome of an `add_command` submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckStatus {
    Added,
    Failed,
}

/// Every message exchanged over a relay connection.
///
/// Encoded as `{"event": "<name>", "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum Event {
    /// First frame on every connection, identifies the peer
    Connect { device_id: String },
    /// Relay -> peer, sent once the peer is registered
    Status { status: String },
    /// Relay -> peer, sent before a refused connection is closed
    Rejected { reason: String },
    /// Orchestrator -> relay
    AddCommand(AddCommand),
    /// Relay -> orchestrator, acknowledges an `add_command`
    CommandStatus(CommandStatus),
    /// Relay -> device
    ExecuteCommand(ExecuteCommand),
    /// Device -> relay
    CommandResult(CommandResult),
}

impl Event {
    /// Wire name of this event
    pub fn kind(&self) -> &'static str {
        match self {
            Event::Connect { .. } => "connect",
            Event::Status { .. } => "status",
            Event::Rejected { .. } => "rejected",
            Event::AddCommand(_) => "add_command",
            Event::CommandStatus(_) => "command_status",
            Event::ExecuteCommand(_) => "execute_command",
            Event::CommandResult(_) => "command_result",
        }
    }

    pub fn connect(device_id: impl Into<String>) -> Self {
        Event::Connect {
            device_id: device_id.into(),
        }
    }
}

/// Command submission. Every field is optional on the wire so that an
/// incomplete submission still decodes and can be answered with a failure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddCommand {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    /// Connection ordinal of the target device, used when `device_id` is absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
}

impl AddCommand {
    /// Submission addressed by device id
    pub fn new(device_id: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            device_id: Some(device_id.into()),
            number: None,
            command: Some(command.into()),
        }
    }

    /// Submission addressed by connection ordinal
    pub fn for_ordinal(number: u64, command: impl Into<String>) -> Self {
        Self {
            device_id: None,
            number: Some(number),
            command: Some(command.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_id: Option<CommandId>,
    pub status: AckStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl CommandStatus {
    /// Ack for an accepted command
    pub fn added(command_id: CommandId) -> Self {
        Self {
            command_id: Some(command_id),
            status: AckStatus::Added,
            reason: None,
        }
    }

    /// Ack for a refused submission
    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            command_id: None,
            status: AckStatus::Failed,
            reason: Some(reason.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteCommand {
    pub device_id: String,
    pub command_id: CommandId,
    pub command: String,
}

/// A device's report for one command. `result` is opaque application data;
/// a failure reported inside it is still a successful delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResult {
    pub device_id: String,
    pub command_id: CommandId,
    pub result: serde_json::Value,
}
