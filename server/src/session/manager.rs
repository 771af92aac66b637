//! Session registry for tracking the orchestrator and all connected devices

use super::connection::{SessionHandle, SessionId};
use crate::error::RelayError;
use relay_shared::{
    state_machine::{DeviceEvent, DeviceStateMachine},
    CommandId, DeviceStatus,
};
use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Role a peer holds once registered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Orchestrator,
    Device,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Orchestrator => write!(f, "orchestrator"),
            Role::Device => write!(f, "device"),
        }
    }
}

/// The command a device is currently executing
#[derive(Debug, Clone)]
pub struct InFlight {
    pub command_id: CommandId,
    pub dispatched_at: Instant,
}

impl InFlight {
    pub fn new(command_id: CommandId) -> Self {
        Self {
            command_id,
            dispatched_at: Instant::now(),
        }
    }
}

/// Registry record of one connected device
#[derive(Debug)]
pub struct DeviceEntry {
    pub handle: SessionHandle,
    pub fsm: DeviceStateMachine,
    /// Set exactly while `fsm` is Busy
    pub in_flight: Option<InFlight>,
    /// 1-based connection order
    pub ordinal: u64,
}

/// Authoritative mapping from peer id to session, role and readiness.
///
/// Not internally synchronised; the relay owns it behind its state lock.
#[derive(Debug)]
pub struct SessionRegistry {
    orchestrator_id: String,
    orchestrator: Option<SessionHandle>,
    devices: HashMap<String, DeviceEntry>,
    /// Device id by connection ordinal, live registrations only
    ordinals: HashMap<u64, String>,
    /// Ordinals are never reused
    next_ordinal: u64,
}

impl SessionRegistry {
    pub fn new(orchestrator_id: impl Into<String>) -> Self {
        Self {
            orchestrator_id: orchestrator_id.into(),
            orchestrator: None,
            devices: HashMap::new(),
            ordinals: HashMap::new(),
            next_ordinal: 0,
        }
    }

    /// Role a peer with this id would take
    pub fn role_of(&self, peer_id: &str) -> Role {
        if peer_id == self.orchestrator_id {
            Role::Orchestrator
        } else {
            Role::Device
        }
    }

    /// Register a new session.
    ///
    /// A device registration replaces any stale record for the same id and
    /// starts it over as Ready. A second orchestrator is refused.
    pub fn register(&mut self, role: Role, handle: SessionHandle) -> Result<(), RelayError> {
        match role {
            Role::Orchestrator => {
                if let Some(existing) = &self.orchestrator {
                    info!(
                        peer_id = %handle.peer_id,
                        session_id = handle.session_id,
                        active_session = existing.session_id,
                        "rejecting second orchestrator"
                    );
                    return Err(RelayError::DuplicateOrchestrator);
                }
                info!(
                    peer_id = %handle.peer_id,
                    %role,
                    session_id = handle.session_id,
                    addr = %handle.addr,
                    "peer registered"
                );
                self.orchestrator = Some(handle);
            }
            Role::Device => {
                self.next_ordinal += 1;
                let ordinal = self.next_ordinal;
                self.ordinals.insert(ordinal, handle.peer_id.clone());

                let mut fsm = DeviceStateMachine::new();
                fsm.process_event(DeviceEvent::Registered);

                info!(
                    peer_id = %handle.peer_id,
                    %role,
                    session_id = handle.session_id,
                    addr = %handle.addr,
                    ordinal,
                    "peer registered"
                );

                let device_id = handle.peer_id.clone();
                let entry = DeviceEntry {
                    handle,
                    fsm,
                    in_flight: None,
                    ordinal,
                };
                if let Some(stale) = self.devices.insert(device_id, entry) {
                    self.ordinals.remove(&stale.ordinal);
                    debug!(
                        peer_id = %stale.handle.peer_id,
                        session_id = stale.handle.session_id,
                        stale_ordinal = stale.ordinal,
                        "replaced stale device session"
                    );
                }
                debug!(devices = self.count(), "device count");
            }
        }
        Ok(())
    }

    /// Unregister a session. Only removes the record if it still belongs to
    /// `session_id`, so a late close of a replaced session is a no-op.
    /// The device's command queue is not touched.
    pub fn unregister(&mut self, peer_id: &str, session_id: SessionId) -> Option<Role> {
        let role = self.role_of(peer_id);
        let removed = match role {
            Role::Orchestrator => {
                let owned = self
                    .orchestrator
                    .as_ref()
                    .is_some_and(|h| h.session_id == session_id);
                if owned {
                    self.orchestrator.take()
                } else {
                    None
                }
            }
            Role::Device => {
                let owned = self
                    .devices
                    .get(peer_id)
                    .is_some_and(|e| e.handle.session_id == session_id);
                if !owned {
                    None
                } else if let Some(mut entry) = self.devices.remove(peer_id) {
                    self.ordinals.remove(&entry.ordinal);
                    entry.fsm.process_event(DeviceEvent::Disconnected);
                    if let Some(lost) = entry.in_flight {
                        info!(
                            peer_id,
                            command_id = %lost.command_id,
                            "device left with a command in flight"
                        );
                    }
                    Some(entry.handle)
                } else {
                    None
                }
            }
        };

        match removed {
            Some(handle) => {
                info!(
                    peer_id,
                    %role,
                    session_id,
                    connected_secs = handle.connected_at.elapsed().as_secs(),
                    "peer unregistered"
                );
                Some(role)
            }
            None => {
                debug!(peer_id, session_id, "ignoring unregister of stale session");
                None
            }
        }
    }

    /// Get the session handle for a specific device
    pub fn lookup(&self, device_id: &str) -> Option<&SessionHandle> {
        self.devices.get(device_id).map(|e| &e.handle)
    }

    /// Readiness of a device; Offline when it has no record
    pub fn status(&self, device_id: &str) -> DeviceStatus {
        self.devices
            .get(device_id)
            .map(|e| e.fsm.state())
            .unwrap_or(DeviceStatus::Offline)
    }

    pub fn device(&self, device_id: &str) -> Option<&DeviceEntry> {
        self.devices.get(device_id)
    }

    pub fn device_mut(&mut self, device_id: &str) -> Option<&mut DeviceEntry> {
        self.devices.get_mut(device_id)
    }

    /// Device id that connected as the n-th device, while that
    /// registration is still live
    pub fn device_for_ordinal(&self, ordinal: u64) -> Option<&str> {
        self.ordinals.get(&ordinal).map(String::as_str)
    }

    pub fn has_orchestrator(&self) -> bool {
        self.orchestrator.is_some()
    }

    /// Get list of all connected device IDs
    pub fn connected_devices(&self) -> Vec<String> {
        self.devices.keys().cloned().collect()
    }

    /// Devices whose in-flight command is older than `timeout`
    pub fn stuck_devices(&self, timeout: Duration) -> Vec<String> {
        self.devices
            .iter()
            .filter(|(_, e)| {
                e.in_flight
                    .as_ref()
                    .is_some_and(|f| f.dispatched_at.elapsed() >= timeout)
            })
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Get the number of connected devices
    pub fn count(&self) -> usize {
        self.devices.len()
    }
}
