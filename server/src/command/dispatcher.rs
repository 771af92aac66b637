//! Single-flight dispatch of queued commands to devices

use crate::error::RelayError;
use crate::relay::RelayState;
use crate::session::{InFlight, SessionHandle};
use relay_shared::{state_machine::DeviceEvent, CommandId, Event, ExecuteCommand};
use tracing::{info, warn};

/// Delivery of an `execute_command` to a device.
///
/// Scheduling only needs to know whether the command was handed off.
pub trait CommandSink {
    fn deliver(&self, command: ExecuteCommand) -> Result<(), RelayError>;
}

/// Fire-and-forget delivery over the session's outbound channel
impl CommandSink for SessionHandle {
    fn deliver(&self, command: ExecuteCommand) -> Result<(), RelayError> {
        self.send(Event::ExecuteCommand(command))
            .map_err(|_| RelayError::UnknownDevice(self.peer_id.clone()))
    }
}

/// What a dispatch attempt did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Device is offline or busy
    NotReady,
    /// Nothing queued
    Empty,
    /// Command delivered, device is now busy
    Dispatched(CommandId),
    /// Command dequeued but could not be delivered; it is gone
    Dropped(CommandId),
}

/// Send the next queued command to a device if, and only if, it is ready.
///
/// Must be called with the relay state lock held.
pub fn try_dispatch(state: &mut RelayState, device_id: &str) -> DispatchOutcome {
    let ready = state
        .sessions
        .device(device_id)
        .is_some_and(|e| e.fsm.is_ready());
    if !ready {
        return DispatchOutcome::NotReady;
    }

    let Some(next) = state.queues.dequeue_next(device_id) else {
        return DispatchOutcome::Empty;
    };

    let command = ExecuteCommand {
        device_id: device_id.to_string(),
        command_id: next.command_id.clone(),
        command: next.payload,
    };

    let delivered = match state.sessions.lookup(device_id) {
        Some(handle) => deliver(handle, command),
        None => Err(RelayError::UnknownDevice(device_id.to_string())),
    };

    match delivered {
        Ok(()) => {
            if let Some(entry) = state.sessions.device_mut(device_id) {
                entry.fsm.process_event(DeviceEvent::Dispatched);
                entry.in_flight = Some(InFlight::new(next.command_id.clone()));
            }
            info!(
                device_id,
                command_id = %next.command_id,
                remaining = state.queues.pending_count(device_id),
                "command dispatched"
            );
            DispatchOutcome::Dispatched(next.command_id)
        }
        Err(e) => {
            warn!(device_id, command_id = %next.command_id, "dropping command: {}", e);
            DispatchOutcome::Dropped(next.command_id)
        }
    }
}

fn deliver(sink: &dyn CommandSink, command: ExecuteCommand) -> Result<(), RelayError> {
    sink.deliver(command)
}
