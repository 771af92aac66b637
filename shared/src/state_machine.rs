//! Device State Machine
//!
//! Defines the valid readiness transitions of a device as tracked by the relay.

use crate::DeviceStatus;

/// Events that can trigger state transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceEvent {
    /// Peer registered (first connect or reconnect)
    Registered,
    /// A command was delivered to the device
    Dispatched,
    /// The device reported a result
    ResultAccepted,
    /// The in-flight command outlived the busy timeout
    BusyTimeout,
    /// Transport closed
    Disconnected,
}

/// Result of a state transition attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionResult {
    /// Transition was valid and the state is now the given one
    Success(DeviceStatus),
    /// Transition was invalid from current state; state unchanged
    Invalid { from: DeviceStatus, event: DeviceEvent },
}

/// Get the next state for a given event, if the transition is valid
pub fn next_state(from: DeviceStatus, event: DeviceEvent) -> Option<DeviceStatus> {
    use DeviceEvent::*;
    use DeviceStatus::*;

    match (from, event) {
        // A (re)registration always starts over
        (_, Registered) => Some(Ready),
        (_, Disconnected) => Some(Offline),

        (Ready, Dispatched) => Some(Busy),

        // Results are trusted even when nothing was in flight
        (Ready | Busy, ResultAccepted) => Some(Ready),
        // A result never brings a device online
        (Offline, ResultAccepted) => Some(Offline),

        (Busy, BusyTimeout) => Some(Ready),

        _ => None,
    }
}

/// Per-device readiness tracker
#[derive(Debug, Clone)]
pub struct DeviceStateMachine {
    current_state: DeviceStatus,
}

impl Default for DeviceStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceStateMachine {
    /// Create a state machine for a device that has not connected yet
    pub fn new() -> Self {
        Self {
            current_state: DeviceStatus::Offline,
        }
    }

    pub fn state(&self) -> DeviceStatus {
        self.current_state
    }

    pub fn is_ready(&self) -> bool {
        self.current_state == DeviceStatus::Ready
    }

    /// Process an event and return the transition result
    pub fn process_event(&mut self, event: DeviceEvent) -> TransitionResult {
        match next_state(self.current_state, event) {
            Some(state) => {
                self.current_state = state;
                TransitionResult::Success(state)
            }
            None => TransitionResult::Invalid {
                from: self.current_state,
                event,
            },
        }
    }
}
