//! Result correlation: a device reports back, becomes ready, and the next
//! queued command goes out

use super::dispatcher::{try_dispatch, DispatchOutcome};
use crate::relay::RelayState;
use relay_shared::{state_machine::DeviceEvent, CommandId, CommandResult};
use tracing::{info, warn};

/// How a result related to what the relay had in flight
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Correlation {
    /// Matched the device's in-flight command
    Matched,
    /// Accepted anyway; the device had a different command, or none, in flight
    Unsolicited { in_flight: Option<CommandId> },
    /// The device is not registered; only logged
    Offline,
}

/// Outcome of accepting one result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultOutcome {
    pub correlation: Correlation,
    pub next: DispatchOutcome,
}

/// Accept a device's result, mark the device ready and continue its queue.
///
/// Results are trusted: the command id is not required to match.
/// Must be called with the relay state lock held.
pub fn handle_result(state: &mut RelayState, result: &CommandResult) -> ResultOutcome {
    let device_id = result.device_id.as_str();

    info!(
        command_id = %result.command_id,
        device_id,
        result = %result.result,
        "command result"
    );

    let correlation = match state.sessions.device_mut(device_id) {
        Some(entry) => {
            entry.fsm.process_event(DeviceEvent::ResultAccepted);
            match entry.in_flight.take() {
                Some(f) if f.command_id == result.command_id => Correlation::Matched,
                other => {
                    let in_flight = other.map(|f| f.command_id);
                    warn!(
                        device_id,
                        command_id = %result.command_id,
                        in_flight = ?in_flight,
                        "result does not match the command in flight, accepting"
                    );
                    Correlation::Unsolicited { in_flight }
                }
            }
        }
        None => {
            warn!(device_id, command_id = %result.command_id, "result from offline device");
            Correlation::Offline
        }
    };

    let next = try_dispatch(state, device_id);
    ResultOutcome { correlation, next }
}
