//! The relay: one coherent state object shared by every connection task

use crate::command::{self, CommandQueues, DispatchOutcome, ResultOutcome};
use crate::error::RelayError;
use crate::session::{Role, SessionHandle, SessionId, SessionRegistry};
use relay_shared::{
    defaults, state_machine::DeviceEvent, AddCommand, CommandId, CommandResult, CommandStatus,
    DeviceStatus, Event,
};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Everything mutated by event handlers. Only ever touched with the relay
/// lock held, which makes enqueue, dequeue, status changes and lookups
/// atomic with respect to each other.
#[derive(Debug)]
pub struct RelayState {
    pub sessions: SessionRegistry,
    pub queues: CommandQueues,
}

/// A validated `add_command`
#[derive(Debug, Clone, PartialEq, Eq)]
struct Submission {
    device_id: String,
    payload: String,
}

pub struct Relay {
    state: Mutex<RelayState>,
}

impl Relay {
    pub fn new(orchestrator_id: impl Into<String>) -> Self {
        Self {
            state: Mutex::new(RelayState {
                sessions: SessionRegistry::new(orchestrator_id),
                queues: CommandQueues::new(),
            }),
        }
    }

    /// Register a freshly handshaken peer.
    ///
    /// On success the peer is told it is connected, and a device immediately
    /// receives the first command queued for it, if any.
    pub async fn connect(&self, handle: SessionHandle) -> Result<Role, RelayError> {
        let mut state = self.state.lock().await;
        let role = state.sessions.role_of(&handle.peer_id);
        let peer_id = handle.peer_id.clone();
        let greeting = handle.clone();

        state.sessions.register(role, handle)?;

        if greeting
            .send(Event::Status {
                status: defaults::CONNECTED_STATUS.into(),
            })
            .is_err()
        {
            warn!(peer_id = %peer_id, "peer went away during registration");
        }

        if role == Role::Device {
            command::try_dispatch(&mut state, &peer_id);
        }
        Ok(role)
    }

    /// Forget a closed session. Queued commands for a device stay queued.
    pub async fn disconnect(&self, peer_id: &str, session_id: SessionId) -> Option<Role> {
        let mut state = self.state.lock().await;
        let role = state.sessions.unregister(peer_id, session_id)?;

        if role == Role::Device && state.queues.has_pending(peer_id) {
            info!(
                device_id = peer_id,
                pending = state.queues.pending_count(peer_id),
                "commands held until the device reconnects"
            );
        }
        Some(role)
    }

    /// Validate and enqueue an orchestrator submission, producing its ack
    pub async fn submit(&self, add: AddCommand) -> CommandStatus {
        let mut state = self.state.lock().await;

        match resolve(&state, add) {
            Ok(submission) => {
                let command_id =
                    enqueue_locked(&mut state, &submission.device_id, submission.payload);
                CommandStatus::added(command_id)
            }
            Err(e) => {
                warn!("rejecting submission: {}", e);
                CommandStatus::failed(e.to_string())
            }
        }
    }

    /// Queue a command for a device and dispatch it right away if the
    /// device is idle. Never waits for the device.
    pub async fn enqueue(&self, device_id: &str, payload: impl Into<String>) -> CommandId {
        let mut state = self.state.lock().await;
        enqueue_locked(&mut state, device_id, payload.into())
    }

    /// Accept a device's result and continue its queue
    pub async fn handle_result(&self, result: &CommandResult) -> ResultOutcome {
        let mut state = self.state.lock().await;
        command::handle_result(&mut state, result)
    }

    /// Return every device whose command has been in flight for at least
    /// `timeout` to ready, abandoning that command, and continue its queue.
    pub async fn reclaim_stuck(&self, timeout: Duration) -> Vec<(String, CommandId)> {
        let mut state = self.state.lock().await;
        let mut reclaimed = Vec::new();

        for device_id in state.sessions.stuck_devices(timeout) {
            let Some(entry) = state.sessions.device_mut(&device_id) else {
                continue;
            };
            entry.fsm.process_event(DeviceEvent::BusyTimeout);
            let Some(stale) = entry.in_flight.take() else {
                continue;
            };

            warn!(
                device_id = %device_id,
                command_id = %stale.command_id,
                waited_ms = stale.dispatched_at.elapsed().as_millis() as u64,
                "no result before busy timeout, abandoning command"
            );
            command::try_dispatch(&mut state, &device_id);
            reclaimed.push((device_id, stale.command_id));
        }

        reclaimed
    }

    pub async fn status(&self, device_id: &str) -> DeviceStatus {
        self.state.lock().await.sessions.status(device_id)
    }

    /// Command currently executing on a device
    pub async fn in_flight(&self, device_id: &str) -> Option<CommandId> {
        self.state
            .lock()
            .await
            .sessions
            .device(device_id)
            .and_then(|e| e.in_flight.as_ref())
            .map(|f| f.command_id.clone())
    }

    pub async fn pending_count(&self, device_id: &str) -> usize {
        self.state.lock().await.queues.pending_count(device_id)
    }

    pub async fn has_orchestrator(&self) -> bool {
        self.state.lock().await.sessions.has_orchestrator()
    }

    pub async fn connected_devices(&self) -> Vec<String> {
        self.state.lock().await.sessions.connected_devices()
    }
}

fn enqueue_locked(state: &mut RelayState, device_id: &str, payload: String) -> CommandId {
    let command_id = state.queues.enqueue(device_id, payload);
    info!(device_id, command_id = %command_id, "command queued");

    if let DispatchOutcome::NotReady = command::try_dispatch(state, device_id) {
        info!(
            device_id,
            status = %state.sessions.status(device_id),
            pending = state.queues.pending_count(device_id),
            "device not ready, command waits"
        );
    }
    command_id
}

/// Check an `add_command` has everything needed and resolve its target
fn resolve(state: &RelayState, add: AddCommand) -> Result<Submission, RelayError> {
    let payload = add
        .command
        .ok_or_else(|| RelayError::MalformedSubmission("missing command".into()))?;

    let device_id = match (add.device_id.filter(|id| !id.is_empty()), add.number) {
        (Some(device_id), _) => device_id,
        (None, Some(number)) => state
            .sessions
            .device_for_ordinal(number)
            .map(str::to_string)
            .ok_or(RelayError::UnknownOrdinal(number))?,
        (None, None) => {
            return Err(RelayError::MalformedSubmission("missing device_id".into()));
        }
    };

    Ok(Submission { device_id, payload })
}
