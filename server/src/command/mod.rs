//! Command queuing, dispatch and result handling for the relay
//!
//! This module handles:
//! - Queuing commands per device in submission order
//! - Dispatching at most one command at a time to each device
//! - Correlating device results and continuing the queue
//! - Optional reclaiming of devices stuck on a command

mod correlator;
mod dispatcher;
mod queue;
mod timeout;

pub use correlator::{handle_result, Correlation, ResultOutcome};
pub use dispatcher::{try_dispatch, DispatchOutcome};
pub use queue::CommandQueues;
pub use timeout::TimeoutTracker;
