//! Command executor - runs relay commands and builds the result reply

use super::runner::{CommandOutcome, CommandRunner};
use relay_shared::{now_ms, CommandResult, Event, ExecuteCommand};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// Executes commands received from the relay, one at a time
pub struct CommandExecutor {
    device_id: String,
    runner: Arc<dyn CommandRunner>,
    executed: AtomicU64,
}

impl CommandExecutor {
    pub fn new(device_id: String, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            device_id,
            runner,
            executed: AtomicU64::new(0),
        }
    }

    /// Number of commands executed so far
    pub fn executed_count(&self) -> u64 {
        self.executed.load(Ordering::SeqCst)
    }

    /// Execute a command and return the `command_result` event to send back
    pub async fn execute(&self, command: &ExecuteCommand) -> Event {
        let start_time = now_ms();

        if command.device_id != self.device_id {
            warn!(
                target_device = %command.device_id,
                "command addressed to another device, running anyway"
            );
        }

        info!(
            command_id = %command.command_id,
            runner = self.runner.name(),
            "Executing command"
        );

        let outcome = self.runner.run(&command.command).await;
        self.executed.fetch_add(1, Ordering::SeqCst);

        let processing_time = now_ms().saturating_sub(start_time);
        let result = match outcome {
            CommandOutcome::Completed { output } => {
                info!(command_id = %command.command_id, processing_time, "  Command completed");
                Value::String(output)
            }
            CommandOutcome::Failed { message, exit_code } => {
                warn!(command_id = %command.command_id, ?exit_code, "  Command failed: {}", message);
                json!({ "error": message, "exit_code": exit_code })
            }
        };

        Event::CommandResult(CommandResult {
            device_id: self.device_id.clone(),
            command_id: command.command_id.clone(),
            result,
        })
    }
}
