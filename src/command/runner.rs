//! Pluggable command runners
//!
//! The relay treats command payloads as opaque. What a payload means is up
//! to the runner the agent was started with.

use async_trait::async_trait;
use std::path::PathBuf;
use tokio::process::Command;
use tracing::debug;

/// Outcome of running one command payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    /// Ran to completion
    Completed { output: String },
    /// Ran, or tried to, and failed
    Failed {
        message: String,
        exit_code: Option<i32>,
    },
}

/// Turns a command payload into an outcome
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, command: &str) -> CommandOutcome;

    /// Human-readable name for this runner
    fn name(&self) -> &'static str;
}

/// Accepts every command without doing anything
#[derive(Debug, Default)]
pub struct EchoRunner;

#[async_trait]
impl CommandRunner for EchoRunner {
    async fn run(&self, command: &str) -> CommandOutcome {
        debug!(command, "echo runner accepting command");
        CommandOutcome::Completed {
            output: "ok".into(),
        }
    }

    fn name(&self) -> &'static str {
        "echo"
    }
}

/// Runs `<program> <payload>` and reports its stdout
#[derive(Debug, Clone)]
pub struct ShellRunner {
    program: PathBuf,
}

impl ShellRunner {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl CommandRunner for ShellRunner {
    async fn run(&self, command: &str) -> CommandOutcome {
        let output = match Command::new(&self.program).arg(command).output().await {
            Ok(output) => output,
            Err(e) => {
                return CommandOutcome::Failed {
                    message: format!("failed to start {}: {}", self.program.display(), e),
                    exit_code: None,
                }
            }
        };

        if output.status.success() {
            CommandOutcome::Completed {
                output: String::from_utf8_lossy(&output.stdout).trim_end().to_string(),
            }
        } else {
            CommandOutcome::Failed {
                message: String::from_utf8_lossy(&output.stderr).trim_end().to_string(),
                exit_code: output.status.code(),
            }
        }
    }

    fn name(&self) -> &'static str {
        "shell"
    }
}
