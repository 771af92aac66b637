//! Command execution on the device
//!
//! This module handles:
//! - Running relay commands through a pluggable runner
//! - Building `command_result` replies

mod executor;
pub mod runner;

pub use executor::CommandExecutor;
pub use runner::{CommandRunner, EchoRunner, ShellRunner};
