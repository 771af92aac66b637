//! Session management for tracking connected peers
//!
//! This module handles:
//! - Tracking the orchestrator and all connected device sessions
//! - Orchestrator singleton enforcement
//! - Per-session outbound channels and frame reading

mod connection;
mod manager;

pub use connection::{PeerSession, SessionClosed, SessionHandle, SessionId};
pub use manager::{DeviceEntry, InFlight, Role, SessionRegistry};
