//! Connection management for the persistent relay link
//!
//! This module handles:
//! - Persistent TCP connection with automatic reconnection
//! - The `connect` handshake on every (re)connect
//! - Bidirectional event streaming

mod manager;

pub use manager::{ConnectionConfig, ConnectionEvent, ConnectionManager};
