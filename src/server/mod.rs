//! Server module for hexrelay
//!
//! This module contains:
//! - TCP listener and its statistics
//! - Relay connections and close handles
//! - Per-connection session manager and bidirectional relay

pub mod connection;
pub mod listener;
pub mod session;

pub use connection::{CloseHandle, Connection, Side};
pub use listener::{Listener, ListenerStats};
pub use session::{ForwardEnd, ForwardOutcome, RelayOptions, Session, SessionManager, SessionSummary};
