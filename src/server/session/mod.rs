//! Session management and relay
//!
//! This module provides session lifecycle management and traffic relay:
//! - [`relay`]: Bidirectional traffic forwarding between client and remote
//! - [`manager`]: Session lifecycle from outbound connect to close

pub mod manager;
pub mod relay;

pub use manager::SessionManager;
pub use relay::{
    copy_with_logging, forward, ForwardEnd, ForwardOutcome, RelayOptions, Session,
    SessionSummary,
};
