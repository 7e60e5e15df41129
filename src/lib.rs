//! hexrelay - transparent TCP relay with per-chunk hex logging
//!
//! This library provides the pieces of a debugging relay that:
//! - Accepts client connections on a local address
//! - Opens one outbound connection per client to a fixed remote endpoint
//! - Forwards bytes unmodified in both directions
//! - Logs every forwarded chunk as hex plus an ASCII approximation,
//!   highlighting the 0xFF sentinel byte (Telnet IAC)

#[macro_use]
mod logging;

pub mod config;
pub mod error;
pub mod frame_log;
pub mod server;

pub use config::Config;
pub use error::{RelayError, Result};
pub use frame_log::{log_frame, Direction, FrameOptions, FrameRecord, Highlight, SENTINEL};
pub use server::{Connection, Listener, ListenerStats, SessionManager};
