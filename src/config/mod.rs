//! Configuration module for hexrelay
//!
//! All sections and fields are optional; an empty `server` section relays
//! `0.0.0.0:6000` to `freechess.org:5000`.
//!
//! ```yaml
//! server:
//!   listen_address: "127.0.0.1"
//!   listen_port: 6000
//!   backlog: 5
//!   connect_timeout_secs: 30
//!   max_connections: 0
//! remote:
//!   host: "freechess.org"
//!   port: 5000
//! relay:
//!   buffer_size: 4096
//!   idle_timeout_secs: 0
//! logging:
//!   level: "info"
//!   frames: true
//!   color: true
//! ```

mod loader;
mod types;

pub use loader::{apply_env_overrides, load_config, load_config_from_str};
pub use types::*;
