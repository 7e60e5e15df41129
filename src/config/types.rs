//! Configuration types

use serde::Deserialize;
use std::time::Duration;

use crate::frame_log::FrameOptions;

/// Largest accepted read buffer.
pub const MAX_BUFFER_SIZE: usize = 1024 * 1024;

/// Root configuration structure
///
/// Built once at startup and shared by `Arc` with the listener and every
/// session.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Listener configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Fixed remote endpoint every client is relayed to
    #[serde(default)]
    pub remote: RemoteConfig,

    /// Forwarding loop configuration
    #[serde(default)]
    pub relay: RelayConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Configuration with defaults everywhere except the remote endpoint.
    pub fn default_for(remote_host: impl Into<String>, remote_port: u16) -> Self {
        Self {
            remote: RemoteConfig {
                host: remote_host.into(),
                port: remote_port,
            },
            ..Self::default()
        }
    }

    /// `listen_address:listen_port`
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.server.listen_address, self.server.listen_port)
    }

    /// `host:port` of the remote
    pub fn remote_addr(&self) -> String {
        format!("{}:{}", self.remote.host, self.remote.port)
    }

    /// Timeout for the outbound connect
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.server.connect_timeout_secs)
    }

    /// Idle timeout for a single forwarding direction (zero = disabled)
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.relay.idle_timeout_secs)
    }

    /// Frame logging options derived from the logging section
    pub fn frame_options(&self) -> FrameOptions {
        FrameOptions {
            enabled: self.logging.frames,
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.remote.host.trim().is_empty() {
            return Err("remote.host must not be empty".into());
        }
        if self.remote.port == 0 {
            return Err("remote.port must not be 0".into());
        }
        if self.server.listen_address.trim().is_empty() {
            return Err("server.listen_address must not be empty".into());
        }
        if self.relay.buffer_size == 0 || self.relay.buffer_size > MAX_BUFFER_SIZE {
            return Err(format!(
                "relay.buffer_size must be between 1 and {} (got {})",
                MAX_BUFFER_SIZE, self.relay.buffer_size
            ));
        }
        if self.server.backlog == 0 {
            return Err("server.backlog must be at least 1".into());
        }
        Ok(())
    }
}

/// Server listener configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address to listen on
    #[serde(default = "default_listen_address")]
    pub listen_address: String,
    /// Port to listen on (0 = OS-assigned)
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
    /// Listen backlog
    #[serde(default = "default_backlog")]
    pub backlog: u32,
    /// Outbound connect timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Maximum number of concurrent sessions (0 = unlimited)
    #[serde(default)]
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
            listen_port: default_listen_port(),
            backlog: default_backlog(),
            connect_timeout_secs: default_connect_timeout(),
            max_connections: 0,
        }
    }
}

/// Remote endpoint configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteConfig {
    /// Remote host name or IP
    #[serde(default = "default_remote_host")]
    pub host: String,
    /// Remote port
    #[serde(default = "default_remote_port")]
    pub port: u16,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            host: default_remote_host(),
            port: default_remote_port(),
        }
    }
}

/// Forwarding loop configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    /// Maximum bytes per read
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    /// Idle timeout per direction in seconds (0 = disabled)
    #[serde(default)]
    pub idle_timeout_secs: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            buffer_size: default_buffer_size(),
            idle_timeout_secs: 0,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Whether to log a hex record for every forwarded chunk
    #[serde(default = "default_true")]
    pub frames: bool,
    /// Whether the log formatter uses ANSI colours (level names, timestamps)
    #[serde(default = "default_true")]
    pub color: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            frames: true,
            color: true,
        }
    }
}

fn default_listen_address() -> String {
    "0.0.0.0".to_string()
}

fn default_listen_port() -> u16 {
    6000
}

fn default_backlog() -> u32 {
    5
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_remote_host() -> String {
    "freechess.org".to_string()
}

fn default_remote_port() -> u16 {
    5000
}

fn default_buffer_size() -> usize {
    4096
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}
