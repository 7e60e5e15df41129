//! Error types for hexrelay

use thiserror::Error;

/// Main error type for the relay
#[derive(Error, Debug)]
pub enum RelayError {
    /// I/O error (network, file)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// The listening socket could not be set up
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        /// Address we tried to listen on
        addr: String,
        /// Underlying socket error
        #[source]
        source: std::io::Error,
    },

    /// Outbound connection to the remote failed
    #[error("Failed to connect to {addr}: {source}")]
    Connect {
        /// Remote address we tried to reach
        addr: String,
        /// Underlying socket error
        #[source]
        source: std::io::Error,
    },

    /// Timeout error
    #[error("Timeout: {0}")]
    Timeout(String),
}

/// Result type alias for RelayError
pub type Result<T> = std::result::Result<T, RelayError>;

impl From<serde_yaml::Error> for RelayError {
    fn from(err: serde_yaml::Error) -> Self {
        RelayError::Config(err.to_string())
    }
}
