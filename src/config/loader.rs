//! Configuration loader

use super::Config;
use crate::error::{RelayError, Result};
use std::path::Path;

/// Load configuration from a YAML file
///
/// Also applies HEXRELAY_* env var overrides after loading.
pub fn load_config(path: &Path) -> Result<Config> {
    let contents = std::fs::read_to_string(path)?;
    load_config_from_str(&contents)
}

/// Load configuration from a YAML string (useful for testing)
///
/// Also applies HEXRELAY_* env var overrides after loading.
pub fn load_config_from_str(yaml: &str) -> Result<Config> {
    let mut config: Config = serde_yaml::from_str(yaml)?;
    resolve_config_env_vars(&mut config);
    apply_env_overrides(&mut config);
    config.validate().map_err(RelayError::Config)?;
    Ok(config)
}

/// Apply HEXRELAY_* environment variable overrides to a config.
///
/// Any set env var overrides the corresponding config value. Values that
/// fail to parse are ignored.
///
/// Supported env vars:
/// - `HEXRELAY_LISTEN_ADDRESS` - Override listen address
/// - `HEXRELAY_LISTEN_PORT` - Override listen port
/// - `HEXRELAY_REMOTE_HOST` - Override remote host
/// - `HEXRELAY_REMOTE_PORT` - Override remote port
/// - `HEXRELAY_LOG_LEVEL` - Override log level
/// - `HEXRELAY_CONNECT_TIMEOUT_SECS` - Override connect timeout
/// - `HEXRELAY_MAX_CONNECTIONS` - Override max concurrent sessions
pub fn apply_env_overrides(config: &mut Config) {
    if let Ok(val) = std::env::var("HEXRELAY_LISTEN_ADDRESS") {
        debug!("Overriding listen_address from HEXRELAY_LISTEN_ADDRESS");
        config.server.listen_address = val;
    }
    if let Ok(val) = std::env::var("HEXRELAY_LISTEN_PORT") {
        if let Ok(port) = val.parse::<u16>() {
            debug!("Overriding listen_port from HEXRELAY_LISTEN_PORT");
            config.server.listen_port = port;
        }
    }
    if let Ok(val) = std::env::var("HEXRELAY_REMOTE_HOST") {
        debug!("Overriding remote host from HEXRELAY_REMOTE_HOST");
        config.remote.host = val;
    }
    if let Ok(val) = std::env::var("HEXRELAY_REMOTE_PORT") {
        if let Ok(port) = val.parse::<u16>() {
            debug!("Overriding remote port from HEXRELAY_REMOTE_PORT");
            config.remote.port = port;
        }
    }
    if let Ok(val) = std::env::var("HEXRELAY_LOG_LEVEL") {
        debug!("Overriding log level from HEXRELAY_LOG_LEVEL");
        config.logging.level = val;
    }
    if let Ok(val) = std::env::var("HEXRELAY_CONNECT_TIMEOUT_SECS") {
        if let Ok(secs) = val.parse::<u64>() {
            debug!("Overriding connect_timeout from HEXRELAY_CONNECT_TIMEOUT_SECS");
            config.server.connect_timeout_secs = secs;
        }
    }
    if let Ok(val) = std::env::var("HEXRELAY_MAX_CONNECTIONS") {
        if let Ok(max) = val.parse::<usize>() {
            debug!("Overriding max_connections from HEXRELAY_MAX_CONNECTIONS");
            config.server.max_connections = max;
        }
    }
}

/// Resolve environment variables in a string value
///
/// Supports two syntaxes:
/// - `${VAR_NAME}` - curly brace syntax
/// - `$VAR_NAME` - simple syntax (whole value must be the reference)
///
/// If the environment variable is not set, the original value is preserved.
fn resolve_env_var(value: &str) -> String {
    let var_name = if let Some(inner) = value.strip_prefix("${").and_then(|v| v.strip_suffix('}'))
    {
        inner
    } else if let Some(inner) = value.strip_prefix('$') {
        if inner.is_empty() || inner.contains(' ') {
            return value.to_string();
        }
        inner
    } else {
        return value.to_string();
    };

    match std::env::var(var_name) {
        Ok(env_value) => {
            debug!("Resolved env var {} from config", var_name);
            env_value
        }
        Err(_) => {
            debug!("Env var {} not set, keeping original value", var_name);
            value.to_string()
        }
    }
}

/// Resolve environment variables in all config fields that support it
fn resolve_config_env_vars(config: &mut Config) {
    config.remote.host = resolve_env_var(&config.remote.host);
    config.server.listen_address = resolve_env_var(&config.server.listen_address);
}
