//! hexrelay - transparent TCP relay with per-chunk hex logging
//!
//! This binary listens on a local port, relays every client to one fixed
//! remote endpoint, and logs each forwarded chunk as hex plus ASCII,
//! highlighting 0xFF (Telnet IAC) bytes.

use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use hexrelay::{config, Config, Listener, Result};

const SESSION_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Parser)]
#[command(name = "hexrelay")]
#[command(version)]
#[command(about = "Transparent TCP relay that hex-dumps every chunk it forwards")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override listen address
    #[arg(long)]
    listen_address: Option<String>,

    /// Override listen port
    #[arg(long)]
    listen_port: Option<u16>,

    /// Override remote host
    #[arg(long)]
    remote_host: Option<String>,

    /// Override remote port
    #[arg(long)]
    remote_port: Option<u16>,

    /// Enable verbose/debug logging
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn load_config(&self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => config::load_config(path)?,
            None => {
                let mut config = Config::default();
                config::apply_env_overrides(&mut config);
                config
            }
        };

        if let Some(addr) = &self.listen_address {
            config.server.listen_address = addr.clone();
        }
        if let Some(port) = self.listen_port {
            config.server.listen_port = port;
        }
        if let Some(host) = &self.remote_host {
            config.remote.host = host.clone();
        }
        if let Some(port) = self.remote_port {
            config.remote.port = port;
        }

        config.validate().map_err(hexrelay::RelayError::Config)?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = cli.load_config()?;

    // Initialize logging
    // Priority: --verbose flag, then RUST_LOG env var, then config level
    let log_level = if cli.verbose {
        "debug".to_string()
    } else {
        std::env::var("RUST_LOG").unwrap_or_else(|_| config.logging.level.clone())
    };
    tracing_subscriber::fmt()
        .with_env_filter(&log_level)
        .with_writer(std::io::stderr)
        .with_ansi(config.logging.color)
        .init();

    info!("Starting hexrelay v{}", env!("CARGO_PKG_VERSION"));
    if let Some(path) = &cli.config {
        info!("Loaded configuration from {:?}", path);
    }
    info!(
        "Relaying {} -> {}",
        config.listen_addr(),
        config.remote_addr()
    );

    let config = Arc::new(config);

    // Create shutdown channel
    let (shutdown_tx, shutdown_rx) = broadcast::channel::<()>(1);

    let listener = Listener::bind(Arc::clone(&config), shutdown_rx).await?;
    let stats = listener.stats();

    // Spawn the listener task
    let listener_handle = tokio::spawn(async move {
        if let Err(e) = listener.run().await {
            error!("Listener error: {}", e);
        }
    });

    // Wait for shutdown signal
    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate_signal() => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }

    // Stops the listener and closes every live session's sockets
    let _ = shutdown_tx.send(());
    join_listener(listener_handle).await;

    // Give sessions a moment to finish closing their sockets
    let drained = tokio::time::timeout(SESSION_DRAIN_TIMEOUT, async {
        while stats.connections_active.load(Ordering::Relaxed) > 0 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    if drained.is_err() {
        warn!(
            "{} sessions still open at exit",
            stats.connections_active.load(Ordering::Relaxed)
        );
    }

    info!("Proxy shutting down. {}", stats);
    Ok(())
}

/// Wait for the listener task; returns false if it panicked or was cancelled.
async fn join_listener(handle: JoinHandle<()>) -> bool {
    match handle.await {
        Ok(()) => true,
        Err(e) => {
            error!("Listener task failed: {}", e);
            false
        }
    }
}

#[cfg(unix)]
async fn terminate_signal() {
    match signal::unix::signal(signal::unix::SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            warn!("Failed to install SIGTERM handler: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate_signal() {
    std::future::pending::<()>().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_join_listener_reports_panic() {
        let handle = tokio::spawn(async { panic!("accept loop blew up") });
        assert!(!join_listener(handle).await);
    }

    #[tokio::test]
    async fn test_join_listener_clean_exit() {
        let handle = tokio::spawn(async {});
        assert!(join_listener(handle).await);
    }
}
