//! TCP listener for incoming client connections

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::TcpListener;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, Semaphore};

use super::connection::{Connection, Side};
use super::session::{SessionManager, SessionSummary};
use crate::config::Config;
use crate::error::{RelayError, Result};

/// Listener statistics
#[derive(Debug, Default)]
pub struct ListenerStats {
    /// Total connections accepted
    pub connections_accepted: AtomicU64,
    /// Currently active sessions
    pub connections_active: AtomicU64,
    /// Connections rejected due to the session limit
    pub connections_rejected: AtomicU64,
    /// Sessions that ended because the remote could not be reached
    pub connect_failures: AtomicU64,
    /// Sessions that relayed traffic and then ended
    pub sessions_completed: AtomicU64,
    /// Bytes forwarded client to remote
    pub bytes_client_to_server: AtomicU64,
    /// Bytes forwarded remote to client
    pub bytes_server_to_client: AtomicU64,
    /// Forwarded chunks that contained the sentinel byte
    pub sentinel_chunks: AtomicU64,
}

impl ListenerStats {
    /// Count a session whose outbound connect failed
    pub fn record_connect_failure(&self) {
        self.connect_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Add a finished session's totals
    pub fn record_session(&self, summary: &SessionSummary) {
        self.sessions_completed.fetch_add(1, Ordering::Relaxed);
        self.bytes_client_to_server
            .fetch_add(summary.bytes_client_to_server(), Ordering::Relaxed);
        self.bytes_server_to_client
            .fetch_add(summary.bytes_server_to_client(), Ordering::Relaxed);
        self.sentinel_chunks
            .fetch_add(summary.sentinel_chunks(), Ordering::Relaxed);
    }
}

impl std::fmt::Display for ListenerStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "accepted: {}, active: {}, rejected: {}, connect failures: {}, \
             C2S bytes: {}, S2C bytes: {}, sentinel chunks: {}",
            self.connections_accepted.load(Ordering::Relaxed),
            self.connections_active.load(Ordering::Relaxed),
            self.connections_rejected.load(Ordering::Relaxed),
            self.connect_failures.load(Ordering::Relaxed),
            self.bytes_client_to_server.load(Ordering::Relaxed),
            self.bytes_server_to_client.load(Ordering::Relaxed),
            self.sentinel_chunks.load(Ordering::Relaxed),
        )
    }
}

/// Wait until a shutdown is broadcast.
///
/// If every sender is gone no shutdown can arrive any more, so this never
/// completes.
pub(crate) async fn wait_for_shutdown(shutdown_rx: &mut broadcast::Receiver<()>) {
    match shutdown_rx.recv().await {
        Ok(()) | Err(RecvError::Lagged(_)) => {}
        Err(RecvError::Closed) => std::future::pending::<()>().await,
    }
}

/// TCP listener that accepts client connections and starts a session for each
pub struct Listener {
    /// TCP listener
    listener: TcpListener,
    /// Configuration
    config: Arc<Config>,
    /// Statistics
    stats: Arc<ListenerStats>,
    /// Shutdown signal receiver
    shutdown_rx: broadcast::Receiver<()>,
    /// Session limit semaphore (None = unlimited)
    connection_semaphore: Option<Arc<Semaphore>>,
}

impl Listener {
    /// Bind to the configured address and create a new listener.
    pub async fn bind(config: Arc<Config>, shutdown_rx: broadcast::Receiver<()>) -> Result<Self> {
        let addr = config.listen_addr();
        let socket_addr = resolve_listen_addr(&addr).await?;
        let listener = bind_socket(socket_addr, config.server.backlog).map_err(|source| {
            RelayError::Bind {
                addr: addr.clone(),
                source,
            }
        })?;
        let local_addr = listener.local_addr()?;

        // Create session limit semaphore (0 = unlimited)
        let connection_semaphore = if config.server.max_connections > 0 {
            info!(
                "Listening on {} (max {} sessions), forwarding to {}",
                local_addr,
                config.server.max_connections,
                config.remote_addr()
            );
            Some(Arc::new(Semaphore::new(config.server.max_connections)))
        } else {
            info!(
                "Listening on {}, forwarding to {}",
                local_addr,
                config.remote_addr()
            );
            None
        };

        Ok(Self {
            listener,
            config,
            stats: Arc::new(ListenerStats::default()),
            shutdown_rx,
            connection_semaphore,
        })
    }

    /// Get listener statistics
    pub fn stats(&self) -> Arc<ListenerStats> {
        Arc::clone(&self.stats)
    }

    /// Get the local address the listener is bound to.
    ///
    /// This is useful when binding to port 0 to get an OS-assigned port.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Run the accept loop until the shutdown signal arrives
    pub async fn run(mut self) -> Result<()> {
        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            // Try to acquire a session permit if limiting is enabled
                            let permit = if let Some(ref semaphore) = self.connection_semaphore {
                                match semaphore.clone().try_acquire_owned() {
                                    Ok(permit) => Some(permit),
                                    Err(_) => {
                                        warn!(
                                            "Connection from {} rejected: max sessions ({}) reached",
                                            addr,
                                            self.config.server.max_connections
                                        );
                                        self.stats.connections_rejected.fetch_add(1, Ordering::Relaxed);
                                        drop(stream);
                                        continue;
                                    }
                                }
                            } else {
                                None
                            };

                            info!("Accepted connection from {}", addr);
                            self.stats.connections_accepted.fetch_add(1, Ordering::Relaxed);

                            let client = match Connection::new(stream, addr, Side::Client) {
                                Ok(client) => client,
                                Err(e) => {
                                    warn!("Dropping connection from {}: {}", addr, e);
                                    continue;
                                }
                            };

                            let session = SessionManager::new(
                                client,
                                Arc::clone(&self.config),
                                Arc::clone(&self.stats),
                                self.shutdown_rx.resubscribe(),
                            );
                            let stats = Arc::clone(&self.stats);
                            stats.connections_active.fetch_add(1, Ordering::Relaxed);

                            tokio::spawn(async move {
                                // Hold permit for session lifetime
                                let _permit = permit;
                                session.run().await;
                                stats.connections_active.fetch_sub(1, Ordering::Relaxed);
                                debug!("Connection from {} finished", addr);
                            });
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                            // Brief delay before retrying
                            tokio::time::sleep(Duration::from_millis(100)).await;
                        }
                    }
                }

                _ = wait_for_shutdown(&mut self.shutdown_rx) => {
                    info!("Shutdown signal received, stopping listener");
                    break;
                }
            }
        }

        info!("Listener stopped. {}", self.stats);
        Ok(())
    }
}

async fn resolve_listen_addr(addr: &str) -> Result<SocketAddr> {
    let mut addrs = tokio::net::lookup_host(addr)
        .await
        .map_err(|source| RelayError::Bind {
            addr: addr.to_string(),
            source,
        })?;
    addrs
        .next()
        .ok_or_else(|| RelayError::Config(format!("listen address {} did not resolve", addr)))
}

/// Create the listening socket with SO_REUSEADDR and the configured backlog.
fn bind_socket(addr: SocketAddr, backlog: u32) -> std::io::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(i32::try_from(backlog).unwrap_or(i32::MAX))?;
    TcpListener::from_std(socket.into())
}
