//! Per-connection session lifecycle.
//!
//! [`SessionManager`] owns one accepted client connection. It opens the
//! outbound connection to the configured remote, runs the relay until both
//! directions have stopped, and records the session in the listener
//! statistics. Nothing is returned to the caller; every failure stays inside
//! the session.

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::Instrument;
use uuid::Uuid;

use super::super::connection::Connection;
use super::super::listener::{wait_for_shutdown, ListenerStats};
use super::relay::{RelayOptions, Session, SessionSummary};
use crate::config::Config;

/// Drives one client from connect to disconnect.
pub struct SessionManager {
    /// Unique session identifier, attached to every log line of the session
    session_id: Uuid,
    /// Accepted client connection
    client: Connection,
    /// Shared configuration
    config: Arc<Config>,
    /// Listener statistics to update when the session ends
    stats: Arc<ListenerStats>,
    /// Shutdown signal receiver
    shutdown_rx: broadcast::Receiver<()>,
}

impl SessionManager {
    /// Create a session for an accepted client connection.
    pub fn new(
        client: Connection,
        config: Arc<Config>,
        stats: Arc<ListenerStats>,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            client,
            config,
            stats,
            shutdown_rx,
        }
    }

    /// Session identifier
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Run the session to completion.
    pub async fn run(self) {
        let span = tracing::info_span!(
            target: "hexrelay",
            "session",
            id = %self.session_id,
            client = %self.client.peer_addr(),
        );
        self.run_in_span().instrument(span).await
    }

    async fn run_in_span(mut self) {
        let remote_addr = self.config.remote_addr();
        let connect = Connection::connect(
            &self.config.remote.host,
            self.config.remote.port,
            self.config.connect_timeout(),
        );

        let remote = tokio::select! {
            result = connect => result,
            _ = wait_for_shutdown(&mut self.shutdown_rx) => {
                debug!("Shutdown while connecting to {}", remote_addr);
                self.client.close();
                info!("Client session closed");
                return;
            }
        };

        let remote = match remote {
            Ok(remote) => {
                info!("Connected to remote host {}", remote_addr);
                remote
            }
            Err(e) => {
                warn!("Connection to remote host failed: {}", e);
                self.stats.record_connect_failure();
                self.client.close();
                info!("Client session closed");
                return;
            }
        };

        let options = RelayOptions::from_config(&self.config);
        let summary = Session::new(self.client, remote, options)
            .relay(self.shutdown_rx)
            .await;

        self.stats.record_session(&summary);
        log_summary(&summary);
    }
}

fn log_summary(summary: &SessionSummary) {
    let ends = [&summary.client_to_server, &summary.server_to_client]
        .into_iter()
        .flatten()
        .map(|o| format!("{} {}", o.direction.as_str(), o.end.message()))
        .collect::<Vec<_>>()
        .join(", ");

    info!(
        "Client session closed: C2S {} bytes, S2C {} bytes, {} sentinel chunks{} ({})",
        summary.bytes_client_to_server(),
        summary.bytes_server_to_client(),
        summary.sentinel_chunks(),
        if summary.shutdown { ", stopped by shutdown" } else { "" },
        ends
    );
}
