//! Session relay for bidirectional traffic forwarding
//!
//! A [`Session`] pairs the client and remote [`Connection`]s and runs one
//! forwarder per direction. The forwarders never talk to each other: when
//! one of them stops, both connections are closed, and the other one sees
//! EOF or a write error and stops too.

use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::broadcast;
use tokio::time::timeout;
use tracing::Instrument;

use super::super::connection::{CloseHandle, Connection};
use super::super::listener::wait_for_shutdown;
use crate::config::Config;
use crate::frame_log::{log_frame, Direction, FrameOptions};

/// Default read size per chunk
pub const DEFAULT_BUFFER_SIZE: usize = 4096;

/// Forwarding options shared by both directions of a session
#[derive(Debug, Clone, Copy)]
pub struct RelayOptions {
    /// Maximum bytes read per chunk
    pub buffer_size: usize,
    /// Idle timeout per direction (zero = disabled)
    pub idle_timeout: Duration,
    /// Per-chunk logging
    pub frames: FrameOptions,
}

impl Default for RelayOptions {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            idle_timeout: Duration::ZERO,
            frames: FrameOptions::default(),
        }
    }
}

impl RelayOptions {
    /// Options taken from the `relay` and `logging` config sections
    pub fn from_config(config: &Config) -> Self {
        Self {
            buffer_size: config.relay.buffer_size,
            idle_timeout: config.idle_timeout(),
            frames: config.frame_options(),
        }
    }
}

/// Why a forwarder stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForwardEnd {
    /// Source performed an orderly shutdown (zero-length read)
    SourceClosed,
    /// Source stayed silent for longer than the idle timeout
    IdleTimeout(Duration),
    /// Reading from the source failed
    ReadError(String),
    /// Writing to the destination failed
    WriteError(String),
}

impl ForwardEnd {
    /// Whether the forwarder stopped because of an error
    pub fn is_error(&self) -> bool {
        matches!(self, Self::ReadError(_) | Self::WriteError(_))
    }

    /// Whether the error came from a socket this session had already closed.
    ///
    /// A read fails after the source was shut down, a write after the
    /// destination was. Any other error is a real forwarding failure.
    pub fn caused_by_close(&self, source_closed: bool, destination_closed: bool) -> bool {
        match self {
            Self::ReadError(_) => source_closed,
            Self::WriteError(_) => destination_closed,
            Self::SourceClosed | Self::IdleTimeout(_) => false,
        }
    }

    /// Human-readable description
    pub fn message(&self) -> String {
        match self {
            Self::SourceClosed => "source closed".to_string(),
            Self::IdleTimeout(duration) => format!("idle for {:?}", duration),
            Self::ReadError(e) => format!("read error: {}", e),
            Self::WriteError(e) => format!("write error: {}", e),
        }
    }
}

/// What one forwarder did before it stopped
#[derive(Debug, Clone)]
pub struct ForwardOutcome {
    /// Direction this forwarder handled
    pub direction: Direction,
    /// Bytes written to the destination
    pub bytes: u64,
    /// Number of chunks forwarded
    pub chunks: u64,
    /// Chunks that contained the sentinel byte
    pub sentinel_chunks: u64,
    /// Why it stopped
    pub end: ForwardEnd,
}

impl ForwardOutcome {
    fn new(direction: Direction) -> Self {
        Self {
            direction,
            bytes: 0,
            chunks: 0,
            sentinel_chunks: 0,
            end: ForwardEnd::SourceClosed,
        }
    }
}

/// Copy chunks from `reader` to `writer`, logging each one.
///
/// Runs until the reader returns EOF, the idle timeout expires, or an I/O
/// error occurs on either side. Errors are reported in the outcome, never
/// returned.
pub async fn copy_with_logging<R, W>(
    mut reader: R,
    mut writer: W,
    direction: Direction,
    options: &RelayOptions,
) -> ForwardOutcome
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; options.buffer_size.max(1)];
    let mut outcome = ForwardOutcome::new(direction);

    loop {
        let read = if options.idle_timeout.is_zero() {
            reader.read(&mut buf).await
        } else {
            match timeout(options.idle_timeout, reader.read(&mut buf)).await {
                Ok(read) => read,
                Err(_) => {
                    outcome.end = ForwardEnd::IdleTimeout(options.idle_timeout);
                    break;
                }
            }
        };

        let n = match read {
            Ok(0) => {
                outcome.end = ForwardEnd::SourceClosed;
                break;
            }
            Ok(n) => n,
            Err(e) => {
                outcome.end = ForwardEnd::ReadError(describe_io_error(&e));
                break;
            }
        };

        let chunk = &buf[..n];
        if log_frame(chunk, direction, &options.frames) {
            outcome.sentinel_chunks += 1;
        }

        if let Err(e) = writer.write_all(chunk).await {
            outcome.end = ForwardEnd::WriteError(describe_io_error(&e));
            break;
        }
        if let Err(e) = writer.flush().await {
            outcome.end = ForwardEnd::WriteError(describe_io_error(&e));
            break;
        }
        outcome.bytes += n as u64;
        outcome.chunks += 1;
    }

    outcome
}

fn describe_io_error(e: &std::io::Error) -> String {
    match e.kind() {
        std::io::ErrorKind::ConnectionReset => "connection reset".to_string(),
        std::io::ErrorKind::BrokenPipe => "broken pipe".to_string(),
        _ => e.to_string(),
    }
}

/// Run one direction of a session.
///
/// On exit for any reason the source connection is closed. Errors are logged
/// as warnings unless they hit a socket the session had already closed.
pub async fn forward<R, W>(
    source: R,
    destination: W,
    source_handle: CloseHandle,
    destination_handle: CloseHandle,
    direction: Direction,
    options: RelayOptions,
) -> ForwardOutcome
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    trace!("{}: forwarder started", direction.as_str());
    let outcome = copy_with_logging(source, destination, direction, &options).await;

    match &outcome.end {
        ForwardEnd::SourceClosed => {
            debug!("{}: EOF after {} bytes", direction.as_str(), outcome.bytes);
        }
        ForwardEnd::IdleTimeout(duration) => {
            info!(
                "{}: idle timeout ({:?}) after {} bytes",
                direction.as_str(),
                duration,
                outcome.bytes
            );
        }
        end if end.caused_by_close(source_handle.is_closed(), destination_handle.is_closed()) => {
            debug!(
                "{}: stopped during session wind-down ({})",
                direction.as_str(),
                end.message()
            );
        }
        end => {
            warn!(
                "Error during {} forwarding: {}",
                direction.as_str(),
                end.message()
            );
        }
    }

    source_handle.close();
    outcome
}

/// Totals for a finished session
#[derive(Debug, Clone, Default)]
pub struct SessionSummary {
    /// Client to remote forwarder result (None if the task failed)
    pub client_to_server: Option<ForwardOutcome>,
    /// Remote to client forwarder result (None if the task failed)
    pub server_to_client: Option<ForwardOutcome>,
    /// Whether the session was stopped by process shutdown
    pub shutdown: bool,
}

impl SessionSummary {
    /// Bytes forwarded client to remote
    pub fn bytes_client_to_server(&self) -> u64 {
        self.client_to_server.as_ref().map_or(0, |o| o.bytes)
    }

    /// Bytes forwarded remote to client
    pub fn bytes_server_to_client(&self) -> u64 {
        self.server_to_client.as_ref().map_or(0, |o| o.bytes)
    }

    /// Chunks in either direction that contained the sentinel byte
    pub fn sentinel_chunks(&self) -> u64 {
        [&self.client_to_server, &self.server_to_client]
            .into_iter()
            .flatten()
            .map(|o| o.sentinel_chunks)
            .sum()
    }
}

/// A relay session between client and remote
pub struct Session {
    /// Accepted client connection
    client: Connection,
    /// Outbound remote connection
    remote: Connection,
    /// Forwarding options
    options: RelayOptions,
}

impl Session {
    /// Create a new relay session
    pub fn new(client: Connection, remote: Connection, options: RelayOptions) -> Self {
        Self {
            client,
            remote,
            options,
        }
    }

    /// Run the bidirectional relay until both forwarders have stopped.
    ///
    /// Whichever forwarder stops first closes both connections, which
    /// unblocks the other. A shutdown signal closes both connections too.
    pub async fn relay(self, mut shutdown_rx: broadcast::Receiver<()>) -> SessionSummary {
        let client_handle = self.client.close_handle();
        let remote_handle = self.remote.close_handle();
        let (client_read, client_write) = self.client.into_split();
        let (remote_read, remote_write) = self.remote.into_split();
        let options = self.options;

        let client_to_server = {
            let (source, destination) = (client_handle.clone(), remote_handle.clone());
            tokio::spawn(
                async move {
                    let outcome = forward(
                        client_read,
                        remote_write,
                        source,
                        destination.clone(),
                        Direction::ClientToServer,
                        options,
                    )
                    .await;
                    destination.close();
                    outcome
                }
                .in_current_span(),
            )
        };

        let server_to_client = {
            let (source, destination) = (remote_handle.clone(), client_handle.clone());
            tokio::spawn(
                async move {
                    let outcome = forward(
                        remote_read,
                        client_write,
                        source,
                        destination.clone(),
                        Direction::ServerToClient,
                        options,
                    )
                    .await;
                    destination.close();
                    outcome
                }
                .in_current_span(),
            )
        };

        let both = async { tokio::join!(client_to_server, server_to_client) };
        tokio::pin!(both);

        let mut shutdown = false;
        let (c2s, s2c) = tokio::select! {
            results = &mut both => results,
            _ = wait_for_shutdown(&mut shutdown_rx) => {
                debug!("Shutdown signal received, closing session connections");
                shutdown = true;
                client_handle.close();
                remote_handle.close();
                (&mut both).await
            }
        };

        // Both halves are dropped with their tasks; make sure the sockets are
        // shut down even if a task panicked.
        client_handle.close();
        remote_handle.close();

        SessionSummary {
            client_to_server: c2s
                .map_err(|e| error!("C2S forwarder task failed: {}", e))
                .ok(),
            server_to_client: s2c
                .map_err(|e| error!("S2C forwarder task failed: {}", e))
                .ok(),
            shutdown,
        }
    }
}
