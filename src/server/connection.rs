//! Relay connections and their close handles.
//!
//! A [`Connection`] is one TCP stream of a session, either the accepted client
//! or the outbound remote. Its [`CloseHandle`] can be cloned and handed to
//! other tasks; closing through it shuts the socket down in both directions,
//! so any task blocked reading the stream sees EOF and any task writing to it
//! gets an error. This is the only signal used to stop a session.

use std::net::{Shutdown, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use socket2::{SockRef, Socket};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::error::{RelayError, Result};

/// Which end of the session a connection belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// Accepted inbound connection
    Client,
    /// Outbound connection to the remote
    Remote,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Client => f.write_str("client"),
            Self::Remote => f.write_str("remote"),
        }
    }
}

/// An established TCP stream belonging to a session
#[derive(Debug)]
pub struct Connection {
    stream: TcpStream,
    close_handle: CloseHandle,
}

impl Connection {
    /// Wrap an established stream.
    pub fn new(stream: TcpStream, peer_addr: SocketAddr, side: Side) -> Result<Self> {
        // A duplicate descriptor lets other tasks shut the socket down after
        // the stream itself has been split and moved into the forwarders.
        let socket = SockRef::from(&stream).try_clone()?;
        Ok(Self {
            stream,
            close_handle: CloseHandle {
                inner: Arc::new(CloseInner {
                    socket,
                    peer_addr,
                    side,
                    closed: AtomicBool::new(false),
                }),
            },
        })
    }

    /// Open an outbound connection to `host:port`, giving up after `connect_timeout`.
    ///
    /// A zero timeout waits for the OS connect timeout.
    pub async fn connect(host: &str, port: u16, connect_timeout: Duration) -> Result<Self> {
        let addr = format!("{}:{}", host, port);
        let connecting = TcpStream::connect((host, port));

        let stream = if connect_timeout.is_zero() {
            connecting.await
        } else {
            timeout(connect_timeout, connecting).await.map_err(|_| {
                RelayError::Timeout(format!(
                    "connecting to {} took longer than {:?}",
                    addr, connect_timeout
                ))
            })?
        }
        .map_err(|source| RelayError::Connect {
            addr: addr.clone(),
            source,
        })?;

        let peer_addr = stream.peer_addr()?;
        Self::new(stream, peer_addr, Side::Remote)
    }

    /// Address of the peer
    pub fn peer_addr(&self) -> SocketAddr {
        self.close_handle.peer_addr()
    }

    /// Which end of the session this is
    pub fn side(&self) -> Side {
        self.close_handle.side()
    }

    /// A handle that can close this connection from another task
    pub fn close_handle(&self) -> CloseHandle {
        self.close_handle.clone()
    }

    /// Close the connection in both directions
    pub fn close(&self) -> bool {
        self.close_handle.close()
    }

    /// Whether the connection has been closed
    pub fn is_closed(&self) -> bool {
        self.close_handle.is_closed()
    }

    /// Split into independently owned read and write halves.
    pub fn into_split(self) -> (OwnedReadHalf, OwnedWriteHalf) {
        self.stream.into_split()
    }
}

/// Cloneable handle that closes a [`Connection`]
#[derive(Debug, Clone)]
pub struct CloseHandle {
    inner: Arc<CloseInner>,
}

#[derive(Debug)]
struct CloseInner {
    socket: Socket,
    peer_addr: SocketAddr,
    side: Side,
    closed: AtomicBool,
}

impl CloseHandle {
    /// Shut the socket down in both directions.
    ///
    /// Idempotent. Returns `true` only for the call that actually closed it.
    pub fn close(&self) -> bool {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        match self.inner.socket.shutdown(Shutdown::Both) {
            Ok(()) => trace!("Closed {} connection {}", self.inner.side, self.inner.peer_addr),
            // Peer already tore the connection down
            Err(e) => trace!(
                "Shutdown of {} connection {}: {}",
                self.inner.side,
                self.inner.peer_addr,
                e
            ),
        }
        true
    }

    /// Whether [`close`](Self::close) has been called
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Address of the peer
    pub fn peer_addr(&self) -> SocketAddr {
        self.inner.peer_addr
    }

    /// Which end of the session this is
    pub fn side(&self) -> Side {
        self.inner.side
    }
}
