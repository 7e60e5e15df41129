//! Integration tests for hexrelay
//!
//! Each test starts a relay on an OS-assigned loopback port in front of a
//! local stand-in for the remote, then drives real client sockets through it.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

use hexrelay::config::load_config_from_str;
use hexrelay::frame_log::parse_hex_dump;
use hexrelay::{Listener, ListenerStats};

/// Default test timeout
const TEST_TIMEOUT: Duration = Duration::from_secs(10);

struct RunningRelay {
    addr: SocketAddr,
    stats: Arc<ListenerStats>,
    shutdown_tx: broadcast::Sender<()>,
    handle: JoinHandle<()>,
}

/// Start the relay in background, forwarding to `remote_port` on loopback
async fn start_relay(remote_port: u16) -> RunningRelay {
    let yaml = format!(
        r#"
server:
  listen_address: "127.0.0.1"
  listen_port: 0
  connect_timeout_secs: 5

remote:
  host: "127.0.0.1"
  port: {}

logging:
  level: "info"
  frames: true
  color: false
"#,
        remote_port
    );

    let config = Arc::new(load_config_from_str(&yaml).expect("config"));
    let (shutdown_tx, shutdown_rx) = broadcast::channel::<()>(1);

    let listener = Listener::bind(config, shutdown_rx).await.expect("bind");
    let addr = listener.local_addr().unwrap();
    let stats = listener.stats();

    let handle = tokio::spawn(async move {
        let _ = listener.run().await;
    });

    RunningRelay {
        addr,
        stats,
        shutdown_tx,
        handle,
    }
}

/// In-memory sink for a fmt subscriber
#[derive(Clone, Default)]
struct CapturedLog(Arc<Mutex<Vec<u8>>>);

impl CapturedLog {
    fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for CapturedLog {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Wait until `check` holds or the test timeout expires
async fn eventually(check: impl Fn() -> bool) -> bool {
    timeout(TEST_TIMEOUT, async {
        while !check() {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .is_ok()
}

/// Read until EOF; a reset also counts as closed
async fn read_until_closed(stream: &mut TcpStream) -> Vec<u8> {
    let mut received = Vec::new();
    let _ = timeout(TEST_TIMEOUT, stream.read_to_end(&mut received))
        .await
        .expect("connection was not closed in time");
    received
}

#[tokio::test]
async fn test_client_bytes_reach_remote_unmodified() {
    let remote = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let relay = start_relay(remote.local_addr().unwrap().port()).await;

    let mut client = TcpStream::connect(relay.addr).await.unwrap();
    let (mut remote_side, _) = timeout(TEST_TIMEOUT, remote.accept()).await.unwrap().unwrap();

    client.write_all(b"\x01\x02\xff\x03").await.unwrap();
    client.shutdown().await.unwrap();

    let received = read_until_closed(&mut remote_side).await;
    assert_eq!(received, b"\x01\x02\xff\x03");

    let stats = Arc::clone(&relay.stats);
    assert!(eventually(|| stats.sessions_completed.load(Ordering::Relaxed) == 1).await);
    assert_eq!(relay.stats.bytes_client_to_server.load(Ordering::Relaxed), 4);
    assert_eq!(relay.stats.sentinel_chunks.load(Ordering::Relaxed), 1);
}

#[tokio::test]
async fn test_remote_bytes_reach_client_unmodified() {
    let remote = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let relay = start_relay(remote.local_addr().unwrap().port()).await;

    let mut client = TcpStream::connect(relay.addr).await.unwrap();
    let (mut remote_side, _) = timeout(TEST_TIMEOUT, remote.accept()).await.unwrap().unwrap();

    remote_side.write_all(b"hello\r\n").await.unwrap();
    let mut buf = [0u8; 7];
    timeout(TEST_TIMEOUT, client.read_exact(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&buf, b"hello\r\n");

    let stats = Arc::clone(&relay.stats);
    drop(remote_side);
    let rest = read_until_closed(&mut client).await;
    assert!(rest.is_empty());
    assert!(eventually(|| stats.sessions_completed.load(Ordering::Relaxed) == 1).await);
    assert_eq!(stats.bytes_server_to_client.load(Ordering::Relaxed), 7);
    assert_eq!(stats.sentinel_chunks.load(Ordering::Relaxed), 0);
}

#[tokio::test]
async fn test_unreachable_remote_closes_client() {
    // Reserve a port, then free it so connects are refused
    let placeholder = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead_port = placeholder.local_addr().unwrap().port();
    drop(placeholder);

    let relay = start_relay(dead_port).await;
    let mut client = TcpStream::connect(relay.addr).await.unwrap();

    let received = read_until_closed(&mut client).await;
    assert!(received.is_empty());

    let stats = Arc::clone(&relay.stats);
    assert!(eventually(|| stats.connect_failures.load(Ordering::Relaxed) == 1).await);
    assert!(eventually(|| stats.connections_active.load(Ordering::Relaxed) == 0).await);
}

#[tokio::test]
async fn test_client_close_closes_remote() {
    let remote = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let relay = start_relay(remote.local_addr().unwrap().port()).await;

    let mut client = TcpStream::connect(relay.addr).await.unwrap();
    let (mut remote_side, _) = timeout(TEST_TIMEOUT, remote.accept()).await.unwrap().unwrap();

    client.write_all(b"bye").await.unwrap();
    drop(client);

    // Remote never closes on its own; the relay must close it
    let received = read_until_closed(&mut remote_side).await;
    assert_eq!(received, b"bye");

    let stats = Arc::clone(&relay.stats);
    assert!(eventually(|| stats.connections_active.load(Ordering::Relaxed) == 0).await);
}

#[tokio::test]
async fn test_remote_close_closes_client() {
    let remote = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let relay = start_relay(remote.local_addr().unwrap().port()).await;

    let mut client = TcpStream::connect(relay.addr).await.unwrap();
    let (remote_side, _) = timeout(TEST_TIMEOUT, remote.accept()).await.unwrap().unwrap();
    drop(remote_side);

    // Client never closes on its own; the relay must close it
    let received = read_until_closed(&mut client).await;
    assert!(received.is_empty());

    let stats = Arc::clone(&relay.stats);
    assert!(eventually(|| stats.connections_active.load(Ordering::Relaxed) == 0).await);
}

#[tokio::test]
async fn test_concurrent_sessions_do_not_mix() {
    const SESSIONS: usize = 8;

    // Echo remote: every accepted connection echoes its own bytes back
    let remote = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let remote_port = remote.local_addr().unwrap().port();
    tokio::spawn(async move {
        while let Ok((stream, _)) = remote.accept().await {
            tokio::spawn(async move {
                let (mut reader, mut writer) = stream.into_split();
                let _ = tokio::io::copy(&mut reader, &mut writer).await;
            });
        }
    });

    let relay = start_relay(remote_port).await;

    let mut clients = Vec::new();
    for id in 0..SESSIONS {
        let addr = relay.addr;
        clients.push(tokio::spawn(async move {
            let payload: Vec<u8> = (0..2048u32).map(|i| (i as usize * 31 + id) as u8).collect();
            let mut client = TcpStream::connect(addr).await.unwrap();
            let (mut reader, mut writer) = client.split();

            let mut echoed = vec![0u8; payload.len()];
            let (write_result, read_result) =
                tokio::join!(writer.write_all(&payload), reader.read_exact(&mut echoed));
            write_result.unwrap();
            read_result.unwrap();
            (payload, echoed)
        }));
    }

    for client in clients {
        let (payload, echoed) = timeout(TEST_TIMEOUT, client).await.unwrap().unwrap();
        assert_eq!(payload, echoed);
    }

    assert_eq!(
        relay.stats.connections_accepted.load(Ordering::Relaxed),
        SESSIONS as u64
    );
}

#[tokio::test]
async fn test_shutdown_closes_live_sessions() {
    let remote = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let relay = start_relay(remote.local_addr().unwrap().port()).await;

    let mut client = TcpStream::connect(relay.addr).await.unwrap();
    let (mut remote_side, _) = timeout(TEST_TIMEOUT, remote.accept()).await.unwrap().unwrap();

    relay.shutdown_tx.send(()).unwrap();

    timeout(TEST_TIMEOUT, relay.handle)
        .await
        .expect("listener did not stop")
        .unwrap();

    assert!(read_until_closed(&mut client).await.is_empty());
    assert!(read_until_closed(&mut remote_side).await.is_empty());
}

#[tokio::test]
async fn test_session_log_records() {
    let log = CapturedLog::default();
    let writer = log.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(true)
        .with_max_level(tracing::Level::INFO)
        .finish();
    // Current-thread runtime: every spawned session task logs on this thread
    let _guard = tracing::subscriber::set_default(subscriber);

    let remote = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let relay = start_relay(remote.local_addr().unwrap().port()).await;

    let mut client = TcpStream::connect(relay.addr).await.unwrap();
    let (mut remote_side, _) = timeout(TEST_TIMEOUT, remote.accept()).await.unwrap().unwrap();

    client.write_all(&[0x01, 0x02, 0xff, 0x03]).await.unwrap();
    let mut buf = [0u8; 4];
    timeout(TEST_TIMEOUT, remote_side.read_exact(&mut buf))
        .await
        .unwrap()
        .unwrap();

    remote_side.write_all(b"hello\r\n").await.unwrap();
    let mut buf = [0u8; 7];
    timeout(TEST_TIMEOUT, client.read_exact(&mut buf))
        .await
        .unwrap()
        .unwrap();

    let output = log.text();

    // Reassemble each direction from the logged hex lines
    let mut c2s = Vec::new();
    let mut s2c = Vec::new();
    let mut current = None;
    for line in output.lines() {
        if line.contains("[C2S -> ") {
            current = Some(true);
        } else if line.contains("[<- S2C ") {
            current = Some(false);
        } else if let Some(hex) = line.strip_prefix("Raw Hex: ") {
            let bytes = parse_hex_dump(hex).expect("logged hex line must re-parse");
            match current {
                Some(true) => c2s.extend(bytes),
                Some(false) => s2c.extend(bytes),
                None => panic!("hex line before any record header"),
            }
        }
    }
    assert_eq!(c2s, vec![0x01, 0x02, 0xff, 0x03]);
    assert_eq!(s2c, b"hello\r\n".to_vec());

    assert!(output.contains("Raw Hex: 01 02 [ff] 03"));
    assert!(!output.contains("\\x1b"));
    assert_eq!(
        output.lines().filter(|l| l.contains("DETECTED 0xFF")).count(),
        1
    );
    assert!(output
        .lines()
        .any(|l| l.starts_with("Decoded (ignore errors): hello")));
    assert!(!output.contains('\r'));
}
