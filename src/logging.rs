//! Logging macros that set target to "hexrelay" for all log calls.
//!
//! Without an explicit target, tracing uses the full module path
//! (e.g., "hexrelay::server::session::relay"), which makes `RUST_LOG`
//! filters verbose. These macros keep every record from this crate under a
//! single "hexrelay" target so `RUST_LOG=hexrelay=debug` covers all of it.

macro_rules! trace {
    ($($arg:tt)*) => { ::tracing::trace!(target: "hexrelay", $($arg)*) };
}

macro_rules! debug {
    ($($arg:tt)*) => { ::tracing::debug!(target: "hexrelay", $($arg)*) };
}

macro_rules! info {
    ($($arg:tt)*) => { ::tracing::info!(target: "hexrelay", $($arg)*) };
}

macro_rules! warn {
    ($($arg:tt)*) => { ::tracing::warn!(target: "hexrelay", $($arg)*) };
}

macro_rules! error {
    ($($arg:tt)*) => { ::tracing::error!(target: "hexrelay", $($arg)*) };
}

/// Log capture for tests that assert on what the fmt subscriber writes.
#[cfg(test)]
pub(crate) mod capture {
    use std::io;
    use std::sync::{Arc, Mutex};
    use tracing::subscriber::DefaultGuard;

    /// Shared in-memory sink
    #[derive(Clone, Default)]
    pub(crate) struct CapturedLog(Arc<Mutex<Vec<u8>>>);

    impl CapturedLog {
        pub(crate) fn text(&self) -> String {
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

    /// Install an INFO-level fmt subscriber for the current thread.
    ///
    /// Under `#[tokio::test]` (current-thread runtime) spawned tasks log
    /// through it as well. Keep the guard alive for the whole test.
    pub(crate) fn capture_logs(ansi: bool) -> (CapturedLog, DefaultGuard) {
        let log = CapturedLog::default();
        let writer = log.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(ansi)
            .with_max_level(tracing::Level::INFO)
            .finish();
        let guard = tracing::subscriber::set_default(subscriber);
        (log, guard)
    }
}
