//! Per-chunk diagnostic records.
//!
//! Every chunk the relay forwards is rendered as a three-line record:
//!
//! ```text
//! [C2S -> 4 bytes @ 14:03:27.118204]
//! Raw Hex: 01 02 ff 03
//! Decoded (ignore errors): ...
//! ```
//!
//! Occurrences of the sentinel byte 0xFF (Telnet IAC) are wrapped in a
//! highlight marker so they stand out and can be grepped for, and a separate
//! warning line is emitted for any chunk that contains one. Rendering never
//! fails: bytes that have no ASCII meaning are simply dropped from the decoded
//! line.
//!
//! Records that go through `tracing` always use [`Highlight::Plain`]. The fmt
//! subscriber escapes ESC bytes in messages, so ANSI markers would reach the
//! log as literal `\x1b[91m` text. Colour in the log comes from the WARN
//! level of the warning line instead.

use std::fmt;

use chrono::{Local, NaiveTime};

/// The byte value highlighted in every record (Telnet IAC).
pub const SENTINEL: u8 = 0xFF;

const ANSI_RED: &str = "\x1b[91m";
const ANSI_RESET: &str = "\x1b[0m";

/// Which way a chunk travelled through the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Read from the client, written to the remote.
    ClientToServer,
    /// Read from the remote, written to the client.
    ServerToClient,
}

impl Direction {
    /// Short tag used in lifecycle log lines.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ClientToServer => "C2S",
            Self::ServerToClient => "S2C",
        }
    }

    /// Arrow label used in record headers.
    pub fn label(&self) -> &'static str {
        match self {
            Self::ClientToServer => "C2S ->",
            Self::ServerToClient => "<- S2C",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// How sentinel bytes are marked in the hex line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Highlight {
    /// ANSI bright red, for records written straight to a terminal.
    Ansi,
    /// Square brackets. Used for every record sent through `tracing`.
    #[default]
    Plain,
}

impl Highlight {
    fn mark(&self, text: &str) -> String {
        match self {
            Self::Ansi => format!("{}{}{}", ANSI_RED, text, ANSI_RESET),
            Self::Plain => format!("[{}]", text),
        }
    }
}

/// Frame logging options, derived from the `logging` config section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameOptions {
    /// Emit a record per chunk. When off only a trace line is written.
    pub enabled: bool,
}

impl Default for FrameOptions {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Diagnostic record for a single forwarded chunk.
#[derive(Debug, Clone)]
pub struct FrameRecord {
    direction: Direction,
    len: usize,
    timestamp: NaiveTime,
    hex: String,
    ascii: String,
    has_sentinel: bool,
    highlight: Highlight,
}

impl FrameRecord {
    /// Build a record for `chunk`, stamped with the current local time.
    pub fn new(chunk: &[u8], direction: Direction, highlight: Highlight) -> Self {
        Self::with_timestamp(chunk, direction, highlight, Local::now().time())
    }

    /// Build a record with an explicit timestamp.
    pub fn with_timestamp(
        chunk: &[u8],
        direction: Direction,
        highlight: Highlight,
        timestamp: NaiveTime,
    ) -> Self {
        Self {
            direction,
            len: chunk.len(),
            timestamp,
            hex: hex_dump(chunk, highlight),
            ascii: ascii_approximation(chunk),
            has_sentinel: chunk.contains(&SENTINEL),
            highlight,
        }
    }

    /// Direction the chunk travelled.
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Number of bytes in the chunk.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the chunk was empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Space separated hex bytes, sentinel bytes marked.
    pub fn hex(&self) -> &str {
        &self.hex
    }

    /// Single-line ASCII rendering of the chunk.
    pub fn ascii(&self) -> &str {
        &self.ascii
    }

    /// Whether the chunk contained at least one 0xFF byte.
    pub fn has_sentinel(&self) -> bool {
        self.has_sentinel
    }

    /// Header line, e.g. `[C2S -> 4 bytes @ 14:03:27.118204]`.
    pub fn header(&self) -> String {
        format!(
            "[{} {} bytes @ {}]",
            self.direction,
            self.len,
            self.timestamp.format("%H:%M:%S%.6f")
        )
    }

    /// The standalone warning line, present only when a sentinel was seen.
    pub fn warning(&self) -> Option<String> {
        self.has_sentinel
            .then(|| sentinel_warning(self.highlight))
    }

    /// Full multi-line record without the warning line.
    pub fn render(&self) -> String {
        format!(
            "{}\nRaw Hex: {}\nDecoded (ignore errors): {}",
            self.header(),
            self.hex,
            self.ascii
        )
    }
}

impl fmt::Display for FrameRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())?;
        if let Some(warning) = self.warning() {
            write!(f, "\n{}", warning)?;
        }
        Ok(())
    }
}

/// Warning line emitted after a record that contains the sentinel byte.
pub fn sentinel_warning(highlight: Highlight) -> String {
    highlight.mark("!!! DETECTED 0xFF (Telnet IAC) BYTE IN STREAM !!!")
}

/// Render `chunk` as space separated two-digit lowercase hex.
pub fn hex_dump(chunk: &[u8], highlight: Highlight) -> String {
    let mut out = String::with_capacity(chunk.len() * 3);
    for (i, byte) in chunk.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        let hex = format!("{:02x}", byte);
        if *byte == SENTINEL {
            out.push_str(&highlight.mark(&hex));
        } else {
            out.push_str(&hex);
        }
    }
    out
}

/// Reconstruct the bytes of a [`hex_dump`] line.
///
/// Highlight markers of either style are stripped first. Returns `None` if
/// any remaining token is not a two-digit hex byte.
pub fn parse_hex_dump(text: &str) -> Option<Vec<u8>> {
    let cleaned = text
        .replace(ANSI_RED, "")
        .replace(ANSI_RESET, "")
        .replace(['[', ']'], "");
    cleaned
        .split_whitespace()
        .map(|token| {
            if token.len() == 2 {
                u8::from_str_radix(token, 16).ok()
            } else {
                None
            }
        })
        .collect()
}

/// Best-effort single-line ASCII rendering of `chunk`.
///
/// Non-ASCII bytes and control characters are dropped; each run of CR/LF
/// becomes one space.
pub fn ascii_approximation(chunk: &[u8]) -> String {
    let mut out = String::with_capacity(chunk.len());
    let mut in_line_break = false;
    for &byte in chunk {
        match byte {
            b'\r' | b'\n' => {
                if !in_line_break {
                    out.push(' ');
                    in_line_break = true;
                }
                continue;
            }
            0x20..=0x7E => out.push(byte as char),
            _ => {}
        }
        in_line_break = false;
    }
    out
}

/// Log a forwarded chunk and report whether it contained the sentinel byte.
///
/// With frame logging disabled only a trace line is written, but the
/// sentinel flag is still computed.
pub fn log_frame(chunk: &[u8], direction: Direction, options: &FrameOptions) -> bool {
    if !options.enabled {
        trace!("{}: {} bytes", direction.as_str(), chunk.len());
        return chunk.contains(&SENTINEL);
    }

    let record = FrameRecord::new(chunk, direction, Highlight::Plain);
    info!("{}", record.render());
    if let Some(warning) = record.warning() {
        warn!("{}", warning);
    }
    record.has_sentinel()
}
