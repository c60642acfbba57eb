//! # Serial link transport
//!
//! Owns the physical handle to the field radio. A [`Transport`] is cheap to
//! clone and is shared by the reader thread, the forwarders, the image
//! transfer and the pairing task.
//!
//! ## Single writer
//!
//! Every outbound line goes through [`Transport::send`], which holds one mutex
//! for exactly the duration of the `write_all` + `flush` of that line. Two
//! producers can therefore interleave only at line granularity.
//!
//! ## Reconnection
//!
//! [`Transport::connect`] retries forever with a fixed wait; the field device
//! may appear at any time. A read or write fault marks the link
//! [`LinkState::Disconnected`]; the reader thread then reconnects while
//! producers see "not connected" and skip their cycle.

pub mod classify;
pub mod framer;

use log::{debug, info, warn};
use serde::Serialize;
use std::fmt;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::error::LinkError;
use crate::logutil::{preview, MAX_PREVIEW};
use crate::metrics;
use crate::state::lock;
use framer::LineFramer;

pub use classify::{classify, Classified};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LinkState::Disconnected => "disconnected",
            LinkState::Connecting => "connecting",
            LinkState::Connected => "connected",
        };
        f.write_str(s)
    }
}

/// Independent read and write handles onto one opened device.
pub struct PortHalves {
    pub reader: Box<dyn Read + Send>,
    pub writer: Box<dyn Write + Send>,
}

/// Something that can open the link device. The serial backend is the
/// production implementation; tests supply in-memory pipes.
pub trait PortOpener: Send + Sync {
    /// Human-readable device name for logs and the status query.
    fn describe(&self) -> String;

    fn open(&self) -> io::Result<PortHalves>;
}

/// Serial device opener (8N1, DTR/RTS asserted, stale input purged).
#[cfg(feature = "serial")]
pub struct SerialOpener {
    pub port: String,
    pub baud_rate: u32,
    pub read_timeout: Duration,
}

#[cfg(feature = "serial")]
impl PortOpener for SerialOpener {
    fn describe(&self) -> String {
        format!("{}@{}", self.port, self.baud_rate)
    }

    fn open(&self) -> io::Result<PortHalves> {
        debug!("Opening serial port {} at {} baud", self.port, self.baud_rate);
        let mut builder = serialport::new(&self.port, self.baud_rate).timeout(self.read_timeout);
        #[cfg(unix)]
        {
            builder = builder
                .data_bits(serialport::DataBits::Eight)
                .stop_bits(serialport::StopBits::One)
                .parity(serialport::Parity::None);
        }
        let mut port = builder.open()?;

        // Toggle DTR/RTS so the radio wakes up
        let _ = port.write_data_terminal_ready(true);
        let _ = port.write_request_to_send(true);
        thread::sleep(Duration::from_millis(150));

        // Clear any buffered boot banner
        if let Ok(available) = port.bytes_to_read() {
            if available > 0 {
                let _ = port.clear(serialport::ClearBuffer::Input);
            }
        }

        let writer = port.try_clone()?;
        Ok(PortHalves {
            reader: Box::new(port),
            writer: Box::new(writer),
        })
    }
}

#[derive(Debug, Clone)]
pub struct TransportSettings {
    /// Largest line accepted by [`Transport::send`], newline excluded.
    pub max_payload: usize,
    pub reconnect_interval: Duration,
}

/// Read half of an open link, owned by the reader thread.
pub struct LineReader {
    port: Box<dyn Read + Send>,
    framer: LineFramer,
}

impl LineReader {
    fn new(port: Box<dyn Read + Send>) -> Self {
        Self {
            port,
            framer: LineFramer::new(),
        }
    }

    /// Next complete line, or `Ok(None)` when the poll timeout elapsed first.
    ///
    /// End of stream counts as a device fault: a serial port in timeout mode
    /// never reports EOF while it is still attached.
    pub fn read_line(&mut self) -> Result<Option<String>, LinkError> {
        if let Some(line) = self.framer.next_line() {
            return Ok(Some(line));
        }
        let mut buf = [0u8; 512];
        match self.port.read(&mut buf) {
            Ok(0) => Err(LinkError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "device closed",
            ))),
            Ok(n) => {
                self.framer.push(&buf[..n]);
                Ok(self.framer.next_line())
            }
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                ) =>
            {
                Ok(None)
            }
            Err(e) => Err(LinkError::Io(e)),
        }
    }
}

struct Inner {
    opener: Box<dyn PortOpener>,
    settings: TransportSettings,
    state: Mutex<LinkState>,
    writer: Mutex<Option<Box<dyn Write + Send>>>,
    opens: AtomicU64,
    closed: AtomicBool,
}

#[derive(Clone)]
pub struct Transport {
    inner: Arc<Inner>,
}

impl Transport {
    pub fn new(opener: impl PortOpener + 'static, settings: TransportSettings) -> Self {
        Self {
            inner: Arc::new(Inner {
                opener: Box::new(opener),
                settings,
                state: Mutex::new(LinkState::Disconnected),
                writer: Mutex::new(None),
                opens: AtomicU64::new(0),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn device(&self) -> String {
        self.inner.opener.describe()
    }

    pub fn max_payload(&self) -> usize {
        self.inner.settings.max_payload
    }

    pub fn state(&self) -> LinkState {
        *lock(&self.inner.state)
    }

    pub fn is_connected(&self) -> bool {
        self.state() == LinkState::Connected
    }

    fn set_state(&self, next: LinkState) {
        let mut state = lock(&self.inner.state);
        if *state != next {
            debug!("link {} -> {}", *state, next);
            *state = next;
        }
    }

    /// One open attempt. On success the write half is installed for
    /// [`send`](Self::send) and the read half is handed to the caller.
    pub fn try_open(&self) -> Result<LineReader, LinkError> {
        self.set_state(LinkState::Connecting);
        match self.inner.opener.open() {
            Ok(halves) => {
                *lock(&self.inner.writer) = Some(halves.writer);
                self.set_state(LinkState::Connected);
                if self.inner.opens.fetch_add(1, Ordering::Relaxed) > 0 {
                    metrics::inc_link_reconnects();
                }
                info!("Link connected: {}", self.device());
                Ok(LineReader::new(halves.reader))
            }
            Err(source) => {
                self.set_state(LinkState::Disconnected);
                Err(LinkError::Open {
                    device: self.device(),
                    source,
                })
            }
        }
    }

    /// Open the device, waiting the fixed reconnect interval between
    /// attempts. Blocks until it succeeds; returns `None` only after
    /// [`close`](Self::close).
    pub fn connect(&self) -> Option<LineReader> {
        let mut attempts: u64 = 0;
        while !self.is_closed() {
            attempts += 1;
            match self.try_open() {
                Ok(reader) => return Some(reader),
                Err(e) => {
                    // First failure is worth a warning; the rest would flood the log.
                    if attempts == 1 {
                        warn!("{}; retrying every {:?}", e, self.inner.settings.reconnect_interval);
                    } else {
                        debug!("open attempt {} failed: {}", attempts, e);
                    }
                    thread::sleep(self.inner.settings.reconnect_interval);
                }
            }
        }
        None
    }

    /// Drop the write half and report the link down.
    pub fn mark_disconnected(&self) {
        let had_writer = lock(&self.inner.writer).take().is_some();
        self.set_state(LinkState::Disconnected);
        if had_writer {
            warn!("Link disconnected: {}", self.device());
        }
    }

    /// Write one line plus `\n`. The only path onto the wire.
    ///
    /// Lines longer than the link payload are rejected, never split.
    pub fn send(&self, line: &str) -> Result<(), LinkError> {
        if line.contains('\n') {
            return Err(LinkError::EmbeddedNewline);
        }
        let max = self.inner.settings.max_payload;
        if line.len() > max {
            return Err(LinkError::PayloadTooLarge {
                len: line.len(),
                max,
            });
        }
        let mut guard = lock(&self.inner.writer);
        let Some(writer) = guard.as_mut() else {
            return Err(LinkError::NotConnected);
        };
        let mut frame = Vec::with_capacity(line.len() + 1);
        frame.extend_from_slice(line.as_bytes());
        frame.push(b'\n');
        let result = writer.write_all(&frame).and_then(|_| writer.flush());
        match result {
            Ok(()) => {
                drop(guard);
                debug!("TX {}", preview(line, MAX_PREVIEW));
                Ok(())
            }
            Err(e) => {
                *guard = None;
                drop(guard);
                self.set_state(LinkState::Disconnected);
                warn!("Link write failed on {}: {}", self.device(), e);
                Err(LinkError::Io(e))
            }
        }
    }

    /// [`send`](Self::send) from async code without stalling a runtime worker.
    pub async fn send_async(&self, line: String) -> Result<(), LinkError> {
        let transport = self.clone();
        tokio::task::spawn_blocking(move || transport.send(&line))
            .await
            .map_err(|e| LinkError::Io(io::Error::other(e)))?
    }

    /// Stop the reader thread and any pending connect loop.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Relaxed);
        self.mark_disconnected();
    }

    fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Relaxed)
    }

    /// Start the reader thread: connect, forward every received line to `tx`,
    /// reconnect on fault. Runs until [`close`](Self::close) or until the
    /// receiving side goes away.
    pub fn spawn_reader(&self, tx: mpsc::UnboundedSender<String>) -> io::Result<thread::JoinHandle<()>> {
        let transport = self.clone();
        thread::Builder::new()
            .name("link-reader".into())
            .spawn(move || transport.reader_loop(tx))
    }

    fn reader_loop(&self, tx: mpsc::UnboundedSender<String>) {
        while let Some(mut reader) = self.connect() {
            loop {
                if self.is_closed() {
                    return;
                }
                // A failed send may have dropped the link behind our back.
                if !self.is_connected() {
                    break;
                }
                match reader.read_line() {
                    Ok(Some(line)) => {
                        metrics::inc_lines_received();
                        debug!("RX {}", preview(&line, MAX_PREVIEW));
                        if tx.send(line).is_err() {
                            debug!("line consumer gone; reader exiting");
                            return;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        warn!("Link read failed on {}: {}", self.device(), e);
                        self.mark_disconnected();
                        break;
                    }
                }
            }
        }
    }
}
