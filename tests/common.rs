//! Test utilities & fakes.
//! In-memory link device, collaborator services and network manager shared by
//! the integration tests.
#![allow(dead_code)] // each test binary uses a different subset

use async_trait::async_trait;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use fieldlink::config::Config;
use fieldlink::error::{PairingError, ServiceError};
use fieldlink::link::{PortHalves, PortOpener, Transport, TransportSettings};
use fieldlink::pairing::NetworkManager;
use fieldlink::services::{
    CaptureApi, DetectorApi, DetectorConfig, DetectorMetrics, FlightTelemetry, Services,
    TelemetryApi, Track,
};

/// Reader fed through a channel; a quiet channel looks like an idle serial port.
struct ChanReader {
    rx: std_mpsc::Receiver<Vec<u8>>,
    pending: Vec<u8>,
}

impl Read for ChanReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pending.is_empty() {
            match self.rx.recv_timeout(Duration::from_millis(10)) {
                Ok(bytes) => self.pending = bytes,
                Err(std_mpsc::RecvTimeoutError::Timeout) => {
                    return Err(io::ErrorKind::TimedOut.into())
                }
                Err(std_mpsc::RecvTimeoutError::Disconnected) => return Ok(0),
            }
        }
        let n = self.pending.len().min(buf.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        Ok(n)
    }
}

/// Writer that accepts one byte per call and yields in between, so any
/// unsynchronized writer would visibly interleave.
struct TrickleWriter {
    wire: Arc<Mutex<Vec<u8>>>,
    line_ends: Arc<Mutex<Vec<Instant>>>,
    broken: Arc<AtomicBool>,
}

impl Write for TrickleWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.broken.load(Ordering::SeqCst) {
            return Err(io::ErrorKind::BrokenPipe.into());
        }
        if buf.is_empty() {
            return Ok(0);
        }
        self.wire.lock().unwrap().push(buf[0]);
        if buf[0] == b'\n' {
            self.line_ends.lock().unwrap().push(Instant::now());
        }
        std::thread::yield_now();
        Ok(1)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// In-memory radio device. Clones share the same device.
#[derive(Clone, Default)]
pub struct FakeLink {
    wire: Arc<Mutex<Vec<u8>>>,
    line_ends: Arc<Mutex<Vec<Instant>>>,
    inbound: Arc<Mutex<Option<std_mpsc::Sender<Vec<u8>>>>>,
    unplugged: Arc<AtomicBool>,
    broken: Arc<AtomicBool>,
    opens: Arc<AtomicUsize>,
}

impl FakeLink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver one line as if the radio received it.
    pub fn inject(&self, line: &str) {
        if let Some(tx) = self.inbound.lock().unwrap().as_ref() {
            let _ = tx.send(format!("{}\n", line).into_bytes());
        }
    }

    /// Device disappears: reads hit EOF, writes fail, opens fail.
    pub fn unplug(&self) {
        self.unplugged.store(true, Ordering::SeqCst);
        self.broken.store(true, Ordering::SeqCst);
        self.inbound.lock().unwrap().take();
    }

    pub fn plug(&self) {
        self.broken.store(false, Ordering::SeqCst);
        self.unplugged.store(false, Ordering::SeqCst);
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Every complete line written so far.
    pub fn sent(&self) -> Vec<String> {
        let wire = self.wire.lock().unwrap();
        let text = String::from_utf8_lossy(&wire);
        let mut lines: Vec<String> = text.split('\n').map(str::to_string).collect();
        lines.pop(); // text after the last newline
        lines
    }

    pub fn sent_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.sent().into_iter().filter(|l| l.starts_with(prefix)).collect()
    }

    /// When each written line's newline reached the device, in write order.
    pub fn line_times(&self) -> Vec<Instant> {
        self.line_ends.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.wire.lock().unwrap().clear();
        self.line_ends.lock().unwrap().clear();
    }
}

impl PortOpener for FakeLink {
    fn describe(&self) -> String {
        "fake-radio".to_string()
    }

    fn open(&self) -> io::Result<PortHalves> {
        if self.unplugged.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::NotFound, "no such device"));
        }
        let (tx, rx) = std_mpsc::channel();
        *self.inbound.lock().unwrap() = Some(tx);
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(PortHalves {
            reader: Box::new(ChanReader {
                rx,
                pending: Vec::new(),
            }),
            writer: Box::new(TrickleWriter {
                wire: self.wire.clone(),
                line_ends: self.line_ends.clone(),
                broken: self.broken.clone(),
            }),
        })
    }
}

pub fn fake_transport(link: &FakeLink, max_payload: usize) -> Transport {
    Transport::new(
        link.clone(),
        TransportSettings {
            max_payload,
            reconnect_interval: Duration::from_millis(20),
        },
    )
}

/// Every collaborator in one in-process fake.
pub struct FakeWorld {
    calls: Mutex<Vec<String>>,
    pub recording: AtomicBool,
    pub tracks: Mutex<Vec<Track>>,
    pub image: Mutex<Option<Vec<u8>>>,
    pub telemetry: Mutex<FlightTelemetry>,
    pub metrics: Mutex<DetectorMetrics>,
    pub config: Mutex<DetectorConfig>,
    /// Every call fails with 503.
    pub down: AtomicBool,
    /// Every call hangs.
    pub stalled: AtomicBool,
}

impl Default for FakeWorld {
    fn default() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            recording: AtomicBool::new(false),
            tracks: Mutex::new(Vec::new()),
            image: Mutex::new(None),
            telemetry: Mutex::new(FlightTelemetry::default()),
            metrics: Mutex::new(DetectorMetrics::default()),
            config: Mutex::new(DetectorConfig::default()),
            down: AtomicBool::new(false),
            stalled: AtomicBool::new(false),
        }
    }
}

impl FakeWorld {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn services(self: &Arc<Self>) -> Services {
        Services {
            capture: self.clone(),
            detector: self.clone(),
            telemetry: self.clone(),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn set_tracks(&self, tracks: &[(i64, &str, f32)]) {
        *self.tracks.lock().unwrap() = tracks
            .iter()
            .map(|(id, class, conf)| Track {
                track_id: *id,
                class_name: class.to_string(),
                confidence: *conf,
            })
            .collect();
    }

    async fn enter(&self, call: impl Into<String>) -> Result<(), ServiceError> {
        self.calls.lock().unwrap().push(call.into());
        if self.stalled.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if self.down.load(Ordering::SeqCst) {
            return Err(ServiceError::Status(503));
        }
        Ok(())
    }
}

#[async_trait]
impl CaptureApi for FakeWorld {
    async fn start_recording(&self) -> Result<(), ServiceError> {
        self.enter("start_recording").await?;
        self.recording.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop_recording(&self) -> Result<(), ServiceError> {
        self.enter("stop_recording").await?;
        self.recording.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn is_recording(&self) -> Result<bool, ServiceError> {
        self.enter("is_recording").await?;
        Ok(self.recording.load(Ordering::SeqCst))
    }
}

#[async_trait]
impl DetectorApi for FakeWorld {
    async fn set_confidence(&self, threshold: f32) -> Result<(), ServiceError> {
        self.enter(format!("set_confidence:{}", threshold)).await?;
        self.config.lock().unwrap().confidence = threshold;
        Ok(())
    }

    async fn set_image_size(&self, pixels: u32) -> Result<(), ServiceError> {
        self.enter(format!("set_image_size:{}", pixels)).await?;
        self.config.lock().unwrap().imgsz = pixels;
        Ok(())
    }

    async fn set_model(&self, name: &str) -> Result<(), ServiceError> {
        self.enter(format!("set_model:{}", name)).await?;
        self.config.lock().unwrap().model_path = format!("/models/{}", name);
        Ok(())
    }

    async fn active_tracks(&self) -> Result<Vec<Track>, ServiceError> {
        self.enter("active_tracks").await?;
        Ok(self.tracks.lock().unwrap().clone())
    }

    async fn metrics(&self) -> Result<DetectorMetrics, ServiceError> {
        self.enter("metrics").await?;
        Ok(self.metrics.lock().unwrap().clone())
    }

    async fn config(&self) -> Result<DetectorConfig, ServiceError> {
        self.enter("config").await?;
        Ok(self.config.lock().unwrap().clone())
    }

    async fn thumbnail_source(&self, track_id: u64) -> Result<Option<Vec<u8>>, ServiceError> {
        self.enter(format!("thumbnail_source:{}", track_id)).await?;
        Ok(self.image.lock().unwrap().clone())
    }
}

#[async_trait]
impl TelemetryApi for FakeWorld {
    async fn snapshot(&self) -> Result<FlightTelemetry, ServiceError> {
        self.enter("snapshot").await?;
        Ok(self.telemetry.lock().unwrap().clone())
    }
}

/// Scriptable host network manager.
#[derive(Default)]
pub struct FakeNetwork {
    pub current: Mutex<Option<String>>,
    pub address: Mutex<Option<String>>,
    pub fail_associate: AtomicBool,
    calls: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl FakeNetwork {
    pub fn new(address: &str) -> Arc<Self> {
        Arc::new(Self {
            address: Mutex::new(Some(address.to_string())),
            ..Default::default()
        })
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }

    /// Simulate the OS moving the interface to another network.
    pub fn rejoin(&self, ssid: &str) {
        *self.current.lock().unwrap() = Some(ssid.to_string());
    }
}

#[async_trait]
impl NetworkManager for FakeNetwork {
    async fn current_association(&self) -> Result<Option<String>, PairingError> {
        Ok(self.current.lock().unwrap().clone())
    }

    async fn associate(&self, ssid: &str, _password: &str) -> Result<(), PairingError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.calls.lock().unwrap().push(format!("associate:{}", ssid));
        tokio::task::yield_now().await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if self.fail_associate.load(Ordering::SeqCst) {
            return Err(PairingError::CommandFailed {
                command: "associate".into(),
                stderr: "Secrets were required".into(),
            });
        }
        *self.current.lock().unwrap() = Some(ssid.to_string());
        Ok(())
    }

    async fn disassociate(&self) -> Result<(), PairingError> {
        self.calls.lock().unwrap().push("disassociate".into());
        *self.current.lock().unwrap() = None;
        Ok(())
    }

    async fn assigned_address(&self, _ssid: &str) -> Result<Option<String>, PairingError> {
        Ok(self.address.lock().unwrap().clone())
    }

    async fn advertise(&self, hostname: &str, address: &str) -> Result<(), PairingError> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("advertise:{}:{}", hostname, address));
        Ok(())
    }

    async fn withdraw(&self) {
        self.calls.lock().unwrap().push("withdraw".into());
    }
}

/// Fast timings, no status file, pairing off.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.link.port = "fake-radio".into();
    config.link.reconnect_interval_secs = 1;
    config.forward.telemetry_interval_ms = 50;
    config.forward.detection_interval_ms = 50;
    config.forward.status_interval_ms = 50;
    config.forward.thermal_path = "/nonexistent/thermal".into();
    config.services.command_timeout_ms = 200;
    config.services.poll_timeout_ms = 200;
    config.services.model_switch_timeout_ms = 300;
    config.services.image_fetch_timeout_ms = 300;
    config.image.chunk_delay_ms = 5;
    config.status.file = None;
    config.api.enabled = false;
    config.logging.file = None;
    config
}

/// Poll `cond` until it holds or `limit` elapses.
pub async fn wait_for(limit: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    cond()
}
