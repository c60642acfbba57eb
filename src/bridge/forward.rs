//! Periodic TEL / DET / STS forwarders.
//!
//! Each stream has its own task and schedule. A tick sleeps the interval,
//! skips when the link is down, otherwise polls its collaborator under the
//! poll timeout and sends the encoded line(s). Collaborator failures recur
//! every cycle while a service is down, so they are logged at debug.

use log::{debug, info};
use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;

use super::BridgeContext;
use crate::config::ForwardConfig;
use crate::metrics;
use crate::services::{bounded, DetectorMetrics};
use crate::state::OutboundKind;
use crate::wire::{DetectionFrame, StatusFrame};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Telemetry,
    Detection,
    Status,
}

impl StreamKind {
    fn outbound(self) -> OutboundKind {
        match self {
            StreamKind::Telemetry => OutboundKind::Telemetry,
            StreamKind::Detection => OutboundKind::Detection,
            StreamKind::Status => OutboundKind::Status,
        }
    }

    fn tag(self) -> &'static str {
        match self {
            StreamKind::Telemetry => "TEL",
            StreamKind::Detection => "DET",
            StreamKind::Status => "STS",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ForwardSchedule {
    pub kind: StreamKind,
    pub interval: Duration,
    pub last_attempt: Option<Instant>,
}

impl ForwardSchedule {
    pub fn new(kind: StreamKind, interval: Duration) -> Self {
        Self {
            kind,
            interval,
            last_attempt: None,
        }
    }

    pub fn from_config(c: &ForwardConfig) -> [ForwardSchedule; 3] {
        [
            Self::new(StreamKind::Telemetry, Duration::from_millis(c.telemetry_interval_ms)),
            Self::new(StreamKind::Detection, Duration::from_millis(c.detection_interval_ms)),
            Self::new(StreamKind::Status, Duration::from_millis(c.status_interval_ms)),
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Link down; nothing attempted.
    Skipped,
    /// Lines handed to the transport this cycle.
    Sent(usize),
    /// Collaborator or link fault; the next cycle runs as scheduled.
    Failed,
}

/// Last known vehicle position for stamping detections.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct GpsFix {
    lat: f64,
    lon: f64,
    alt: f64,
}

pub struct Forwarder {
    schedule: ForwardSchedule,
    ctx: BridgeContext,
    thermal_path: String,
    gps: GpsFix,
}

impl Forwarder {
    pub fn new(schedule: ForwardSchedule, ctx: BridgeContext, thermal_path: &str) -> Self {
        Self {
            schedule,
            ctx,
            thermal_path: thermal_path.to_string(),
            gps: GpsFix::default(),
        }
    }

    pub fn schedule(&self) -> &ForwardSchedule {
        &self.schedule
    }

    pub async fn run(mut self) {
        info!(
            "{} forwarder started (interval={:?})",
            self.schedule.kind.tag(),
            self.schedule.interval
        );
        loop {
            tokio::time::sleep(self.schedule.interval).await;
            self.tick().await;
        }
    }

    /// One forwarding cycle.
    pub async fn tick(&mut self) -> TickOutcome {
        self.schedule.last_attempt = Some(Instant::now());
        if !self.ctx.transport.is_connected() {
            metrics::inc_cycles_skipped();
            return TickOutcome::Skipped;
        }
        let lines = match self.schedule.kind {
            StreamKind::Telemetry => self.telemetry_lines().await,
            StreamKind::Detection => self.detection_lines().await,
            StreamKind::Status => Some(vec![self.status_frame().await.encode()]),
        };
        let Some(lines) = lines else {
            return TickOutcome::Failed;
        };

        let kind = self.schedule.kind.outbound();
        let mut sent = 0;
        for line in lines {
            if let Err(e) = self.ctx.send_line(line, kind).await {
                debug!("{} forward stopped after {} lines: {}", self.schedule.kind.tag(), sent, e);
                return if sent == 0 {
                    TickOutcome::Failed
                } else {
                    TickOutcome::Sent(sent)
                };
            }
            sent += 1;
        }
        TickOutcome::Sent(sent)
    }

    async fn telemetry_lines(&self) -> Option<Vec<String>> {
        let t = &self.ctx;
        match bounded(t.timeouts.poll, t.services.telemetry.snapshot()).await {
            Ok(snapshot) => Some(vec![snapshot.to_frame().encode()]),
            Err(e) => {
                debug!("Telemetry forward error: {}", e);
                None
            }
        }
    }

    /// Every active track, every cycle: a lost line heals on the next one.
    async fn detection_lines(&mut self) -> Option<Vec<String>> {
        let t = self.ctx.clone();
        match bounded(t.timeouts.poll, t.services.telemetry.snapshot()).await {
            Ok(snapshot) => {
                self.gps = GpsFix {
                    lat: snapshot.gps.lat,
                    lon: snapshot.gps.lon,
                    alt: snapshot.gps.alt_msl,
                }
            }
            Err(e) => debug!("GPS refresh failed, reusing last fix: {}", e),
        }
        let tracks = match bounded(t.timeouts.poll, t.services.detector.active_tracks()).await {
            Ok(tracks) => tracks,
            Err(e) => {
                debug!("Detection forward error: {}", e);
                return None;
            }
        };
        let gps = self.gps;
        Some(
            tracks
                .into_iter()
                .filter(|track| track.track_id >= 0)
                .map(|track| {
                    DetectionFrame {
                        class_name: track.class_name,
                        confidence: track.confidence,
                        track_id: track.track_id,
                        lat: gps.lat,
                        lon: gps.lon,
                        alt: gps.alt,
                    }
                    .encode()
                })
                .collect(),
        )
    }

    /// Merge sub-queries; any that fails keeps its default.
    async fn status_frame(&self) -> StatusFrame {
        let t = &self.ctx;
        let (recording, det_metrics, det_config) = tokio::join!(
            bounded(t.timeouts.poll, t.services.capture.is_recording()),
            bounded(t.timeouts.poll, t.services.detector.metrics()),
            bounded(t.timeouts.poll, t.services.detector.config()),
        );
        let mut frame = StatusFrame {
            cpu_temp: read_cpu_temp(&self.thermal_path).await,
            ..StatusFrame::default()
        };
        match recording {
            Ok(r) => frame.recording = r,
            Err(e) => debug!("STS: capture status unavailable: {}", e),
        }
        match det_metrics {
            Ok(DetectorMetrics {
                fps,
                active_tracks,
                last_inference_ms,
            }) => {
                frame.fps = fps;
                frame.active_tracks = active_tracks;
                frame.inference_ms = last_inference_ms;
            }
            Err(e) => debug!("STS: detector metrics unavailable: {}", e),
        }
        match det_config {
            Ok(cfg) => {
                frame.model = cfg.model_name();
                frame.confidence = cfg.confidence;
                frame.image_size = cfg.imgsz;
            }
            Err(e) => debug!("STS: detector config unavailable: {}", e),
        }
        frame
    }
}

/// Host temperature in degrees Celsius from a millidegree sysfs file, `-1.0`
/// when missing or unparseable.
pub async fn read_cpu_temp(path: &str) -> f64 {
    match tokio::fs::read_to_string(path).await {
        Ok(text) => text
            .trim()
            .parse::<i64>()
            .map(|milli| milli as f64 / 1000.0)
            .unwrap_or(-1.0),
        Err(_) => -1.0,
    }
}
