//! Periodic TEL / DET / STS frames.
//!
//! Precision is part of the format: lat/lon 6 decimals, altitudes, speeds,
//! voltage, fps and temperature 1 decimal, confidences 2 decimals, inference
//! time whole milliseconds.

use super::{scrub_field, DET_PREFIX, STS_PREFIX, TEL_PREFIX};
use crate::error::WireError;

const MAX_MODE_LEN: usize = 16;
const MAX_CLASS_LEN: usize = 24;
const MAX_MODEL_LEN: usize = 40;

/// Split a frame body into exactly `expected` comma-separated fields.
fn fields<'a>(
    line: &'a str,
    prefix: &'static str,
    frame: &'static str,
    expected: usize,
) -> Result<Vec<&'a str>, WireError> {
    let body = line
        .trim_end()
        .strip_prefix(prefix)
        .ok_or(WireError::Prefix { expected: prefix })?;
    let parts: Vec<&str> = body.split(',').collect();
    if parts.len() != expected {
        return Err(WireError::FieldCount {
            frame,
            expected,
            found: parts.len(),
        });
    }
    Ok(parts)
}

fn num<T: std::str::FromStr>(
    frame: &'static str,
    field: &'static str,
    value: &str,
) -> Result<T, WireError> {
    value.trim().parse().map_err(|_| WireError::Field {
        frame,
        field,
        value: value.to_string(),
    })
}

fn flag(frame: &'static str, field: &'static str, value: &str) -> Result<bool, WireError> {
    match value.trim() {
        "1" => Ok(true),
        "0" => Ok(false),
        other => Err(WireError::Field {
            frame,
            field,
            value: other.to_string(),
        }),
    }
}

/// Compact flight telemetry.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TelemetryFrame {
    pub lat: f64,
    pub lon: f64,
    pub alt_rel: f64,
    pub groundspeed: f64,
    pub heading: i32,
    pub voltage: f64,
    /// Percent, `-1` when the flight controller does not report it.
    pub battery_remaining: i32,
    pub fix_type: u8,
    pub satellites: u8,
    pub mode: String,
    pub armed: bool,
}

impl TelemetryFrame {
    pub fn encode(&self) -> String {
        format!(
            "{TEL_PREFIX}{:.6},{:.6},{:.1},{:.1},{},{:.1},{},{},{},{},{}",
            self.lat,
            self.lon,
            self.alt_rel,
            self.groundspeed,
            self.heading,
            self.voltage,
            self.battery_remaining,
            self.fix_type,
            self.satellites,
            scrub_field(&self.mode, MAX_MODE_LEN),
            u8::from(self.armed)
        )
    }

    pub fn decode(line: &str) -> Result<Self, WireError> {
        const F: &str = "TEL";
        let p = fields(line, TEL_PREFIX, F, 11)?;
        Ok(Self {
            lat: num(F, "lat", p[0])?,
            lon: num(F, "lon", p[1])?,
            alt_rel: num(F, "alt_rel", p[2])?,
            groundspeed: num(F, "groundspeed", p[3])?,
            heading: num(F, "heading", p[4])?,
            voltage: num(F, "voltage", p[5])?,
            battery_remaining: num(F, "battery_remaining", p[6])?,
            fix_type: num(F, "fix_type", p[7])?,
            satellites: num(F, "satellites", p[8])?,
            mode: p[9].to_string(),
            armed: flag(F, "armed", p[10])?,
        })
    }
}

/// One active track stamped with the vehicle position.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DetectionFrame {
    pub class_name: String,
    pub confidence: f32,
    pub track_id: i64,
    pub lat: f64,
    pub lon: f64,
    pub alt: f64,
}

impl DetectionFrame {
    pub fn encode(&self) -> String {
        format!(
            "{DET_PREFIX}{},{:.2},{},{:.6},{:.6},{:.1}",
            scrub_field(&self.class_name, MAX_CLASS_LEN),
            self.confidence,
            self.track_id,
            self.lat,
            self.lon,
            self.alt
        )
    }

    pub fn decode(line: &str) -> Result<Self, WireError> {
        const F: &str = "DET";
        let p = fields(line, DET_PREFIX, F, 6)?;
        Ok(Self {
            class_name: p[0].to_string(),
            confidence: num(F, "confidence", p[1])?,
            track_id: num(F, "track_id", p[2])?,
            lat: num(F, "lat", p[3])?,
            lon: num(F, "lon", p[4])?,
            alt: num(F, "alt", p[5])?,
        })
    }
}

/// Host and detector health summary.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusFrame {
    pub recording: bool,
    pub fps: f64,
    pub active_tracks: u32,
    pub model: String,
    pub confidence: f32,
    pub image_size: u32,
    pub inference_ms: f64,
    /// Degrees Celsius, `-1.0` when the host sensor is unreadable.
    pub cpu_temp: f64,
}

impl Default for StatusFrame {
    fn default() -> Self {
        Self {
            recording: false,
            fps: 0.0,
            active_tracks: 0,
            model: "N/A".to_string(),
            confidence: 0.5,
            image_size: 640,
            inference_ms: 0.0,
            cpu_temp: -1.0,
        }
    }
}

impl StatusFrame {
    pub fn encode(&self) -> String {
        format!(
            "{STS_PREFIX}{},{:.1},{},{},{:.2},{},{:.0},{:.1}",
            u8::from(self.recording),
            self.fps,
            self.active_tracks,
            scrub_field(&self.model, MAX_MODEL_LEN),
            self.confidence,
            self.image_size,
            self.inference_ms,
            self.cpu_temp
        )
    }

    pub fn decode(line: &str) -> Result<Self, WireError> {
        const F: &str = "STS";
        let p = fields(line, STS_PREFIX, F, 8)?;
        Ok(Self {
            recording: flag(F, "recording", p[0])?,
            fps: num(F, "fps", p[1])?,
            active_tracks: num(F, "active_tracks", p[2])?,
            model: p[3].to_string(),
            confidence: num(F, "confidence", p[4])?,
            image_size: num(F, "image_size", p[5])?,
            inference_ms: num(F, "inference_ms", p[6])?,
            cpu_temp: num(F, "cpu_temp", p[7])?,
        })
    }
}
