//! External collaborators: video capture, object detector, flight telemetry.
//!
//! The bridge never implements what these services do; it only calls them.
//! Each is a trait so the dispatcher and forwarders can be tested against
//! in-process fakes. [`http`] holds the production HTTP backend.

pub mod http;

use async_trait::async_trait;
use serde::Deserialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::error::ServiceError;
use crate::wire::TelemetryFrame;

/// Await `fut`, failing with [`ServiceError::Timeout`] after `limit`.
pub async fn bounded<T, F>(limit: Duration, fut: F) -> Result<T, ServiceError>
where
    F: Future<Output = Result<T, ServiceError>>,
{
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| ServiceError::Timeout(limit.as_millis() as u64))?
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct GpsInfo {
    pub lat: f64,
    pub lon: f64,
    pub alt_msl: f64,
    pub alt_rel: f64,
    pub fix_type: u8,
    pub satellites: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct VfrInfo {
    pub groundspeed: f64,
    pub heading: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct BatteryInfo {
    pub voltage: f64,
    /// Percent; absent when the flight controller does not estimate it.
    pub remaining: Option<i32>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct HeartbeatInfo {
    pub mode: String,
    pub armed: bool,
}

/// Structured flight telemetry snapshot.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct FlightTelemetry {
    pub gps: GpsInfo,
    pub vfr: VfrInfo,
    pub battery: BatteryInfo,
    pub heartbeat: HeartbeatInfo,
}

impl FlightTelemetry {
    pub fn to_frame(&self) -> TelemetryFrame {
        TelemetryFrame {
            lat: self.gps.lat,
            lon: self.gps.lon,
            alt_rel: self.gps.alt_rel,
            groundspeed: self.vfr.groundspeed,
            heading: self.vfr.heading.round() as i32,
            voltage: self.battery.voltage,
            battery_remaining: self.battery.remaining.unwrap_or(-1),
            fix_type: self.gps.fix_type,
            satellites: self.gps.satellites,
            mode: if self.heartbeat.mode.is_empty() {
                "UNKNOWN".to_string()
            } else {
                self.heartbeat.mode.clone()
            },
            armed: self.heartbeat.armed,
        }
    }
}

/// One currently active track.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Track {
    #[serde(default = "Track::no_id")]
    pub track_id: i64,
    #[serde(default = "Track::unknown_class")]
    pub class_name: String,
    #[serde(default)]
    pub confidence: f32,
}

impl Track {
    fn no_id() -> i64 {
        -1
    }
    fn unknown_class() -> String {
        "unknown".to_string()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct DetectorMetrics {
    pub fps: f64,
    pub active_tracks: u32,
    pub last_inference_ms: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub confidence: f32,
    pub imgsz: u32,
    pub model_path: String,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            confidence: 0.5,
            imgsz: 640,
            model_path: String::new(),
        }
    }
}

impl DetectorConfig {
    /// File name of the loaded model, `N/A` when the detector reports none.
    pub fn model_name(&self) -> String {
        let path = self.model_path.trim();
        match path.rsplit(|c: char| c == '/' || c == '\\').next() {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => "N/A".to_string(),
        }
    }
}

#[async_trait]
pub trait CaptureApi: Send + Sync {
    async fn start_recording(&self) -> Result<(), ServiceError>;
    async fn stop_recording(&self) -> Result<(), ServiceError>;
    async fn is_recording(&self) -> Result<bool, ServiceError>;
}

#[async_trait]
pub trait DetectorApi: Send + Sync {
    async fn set_confidence(&self, threshold: f32) -> Result<(), ServiceError>;
    async fn set_image_size(&self, pixels: u32) -> Result<(), ServiceError>;
    async fn set_model(&self, name: &str) -> Result<(), ServiceError>;
    async fn active_tracks(&self) -> Result<Vec<Track>, ServiceError>;
    async fn metrics(&self) -> Result<DetectorMetrics, ServiceError>;
    async fn config(&self) -> Result<DetectorConfig, ServiceError>;
    /// JPEG bytes of the latest detection crop for `track_id`, if the detector has one.
    async fn thumbnail_source(&self, track_id: u64) -> Result<Option<Vec<u8>>, ServiceError>;
}

#[async_trait]
pub trait TelemetryApi: Send + Sync {
    async fn snapshot(&self) -> Result<FlightTelemetry, ServiceError>;
}

/// The collaborator set handed to the bridge.
#[derive(Clone)]
pub struct Services {
    pub capture: Arc<dyn CaptureApi>,
    pub detector: Arc<dyn DetectorApi>,
    pub telemetry: Arc<dyn TelemetryApi>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn telemetry_json_maps_to_frame() {
        let json = r#"{
            "gps": {"lat": 47.5, "lon": 8.25, "alt_msl": 520.0, "alt_rel": 35.2, "fix_type": 3, "satellites": 12},
            "vfr": {"groundspeed": 4.2, "heading": 181.6},
            "battery": {"voltage": 15.2, "remaining": null},
            "heartbeat": {"mode": "LOITER", "armed": true}
        }"#;
        let tel: FlightTelemetry = serde_json::from_str(json).unwrap();
        let frame = tel.to_frame();
        assert_eq!(frame.heading, 182);
        assert_eq!(frame.battery_remaining, -1);
        assert_eq!(frame.mode, "LOITER");
        assert_eq!(
            frame.encode(),
            "TEL:47.500000,8.250000,35.2,4.2,182,15.2,-1,3,12,LOITER,1"
        );
    }

    #[test]
    fn missing_sections_default() {
        let tel: FlightTelemetry = serde_json::from_str("{}").unwrap();
        assert_eq!(tel.to_frame().mode, "UNKNOWN");
        let track: Track = serde_json::from_str(r#"{"confidence": 0.7}"#).unwrap();
        assert_eq!(track.track_id, -1);
        assert_eq!(track.class_name, "unknown");
    }

    #[test]
    fn model_name_is_base_name() {
        let cfg = DetectorConfig {
            model_path: "/opt/models/yolov8n.pt".into(),
            ..Default::default()
        };
        assert_eq!(cfg.model_name(), "yolov8n.pt");
        assert_eq!(DetectorConfig::default().model_name(), "N/A");
    }

    #[tokio::test]
    async fn bounded_times_out() {
        let slow = async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, ServiceError>(())
        };
        let res = bounded(Duration::from_millis(10), slow).await;
        assert!(matches!(res, Err(ServiceError::Timeout(10))));
    }
}
