//! HTTP backend for the collaborator traits.
//!
//! Endpoints (JSON bodies):
//!
//! | service   | call                 | endpoint                               |
//! |-----------|----------------------|----------------------------------------|
//! | capture   | start / stop         | `POST /recording/start`, `/recording/stop` |
//! | capture   | recording flag       | `GET /status` -> `{recording}`         |
//! | detector  | confidence / size    | `POST /config` `{confidence}` / `{imgsz}` |
//! | detector  | model switch         | `POST /model` `{name}`                 |
//! | detector  | tracks               | `GET /tracks` -> `{tracks: [...]}`     |
//! | detector  | metrics / config     | `GET /metrics`, `GET /config`          |
//! | detector  | thumbnail            | `GET /detections` -> `jpeg_url`, then `GET <jpeg_url>` |
//! | telemetry | snapshot             | `GET /telemetry/structured` -> `{telemetry: {...}}` |

use async_trait::async_trait;
use log::debug;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use super::{
    bounded, CaptureApi, DetectorApi, DetectorConfig, DetectorMetrics, FlightTelemetry, Services,
    TelemetryApi, Track,
};
use crate::config::ServicesConfig;
use crate::error::ServiceError;

/// Shared reqwest client bound to one base URL.
#[derive(Clone)]
struct Endpoint {
    client: reqwest::Client,
    base: String,
    timeout: Duration,
}

impl Endpoint {
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base.trim_end_matches('/'), path)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ServiceError> {
        let url = self.url(path);
        debug!("GET {}", url);
        let response = bounded(self.timeout, async {
            Ok::<_, ServiceError>(self.client.get(&url).send().await?)
        })
        .await?;
        if !response.status().is_success() {
            return Err(ServiceError::Status(response.status().as_u16()));
        }
        response
            .json::<T>()
            .await
            .map_err(|e| ServiceError::Malformed(e.to_string()))
    }

    async fn get_bytes(&self, path: &str) -> Result<Option<Vec<u8>>, ServiceError> {
        let url = self.url(path);
        debug!("GET {}", url);
        let response = bounded(self.timeout, async {
            Ok::<_, ServiceError>(self.client.get(&url).send().await?)
        })
        .await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(ServiceError::Status(response.status().as_u16()));
        }
        Ok(Some(response.bytes().await?.to_vec()))
    }

    async fn post(&self, path: &str, body: Option<serde_json::Value>) -> Result<(), ServiceError> {
        let url = self.url(path);
        debug!("POST {}", url);
        let mut request = self.client.post(&url);
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = bounded(self.timeout, async move {
            Ok::<_, ServiceError>(request.send().await?)
        })
        .await?;
        if !response.status().is_success() {
            return Err(ServiceError::Status(response.status().as_u16()));
        }
        Ok(())
    }
}

pub struct HttpCapture {
    endpoint: Endpoint,
}

pub struct HttpDetector {
    endpoint: Endpoint,
    /// Image downloads get their own, longer, bound.
    fetch_timeout: Duration,
}

pub struct HttpTelemetry {
    endpoint: Endpoint,
}

#[derive(Deserialize)]
struct RecordingStatus {
    #[serde(default)]
    recording: bool,
}

#[derive(Deserialize)]
struct TrackList {
    #[serde(default)]
    tracks: Vec<Track>,
}

#[derive(Deserialize)]
struct DetectionEntry {
    #[serde(default)]
    track_id: i64,
    #[serde(default)]
    jpeg_url: Option<String>,
}

#[derive(Deserialize)]
struct DetectionList {
    #[serde(default)]
    detections: Vec<DetectionEntry>,
}

#[derive(Deserialize)]
struct TelemetryEnvelope {
    #[serde(default)]
    telemetry: FlightTelemetry,
}

#[async_trait]
impl CaptureApi for HttpCapture {
    async fn start_recording(&self) -> Result<(), ServiceError> {
        self.endpoint.post("/recording/start", None).await
    }

    async fn stop_recording(&self) -> Result<(), ServiceError> {
        self.endpoint.post("/recording/stop", None).await
    }

    async fn is_recording(&self) -> Result<bool, ServiceError> {
        let status: RecordingStatus = self.endpoint.get_json("/status").await?;
        Ok(status.recording)
    }
}

#[async_trait]
impl DetectorApi for HttpDetector {
    async fn set_confidence(&self, threshold: f32) -> Result<(), ServiceError> {
        self.endpoint
            .post("/config", Some(json!({ "confidence": threshold })))
            .await
    }

    async fn set_image_size(&self, pixels: u32) -> Result<(), ServiceError> {
        self.endpoint
            .post("/config", Some(json!({ "imgsz": pixels })))
            .await
    }

    async fn set_model(&self, name: &str) -> Result<(), ServiceError> {
        self.endpoint
            .post("/model", Some(json!({ "name": name })))
            .await
    }

    async fn active_tracks(&self) -> Result<Vec<Track>, ServiceError> {
        let list: TrackList = self.endpoint.get_json("/tracks").await?;
        Ok(list.tracks)
    }

    async fn metrics(&self) -> Result<DetectorMetrics, ServiceError> {
        self.endpoint.get_json("/metrics").await
    }

    async fn config(&self) -> Result<DetectorConfig, ServiceError> {
        self.endpoint.get_json("/config").await
    }

    async fn thumbnail_source(&self, track_id: u64) -> Result<Option<Vec<u8>>, ServiceError> {
        let list: DetectionList = self.endpoint.get_json("/detections").await?;
        let url = list
            .detections
            .into_iter()
            .filter(|d| d.track_id >= 0 && d.track_id as u64 == track_id)
            .find_map(|d| d.jpeg_url.filter(|u| !u.is_empty()));
        let Some(url) = url else {
            return Ok(None);
        };
        let fetch = Endpoint {
            timeout: self.fetch_timeout,
            ..self.endpoint.clone()
        };
        if url.starts_with("http://") || url.starts_with("https://") {
            let absolute = Endpoint {
                base: String::new(),
                ..fetch
            };
            absolute.get_bytes(&url).await
        } else {
            fetch.get_bytes(&url).await
        }
    }
}

#[async_trait]
impl TelemetryApi for HttpTelemetry {
    async fn snapshot(&self) -> Result<FlightTelemetry, ServiceError> {
        let envelope: TelemetryEnvelope = self.endpoint.get_json("/telemetry/structured").await?;
        Ok(envelope.telemetry)
    }
}

/// Build the HTTP collaborator set from `[services]`.
pub fn http_services(config: &ServicesConfig) -> Result<Services, ServiceError> {
    let client = reqwest::Client::builder()
        .user_agent(concat!("fieldlink/", env!("CARGO_PKG_VERSION")))
        .build()?;
    let endpoint = |base: &str| Endpoint {
        client: client.clone(),
        base: base.to_string(),
        timeout: Duration::from_millis(config.poll_timeout_ms),
    };
    Ok(Services {
        capture: Arc::new(HttpCapture {
            endpoint: endpoint(&config.capture_url),
        }),
        detector: Arc::new(HttpDetector {
            endpoint: endpoint(&config.detector_url),
            fetch_timeout: Duration::from_millis(config.image_fetch_timeout_ms),
        }),
        telemetry: Arc::new(HttpTelemetry {
            endpoint: endpoint(&config.telemetry_url),
        }),
    })
}
