//! # Configuration Management Module
//!
//! All tunables of the bridge live in one TOML file, loaded once at start-up.
//!
//! ## Configuration Structure
//!
//! - [`LinkConfig`] - Serial device, payload budget, reconnect pacing
//! - [`ForwardConfig`] - Telemetry / detection / status forwarding intervals
//! - [`ServicesConfig`] - Collaborator base URLs and request timeouts
//! - [`ImageConfig`] - Thumbnail size, quality and chunk pacing
//! - [`PairingConfig`] - Wi-Fi pairing with the field unit's access point
//! - [`StatusConfig`] - Periodic status snapshot file
//! - [`ApiConfig`] - Local HTTP/WebSocket front-end
//! - [`LoggingConfig`] - Log level and optional log file
//!
//! ## Usage
//!
//! ```rust,no_run
//! use fieldlink::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!     config.validate()?;
//!     println!("Serial Port: {}", config.link.port);
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration File Format
//!
//! ```toml
//! [link]
//! port = "/dev/ttyAMA0"
//! baud_rate = 115200
//! max_payload = 250
//!
//! [forward]
//! telemetry_interval_ms = 2000
//! detection_interval_ms = 3000
//! status_interval_ms = 5000
//!
//! [pairing]
//! enabled = true
//! hostname = "dc-detect"
//! ```
//!
//! Every section has defaults, so a file only needs the values that differ.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::fs;

use crate::wire::image::IMG_PREFIX;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub link: LinkConfig,
    #[serde(default)]
    pub forward: ForwardConfig,
    #[serde(default)]
    pub services: ServicesConfig,
    #[serde(default)]
    pub image: ImageConfig,
    #[serde(default)]
    pub pairing: PairingConfig,
    #[serde(default)]
    pub status: StatusConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    pub port: String,
    pub baud_rate: u32,
    /// Largest line (newline excluded) the field unit relays in one radio packet.
    pub max_payload: usize,
    /// Poll timeout of a single serial read.
    pub read_timeout_ms: u64,
    /// Fixed wait between failed open attempts. There is no retry limit.
    pub reconnect_interval_secs: u64,
    /// Capacity of the in-memory message log.
    pub history_capacity: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyAMA0".to_string(),
            baud_rate: 115200,
            max_payload: 250,
            read_timeout_ms: 1000,
            reconnect_interval_secs: 10,
            history_capacity: 1000,
        }
    }
}

impl LinkConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_secs(self.reconnect_interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ForwardConfig {
    pub enabled: bool,
    pub telemetry_interval_ms: u64,
    pub detection_interval_ms: u64,
    pub status_interval_ms: u64,
    /// Host thermal sensor in millidegrees Celsius.
    pub thermal_path: String,
}

impl Default for ForwardConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            telemetry_interval_ms: 2000,
            detection_interval_ms: 3000,
            status_interval_ms: 5000,
            thermal_path: "/sys/class/thermal/thermal_zone0/temp".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServicesConfig {
    pub capture_url: String,
    pub detector_url: String,
    pub telemetry_url: String,
    /// Bound on a ground command's collaborator call.
    pub command_timeout_ms: u64,
    /// Bound on each forwarder poll.
    pub poll_timeout_ms: u64,
    pub model_switch_timeout_ms: u64,
    pub image_fetch_timeout_ms: u64,
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            capture_url: "http://localhost:8001".to_string(),
            detector_url: "http://localhost:8002".to_string(),
            telemetry_url: "http://localhost:8003".to_string(),
            command_timeout_ms: 3000,
            poll_timeout_ms: 2000,
            model_switch_timeout_ms: 5000,
            image_fetch_timeout_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageConfig {
    pub width: u32,
    pub height: u32,
    /// JPEG quality factor, 1..=100.
    pub quality: u8,
    /// Binary bytes per IMG chunk before hex expansion.
    pub chunk_bytes: usize,
    /// Pause after each chunk. Must cover the radio's airtime for one chunk.
    pub chunk_delay_ms: u64,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            width: 120,
            height: 90,
            quality: 15,
            chunk_bytes: 100,
            chunk_delay_ms: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PairingConfig {
    pub enabled: bool,
    pub interface: String,
    /// Name advertised as `<hostname>.local` and sent in WIFI announcements.
    pub hostname: String,
    /// Dashboard port the field unit is told to connect to.
    pub web_port: u16,
    pub credential_poll_secs: u64,
    /// Backoff floor between association attempts.
    pub retry_interval_secs: u64,
    pub drift_check_interval_secs: u64,
    pub announce_interval_secs: u64,
    pub disconnect_settle_ms: u64,
    pub dhcp_wait_ms: u64,
    pub command_timeout_secs: u64,
}

impl Default for PairingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interface: "wlan0".to_string(),
            hostname: "dc-detect".to_string(),
            web_port: 8080,
            credential_poll_secs: 5,
            retry_interval_secs: 10,
            drift_check_interval_secs: 10,
            announce_interval_secs: 30,
            disconnect_settle_ms: 2000,
            dhcp_wait_ms: 3000,
            command_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusConfig {
    /// JSON status snapshot path. `None` disables the file.
    pub file: Option<String>,
    pub interval_secs: u64,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            file: Some("data/status.json".to_string()),
            interval_secs: 5,
        }
    }
}

/// Local front-end for dashboards. Only served when built with `http-api`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub enabled: bool,
    /// Listen address; port 0 picks a free port.
    pub bind: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: "0.0.0.0:8004".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: Some("fieldlink.log".to_string()),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file {}: {}", path, e))?;

        Ok(config)
    }

    /// Create a default configuration file
    pub async fn create_default(path: &str) -> Result<()> {
        let config = Config::default();
        let content = toml::to_string_pretty(&config)
            .map_err(|e| anyhow!("Failed to serialize default config: {}", e))?;

        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path, e))?;

        Ok(())
    }

    /// Reject values that would break the link budget or spin a loop.
    pub fn validate(&self) -> Result<()> {
        if self.link.port.trim().is_empty() {
            return Err(anyhow!("link.port must not be empty"));
        }
        if self.link.history_capacity < 2 {
            return Err(anyhow!("link.history_capacity must be at least 2"));
        }
        if self.link.read_timeout_ms == 0 || self.link.reconnect_interval_secs == 0 {
            return Err(anyhow!("link read timeout and reconnect interval must be > 0"));
        }
        // An IMG line must carry at least one payload byte behind its header.
        let min_payload = IMG_PREFIX.len() + 2 * 5 + 2 + 2;
        if self.link.max_payload < min_payload {
            return Err(anyhow!(
                "link.max_payload {} is below the {} bytes needed for a chunk header",
                self.link.max_payload,
                min_payload
            ));
        }
        let f = &self.forward;
        if f.telemetry_interval_ms == 0 || f.detection_interval_ms == 0 || f.status_interval_ms == 0
        {
            return Err(anyhow!("forward intervals must be > 0"));
        }
        let img = &self.image;
        if img.width == 0 || img.height == 0 {
            return Err(anyhow!("image dimensions must be > 0"));
        }
        if !(1..=100).contains(&img.quality) {
            return Err(anyhow!("image.quality must be within 1..=100"));
        }
        if img.chunk_bytes == 0 || img.chunk_delay_ms == 0 {
            return Err(anyhow!("image.chunk_bytes and image.chunk_delay_ms must be > 0"));
        }
        let p = &self.pairing;
        if p.enabled
            && (p.credential_poll_secs == 0
                || p.retry_interval_secs == 0
                || p.drift_check_interval_secs == 0
                || p.announce_interval_secs == 0)
        {
            return Err(anyhow!("pairing intervals must be > 0"));
        }
        if p.hostname.contains(',') || p.hostname.trim().is_empty() {
            return Err(anyhow!("pairing.hostname must be non-empty and comma-free"));
        }
        if self.status.interval_secs == 0 {
            return Err(anyhow!("status.interval_secs must be > 0"));
        }
        if self.api.enabled && self.api.bind.parse::<std::net::SocketAddr>().is_err() {
            return Err(anyhow!("api.bind '{}' is not a socket address", self.api.bind));
        }
        Ok(())
    }
}
