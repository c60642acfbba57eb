//! # Fieldlink - Serial Radio Link Bridge
//!
//! Fieldlink bridges a ground station and a field unit over a small-payload,
//! high-latency radio reached through a local serial port. It multiplexes
//! telemetry, detection events, host status, on-demand thumbnails and ground
//! commands onto that one channel, and keeps going through serial loss, radio
//! reboots and Wi-Fi pairing churn.
//!
//! ## Features
//!
//! - **Single-writer link**: one mutex-guarded send path; lines interleave only whole.
//! - **Self-healing forwarders**: TEL, DET and STS run on independent schedules and skip while the link is down.
//! - **Chunked thumbnails**: `IMG:` chunks sized to the radio payload and paced to its airtime.
//! - **Ground commands**: parsed once into a typed [`wire::Command`], dispatched under timeouts.
//! - **Wi-Fi pairing**: joins the field unit's access point and re-announces the host address.
//! - **Local API**: optional `axum` front-end for status, history, operator sends and a live WebSocket feed.
//! - **Daemon Mode**: background service support (Linux/macOS) with TTY-aware logging.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use fieldlink::bridge::Bridge;
//! use fieldlink::config::Config;
//! use fieldlink::link::{SerialOpener, Transport, TransportSettings};
//! use fieldlink::pairing::{nmcli::NmcliManager, NetworkManager};
//! use fieldlink::services::http::http_services;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!     let transport = Transport::new(
//!         SerialOpener {
//!             port: config.link.port.clone(),
//!             baud_rate: config.link.baud_rate,
//!             read_timeout: config.link.read_timeout(),
//!         },
//!         TransportSettings {
//!             max_payload: config.link.max_payload,
//!             reconnect_interval: config.link.reconnect_interval(),
//!         },
//!     );
//!     let services = http_services(&config.services)?;
//!     let network: Arc<dyn NetworkManager> = Arc::new(NmcliManager::new(&config.pairing));
//!     let bridge = Bridge::start(&config, transport, services, Some(network))?;
//!     println!("{}", serde_json::to_string_pretty(&bridge.status())?);
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`link`] - Serial transport, line framer and inbound classifier
//! - [`wire`] - Line codecs: frames, commands, credentials, image chunks
//! - [`bridge`] - Dispatcher, forwarders, image transfer and task wiring
//! - [`pairing`] - Wi-Fi pairing state machine and `nmcli` backend
//! - [`services`] - Collaborator traits and their HTTP backend
//! - [`state`] - Shared message log, credentials and status snapshot
//! - [`config`] - Configuration management and validation
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   lines   ┌──────────────┐  commands  ┌──────────────┐
//! │  Transport   │ ────────▶ │  Classifier  │ ─────────▶ │  Dispatcher  │
//! │ (one writer) │           └──────────────┘            └──────────────┘
//! └──────────────┘                  │ AP creds                  │ GET_IMG
//!        ▲                          ▼                           ▼
//!        │ TEL/DET/STS       ┌──────────────┐            ┌──────────────┐
//!        ├────────────────── │  Forwarders  │            │ImageTransfer │
//!        │ WIFI              └──────────────┘            └──────────────┘
//!        └────────────────── Pairing state machine               │ IMG
//!        ▲───────────────────────────────────────────────────────┘
//! ```

pub mod bridge;
pub mod config;
pub mod error;
pub mod link;
pub mod logutil;
pub mod metrics;
pub mod pairing;
pub mod services;
pub mod state;
pub mod wire;
