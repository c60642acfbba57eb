//! # Bridge orchestration
//!
//! Wires the transport, classifier, dispatcher, forwarders, image transfer and
//! pairing task together. [`Bridge::start`] spawns every long-lived task and
//! returns a [`BridgeHandle`] for the read-only status and history queries.
//!
//! ## Tasks
//!
//! - link reader thread ([`Transport::spawn_reader`])
//! - inbound task: classify, log, dispatch commands
//! - one forwarder per stream (TEL, DET, STS)
//! - pairing state machine (optional)
//! - status file writer (optional)
//! - HTTP/WebSocket front-end (optional, `http-api` feature, [`api`])
//!
//! Image transfers run as transient tasks spawned by the dispatcher.

#[cfg(feature = "http-api")]
pub mod api;
pub mod dispatch;
pub mod forward;
pub mod image;

use anyhow::{Context, Result};
use chrono::Utc;
use log::{debug, info, warn};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::error::LinkError;
use crate::link::{classify::ingest, Transport};
use crate::metrics;
use crate::pairing::{NetworkManager, PairingMachine, PairingSettings};
use crate::services::Services;
use crate::state::{BridgeStatus, InboundMessage, OutboundKind, SharedState};

pub use dispatch::Dispatcher;
pub use forward::{ForwardSchedule, Forwarder, StreamKind, TickOutcome};
pub use image::{ImageSettings, ImageTransfer, TransferOutcome};

/// Default size of a history query.
pub const DEFAULT_HISTORY: usize = 100;

/// Time bounds on collaborator calls.
#[derive(Debug, Clone)]
pub struct Timeouts {
    pub command: Duration,
    pub model_switch: Duration,
    pub poll: Duration,
    pub image_fetch: Duration,
}

impl From<&crate::config::ServicesConfig> for Timeouts {
    fn from(c: &crate::config::ServicesConfig) -> Self {
        Self {
            command: Duration::from_millis(c.command_timeout_ms),
            model_switch: Duration::from_millis(c.model_switch_timeout_ms),
            poll: Duration::from_millis(c.poll_timeout_ms),
            image_fetch: Duration::from_millis(c.image_fetch_timeout_ms),
        }
    }
}

/// Everything a bridge task needs, cloned into each one.
#[derive(Clone)]
pub struct BridgeContext {
    pub transport: Transport,
    pub shared: Arc<SharedState>,
    pub services: Services,
    pub timeouts: Timeouts,
    pub images: Arc<ImageTransfer>,
}

impl BridgeContext {
    /// Transmit one line and record it in the audit log.
    pub async fn send_line(&self, line: String, kind: OutboundKind) -> Result<(), LinkError> {
        self.transport.send_async(line.clone()).await?;
        metrics::inc_sent(kind);
        self.shared.append(InboundMessage::tx(line, kind));
        Ok(())
    }

    /// Send an operator text line, trimmed.
    pub async fn send_text(&self, text: &str) -> Result<(), LinkError> {
        self.send_line(text.trim().to_string(), OutboundKind::Text).await
    }
}

pub struct Bridge;

impl Bridge {
    /// Spawn every bridge task. Must be called inside a tokio runtime.
    pub fn start(
        config: &Config,
        transport: Transport,
        services: Services,
        network: Option<Arc<dyn NetworkManager>>,
    ) -> Result<BridgeHandle> {
        #[cfg(feature = "http-api")]
        let api_listener = if config.api.enabled {
            Some(
                api::bind(&config.api.bind)
                    .with_context(|| format!("Failed to bind HTTP API on {}", config.api.bind))?,
            )
        } else {
            None
        };
        #[cfg(not(feature = "http-api"))]
        if config.api.enabled {
            debug!("Built without http-api; [api] section ignored");
        }

        let shared = Arc::new(SharedState::new(
            config.link.history_capacity,
            config.pairing.enabled,
            &config.pairing.hostname,
        ));
        let ctx = BridgeContext {
            transport: transport.clone(),
            shared: shared.clone(),
            services,
            timeouts: Timeouts::from(&config.services),
            images: Arc::new(ImageTransfer::new(ImageSettings::from(&config.image))),
        };
        let mut tasks = Vec::new();

        let (line_tx, mut line_rx) = mpsc::unbounded_channel::<String>();
        let reader = transport
            .spawn_reader(line_tx)
            .context("Failed to start link reader")?;

        let dispatcher = Dispatcher::new(ctx.clone());
        let inbound_state = shared.clone();
        tasks.push(tokio::spawn(async move {
            while let Some(line) = line_rx.recv().await {
                if let Some(command) = ingest(&inbound_state, &line) {
                    dispatcher.dispatch(command);
                }
            }
            debug!("inbound task finished");
        }));

        if config.forward.enabled {
            for schedule in ForwardSchedule::from_config(&config.forward) {
                let forwarder = Forwarder::new(schedule, ctx.clone(), &config.forward.thermal_path);
                tasks.push(tokio::spawn(forwarder.run()));
            }
        } else {
            info!("Periodic forwarding disabled by config");
        }

        if config.pairing.enabled {
            match network {
                Some(net) => {
                    let machine = PairingMachine::new(
                        net,
                        shared.clone(),
                        transport.clone(),
                        PairingSettings::from(&config.pairing),
                    );
                    tasks.push(tokio::spawn(machine.run()));
                }
                None => warn!("Pairing enabled but no network manager available"),
            }
        }

        let (stop, _) = watch::channel(false);
        let mut handle = BridgeHandle {
            ctx,
            forwarding: config.forward.enabled,
            baud_rate: config.link.baud_rate,
            tasks,
            reader: Some(reader),
            api_addr: None,
            stop,
        };

        if let Some(path) = config.status.file.clone() {
            let interval = Duration::from_secs(config.status.interval_secs);
            let snapshot = handle.snapshot_source();
            handle.tasks.push(tokio::spawn(async move {
                loop {
                    if let Err(e) = write_status_file(&path, &snapshot.status()).await {
                        warn!("Failed to write bridge status {}: {}", path, e);
                    }
                    tokio::time::sleep(interval).await;
                }
            }));
        }

        #[cfg(feature = "http-api")]
        if let Some(listener) = api_listener {
            let state = api::ApiState::new(
                handle.ctx.clone(),
                handle.snapshot_source(),
                handle.stop.subscribe(),
            );
            let (addr, task) = api::serve(listener, state)?;
            handle.api_addr = Some(addr);
            handle.tasks.push(task);
        }

        Ok(handle)
    }
}

/// Read-only view used by the status writer and the HTTP front-end.
#[derive(Clone)]
pub(crate) struct StatusSource {
    transport: Transport,
    shared: Arc<SharedState>,
    forwarding: bool,
    baud_rate: u32,
}

impl StatusSource {
    fn status(&self) -> BridgeStatus {
        BridgeStatus {
            connected: self.transport.is_connected(),
            link_state: self.transport.state().to_string(),
            device: self.transport.device(),
            baud_rate: self.baud_rate,
            total_messages: self.shared.total_messages(),
            forwarding: self.forwarding,
            pairing: self.shared.pairing(),
            metrics: metrics::snapshot(),
            updated_at: Utc::now(),
        }
    }
}

async fn write_status_file(path: &str, status: &BridgeStatus) -> std::io::Result<()> {
    let json = serde_json::to_string_pretty(status)?;
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    tokio::fs::write(path, json).await?;
    debug!("Wrote bridge status to {}", path);
    Ok(())
}

/// Handle to a running bridge.
pub struct BridgeHandle {
    ctx: BridgeContext,
    forwarding: bool,
    baud_rate: u32,
    tasks: Vec<JoinHandle<()>>,
    reader: Option<std::thread::JoinHandle<()>>,
    api_addr: Option<SocketAddr>,
    stop: watch::Sender<bool>,
}

impl BridgeHandle {
    fn snapshot_source(&self) -> StatusSource {
        StatusSource {
            transport: self.ctx.transport.clone(),
            shared: self.ctx.shared.clone(),
            forwarding: self.forwarding,
            baud_rate: self.baud_rate,
        }
    }

    pub fn status(&self) -> BridgeStatus {
        self.snapshot_source().status()
    }

    /// Newest `limit` log entries, oldest first.
    pub fn history(&self, limit: usize) -> Vec<InboundMessage> {
        self.ctx.shared.history(limit)
    }

    pub fn shared(&self) -> Arc<SharedState> {
        self.ctx.shared.clone()
    }

    /// Send an operator text line over the link.
    pub async fn send_text(&self, text: &str) -> Result<(), LinkError> {
        self.ctx.send_text(text).await
    }

    /// Address the HTTP front-end is listening on, if it runs.
    pub fn api_addr(&self) -> Option<SocketAddr> {
        self.api_addr
    }

    /// Stop all tasks and release the device.
    pub async fn shutdown(mut self) {
        self.stop.send_replace(true);
        for task in &self.tasks {
            task.abort();
        }
        self.ctx.transport.close();
        if let Some(reader) = self.reader.take() {
            let _ = tokio::task::spawn_blocking(move || reader.join()).await;
        }
        info!("Bridge stopped");
    }
}
