//! # Wi-Fi pairing with the field unit's access point
//!
//! The field unit announces its AP over the link (`AP:ssid,password`). The
//! pairing task joins the host to that AP, reports the assigned address back
//! (`WIFI:ip,hostname,port`) and keeps re-validating the association.
//!
//! ```text
//! AwaitingCredentials --creds--> Associating --ok--> Connected
//!                                  |  ^  |               |
//!                      other net   |  |  +--fail (backoff)
//!                                  v  |                  | drift / new creds
//!                              Disconnecting        Reconnecting
//! ```
//!
//! Once credentials are cached the machine never returns to
//! `AwaitingCredentials`. Failed attempts stay in `Associating` or
//! `Reconnecting` and wait the retry interval before the next one.
//!
//! The OS side is abstracted behind [`NetworkManager`]; [`nmcli`] is the
//! Linux backend.

pub mod nmcli;

use async_trait::async_trait;
use log::{debug, info, warn};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::PairingConfig;
use crate::error::PairingError;
use crate::link::Transport;
use crate::metrics;
use crate::state::{OutboundKind, SharedState};
use crate::wire::{ApCredentials, WifiAnnounce};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PairingState {
    AwaitingCredentials,
    Disconnecting,
    Associating,
    Connected,
    Reconnecting,
}

impl fmt::Display for PairingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PairingState::AwaitingCredentials => "awaiting_credentials",
            PairingState::Disconnecting => "disconnecting",
            PairingState::Associating => "associating",
            PairingState::Connected => "connected",
            PairingState::Reconnecting => "reconnecting",
        };
        f.write_str(s)
    }
}

/// Host network management capability.
#[async_trait]
pub trait NetworkManager: Send + Sync {
    /// Check that the backend is usable at all.
    async fn check_tool(&self) -> Result<(), PairingError> {
        Ok(())
    }

    /// SSID the managed interface is joined to, if any.
    async fn current_association(&self) -> Result<Option<String>, PairingError>;

    async fn associate(&self, ssid: &str, password: &str) -> Result<(), PairingError>;

    async fn disassociate(&self) -> Result<(), PairingError>;

    /// IPv4 address assigned on `ssid`, once DHCP has completed.
    async fn assigned_address(&self, ssid: &str) -> Result<Option<String>, PairingError>;

    /// Start advertising `<hostname>.local`. Must return promptly.
    async fn advertise(&self, _hostname: &str, _address: &str) -> Result<(), PairingError> {
        Ok(())
    }

    async fn withdraw(&self) {}
}

#[derive(Debug, Clone)]
pub struct PairingSettings {
    pub hostname: String,
    pub web_port: u16,
    pub credential_poll: Duration,
    pub retry_interval: Duration,
    pub drift_check_interval: Duration,
    pub announce_interval: Duration,
    pub disconnect_settle: Duration,
}

impl From<&PairingConfig> for PairingSettings {
    fn from(c: &PairingConfig) -> Self {
        Self {
            hostname: c.hostname.clone(),
            web_port: c.web_port,
            credential_poll: Duration::from_secs(c.credential_poll_secs),
            retry_interval: Duration::from_secs(c.retry_interval_secs),
            drift_check_interval: Duration::from_secs(c.drift_check_interval_secs),
            announce_interval: Duration::from_secs(c.announce_interval_secs),
            disconnect_settle: Duration::from_millis(c.disconnect_settle_ms),
        }
    }
}

pub struct PairingMachine {
    state: PairingState,
    /// State to resume after a forced disconnect.
    resume: PairingState,
    /// A foreign association was already torn down for this attempt.
    cleared: bool,
    target: Option<ApCredentials>,
    address: Option<String>,
    last_announce: Option<Instant>,
    net: Arc<dyn NetworkManager>,
    shared: Arc<SharedState>,
    transport: Transport,
    settings: PairingSettings,
}

impl PairingMachine {
    pub fn new(
        net: Arc<dyn NetworkManager>,
        shared: Arc<SharedState>,
        transport: Transport,
        settings: PairingSettings,
    ) -> Self {
        Self {
            state: PairingState::AwaitingCredentials,
            resume: PairingState::Associating,
            cleared: false,
            target: None,
            address: None,
            last_announce: None,
            net,
            shared,
            transport,
            settings,
        }
    }

    pub fn state(&self) -> PairingState {
        self.state
    }

    pub fn address(&self) -> Option<&str> {
        self.address.as_deref()
    }

    fn transition(&mut self, next: PairingState) {
        if self.state == next {
            return;
        }
        info!("Pairing {} -> {}", self.state, next);
        self.state = next;
        let ssid = self.target.as_ref().map(|c| c.ssid.clone());
        let address = self.address.clone();
        self.shared.update_pairing(|p| {
            p.state = next;
            p.ssid = ssid;
            p.address = address;
        });
    }

    /// Run one step and return how long to wait before the next.
    pub async fn step(&mut self) -> Duration {
        match self.state {
            PairingState::AwaitingCredentials => match self.shared.credentials() {
                Some(creds) => {
                    self.target = Some(creds);
                    self.transition(PairingState::Associating);
                    Duration::ZERO
                }
                None => self.settings.credential_poll,
            },
            PairingState::Associating | PairingState::Reconnecting => self.associate().await,
            PairingState::Disconnecting => {
                if let Err(e) = self.net.disassociate().await {
                    warn!("Disconnect before pairing failed: {}", e);
                }
                self.cleared = true;
                self.transition(self.resume);
                self.settings.disconnect_settle
            }
            PairingState::Connected => self.check_drift().await,
        }
    }

    async fn associate(&mut self) -> Duration {
        // Credentials only ever get replaced, so the latest set is the target.
        let Some(creds) = self.shared.credentials().or_else(|| self.target.clone()) else {
            return self.settings.retry_interval;
        };
        self.target = Some(creds.clone());

        match self.net.current_association().await {
            Ok(Some(current)) if current != creds.ssid && !self.cleared => {
                info!(
                    "Interface joined to '{}'; leaving it for AP '{}'",
                    current, creds.ssid
                );
                self.resume = self.state;
                self.transition(PairingState::Disconnecting);
                return Duration::ZERO;
            }
            Ok(_) => {}
            Err(e) => debug!("Could not read current association: {}", e),
        }

        info!("Associating with AP '{}'", creds.ssid);
        let result = match self.net.associate(&creds.ssid, &creds.password).await {
            Ok(()) => self.net.assigned_address(&creds.ssid).await,
            Err(e) => Err(e),
        };
        self.cleared = false;
        match result {
            Ok(Some(address)) => {
                info!("Associated with '{}', address {}", creds.ssid, address);
                self.address = Some(address.clone());
                self.transition(PairingState::Connected);
                metrics::inc_pairing_associations();
                if let Err(e) = self.net.advertise(&self.settings.hostname, &address).await {
                    warn!("Discovery advertising failed: {}", e);
                }
                self.last_announce = None;
                self.announce().await;
                self.settings.drift_check_interval
            }
            Ok(None) => {
                warn!("Associated with '{}' but no address assigned", creds.ssid);
                self.settings.retry_interval
            }
            Err(e) => {
                warn!("Association with '{}' failed: {}", creds.ssid, e);
                self.settings.retry_interval
            }
        }
    }

    async fn check_drift(&mut self) -> Duration {
        let expected = self.target.as_ref().map(|c| c.ssid.clone()).unwrap_or_default();
        let drift = match self.shared.credentials() {
            Some(latest) if latest.ssid != expected => Some(format!("new AP '{}' announced", latest.ssid)),
            _ => match self.net.current_association().await {
                Ok(Some(current)) if current == expected => None,
                Ok(Some(current)) => Some(format!("interface moved to '{}'", current)),
                Ok(None) => Some("interface disconnected".to_string()),
                Err(e) => {
                    debug!("Drift check skipped: {}", e);
                    None
                }
            },
        };

        if let Some(reason) = drift {
            warn!("Pairing with '{}' lost: {}", expected, reason);
            self.address = None;
            self.transition(PairingState::Reconnecting);
            self.net.withdraw().await;
            return self.settings.retry_interval;
        }

        self.announce().await;
        self.settings.drift_check_interval
    }

    /// Send `WIFI:` if the link is up and the last one is older than the
    /// announce interval.
    async fn announce(&mut self) {
        let Some(address) = self.address.clone() else {
            return;
        };
        if !self.transport.is_connected() {
            return;
        }
        if let Some(at) = self.last_announce {
            if at.elapsed() < self.settings.announce_interval {
                return;
            }
        }
        let line = WifiAnnounce {
            address,
            hostname: self.settings.hostname.clone(),
            port: self.settings.web_port,
        }
        .encode();
        match self.transport.send_async(line.clone()).await {
            Ok(()) => {
                self.shared.record_tx(&line, OutboundKind::Wifi);
                metrics::inc_sent(OutboundKind::Wifi);
                self.last_announce = Some(Instant::now());
            }
            Err(e) => debug!("WIFI announce not sent: {}", e),
        }
    }

    /// Drive the machine for the life of the process.
    pub async fn run(mut self) {
        if let Err(e) = self.net.check_tool().await {
            warn!("Wi-Fi pairing disabled: {}", e);
            return;
        }
        info!(
            "Pairing task started (hostname={}), waiting for AP credentials",
            self.settings.hostname
        );
        loop {
            let wait = self.step().await;
            tokio::time::sleep(wait).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Idle;

    #[async_trait]
    impl NetworkManager for Idle {
        async fn current_association(&self) -> Result<Option<String>, PairingError> {
            Ok(None)
        }
        async fn associate(&self, _ssid: &str, _password: &str) -> Result<(), PairingError> {
            Ok(())
        }
        async fn disassociate(&self) -> Result<(), PairingError> {
            Ok(())
        }
        async fn assigned_address(&self, _ssid: &str) -> Result<Option<String>, PairingError> {
            Ok(None)
        }
    }

    #[test]
    fn settings_follow_config() {
        let s = PairingSettings::from(&PairingConfig::default());
        assert_eq!(s.retry_interval, Duration::from_secs(10));
        assert_eq!(s.announce_interval, Duration::from_secs(30));
        assert_eq!(s.disconnect_settle, Duration::from_millis(2000));
        assert_eq!(s.hostname, "dc-detect");
    }

    #[test]
    fn display_matches_serialized_name() {
        for state in [
            PairingState::AwaitingCredentials,
            PairingState::Disconnecting,
            PairingState::Associating,
            PairingState::Connected,
            PairingState::Reconnecting,
        ] {
            assert_eq!(serde_json::to_value(state).unwrap(), state.to_string());
        }
    }

    #[test]
    fn default_hooks_do_nothing() {
        tokio_test::block_on(async {
            let net = Idle;
            assert!(net.check_tool().await.is_ok());
            assert!(net.advertise("dc-detect", "10.0.0.2").await.is_ok());
            net.withdraw().await;
        });
    }
}
