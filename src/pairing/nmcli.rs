//! NetworkManager (`nmcli`) backend with `avahi-publish` discovery.

use async_trait::async_trait;
use log::{debug, info, warn};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;

use super::NetworkManager;
use crate::config::PairingConfig;
use crate::error::PairingError;

pub struct NmcliManager {
    interface: String,
    command_timeout: Duration,
    dhcp_wait: Duration,
    avahi: Mutex<Option<Child>>,
}

impl NmcliManager {
    pub fn new(config: &PairingConfig) -> Self {
        Self {
            interface: config.interface.clone(),
            command_timeout: Duration::from_secs(config.command_timeout_secs),
            dhcp_wait: Duration::from_millis(config.dhcp_wait_ms),
            avahi: Mutex::new(None),
        }
    }

    /// Run `nmcli <args>` and return stdout. Non-zero exit is an error.
    async fn nmcli(&self, args: &[&str], limit: Duration) -> Result<String, PairingError> {
        // Never log the password argument.
        let shown = redact(args);
        debug!("nmcli {}", shown);
        let output = Command::new("nmcli")
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();
        let output = tokio::time::timeout(limit, output)
            .await
            .map_err(|_| PairingError::Timeout {
                command: format!("nmcli {}", shown),
            })?
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => PairingError::ToolMissing { tool: "nmcli" },
                _ => PairingError::Io(e),
            })?;
        if !output.status.success() {
            return Err(PairingError::CommandFailed {
                command: format!("nmcli {}", shown),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn short(&self) -> Duration {
        self.command_timeout.min(Duration::from_secs(10))
    }
}

fn redact(args: &[&str]) -> String {
    let mut out = Vec::with_capacity(args.len());
    let mut hide_next = false;
    for a in args {
        if hide_next {
            out.push("***");
            hide_next = false;
        } else {
            out.push(*a);
            hide_next = *a == "password";
        }
    }
    out.join(" ")
}

/// Value of the first `FIELD:value` line in terse nmcli output.
fn terse_value<'a>(stdout: &'a str, field: &str) -> Option<&'a str> {
    stdout
        .lines()
        .filter(|l| l.contains(field))
        .filter_map(|l| l.split_once(':').map(|(_, v)| v.trim()))
        .find(|v| !v.is_empty() && *v != "--")
}

/// `IP4.ADDRESS[1]:192.168.4.2/24` -> `192.168.4.2`
fn parse_ipv4(stdout: &str) -> Option<String> {
    let value = terse_value(stdout, "IP4.ADDRESS")?;
    let addr = value.split('/').next().unwrap_or(value).trim();
    (!addr.is_empty()).then(|| addr.to_string())
}

#[async_trait]
impl NetworkManager for NmcliManager {
    async fn check_tool(&self) -> Result<(), PairingError> {
        if !cfg!(target_os = "linux") {
            return Err(PairingError::ToolMissing { tool: "nmcli" });
        }
        self.nmcli(&["--version"], self.short()).await.map(|_| ())
    }

    async fn current_association(&self) -> Result<Option<String>, PairingError> {
        let out = self
            .nmcli(
                &["-t", "-f", "GENERAL.CONNECTION", "device", "show", &self.interface],
                self.short(),
            )
            .await?;
        Ok(terse_value(&out, "GENERAL.CONNECTION").map(str::to_string))
    }

    async fn associate(&self, ssid: &str, password: &str) -> Result<(), PairingError> {
        // Stale profiles for this SSID carry old passwords.
        if let Err(e) = self.nmcli(&["connection", "delete", ssid], self.short()).await {
            debug!("no stale profile removed for '{}': {}", ssid, e);
        }
        self.nmcli(
            &[
                "device", "wifi", "connect", ssid, "password", password, "ifname",
                &self.interface,
            ],
            self.command_timeout,
        )
        .await?;
        if let Err(e) = self
            .nmcli(
                &[
                    "connection",
                    "modify",
                    ssid,
                    "connection.autoconnect",
                    "yes",
                    "connection.autoconnect-priority",
                    "100",
                ],
                self.short(),
            )
            .await
        {
            warn!("Could not pin autoconnect priority for '{}': {}", ssid, e);
        }
        tokio::time::sleep(self.dhcp_wait).await;
        Ok(())
    }

    async fn disassociate(&self) -> Result<(), PairingError> {
        self.nmcli(&["device", "disconnect", &self.interface], self.short())
            .await
            .map(|_| ())
    }

    async fn assigned_address(&self, ssid: &str) -> Result<Option<String>, PairingError> {
        let out = self
            .nmcli(&["-t", "-f", "IP4.ADDRESS", "connection", "show", ssid], self.short())
            .await?;
        Ok(parse_ipv4(&out))
    }

    async fn advertise(&self, hostname: &str, address: &str) -> Result<(), PairingError> {
        let mut slot = self.avahi.lock().await;
        if let Some(mut old) = slot.take() {
            let _ = old.kill().await;
        }
        let name = format!("{}.local", hostname);
        let child = Command::new("avahi-publish")
            .args(["-a", name.as_str(), address])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => PairingError::ToolMissing {
                    tool: "avahi-publish",
                },
                _ => PairingError::Io(e),
            })?;
        info!("Advertising {} -> {}", name, address);
        *slot = Some(child);
        Ok(())
    }

    async fn withdraw(&self) {
        if let Some(mut child) = self.avahi.lock().await.take() {
            let _ = child.kill().await;
            debug!("Discovery advertisement withdrawn");
        }
    }
}
