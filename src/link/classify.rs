//! Inbound line classification.
//!
//! Rules run in order and the first match wins:
//!
//! 1. contains `TEL:` -> telemetry echo
//! 2. starts with `CMD:` -> ground command, parsed into [`Command`]
//! 3. starts with `AP:` -> pairing credentials
//! 4. anything else -> generic
//!
//! A trailing `RSSI:<int>` token is attached whatever the kind.

use log::{debug, info, warn};

use crate::logutil::{preview, MAX_PREVIEW};
use crate::state::{InboundMessage, MessageKind, SharedState};
use crate::wire::{parse_rssi, strip_rssi, ApCredentials, Command, AP_PREFIX, CMD_PREFIX, TEL_PREFIX};

#[derive(Debug, Clone, PartialEq)]
pub struct Classified {
    pub message: InboundMessage,
    pub command: Option<Command>,
    pub credentials: Option<ApCredentials>,
}

pub fn classify(line: &str) -> Classified {
    let rssi = parse_rssi(line);
    let body = strip_rssi(line);
    let mut command = None;
    let mut credentials = None;

    let kind = if line.contains(TEL_PREFIX) {
        MessageKind::TelemetryRx
    } else if let Some(rest) = body.strip_prefix(CMD_PREFIX) {
        command = Some(Command::parse(rest));
        MessageKind::Command
    } else if let Some(rest) = body.strip_prefix(AP_PREFIX) {
        match ApCredentials::parse(rest) {
            Ok(creds) => credentials = Some(creds),
            Err(e) => warn!("Discarding AP line: {}", e),
        }
        MessageKind::ApInfo
    } else {
        MessageKind::Generic
    };

    Classified {
        message: InboundMessage::rx(line, kind, rssi),
        command,
        credentials,
    }
}

/// Classify, log, then apply the credential side effect.
///
/// The message is in the log before anything else happens, so the audit trail
/// holds even when the command it carries fails later. The parsed command is
/// returned for the dispatcher.
pub fn ingest(state: &SharedState, line: &str) -> Option<Command> {
    let Classified {
        message,
        command,
        credentials,
    } = classify(line);
    match message.kind {
        MessageKind::Command | MessageKind::ApInfo => {
            info!("RX {:?}: {}", message.kind, preview(line, MAX_PREVIEW))
        }
        _ => debug!("RX {:?}: {}", message.kind, preview(line, MAX_PREVIEW)),
    }
    state.append(message);
    if let Some(creds) = credentials {
        info!("AP credentials received for SSID '{}'", creds.ssid);
        state.set_credentials(creds);
    }
    command
}
