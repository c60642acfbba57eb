//! Shared bridge state: message log, cached AP credentials, pairing status.
//!
//! One [`SharedState`] is built at start-up and handed to every task as an
//! `Arc`. Each logical group sits behind its own lock and every accessor
//! copies data out before returning, so no caller holds a guard across I/O.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, RwLock};

use crate::metrics;
use crate::pairing::PairingState;
use crate::wire::ApCredentials;

/// Lock a std mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Rx,
    Tx,
}

/// Category of a line the bridge transmitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutboundKind {
    Telemetry,
    Detection,
    Status,
    Wifi,
    Image,
    Text,
}

/// Classified type tag of a logged line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    TelemetryRx,
    Command,
    ApInfo,
    Generic,
    Telemetry,
    Detection,
    Status,
    Wifi,
    Image,
    Text,
}

impl From<OutboundKind> for MessageKind {
    fn from(kind: OutboundKind) -> Self {
        match kind {
            OutboundKind::Telemetry => MessageKind::Telemetry,
            OutboundKind::Detection => MessageKind::Detection,
            OutboundKind::Status => MessageKind::Status,
            OutboundKind::Wifi => MessageKind::Wifi,
            OutboundKind::Image => MessageKind::Image,
            OutboundKind::Text => MessageKind::Text,
        }
    }
}

/// One logged link line. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InboundMessage {
    pub direction: Direction,
    pub raw: String,
    pub timestamp: DateTime<Utc>,
    pub kind: MessageKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rssi: Option<i32>,
}

impl InboundMessage {
    pub fn rx(raw: impl Into<String>, kind: MessageKind, rssi: Option<i32>) -> Self {
        Self {
            direction: Direction::Rx,
            raw: raw.into(),
            timestamp: Utc::now(),
            kind,
            rssi,
        }
    }

    pub fn tx(raw: impl Into<String>, kind: OutboundKind) -> Self {
        Self {
            direction: Direction::Tx,
            raw: raw.into(),
            timestamp: Utc::now(),
            kind: kind.into(),
            rssi: None,
        }
    }
}

/// Bounded audit log.
///
/// When an insertion pushes the log past capacity, the oldest half (or the
/// whole excess, if larger) is dropped in a single step.
#[derive(Debug)]
pub struct MessageLog {
    capacity: usize,
    entries: VecDeque<InboundMessage>,
    total: u64,
    evictions: u64,
}

impl MessageLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(2);
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity + 1),
            total: 0,
            evictions: 0,
        }
    }

    pub fn push(&mut self, msg: InboundMessage) {
        self.entries.push_back(msg);
        self.total += 1;
        self.evict_if_full();
    }

    /// Append several messages with at most one eviction step.
    pub fn push_batch(&mut self, msgs: impl IntoIterator<Item = InboundMessage>) {
        for msg in msgs {
            self.entries.push_back(msg);
            self.total += 1;
        }
        self.evict_if_full();
    }

    fn evict_if_full(&mut self) {
        let len = self.entries.len();
        if len <= self.capacity {
            return;
        }
        let drop = (self.capacity / 2).max(len - self.capacity);
        self.entries.drain(..drop);
        self.evictions += 1;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Messages ever appended, including evicted ones.
    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn evictions(&self) -> u64 {
        self.evictions
    }

    /// Newest `limit` entries, oldest first.
    pub fn recent(&self, limit: usize) -> Vec<InboundMessage> {
        let skip = self.entries.len().saturating_sub(limit);
        self.entries.iter().skip(skip).cloned().collect()
    }

    /// Entries appended after the first `seen` messages, as far as they are
    /// still held. Returns the new cursor with them.
    pub fn since(&self, seen: u64) -> (u64, Vec<InboundMessage>) {
        let fresh = self.total.saturating_sub(seen);
        let fresh = usize::try_from(fresh).unwrap_or(usize::MAX);
        (self.total, self.recent(fresh))
    }
}

/// Pairing view exposed through the status query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PairingStatus {
    pub enabled: bool,
    pub state: PairingState,
    pub ssid: Option<String>,
    pub address: Option<String>,
    pub hostname: String,
}

/// Read-only bridge snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct BridgeStatus {
    pub connected: bool,
    pub link_state: String,
    pub device: String,
    pub baud_rate: u32,
    pub total_messages: u64,
    pub forwarding: bool,
    pub pairing: PairingStatus,
    pub metrics: metrics::Snapshot,
    pub updated_at: DateTime<Utc>,
}

/// State shared by every bridge task.
#[derive(Debug)]
pub struct SharedState {
    log: Mutex<MessageLog>,
    credentials: RwLock<Option<ApCredentials>>,
    pairing: Mutex<PairingStatus>,
}

impl SharedState {
    pub fn new(history_capacity: usize, pairing_enabled: bool, hostname: &str) -> Self {
        Self {
            log: Mutex::new(MessageLog::new(history_capacity)),
            credentials: RwLock::new(None),
            pairing: Mutex::new(PairingStatus {
                enabled: pairing_enabled,
                state: PairingState::AwaitingCredentials,
                ssid: None,
                address: None,
                hostname: hostname.to_string(),
            }),
        }
    }

    pub fn append(&self, msg: InboundMessage) {
        lock(&self.log).push(msg);
    }

    pub fn record_tx(&self, raw: &str, kind: OutboundKind) {
        self.append(InboundMessage::tx(raw, kind));
    }

    pub fn history(&self, limit: usize) -> Vec<InboundMessage> {
        lock(&self.log).recent(limit)
    }

    /// See [`MessageLog::since`].
    pub fn messages_since(&self, seen: u64) -> (u64, Vec<InboundMessage>) {
        lock(&self.log).since(seen)
    }

    pub fn log_len(&self) -> usize {
        lock(&self.log).len()
    }

    pub fn total_messages(&self) -> u64 {
        lock(&self.log).total()
    }

    /// Last writer wins.
    pub fn set_credentials(&self, creds: ApCredentials) {
        let mut guard = self
            .credentials
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = Some(creds);
    }

    pub fn credentials(&self) -> Option<ApCredentials> {
        self.credentials
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn pairing(&self) -> PairingStatus {
        lock(&self.pairing).clone()
    }

    pub fn update_pairing(&self, f: impl FnOnce(&mut PairingStatus)) {
        f(&mut lock(&self.pairing));
    }
}
