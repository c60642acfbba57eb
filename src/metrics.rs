//! Process-wide link counters.
//! Read back through [`snapshot`] for the bridge status query.
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::state::OutboundKind;

static LINES_RECEIVED: AtomicU64 = AtomicU64::new(0);
static TELEMETRY_SENT: AtomicU64 = AtomicU64::new(0);
static DETECTIONS_SENT: AtomicU64 = AtomicU64::new(0);
static STATUS_SENT: AtomicU64 = AtomicU64::new(0);
static WIFI_SENT: AtomicU64 = AtomicU64::new(0);
static TEXT_SENT: AtomicU64 = AtomicU64::new(0);
static IMAGE_CHUNKS_SENT: AtomicU64 = AtomicU64::new(0);
static TRANSFERS_COMPLETED: AtomicU64 = AtomicU64::new(0);
static TRANSFERS_ABORTED: AtomicU64 = AtomicU64::new(0);
static COMMANDS_DISPATCHED: AtomicU64 = AtomicU64::new(0);
static COMMANDS_FAILED: AtomicU64 = AtomicU64::new(0);
static COMMANDS_UNKNOWN: AtomicU64 = AtomicU64::new(0);
static LINK_RECONNECTS: AtomicU64 = AtomicU64::new(0);
static PAIRING_ASSOCIATIONS: AtomicU64 = AtomicU64::new(0);
static CYCLES_SKIPPED: AtomicU64 = AtomicU64::new(0);

pub fn inc_lines_received() {
    LINES_RECEIVED.fetch_add(1, Ordering::Relaxed);
}

pub fn inc_sent(kind: OutboundKind) {
    let counter = match kind {
        OutboundKind::Telemetry => &TELEMETRY_SENT,
        OutboundKind::Detection => &DETECTIONS_SENT,
        OutboundKind::Status => &STATUS_SENT,
        OutboundKind::Wifi => &WIFI_SENT,
        OutboundKind::Image => &IMAGE_CHUNKS_SENT,
        OutboundKind::Text => &TEXT_SENT,
    };
    counter.fetch_add(1, Ordering::Relaxed);
}

pub fn inc_transfers_completed() {
    TRANSFERS_COMPLETED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_transfers_aborted() {
    TRANSFERS_ABORTED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_commands_dispatched() {
    COMMANDS_DISPATCHED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_commands_failed() {
    COMMANDS_FAILED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_commands_unknown() {
    COMMANDS_UNKNOWN.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_link_reconnects() {
    LINK_RECONNECTS.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_pairing_associations() {
    PAIRING_ASSOCIATIONS.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_cycles_skipped() {
    CYCLES_SKIPPED.fetch_add(1, Ordering::Relaxed);
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct Snapshot {
    pub lines_received: u64,
    pub telemetry_sent: u64,
    pub detections_sent: u64,
    pub status_sent: u64,
    pub wifi_sent: u64,
    pub text_sent: u64,
    pub image_chunks_sent: u64,
    pub transfers_completed: u64,
    pub transfers_aborted: u64,
    pub commands_dispatched: u64,
    pub commands_failed: u64,
    pub commands_unknown: u64,
    pub link_reconnects: u64,
    pub pairing_associations: u64,
    pub cycles_skipped: u64,
}

pub fn snapshot() -> Snapshot {
    Snapshot {
        lines_received: LINES_RECEIVED.load(Ordering::Relaxed),
        telemetry_sent: TELEMETRY_SENT.load(Ordering::Relaxed),
        detections_sent: DETECTIONS_SENT.load(Ordering::Relaxed),
        status_sent: STATUS_SENT.load(Ordering::Relaxed),
        wifi_sent: WIFI_SENT.load(Ordering::Relaxed),
        text_sent: TEXT_SENT.load(Ordering::Relaxed),
        image_chunks_sent: IMAGE_CHUNKS_SENT.load(Ordering::Relaxed),
        transfers_completed: TRANSFERS_COMPLETED.load(Ordering::Relaxed),
        transfers_aborted: TRANSFERS_ABORTED.load(Ordering::Relaxed),
        commands_dispatched: COMMANDS_DISPATCHED.load(Ordering::Relaxed),
        commands_failed: COMMANDS_FAILED.load(Ordering::Relaxed),
        commands_unknown: COMMANDS_UNKNOWN.load(Ordering::Relaxed),
        link_reconnects: LINK_RECONNECTS.load(Ordering::Relaxed),
        pairing_associations: PAIRING_ASSOCIATIONS.load(Ordering::Relaxed),
        cycles_skipped: CYCLES_SKIPPED.load(Ordering::Relaxed),
    }
}
