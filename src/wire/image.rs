//! Chunked thumbnail transfer over the link.
//!
//! A compressed image is cut into fixed-size binary chunks; each chunk goes out
//! as `IMG:<index>:<total>:<HEX>` so the far end can detect loss and either
//! reassemble or discard the image. Chunk size is derived from the link
//! payload so that header plus hex payload always fits one radio packet.

use std::time::Duration;

use crate::error::WireError;
use crate::logutil::hex_upper;

pub const IMG_PREFIX: &str = "IMG:";

fn digits(mut n: usize) -> usize {
    let mut d = 1;
    while n >= 10 {
        n /= 10;
        d += 1;
    }
    d
}

/// Worst-case header length for a transfer of `total` chunks.
pub fn header_len(total: usize) -> usize {
    IMG_PREFIX.len() + digits(total.saturating_sub(1)) + 1 + digits(total) + 1
}

/// Per-invocation transfer plan. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageTransferJob {
    pub track_id: u64,
    /// Binary bytes per chunk (the line carries twice as many hex digits).
    pub chunk_size: usize,
    pub total_chunks: usize,
    pub pacing: Duration,
}

impl ImageTransferJob {
    /// Plan a transfer of `payload_len` bytes.
    ///
    /// `requested_chunk` is an upper bound; it shrinks until header plus hex
    /// payload fits `max_payload`. Returns `None` when even a one-byte chunk
    /// cannot fit, or when there is nothing to send.
    pub fn plan(
        track_id: u64,
        payload_len: usize,
        requested_chunk: usize,
        max_payload: usize,
        pacing: Duration,
    ) -> Option<Self> {
        if payload_len == 0 || requested_chunk == 0 {
            return None;
        }
        let mut chunk_size = requested_chunk;
        loop {
            let total = payload_len.div_ceil(chunk_size);
            let line_len = header_len(total) + 2 * chunk_size;
            if line_len <= max_payload {
                return Some(Self {
                    track_id,
                    chunk_size,
                    total_chunks: total,
                    pacing,
                });
            }
            // Shrink toward what the budget allows for this header size.
            let room = max_payload.checked_sub(header_len(total))? / 2;
            if room == 0 {
                return None;
            }
            chunk_size = room.min(chunk_size - 1);
            if chunk_size == 0 {
                return None;
            }
        }
    }

    /// Encode every chunk line of `data` in index order.
    pub fn lines(&self, data: &[u8]) -> Vec<String> {
        data.chunks(self.chunk_size)
            .enumerate()
            .map(|(index, payload)| {
                ImageChunk {
                    index,
                    total: self.total_chunks,
                    payload: payload.to_vec(),
                }
                .encode()
            })
            .collect()
    }

    /// Rough airtime estimate for logging.
    pub fn eta(&self) -> Duration {
        let chunks = u32::try_from(self.total_chunks).unwrap_or(u32::MAX);
        self.pacing.saturating_mul(chunks)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageChunk {
    pub index: usize,
    pub total: usize,
    pub payload: Vec<u8>,
}

impl ImageChunk {
    pub fn encode(&self) -> String {
        format!(
            "{IMG_PREFIX}{}:{}:{}",
            self.index,
            self.total,
            hex_upper(&self.payload)
        )
    }

    pub fn decode(line: &str) -> Result<Self, WireError> {
        const F: &str = "IMG";
        let body = line
            .trim_end()
            .strip_prefix(IMG_PREFIX)
            .ok_or(WireError::Prefix {
                expected: IMG_PREFIX,
            })?;
        let parts: Vec<&str> = body.splitn(3, ':').collect();
        if parts.len() != 3 {
            return Err(WireError::FieldCount {
                frame: F,
                expected: 3,
                found: parts.len(),
            });
        }
        let bad = |field: &'static str, value: &str| WireError::Field {
            frame: F,
            field,
            value: value.to_string(),
        };
        let index: usize = parts[0].parse().map_err(|_| bad("index", parts[0]))?;
        let total: usize = parts[1].parse().map_err(|_| bad("total", parts[1]))?;
        if index >= total {
            return Err(bad("index", parts[0]));
        }
        let hex = parts[2].as_bytes();
        if hex.len() % 2 != 0 {
            return Err(bad("payload", parts[2]));
        }
        let mut payload = Vec::with_capacity(hex.len() / 2);
        for pair in hex.chunks(2) {
            let s = std::str::from_utf8(pair).map_err(|_| bad("payload", parts[2]))?;
            let byte = u8::from_str_radix(s, 16).map_err(|_| bad("payload", parts[2]))?;
            payload.push(byte);
        }
        Ok(Self {
            index,
            total,
            payload,
        })
    }
}

/// Ground-side reassembly of one image.
#[derive(Debug, Default)]
pub struct ImageAssembler {
    total: Option<usize>,
    parts: Vec<Option<Vec<u8>>>,
}

impl ImageAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept a chunk. A chunk declaring a different total starts a new image.
    pub fn push(&mut self, chunk: ImageChunk) {
        if self.total != Some(chunk.total) {
            self.total = Some(chunk.total);
            self.parts = vec![None; chunk.total];
        }
        if let Some(slot) = self.parts.get_mut(chunk.index) {
            *slot = Some(chunk.payload);
        }
    }

    pub fn missing(&self) -> Vec<usize> {
        self.parts
            .iter()
            .enumerate()
            .filter(|(_, p)| p.is_none())
            .map(|(i, _)| i)
            .collect()
    }

    /// Concatenated payload once every chunk arrived.
    pub fn finish(&self) -> Option<Vec<u8>> {
        self.total?;
        let mut out = Vec::new();
        for part in &self.parts {
            out.extend_from_slice(part.as_ref()?);
        }
        Some(out)
    }
}
