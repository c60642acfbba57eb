//! Newline-delimited line framer for the field radio's serial output.
//!
//! The radio firmware emits one ASCII line per received packet:
//!
//!   `<text>[ RSSI:<int>]\r?\n`
//!
//! This module provides a small incremental framer that can be fed arbitrary
//! chunks (whatever a serial read returned) and yields whole lines when
//! available. Oversized garbage without a newline is discarded so a noisy
//! link cannot grow the buffer without bound.
use bytes::{Buf, BytesMut};

/// Longest line accepted before the framer gives up and resynchronizes.
pub const MAX_LINE_LEN: usize = 4096;

/// Incremental line framer.
pub struct LineFramer {
    buf: BytesMut,
    dropped: u64,
    /// Set after an overflow; bytes are thrown away up to the next newline.
    discarding: bool,
}

impl Default for LineFramer {
    fn default() -> Self {
        Self::new()
    }
}

impl LineFramer {
    pub fn new() -> Self { Self { buf: BytesMut::with_capacity(1024), dropped: 0, discarding: false } }

    pub fn push(&mut self, data: &[u8]) { self.buf.extend_from_slice(data); }

    /// Lines thrown away because they outgrew [`MAX_LINE_LEN`].
    pub fn dropped(&self) -> u64 { self.dropped }

    /// Extract the next complete, non-empty line with `\r` and surrounding
    /// whitespace trimmed. Returns None until a newline has been buffered.
    pub fn next_line(&mut self) -> Option<String> {
        loop {
            let Some(pos) = self.buf.iter().position(|b| *b == b'\n') else {
                if self.discarding {
                    self.buf.clear();
                } else if self.buf.len() > MAX_LINE_LEN {
                    // No terminator in sight: drop what we have and resync on the next newline.
                    self.buf.clear();
                    self.dropped += 1;
                    self.discarding = true;
                }
                return None;
            };
            let raw = self.buf.split_to(pos);
            self.buf.advance(1); // newline
            if self.discarding {
                // Tail of the oversized line
                self.discarding = false;
                continue;
            }
            if raw.len() > MAX_LINE_LEN {
                self.dropped += 1;
                continue;
            }
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            return Some(line.to_string());
        }
    }
}
