//! BDAV M2TS reorder buffer.
//!
//! Reorders 192-byte M2TS packets (a 4-byte big-endian timestamp header
//! plus a 188-byte TS packet) into a plain Transport Stream, using a
//! bounded sliding window. Grounded on the same insertion-near-the-tail
//! idea `bass-aes67::input::jitter::JitterBuffer` uses for out-of-order
//! RTP packets, generalised to the M2TS timestamp/window rule.

use std::collections::VecDeque;

use log::trace;
use tswrite::packet::{M2TS_PACKET_SIZE, TS_PACKET_SIZE};

pub use tswrite::error::{Error, Result};

/// Default window size (in packets) if the caller doesn't override it.
pub const DEFAULT_WINDOW: usize = 4;

/// Mask isolating the low 30 bits of the M2TS header (the timestamp; the
/// top two bits are copy-permission indicators and are ignored).
const TIMESTAMP_MASK: u32 = 0x3FFF_FFFF;

#[derive(Debug, Clone)]
struct Entry {
    timestamp: u32,
    ts_packet: [u8; TS_PACKET_SIZE],
}

/// Split a 192-byte M2TS unit into its timestamp and TS packet.
///
/// Timestamps are compared as plain 30-bit values rather than modulo
/// 2^30; this is known-incorrect near wraparound (a 27 MHz counter wraps
/// every ~39.77s) but is the intentionally preserved behaviour.
pub fn parse(unit: &[u8; M2TS_PACKET_SIZE]) -> (u32, [u8; TS_PACKET_SIZE]) {
    let header = u32::from_be_bytes([unit[0], unit[1], unit[2], unit[3]]);
    let timestamp = header & TIMESTAMP_MASK;
    let mut ts_packet = [0u8; TS_PACKET_SIZE];
    ts_packet.copy_from_slice(&unit[4..]);
    (timestamp, ts_packet)
}

/// Bounded sliding window over M2TS timestamps, producing TS packets in
/// (mostly) non-decreasing timestamp order.
///
/// Backed by an insertion-sorted `VecDeque` giving the same amortised
/// O(1) insert-near-tail behaviour and the same stable-ordering rule as
/// a doubly linked list, without the pointer bookkeeping.
pub struct ReorderBuffer {
    window: usize,
    entries: VecDeque<Entry>,
}

impl ReorderBuffer {
    pub fn new(window: usize) -> Self {
        Self {
            window,
            entries: VecDeque::with_capacity(window + 1),
        }
    }

    /// Insert one M2TS packet. Returns the TS packet that falls out of the
    /// window, if the window was already full.
    pub fn push(&mut self, unit: &[u8; M2TS_PACKET_SIZE]) -> Option<[u8; TS_PACKET_SIZE]> {
        let (timestamp, ts_packet) = parse(unit);
        self.insert(timestamp, ts_packet);

        if self.entries.len() > self.window {
            let head = self.entries.pop_front().expect("just checked non-empty");
            trace!("reorder: evicting timestamp {}", head.timestamp);
            Some(head.ts_packet)
        } else {
            None
        }
    }

    /// Insert-near-tail: walk backward from the tail while the existing
    /// entry's timestamp is strictly greater than the new one. Equal
    /// timestamps go *after* existing entries with the same value (stable
    /// tie-break).
    fn insert(&mut self, timestamp: u32, ts_packet: [u8; TS_PACKET_SIZE]) {
        let mut idx = self.entries.len();
        while idx > 0 && self.entries[idx - 1].timestamp > timestamp {
            idx -= 1;
        }
        self.entries.insert(idx, Entry { timestamp, ts_packet });
    }

    /// Drain all remaining entries in timestamp order. Called on EOF to
    /// flush whatever is still held back by the window.
    pub fn drain(&mut self) -> Vec<[u8; TS_PACKET_SIZE]> {
        self.entries.drain(..).map(|e| e.ts_packet).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Run the full reorder over a byte stream already split into 192-byte
/// units, returning the reordered concatenation of their TS portions.
/// Used by the CLI front-end and by round-trip tests.
pub fn reorder_all(units: &[[u8; M2TS_PACKET_SIZE]], window: usize) -> Vec<u8> {
    let mut buf = ReorderBuffer::new(window);
    let mut out = Vec::with_capacity(units.len() * TS_PACKET_SIZE);
    for unit in units {
        if let Some(packet) = buf.push(unit) {
            out.extend_from_slice(&packet);
        }
    }
    for packet in buf.drain() {
        out.extend_from_slice(&packet);
    }
    out
}

/// Split a raw byte slice into 192-byte M2TS units, erroring on a short
/// read at a non-boundary length.
pub fn split_units(data: &[u8]) -> Result<Vec<[u8; M2TS_PACKET_SIZE]>> {
    if data.len() % M2TS_PACKET_SIZE != 0 {
        let last_full = (data.len() / M2TS_PACKET_SIZE) * M2TS_PACKET_SIZE;
        return Err(Error::ShortRead {
            expected: last_full + M2TS_PACKET_SIZE,
            got: data.len(),
        });
    }
    Ok(data
        .chunks_exact(M2TS_PACKET_SIZE)
        .map(|chunk| {
            let mut unit = [0u8; M2TS_PACKET_SIZE];
            unit.copy_from_slice(chunk);
            unit
        })
        .collect())
}
