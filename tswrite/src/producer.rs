//! Producer: batches incoming TS packets into ring items.
//!
//! Accepts `(packet, pid, got_pcr, pcr)` from an upstream demuxer (demuxing
//! itself is out of scope) and either writes straight to a sink (unbuffered
//! mode) or accumulates into the current ring item and publishes it once
//! full (buffered mode).

use log::info;

use crate::config::WriterConfig;
use crate::error::Result;
use crate::packet::TS_PACKET_SIZE;
use crate::ring::{RingItem, RingTx};
use crate::sink::Sink;
use crate::timing::{PacketMeta, TimingEngine};

struct DropState {
    drop_packets: u32,
    drop_number: u32,
    /// How many packets remain in the current pass-through/drop phase.
    remaining: u32,
    dropping: bool,
}

impl DropState {
    fn new(drop_packets: u32, drop_number: u32) -> Self {
        Self {
            drop_packets,
            drop_number,
            remaining: drop_packets,
            dropping: false,
        }
    }

    /// Returns true if the packet should be dropped.
    fn step(&mut self) -> bool {
        if self.remaining == 0 {
            self.dropping = !self.dropping;
            self.remaining = if self.dropping {
                self.drop_number
            } else {
                self.drop_packets
            };
        }
        self.remaining -= 1;
        self.dropping
    }
}

enum Output {
    Buffered(RingTx),
    Direct(Box<dyn Sink>),
}

/// Batches TS packets into ring items (or writes them straight through),
/// and assigns each item's target send time via the timing engine.
pub struct Producer {
    output: Output,
    timing: TimingEngine,
    item_capacity: usize,
    current: RingItem,
    meta: Vec<PacketMeta>,
    stream_index: u64,
    drop_state: Option<DropState>,
    packets_seen: u64,
    report_every: u64,
}

impl Producer {
    /// Create a buffered producer: packets accumulate in ring items which
    /// are published to `ring` once full.
    pub fn buffered(cfg: &WriterConfig, ring: RingTx) -> Self {
        Self::new(cfg, Output::Buffered(ring))
    }

    /// Create an unbuffered producer: every packet is written straight to
    /// `sink` (used for non-UDP sinks with no pacing requested).
    pub fn direct(cfg: &WriterConfig, sink: Box<dyn Sink>) -> Self {
        Self::new(cfg, Output::Direct(sink))
    }

    fn new(cfg: &WriterConfig, output: Output) -> Self {
        let item_capacity = cfg.ring.item_bytes();
        Self {
            output,
            timing: TimingEngine::new(cfg.timing.clone()),
            item_capacity,
            current: RingItem::with_capacity(item_capacity),
            meta: Vec::with_capacity(cfg.ring.ts_in_item),
            stream_index: 0,
            drop_state: cfg
                .drop_test
                .map(|(passed, dropped)| DropState::new(passed, dropped)),
            packets_seen: 0,
            report_every: cfg.report_every,
        }
    }

    /// Feed one TS packet through the pipeline.
    pub fn submit(&mut self, packet: &[u8; TS_PACKET_SIZE], pid: u16, got_pcr: bool, pcr: u64) -> Result<()> {
        if let Some(drop) = self.drop_state.as_mut() {
            if drop.step() {
                return Ok(());
            }
        }

        self.packets_seen += 1;
        if self.report_every > 0 && self.packets_seen % self.report_every == 0 {
            info!("tswrite: {} packets processed", self.packets_seen);
        }

        match &mut self.output {
            Output::Direct(sink) => sink.write_all(packet),
            Output::Buffered(_) => self.accumulate(packet, pid, got_pcr, pcr),
        }
    }

    fn accumulate(&mut self, packet: &[u8; TS_PACKET_SIZE], pid: u16, got_pcr: bool, pcr: u64) -> Result<()> {
        let scaled_pcr = got_pcr.then(|| self.timing.scale_pcr(pcr));

        self.current.data.extend_from_slice(packet);
        self.meta.push(PacketMeta {
            stream_index: self.stream_index,
            pid,
            pcr: scaled_pcr,
        });
        self.stream_index += 1;

        if self.current.data.len() >= self.item_capacity {
            self.flush_current()?;
        }
        Ok(())
    }

    fn flush_current(&mut self) -> Result<()> {
        if self.current.data.is_empty() {
            return Ok(());
        }
        let timed = self.timing.time_item(self.current.data.len(), &self.meta);
        let mut item = std::mem::replace(&mut self.current, RingItem::with_capacity(self.item_capacity));
        item.time = timed.time;
        item.discontinuity = timed.discontinuity;
        self.meta.clear();

        match &mut self.output {
            Output::Buffered(ring) => ring.publish(item),
            // Direct mode never accumulates (submit() writes straight
            // through), so the current item is always empty here.
            Output::Direct(_) => Ok(()),
        }
    }

    /// Finalise any partially-filled item, then publish the EOF sentinel.
    pub fn write_eof(&mut self) -> Result<()> {
        self.flush_current()?;
        match &mut self.output {
            Output::Buffered(ring) => ring.publish(RingItem::eof()),
            Output::Direct(_) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RingConfig, TimingConfig, TimingMode, WriterConfig};
    use crate::ring::channel;

    fn packet(byte: u8) -> [u8; TS_PACKET_SIZE] {
        let mut p = [0u8; TS_PACKET_SIZE];
        p[0] = 0x47;
        p[4] = byte;
        p
    }

    #[test]
    fn flushes_item_once_ts_in_item_reached() {
        let mut cfg = WriterConfig::default();
        cfg.ring = RingConfig {
            ts_in_item: 2,
            ..RingConfig::default()
        };
        cfg.timing = TimingConfig {
            mode: TimingMode::Rate { byterate: 188_000 },
            ..TimingConfig::default()
        };
        let (tx, mut rx) = channel(&cfg.ring);
        let mut producer = Producer::buffered(&cfg, tx);

        producer.submit(&packet(1), 0x100, false, 0).unwrap();
        assert!(rx.is_empty());
        producer.submit(&packet(2), 0x100, false, 0).unwrap();

        let item = rx.recv_blocking().unwrap();
        assert_eq!(item.data.len(), 2 * TS_PACKET_SIZE);
        assert_eq!(item.data[0], 0x47);
        assert_eq!(item.data[TS_PACKET_SIZE], 0x47);
    }

    #[test]
    fn write_eof_flushes_partial_item_then_publishes_sentinel() {
        let mut cfg = WriterConfig::default();
        cfg.ring = RingConfig {
            ts_in_item: 4,
            size: 8,
            ..RingConfig::default()
        };
        let (tx, mut rx) = channel(&cfg.ring);
        let mut producer = Producer::buffered(&cfg, tx);

        producer.submit(&packet(9), 0x100, false, 0).unwrap();
        producer.write_eof().unwrap();

        let partial = rx.recv_blocking().unwrap();
        assert!(!partial.is_eof());
        assert_eq!(partial.data.len(), TS_PACKET_SIZE);

        let eof = rx.recv_blocking().unwrap();
        assert!(eof.is_eof());
    }

    #[test]
    fn drop_testing_passes_then_drops_in_cycle() {
        let mut cfg = WriterConfig::default();
        cfg.drop_test = Some((2, 1));
        cfg.ring = RingConfig {
            ts_in_item: 1,
            ..RingConfig::default()
        };
        let (tx, mut rx) = channel(&cfg.ring);
        let mut producer = Producer::buffered(&cfg, tx);

        // Pass, pass, drop, pass, pass, drop ...
        let expected = [true, true, false, true, true, false];
        for (i, &should_pass) in expected.iter().enumerate() {
            producer.submit(&packet(i as u8), 0x100, false, 0).unwrap();
            assert_eq!(!rx.is_empty(), should_pass, "packet {i}");
            if should_pass {
                rx.recv_blocking().unwrap();
            }
        }
    }
}
