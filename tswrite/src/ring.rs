//! The producer/consumer ring of network-packet-sized items.
//!
//! Built as a thin domain layer over `ringbuf::HeapRb`, the same crate and
//! producer/consumer split `bass-aes67`'s `Aes67Stream` uses for its
//! audio samples. `ringbuf`'s SPSC ring already gives the required
//! release/acquire item-visibility guarantee — an item pushed by the
//! producer is observable to the consumer only once the push completes.
//! What this module adds on top of that: the EOF sentinel convention, the
//! `discontinuity` flag, and sleep-poll blocking `publish`/`recv_blocking`
//! wrappers replacing shared-memory index arithmetic with an owned queue.

use std::thread;
use std::time::Duration;

use log::{debug, trace, warn};
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};

use crate::config::RingConfig;
use crate::error::{Error, Result};

/// Sentinel first byte used by the single-byte EOF item; a real TS packet's
/// first byte is always the sync byte `0x47`, so this can never collide.
pub const EOF_SENTINEL_BYTE: u8 = 0x01;

/// One slot on the ring: a batch of concatenated TS packets plus the
/// scheduling metadata the timing engine attached to it.
#[derive(Debug, Clone)]
pub struct RingItem {
    /// TS packet bytes, `length` of them valid; capacity is
    /// `ts_in_item * TS_PACKET_SIZE` except for the 1-byte EOF sentinel.
    pub data: Vec<u8>,
    /// Target send time (µs) on the producer's logical timeline.
    pub time: u32,
    /// Forces the consumer to re-anchor its wall-clock epoch.
    pub discontinuity: bool,
}

impl RingItem {
    pub fn eof() -> Self {
        Self {
            data: vec![EOF_SENTINEL_BYTE],
            time: 0,
            discontinuity: false,
        }
    }

    pub fn is_eof(&self) -> bool {
        self.data.len() == 1 && self.data[0] == EOF_SENTINEL_BYTE
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
            time: 0,
            discontinuity: false,
        }
    }
}

/// Producer-side handle. Owned exclusively by the code feeding the
/// pipeline (the caller's producer).
pub struct RingTx {
    inner: HeapProd<RingItem>,
    parent_wait: Duration,
    give_up_after: Option<u32>,
}

/// Consumer-side handle. Owned exclusively by the pacer once a pipeline is
/// established; never shared or cloned.
pub struct RingRx {
    inner: HeapCons<RingItem>,
    child_wait: Duration,
    give_up_after: Option<u32>,
}

/// Build a fresh ring, returning the producer and consumer halves.
pub fn channel(cfg: &RingConfig) -> (RingTx, RingRx) {
    let rb = HeapRb::<RingItem>::new(cfg.size);
    let (prod, cons) = rb.split();
    (
        RingTx {
            inner: prod,
            parent_wait: Duration::from_millis(cfg.parent_wait_ms),
            give_up_after: cfg.parent_give_up_after,
        },
        RingRx {
            inner: cons,
            child_wait: Duration::from_millis(cfg.child_wait_ms),
            give_up_after: cfg.child_give_up_after,
        },
    )
}

impl RingTx {
    /// Publish an item, blocking (sleep-poll) while the ring is full.
    ///
    /// Gives up with [`Error::ConsumerNotResponding`] after
    /// `give_up_after` full-ring polls, unless that's `None`.
    pub fn publish(&mut self, item: RingItem) -> Result<()> {
        let mut item = item;
        let mut polls = 0u32;
        loop {
            match self.inner.try_push(item) {
                Ok(()) => return Ok(()),
                Err(rejected) => {
                    item = rejected;
                    polls += 1;
                    if let Some(limit) = self.give_up_after {
                        if polls >= limit {
                            return Err(Error::ConsumerNotResponding(polls));
                        }
                    }
                    trace!("ring full, producer sleeping {:?}", self.parent_wait);
                    thread::sleep(self.parent_wait);
                }
            }
        }
    }

    pub fn is_full(&self) -> bool {
        self.inner.is_full()
    }
}

impl RingRx {
    /// Block (sleep-poll) until the ring becomes non-empty, then pop one
    /// item. Gives up with [`Error::ProducerNotResponding`] after
    /// `give_up_after` empty-ring polls; by default this never gives up.
    pub fn recv_blocking(&mut self) -> Result<RingItem> {
        let mut polls = 0u32;
        loop {
            if let Some(item) = self.inner.try_pop() {
                return Ok(item);
            }
            polls += 1;
            if let Some(limit) = self.give_up_after {
                if polls >= limit {
                    return Err(Error::ProducerNotResponding(polls));
                }
            }
            thread::sleep(self.child_wait);
        }
    }

    /// Block until the ring has filled completely at least once. Used by
    /// the consumer's startup "fill wait" to prime the pacing budget with
    /// observable data before emitting anything.
    pub fn wait_until_full_once(&mut self) {
        while !self.inner.is_full() {
            thread::sleep(self.child_wait);
        }
        debug!("ring filled once, consumer beginning playout");
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn occupied_len(&self) -> usize {
        self.inner.occupied_len()
    }
}

/// Warn once that a ring operation is degraded; kept as a tiny helper so
/// call sites read the same way the original's sparse diagnostic prints
/// did, but routed through `log` instead of `printf`.
pub(crate) fn warn_degraded(msg: &str) {
    warn!("{msg}");
}
