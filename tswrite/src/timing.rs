//! Timing engine: assigns a target send time to each ring item.
//!
//! Two modes: a fixed byte rate, or a PCR-driven virtual budget that is
//! primed with a guessed rate and then corrected as real PCRs arrive. All
//! state that would otherwise live in process-global statics is a field
//! here instead, so two pipelines in the same process never interfere.

use log::debug;

use crate::config::{TimingConfig, TimingMode};
use crate::packet::PCR_HZ;

/// Metadata the producer records for each TS packet copied into the
/// current ring item. Timing only ever consults the first PCR found in
/// an item.
#[derive(Debug, Clone, Copy)]
pub struct PacketMeta {
    pub stream_index: u64,
    pub pid: u16,
    pub pcr: Option<u64>,
}

/// Outcome of timing one ring item: its assigned target time and whether a
/// discontinuity should be flagged (forcing the consumer to re-anchor).
#[derive(Debug, Clone, Copy)]
pub struct Timed {
    pub time: u32,
    pub discontinuity: bool,
}

/// PCR-mode virtual budget: how much data may still be emitted, over how
/// much time, before a fresh clock anchor is needed.
#[derive(Debug, Clone, Copy, Default)]
struct Budget {
    available_bytes: f64,
    available_time: f64,
}

impl Budget {
    fn exhausted(&self) -> bool {
        self.available_bytes <= 0.0 || self.available_time <= 0.0
    }
}

/// Per-pipeline timing state, constructed fresh for each pipeline.
pub struct TimingEngine {
    cfg: TimingConfig,
    last_time: u32,

    // PCR-mode state.
    budget: Budget,
    current_rate: f64,
    last_pcr: Option<u64>,
    last_pcr_index: u64,
    pcr_count: u32,
    initial_prime_bytes: f64,
    initial_prime_time: f64,
    initial_prime_recorded: bool,
    /// Running count of stream-index positions seen, for `Δbytes` math.
    stream_index: u64,
}

impl TimingEngine {
    pub fn new(cfg: TimingConfig) -> Self {
        let current_rate = match cfg.mode {
            TimingMode::Rate { byterate } => byterate as f64,
            TimingMode::Pcr => crate::config::DEFAULT_BYTE_RATE as f64,
        };
        Self {
            cfg,
            last_time: 0,
            budget: Budget::default(),
            current_rate,
            last_pcr: None,
            last_pcr_index: 0,
            pcr_count: 0,
            initial_prime_bytes: 0.0,
            initial_prime_time: 0.0,
            initial_prime_recorded: false,
            stream_index: 0,
        }
    }

    /// Scale a PCR (27 MHz ticks) by `pcr_scale_pct` before it is recorded
    /// in packet metadata.
    pub fn scale_pcr(&self, pcr: u64) -> u64 {
        ((pcr as f64) * (self.cfg.pcr_scale_pct as f64) / 100.0) as u64
    }

    /// Time one ring item of `item_bytes` bytes, given the packet metadata
    /// accumulated while it was filled. `meta` only influences the result
    /// through its *first* PCR.
    pub fn time_item(&mut self, item_bytes: usize, meta: &[PacketMeta]) -> Timed {
        let first_pcr = meta.iter().find_map(|m| m.pcr);
        let item_bytes = item_bytes as f64;
        self.stream_index += meta.len() as u64;

        let (delta_t, discontinuity) = match self.cfg.mode {
            TimingMode::Rate { byterate } => {
                let dt = (item_bytes * 1_000_000.0) / byterate as f64;
                (dt, false)
            }
            TimingMode::Pcr => self.time_item_pcr(item_bytes, first_pcr),
        };

        let time = (self.last_time as f64 + delta_t) as u32;
        self.last_time = time;
        Timed { time, discontinuity }
    }

    fn prime(&mut self) {
        let bytes = crate::packet::TS_PACKET_SIZE as f64 * self.cfg.prime_size as f64;
        let rate = self.current_rate * (self.cfg.prime_speedup as f64) / 100.0;
        let time = bytes * 1_000_000.0 / rate;
        self.budget = Budget {
            available_bytes: bytes,
            available_time: time,
        };
        if !self.initial_prime_recorded {
            self.initial_prime_bytes = bytes;
            self.initial_prime_time = time;
            self.initial_prime_recorded = true;
        }
        debug!(
            "primed timing budget: {bytes} bytes over {time} us at rate {}",
            self.current_rate
        );
    }

    fn time_item_pcr(&mut self, item_bytes: f64, first_pcr: Option<u64>) -> (f64, bool) {
        if self.budget.exhausted() {
            self.prime();
        }

        let delta_t = (item_bytes / self.budget.available_bytes) * self.budget.available_time;
        self.budget.available_bytes -= item_bytes;
        self.budget.available_time -= delta_t;

        let mut discontinuity = false;

        if let Some(new_pcr) = first_pcr {
            discontinuity = self.observe_pcr(new_pcr);
        }

        (delta_t, discontinuity)
    }

    /// Update PCR-derived rate tracking for a newly observed PCR. Returns
    /// whether a discontinuity (backward PCR) was detected.
    fn observe_pcr(&mut self, new_pcr: u64) -> bool {
        match self.last_pcr {
            None => {
                // First PCR ever seen: just remember it, no rate update.
                self.last_pcr = Some(new_pcr);
                self.last_pcr_index = self.stream_index;
                self.pcr_count = 1;
                false
            }
            Some(last_pcr) => {
                if new_pcr < last_pcr {
                    // Discontinuity: loop back. Reset PCR memory, force a
                    // re-prime, clear the budget to zero.
                    self.last_pcr = None;
                    self.last_pcr_index = 0;
                    self.pcr_count = 0;
                    self.budget = Budget::default();
                    return true;
                }

                let delta_pcr = (new_pcr - last_pcr) as f64;
                let delta_bytes =
                    ((self.stream_index - self.last_pcr_index) as f64) * crate::packet::TS_PACKET_SIZE as f64;
                self.current_rate = delta_bytes * PCR_HZ as f64 / delta_pcr;

                let delta_time = delta_bytes * 1_000_000.0 / self.current_rate;
                self.budget.available_bytes += delta_bytes;
                self.budget.available_time += delta_time;

                self.pcr_count += 1;
                if self.pcr_count == 2 {
                    // Smooth the transition from the guessed prime rate to
                    // the measured rate.
                    self.budget.available_time -= self.initial_prime_time;
                    self.budget.available_time += self.initial_prime_bytes * 1_000_000.0 / self.current_rate;
                }

                self.last_pcr = Some(new_pcr);
                self.last_pcr_index = self.stream_index;
                false
            }
        }
    }

    pub fn current_rate(&self) -> f64 {
        self.current_rate
    }

    /// Reset the producer-side logical clock, e.g. on an explicit caller
    /// request. Does not affect PCR tracking.
    pub fn reset_clock(&mut self) {
        self.last_time = 0;
    }
}
