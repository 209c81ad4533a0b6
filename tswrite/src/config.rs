//! Per-pipeline configuration.
//!
//! Everything that used to be a C static local or a module-level global in
//! the original (perturbation seed/range, parent/child wait, debug flags)
//! lives here instead, as plain fields constructed once per pipeline.

use crate::error::{Error, Result};

/// Default number of ring items used to prime the timing budget before the
/// first PCR has been observed.
pub const DEFAULT_PRIME_SIZE: u32 = 10;

/// Default wait between polls of a full ring, from the producer's side.
pub const DEFAULT_PARENT_WAIT_MS: u64 = 50;

/// Default wait between polls of an empty ring, from the consumer's side.
pub const DEFAULT_CHILD_WAIT_MS: u64 = 10;

/// Default assumed byte rate when the caller supplies neither PCRs nor an
/// explicit byte rate.
pub const DEFAULT_BYTE_RATE: u64 = 250_000;

/// Default number of TS packets packed into one ring item / one UDP
/// datagram (7 * 188 = 1316 bytes, fits inside one Ethernet MTU).
pub const DEFAULT_TS_IN_ITEM: usize = 7;

/// Default ring capacity (number of items); effective usable capacity is
/// one less, per the ring buffer's full/empty convention.
pub const DEFAULT_RING_SIZE: usize = 8;

/// How many consecutive full-ring polls the producer tolerates before
/// deciding the consumer has died. `tswrite.c`'s `PARENT_GIVE_UP_AFTER`.
pub const DEFAULT_PARENT_GIVE_UP_AFTER: u32 = 1000;

/// How often (in packets) the producer logs a progress line.
/// `tswrite.c`'s `REPORT_EVERY`.
pub const DEFAULT_REPORT_EVERY: u64 = 10_000;

/// Selects whether the timing engine is driven by PCRs or by a fixed byte
/// rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimingMode {
    /// Derive `time` for each item from the stream's own PCRs.
    Pcr,
    /// Derive `time` for each item from a fixed byte rate.
    Rate { byterate: u64 },
}

/// Configuration for the timing engine.
#[derive(Debug, Clone)]
pub struct TimingConfig {
    pub mode: TimingMode,
    /// Number of ring items' worth of data used to prime the budget.
    pub prime_size: u32,
    /// Percentage speedup applied to the primed rate (100 = no change).
    pub prime_speedup: u32,
    /// Percentage scale applied to every PCR before it reaches the timing
    /// engine (100 = no change).
    pub pcr_scale_pct: u32,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            mode: TimingMode::Rate {
                byterate: DEFAULT_BYTE_RATE,
            },
            prime_size: DEFAULT_PRIME_SIZE,
            prime_speedup: 100,
            pcr_scale_pct: 100,
        }
    }
}

impl TimingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.prime_speedup == 0 {
            return Err(Error::Usage(
                "prime_speedup must not be 0 (would divide by zero)".into(),
            ));
        }
        if let TimingMode::Rate { byterate } = self.mode {
            if byterate == 0 {
                return Err(Error::Usage("byterate must not be 0".into()));
            }
        }
        Ok(())
    }
}

/// Configuration for the ring buffer.
#[derive(Debug, Clone)]
pub struct RingConfig {
    /// Number of slots in the ring. Effective capacity is `size - 1`.
    pub size: usize,
    /// How many TS packets are batched into each ring item.
    pub ts_in_item: usize,
    /// Sleep between polls of a full ring (producer side).
    pub parent_wait_ms: u64,
    /// Sleep between polls of an empty ring (consumer side).
    pub child_wait_ms: u64,
    /// Producer gives up (fatal) after this many full-ring polls.
    pub parent_give_up_after: Option<u32>,
    /// Consumer gives up after this many empty-ring polls. `None` means
    /// wait forever, which is the default.
    pub child_give_up_after: Option<u32>,
}

impl Default for RingConfig {
    fn default() -> Self {
        Self {
            size: DEFAULT_RING_SIZE,
            ts_in_item: DEFAULT_TS_IN_ITEM,
            parent_wait_ms: DEFAULT_PARENT_WAIT_MS,
            child_wait_ms: DEFAULT_CHILD_WAIT_MS,
            parent_give_up_after: Some(DEFAULT_PARENT_GIVE_UP_AFTER),
            child_give_up_after: None,
        }
    }
}

impl RingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.size < 2 {
            return Err(Error::Usage("ring size must be at least 2".into()));
        }
        if self.ts_in_item == 0 {
            return Err(Error::Usage("ts_in_item must be at least 1".into()));
        }
        Ok(())
    }

    pub fn item_bytes(&self) -> usize {
        self.ts_in_item * crate::packet::TS_PACKET_SIZE
    }
}

/// Uniform random jitter added to the pacer's idea of "now", to simulate
/// network choppiness.
#[derive(Debug, Clone, Copy)]
pub struct PerturbConfig {
    pub seed: u64,
    pub range_ms: i64,
    pub verbose: bool,
}

/// Configuration for the consumer/pacer.
#[derive(Debug, Clone)]
pub struct PacingConfig {
    /// Once this many consecutive sends have had zero computed delay, the
    /// next send is forced to wait `waitfor_us`. `None`/`-1` disables this.
    pub maxnowait: Option<u32>,
    /// The forced wait duration used when `maxnowait` triggers.
    pub waitfor_us: u64,
    /// Optional perturbation of the pacer's clock, for jitter simulation.
    pub perturb: Option<PerturbConfig>,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            maxnowait: Some(40),
            waitfor_us: 1_000,
            perturb: None,
        }
    }
}

/// Configuration for the command channel. Only meaningful over TCP.
#[derive(Debug, Clone, Default)]
pub struct CommandConfig {
    pub enabled: bool,
}

/// Top-level configuration for one pipeline, aggregating the per-stage
/// configs. Constructed once per pipeline; never global.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    pub timing: TimingConfig,
    pub ring: RingConfig,
    pub pacing: PacingConfig,
    pub command: CommandConfig,
    /// Drop-testing: pass `drop_packets` through, then drop `drop_number`,
    /// repeating. `None` disables drop-testing.
    pub drop_test: Option<(u32, u32)>,
    pub report_every: u64,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            timing: TimingConfig::default(),
            ring: RingConfig::default(),
            pacing: PacingConfig::default(),
            command: CommandConfig::default(),
            drop_test: None,
            report_every: DEFAULT_REPORT_EVERY,
        }
    }
}

impl WriterConfig {
    /// The `-hd` preset: bitrate 20 Mbps, maxnowait 40, pwait 4, cwait 1.
    pub fn hd_preset() -> Self {
        let mut cfg = Self::default();
        cfg.timing.mode = TimingMode::Rate {
            byterate: 20_000_000 / 8,
        };
        cfg.pacing.maxnowait = Some(40);
        cfg.ring.parent_wait_ms = 4;
        cfg.ring.child_wait_ms = 1;
        cfg
    }

    pub fn validate(&self) -> Result<()> {
        self.timing.validate()?;
        self.ring.validate()?;
        Ok(())
    }
}
