//! Consumer / pacer: waits until each item is due, then sends it.
//!
//! Mirrors the PTP-paced transmitter loop in
//! `bass-aes67::output::stream::Aes67OutputStream::transmitter_loop`: a
//! target time computed ahead of the send, a sleep up to that deadline,
//! and a clock anchor that gets reset when the pacer falls too far behind
//! instead of trying to "catch up" by bursting.

use std::sync::Arc;
use std::time::{Duration, Instant};

use log::debug;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::command::{Command, CommandChannel};
use crate::config::PacingConfig;
use crate::error::{Outcome, Result};
use crate::ring::RingRx;
use crate::sink::Sink;

/// Small negative `waitfor` values this close to zero are swallowed
/// instead of triggering a re-anchor.
const SMALL_LAG_THRESHOLD_US: i64 = 200_000;

struct Jitter {
    rng: StdRng,
    range_ms: i64,
    verbose: bool,
}

impl Jitter {
    fn sample_us(&mut self) -> i64 {
        if self.range_ms == 0 {
            return 0;
        }
        let sample = self.rng.gen_range(-self.range_ms..=self.range_ms) * 1_000;
        if self.verbose {
            debug!("perturb: adding {sample}us of jitter");
        }
        sample
    }
}

/// Drives the pacing loop: pops ring items and sends them to `sink` at
/// their target times.
pub struct Consumer {
    ring: RingRx,
    sink: Box<dyn Sink>,
    cfg: PacingConfig,
    command: Option<Arc<CommandChannel>>,

    epoch: Option<Instant>,
    delta_us: i64,
    /// Set by a prior iteration's "fallen too far behind" classification;
    /// consumed (and cleared) at the start of the next iteration.
    pending_reset: bool,
    last_time: u32,
    nowait_streak: u32,
    jitter: Option<Jitter>,
}

impl Consumer {
    pub fn new(ring: RingRx, sink: Box<dyn Sink>, cfg: PacingConfig, command: Option<Arc<CommandChannel>>) -> Self {
        let jitter = cfg.perturb.map(|p| Jitter {
            rng: StdRng::seed_from_u64(p.seed),
            range_ms: p.range_ms,
            verbose: p.verbose,
        });
        Self {
            ring,
            sink,
            cfg,
            command,
            epoch: None,
            delta_us: 0,
            pending_reset: true, // first iteration always (re-)anchors
            last_time: 0,
            nowait_streak: 0,
            jitter,
        }
    }

    /// Run the pacing loop to completion. Returns `Outcome::Eof` when the
    /// EOF sentinel is drained, or `Outcome::Quit` if a peer sent `QUIT`
    /// over the command channel.
    pub fn run(&mut self) -> Result<Outcome> {
        self.ring.wait_until_full_once();

        loop {
            if let Some(cmd) = self.poll_command() {
                if cmd == Command::Quit {
                    return Ok(Outcome::Quit);
                }
                if cmd == Command::Pause {
                    self.wait_out_pause();
                }
            }

            let item = self.ring.recv_blocking()?;
            if item.is_eof() {
                return Ok(Outcome::Eof);
            }

            self.send_item(item.time, item.discontinuity, &item.data)?;
        }
    }

    fn wait_out_pause(&self) {
        let Some(chan) = &self.command else { return };
        loop {
            let next = chan.wait_for_command();
            if next != Command::Pause {
                break;
            }
        }
    }

    /// Poll the command socket and, if the pending command is one the
    /// pacer itself acts on (`Quit`/`Pause`), consume and return it.
    /// Playback-mode commands (`Fast`/`Reverse`/skip/select-file/...) are
    /// left untouched in the shared slot — the pacer has no notion of
    /// "playback direction", so it's up to the caller feeding the
    /// producer to observe and act on those via [`crate::Writer::take_command`].
    fn poll_command(&self) -> Option<Command> {
        let chan = self.command.as_ref()?;
        chan.poll();
        match chan.peek() {
            Some(Command::Quit) | Some(Command::Pause) => chan.take(),
            _ => None,
        }
    }

    fn send_item(&mut self, target: u32, discontinuity: bool, data: &[u8]) -> Result<()> {
        let reset = self.pending_reset || discontinuity;
        self.pending_reset = false;

        let mut waitfor: i64;
        if reset {
            self.epoch = Some(Instant::now());
            self.delta_us = target as i64;
            waitfor = 0;
        } else {
            let mut now_us = now_micros(self.epoch.get_or_insert_with(Instant::now));
            if let Some(jitter) = &mut self.jitter {
                now_us += jitter.sample_us();
            }
            let adjusted = now_us + self.delta_us;
            waitfor = target as i64 - adjusted;
        }

        if waitfor <= 0 {
            if waitfor < -SMALL_LAG_THRESHOLD_US && self.jitter.is_none() {
                debug!("fallen {}us behind, re-anchoring on next item", -waitfor);
                self.pending_reset = true;
            }
            waitfor = 0;
        }

        waitfor = self.enforce_maxnowait(waitfor);

        if waitfor > 0 {
            sleep_precise(Duration::from_micros(waitfor as u64));
        }

        self.sink.write_all(data)?;
        self.last_time = target;
        Ok(())
    }

    fn enforce_maxnowait(&mut self, waitfor: i64) -> i64 {
        let Some(limit) = self.cfg.maxnowait else {
            return waitfor;
        };
        if waitfor == 0 {
            self.nowait_streak += 1;
            if self.nowait_streak >= limit {
                self.nowait_streak = 0;
                debug!("maxnowait reached, forcing a {}us wait", self.cfg.waitfor_us);
                return self.cfg.waitfor_us as i64;
            }
            0
        } else {
            self.nowait_streak = 0;
            waitfor
        }
    }
}

fn now_micros(epoch: &Instant) -> i64 {
    epoch.elapsed().as_micros() as i64
}

/// Sleep for `duration`, re-deriving any remaining time from the original
/// deadline if the sleep is interrupted by a spurious wakeup.
fn sleep_precise(duration: Duration) {
    let deadline = Instant::now() + duration;
    loop {
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        std::thread::sleep(deadline - now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RingConfig;
    use crate::ring::{channel, RingItem};
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct RecordingSink {
        writes: Arc<Mutex<Vec<Vec<u8>>>>,
    }

    impl Sink for RecordingSink {
        fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
            self.writes.lock().unwrap().push(bytes.to_vec());
            Ok(())
        }
    }

    #[test]
    fn drains_items_in_order_then_stops_on_eof() {
        let ring_cfg = RingConfig {
            size: 8,
            ..RingConfig::default()
        };
        let (mut tx, rx) = channel(&ring_cfg);

        let mut item_a = RingItem::with_capacity(1);
        item_a.data = vec![0x47, 1];
        item_a.time = 0;
        let mut item_b = RingItem::with_capacity(1);
        item_b.data = vec![0x47, 2];
        item_b.time = 0;

        tx.publish(item_a).unwrap();
        tx.publish(item_b).unwrap();
        tx.publish(RingItem::eof()).unwrap();

        let sink = RecordingSink::default();
        let writes = sink.writes.clone();
        let mut consumer = Consumer::new(rx, Box::new(sink), PacingConfig::default(), None);
        let outcome = consumer.run().unwrap();

        assert_eq!(outcome, Outcome::Eof);
        let writes = writes.lock().unwrap();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0], vec![0x47, 1]);
        assert_eq!(writes[1], vec![0x47, 2]);
    }

    #[test]
    fn maxnowait_forces_a_wait_after_streak_of_zero_delay_sends() {
        let ring_cfg = RingConfig {
            size: 16,
            ..RingConfig::default()
        };
        let (mut tx, rx) = channel(&ring_cfg);

        for _ in 0..5 {
            let mut item = RingItem::with_capacity(1);
            item.data = vec![0x47, 0];
            item.time = 0;
            tx.publish(item).unwrap();
        }
        tx.publish(RingItem::eof()).unwrap();

        let sink = RecordingSink::default();
        let mut cfg = PacingConfig::default();
        cfg.maxnowait = Some(2);
        cfg.waitfor_us = 2_000;

        let mut consumer = Consumer::new(rx, Box::new(sink), cfg, None);
        let start = Instant::now();
        consumer.run().unwrap();
        // At least one forced wait of waitfor_us should have elapsed.
        assert!(start.elapsed().as_micros() as i64 >= 2_000);
    }

    #[test]
    fn discontinuity_forces_reanchor_without_negative_sleep() {
        let ring_cfg = RingConfig {
            size: 8,
            ..RingConfig::default()
        };
        let (mut tx, rx) = channel(&ring_cfg);

        let mut item_a = RingItem::with_capacity(1);
        item_a.data = vec![0x47, 1];
        item_a.time = 1_000_000;
        let mut item_b = RingItem::with_capacity(1);
        item_b.data = vec![0x47, 2];
        item_b.time = 500_000; // PCR loop-back: smaller than item_a's time
        item_b.discontinuity = true;

        tx.publish(item_a).unwrap();
        tx.publish(item_b).unwrap();
        tx.publish(RingItem::eof()).unwrap();

        let sink = RecordingSink::default();
        let mut consumer = Consumer::new(rx, Box::new(sink), PacingConfig::default(), None);
        let start = Instant::now();
        let outcome = consumer.run().unwrap();
        // No item here asks for a multi-second sleep; this must return
        // promptly rather than blocking on a bogus negative/huge wait.
        assert!(start.elapsed() < Duration::from_secs(2));
        assert_eq!(outcome, Outcome::Eof);
    }

    /// A playback-mode command (e.g. `Fast`) must survive the pacer's own
    /// loop untouched: only `Quit`/`Pause` are the pacer's concern, so a
    /// byte like `f` must still be sitting in the shared slot, unconsumed,
    /// after the pacer has looped over it several times.
    #[test]
    fn playback_mode_commands_are_left_in_the_slot_for_the_caller() {
        use crate::command::CommandChannel;
        use std::io::Write;
        use std::net::{TcpListener, TcpStream};
        use std::sync::Arc;

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let mut client = TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();

        let chan = Arc::new(CommandChannel::new(server).unwrap());
        client.write_all(b"f").unwrap(); // FAST: not quit/pause, not atomic
        std::thread::sleep(Duration::from_millis(20));

        let ring_cfg = RingConfig {
            size: 8,
            ..RingConfig::default()
        };
        let (mut tx, rx) = channel(&ring_cfg);
        for i in 0..3u8 {
            let mut item = RingItem::with_capacity(1);
            item.data = vec![0x47, i];
            item.time = 0;
            tx.publish(item).unwrap();
        }
        tx.publish(RingItem::eof()).unwrap();

        let sink = RecordingSink::default();
        let mut consumer = Consumer::new(rx, Box::new(sink), PacingConfig::default(), Some(chan.clone()));
        let outcome = consumer.run().unwrap();

        assert_eq!(outcome, Outcome::Eof);
        // The pacer looped over `f` repeatedly (once per item) and never
        // took it: it's still there for the caller to observe.
        assert_eq!(chan.peek(), Some(Command::Fast));
    }
}
