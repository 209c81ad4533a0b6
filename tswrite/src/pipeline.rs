//! Writer context: ties sink, ring, timing, producer and consumer
//! together into one constructible/destructible pipeline.
//!
//! Mirrors the lifecycle `bass-aes67::output::stream::Aes67OutputStream`
//! follows — open the sink, spawn the paced sender on its own thread,
//! and join it back on drop/finish — generalised from one fixed audio
//! format to whichever TS items the producer hands it.

use std::net::TcpStream;
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::command::CommandChannel;
use crate::config::WriterConfig;
use crate::error::{Outcome, Result};
use crate::producer::Producer;
use crate::sink::{Sink, TcpSink};

/// A fully wired pipeline: a [`Producer`] the caller feeds packets into,
/// plus (in buffered mode) a consumer running on its own thread, pacing
/// output to `sink`.
pub struct Writer {
    producer: Producer,
    consumer_thread: Option<JoinHandle<Result<Outcome>>>,
    command: Option<Arc<CommandChannel>>,
}

impl Writer {
    /// Build a buffered (paced) pipeline: a ring sits between producer and
    /// consumer, and the consumer runs on its own thread writing to `sink`
    /// on the clock the timing engine assigns.
    pub fn buffered(cfg: WriterConfig, sink: Box<dyn Sink>, command: Option<Arc<CommandChannel>>) -> Result<Self> {
        cfg.validate()?;
        let (tx, rx) = crate::ring::channel(&cfg.ring);
        let producer = Producer::buffered(&cfg, tx);

        let pacing = cfg.pacing.clone();
        let consumer_command = command.clone();
        let consumer_thread = std::thread::Builder::new()
            .name("tswrite-consumer".into())
            .spawn(move || {
                let mut consumer = crate::consumer::Consumer::new(rx, sink, pacing, consumer_command);
                consumer.run()
            })
            .map_err(|e| crate::error::Error::Memory(e.to_string()))?;

        Ok(Self {
            producer,
            consumer_thread: Some(consumer_thread),
            command,
        })
    }

    /// Build an unbuffered pipeline: every packet is written straight
    /// through to `sink` with no pacing, no ring, no consumer thread.
    pub fn direct(cfg: WriterConfig, sink: Box<dyn Sink>) -> Result<Self> {
        cfg.validate()?;
        let producer = Producer::direct(&cfg, sink);
        Ok(Self {
            producer,
            consumer_thread: None,
            command: None,
        })
    }

    /// A TCP sink plus a command channel cloned from the same connection:
    /// the data socket is switched to non-blocking and multiplexed with
    /// command reads over the same underlying stream.
    pub fn tcp_with_command(
        cfg: WriterConfig,
        host: &str,
        port: u16,
    ) -> Result<Self> {
        let tcp = TcpSink::connect(host, port)?;
        tcp.set_nonblocking(true)?;
        let command_socket: TcpStream = tcp.try_clone()?;
        let command = Arc::new(CommandChannel::new(command_socket)?);
        Self::buffered(cfg, Box::new(tcp), Some(command))
    }

    /// Feed one TS packet into the pipeline.
    pub fn submit(&mut self, packet: &[u8; crate::packet::TS_PACKET_SIZE], pid: u16, got_pcr: bool, pcr: u64) -> Result<()> {
        self.producer.submit(packet, pid, got_pcr, pcr)
    }

    /// Whether a peer has requested QUIT over the command channel. The
    /// caller is expected to check this between packets and, if true,
    /// stop producing and call [`Writer::finish`].
    ///
    /// Only peeks: the consumer thread is the sole reader of the command
    /// socket (via its own `poll`), so this never races it for bytes.
    pub fn quit_requested(&self) -> bool {
        let Some(command) = &self.command else { return false };
        matches!(command.peek(), Some(crate::command::Command::Quit))
    }

    /// Take the next pending playback-mode command (`Normal`/`Fast`/
    /// `FastFast`/`Reverse`/`FastReverse`/skip-forward/skip-backward/
    /// select-file), if any, for the caller feeding the producer to act
    /// on. `Quit` and `Pause` are the pacer's own concern (see
    /// [`Writer::quit_requested`] and the consumer's internal pause
    /// handling) and are never returned here.
    pub fn take_command(&self) -> Option<crate::command::Command> {
        use crate::command::Command;
        let command = self.command.as_ref()?;
        match command.peek() {
            Some(Command::Quit) | Some(Command::Pause) | None => None,
            Some(_) => command.take(),
        }
    }

    /// Report that the action defined by the most recently taken atomic
    /// command (skip-forward/backward) has finished. Until this is
    /// called, the command channel suppresses observation of any further
    /// command, per `atomic_command` semantics.
    pub fn complete_atomic_command(&self) {
        if let Some(command) = &self.command {
            command.complete_atomic();
        }
    }

    /// Finalise the stream: flush any partial item and publish the EOF
    /// sentinel, then (in buffered mode) wait for the consumer thread to
    /// drain the ring and exit.
    pub fn finish(mut self) -> Result<Outcome> {
        self.producer.write_eof()?;
        match self.consumer_thread.take() {
            Some(handle) => handle
                .join()
                .unwrap_or_else(|_| Err(crate::error::Error::Memory("consumer thread panicked".into()))),
            None => Ok(Outcome::Eof),
        }
    }
}
