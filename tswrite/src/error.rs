//! Error taxonomy for the paced-output pipeline.
//!
//! Mirrors the categories a caller needs to distinguish: a bad argument is
//! not the same failure as a dead peer, and a command-driven `QUIT` must be
//! distinguishable from an I/O error so the caller can stop cleanly instead
//! of reporting a fault.

use std::io;

/// Errors produced by the sink, ring, timing, producer, consumer and
/// command-channel layers.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Bad CLI argument or invalid configuration value.
    #[error("usage error: {0}")]
    Usage(String),

    /// Could not open a file/socket, resolve a host, or bind an address.
    #[error("failed to open sink: {0}")]
    Open(#[source] io::Error),

    /// A hard I/O error on a sink that must not be swallowed (TCP, file).
    #[error("fatal send error: {0}")]
    FatalSend(#[source] io::Error),

    /// Producer exceeded `parent_give_up_after` polls of a full ring.
    #[error("consumer not responding: ring stayed full for {0} polls")]
    ConsumerNotResponding(u32),

    /// Consumer exceeded `child_give_up_after` polls of an empty ring.
    #[error("producer not responding: ring stayed empty for {0} polls")]
    ProducerNotResponding(u32),

    /// A short read on an M2TS or TS file: a packet boundary was not
    /// aligned with the end of input.
    #[error("short read: expected {expected} bytes, got {got}")]
    ShortRead { expected: usize, got: usize },

    /// Shared-state allocation failed (ring buffer, command slot).
    #[error("allocation failed: {0}")]
    Memory(String),
}

/// Outcome of a single "feed the pipeline a packet" call, distinguishing a
/// peer-driven `QUIT` (clean shutdown) from an actual failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The packet (or EOF marker) was accepted.
    Ok,
    /// The stream ended normally (EOF sentinel drained by the consumer).
    Eof,
    /// A peer sent the `QUIT` command over the command channel.
    Quit,
}

pub type Result<T> = std::result::Result<T, Error>;
