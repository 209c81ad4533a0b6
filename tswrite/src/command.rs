//! Command channel: a TCP peer can change playback mode while data is
//! streaming, by sending single bytes interleaved with output.
//!
//! The shared `(command, changed)` pair is read by the caller and written
//! by a reader that watches the non-blocking command socket, guarded with
//! `parking_lot::Mutex` the way `bass-aes67`/`bass-webrtc-ndi` guard their
//! own small pieces of cross-thread state.

use std::io::{ErrorKind, Read};
use std::net::TcpStream;

use parking_lot::Mutex;

use crate::error::Result;

/// Recognised single-byte commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Quit,
    Normal,
    Pause,
    Fast,
    FastFast,
    Reverse,
    FastReverse,
    SkipForward,
    SkipBackward,
    SkipForwardLots,
    SkipBackwardLots,
    SelectFile(u8),
}

impl Command {
    /// Map a single byte to a command. Returns `None` for newline and any
    /// unrecognised byte, both of which are ignored silently.
    pub fn from_byte(b: u8) -> Option<Command> {
        match b {
            b'q' => Some(Command::Quit),
            b'n' => Some(Command::Normal),
            b'p' => Some(Command::Pause),
            b'f' => Some(Command::Fast),
            b'F' => Some(Command::FastFast),
            b'r' => Some(Command::Reverse),
            b'R' => Some(Command::FastReverse),
            b'>' => Some(Command::SkipForward),
            b'<' => Some(Command::SkipBackward),
            b']' => Some(Command::SkipForwardLots),
            b'[' => Some(Command::SkipBackwardLots),
            b'0'..=b'9' => Some(Command::SelectFile(b - b'0')),
            _ => None,
        }
    }

    /// Skip-forward/backward set `atomic_command`; play/FF/REV do not.
    pub fn is_atomic(self) -> bool {
        matches!(
            self,
            Command::SkipForward
                | Command::SkipBackward
                | Command::SkipForwardLots
                | Command::SkipBackwardLots
        )
    }
}

#[derive(Debug)]
struct Slot {
    command: Command,
    changed: bool,
    atomic: bool,
    /// Set when an atomic command has been taken but its caller-defined
    /// action hasn't completed yet. While set, `poll` won't read any
    /// further bytes from the socket, so a new command can't arrive (and
    /// silently pre-empt the in-flight one) until the caller reports
    /// completion via `complete_atomic`.
    action_in_progress: bool,
}

/// Non-blocking reader for a single-byte command stream, plus the shared
/// slot the caller polls between packets.
pub struct CommandChannel {
    socket: TcpStream,
    slot: Mutex<Slot>,
}

impl CommandChannel {
    /// Wrap an already-connected, already-non-blocking TCP stream as a
    /// command source. Command input is only valid over TCP.
    pub fn new(socket: TcpStream) -> Result<Self> {
        socket.set_nonblocking(true).map_err(crate::error::Error::FatalSend)?;
        Ok(Self {
            socket,
            slot: Mutex::new(Slot {
                command: Command::Normal,
                changed: false,
                atomic: false,
                action_in_progress: false,
            }),
        })
    }

    /// Attempt one non-blocking read of the command socket, updating the
    /// shared slot if a recognised byte (or EOF/error) arrived.
    ///
    /// Only one unconsumed command is buffered at a time: while
    /// `changed` is still set, further reads are suppressed so the caller
    /// cannot miss the pending one. While an atomic command's action is
    /// still in progress (`action_in_progress`), reads are suppressed the
    /// same way, so a later command can't pre-empt it.
    pub fn poll(&self) {
        {
            let slot = self.slot.lock();
            if slot.changed || slot.action_in_progress {
                return;
            }
        }

        let mut byte = [0u8; 1];
        match (&self.socket).read(&mut byte) {
            Ok(0) => self.set(Command::Quit, false),
            Ok(_) => {
                if byte[0] == b'\n' {
                    return;
                }
                if let Some(cmd) = Command::from_byte(byte[0]) {
                    let atomic = cmd.is_atomic();
                    self.set(cmd, atomic);
                }
                // Unrecognised byte: ignored silently.
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => {}
            Err(_) => self.set(Command::Quit, false),
        }
    }

    fn set(&self, command: Command, atomic: bool) {
        let mut slot = self.slot.lock();
        slot.command = command;
        slot.changed = true;
        slot.atomic = atomic;
    }

    /// Take the pending command if one is queued, clearing `changed`. If
    /// the command is atomic, `action_in_progress` is set so `poll` stops
    /// reading further bytes until the caller reports completion via
    /// [`CommandChannel::complete_atomic`].
    pub fn take(&self) -> Option<Command> {
        let mut slot = self.slot.lock();
        if slot.changed {
            slot.changed = false;
            if slot.atomic {
                slot.action_in_progress = true;
            }
            Some(slot.command)
        } else {
            None
        }
    }

    /// Whether an atomic command is outstanding: either still sitting
    /// unconsumed in the slot, or taken and not yet reported complete.
    pub fn is_atomic_pending(&self) -> bool {
        let slot = self.slot.lock();
        slot.atomic && (slot.changed || slot.action_in_progress)
    }

    /// Report that the action defined by the most recently taken atomic
    /// command (skip-forward/backward) has finished, re-enabling
    /// `command_changed` observation of subsequent bytes.
    pub fn complete_atomic(&self) {
        let mut slot = self.slot.lock();
        slot.action_in_progress = false;
        slot.atomic = false;
    }

    /// Look at the pending command, if any, without consuming it. Lets a
    /// caller that doesn't own the consumer's `take()` loop (e.g. a
    /// packet-feed loop watching for `QUIT`) check the shared slot
    /// independently.
    pub fn peek(&self) -> Option<Command> {
        let slot = self.slot.lock();
        slot.changed.then_some(slot.command)
    }

    /// Block on the command socket alone until a new command arrives.
    /// Used by the caller to implement PAUSE.
    pub fn wait_for_command(&self) -> Command {
        loop {
            self.poll();
            if let Some(cmd) = self.take() {
                return cmd;
            }
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
    }
}
