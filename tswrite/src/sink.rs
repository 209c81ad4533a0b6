//! Sink abstraction: uniform `write_all` to file/stdout/TCP/UDP.
//!
//! UDP multicast setup (TTL, interface) follows the same `socket2` calls
//! `bass-aes67::output::stream::Aes67OutputStream::create_multicast_socket`
//! and `bass-rtp::rtp::socket::RtpSocket` use for their own multicast
//! sockets.

use std::fs::{File, OpenOptions};
use std::io::{self, Stdout, Write};
use std::net::{Ipv4Addr, SocketAddrV4, TcpStream, ToSocketAddrs, UdpSocket};
use std::os::unix::fs::OpenOptionsExt;
use std::thread;
use std::time::Duration;

use log::warn;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};

use crate::error::{Error, Result};

/// Multicast TTL applied to UDP sinks whose destination is in 224.0.0.0/4.
const MULTICAST_TTL: u32 = 5;

/// Unix file mode for file sinks (`0777`, honouring umask).
const FILE_MODE: u32 = 0o777;

/// Sleep-poll interval used while a non-blocking TCP data socket isn't
/// writable yet (command-channel multiplexing switches the data socket to
/// non-blocking; see `CommandChannel`). Matches the sleep-poll idiom
/// already used for the ring buffer's full/empty waits.
const WRITE_RETRY_INTERVAL: Duration = Duration::from_millis(1);

/// Uniform byte-stream destination for paced TS output.
pub trait Sink: Send {
    /// Write exactly `bytes.len()` bytes, looping on short writes.
    ///
    /// On a UDP sink, `ENOBUFS` is treated as a transient warning and the
    /// call retried (data may still be dropped on a stateless datagram
    /// sink); other UDP errors and all TCP/file errors are reported to
    /// the caller as `Error::FatalSend`.
    fn write_all(&mut self, bytes: &[u8]) -> Result<()>;

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Write to a newly created/truncated file.
pub struct FileSink {
    file: File,
}

impl FileSink {
    pub fn open(path: &str) -> Result<Self> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(FILE_MODE)
            .open(path)
            .map_err(Error::Open)?;
        Ok(Self { file })
    }
}

impl Sink for FileSink {
    fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        self.file.write_all(bytes).map_err(Error::FatalSend)
    }
}

/// Write to standard output.
pub struct StdoutSink {
    out: Stdout,
}

impl StdoutSink {
    pub fn new() -> Self {
        Self { out: io::stdout() }
    }
}

impl Default for StdoutSink {
    fn default() -> Self {
        Self::new()
    }
}

impl Sink for StdoutSink {
    fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        self.out.write_all(bytes).map_err(Error::FatalSend)
    }
}

/// Write to a TCP peer. IPv4 only.
pub struct TcpSink {
    stream: TcpStream,
}

impl TcpSink {
    pub fn connect(host: &str, port: u16) -> Result<Self> {
        let stream = resolve_v4(host, port)
            .and_then(|addr| TcpStream::connect(addr).map_err(Error::Open))?;
        Ok(Self { stream })
    }

    /// Switch the underlying socket to non-blocking mode, required when a
    /// command channel is multiplexed with data sends over the same
    /// connection.
    pub fn set_nonblocking(&self, nonblocking: bool) -> Result<()> {
        self.stream
            .set_nonblocking(nonblocking)
            .map_err(Error::FatalSend)
    }

    pub fn try_clone(&self) -> Result<TcpStream> {
        self.stream.try_clone().map_err(Error::FatalSend)
    }
}

impl Sink for TcpSink {
    /// Writes exactly `bytes.len()` bytes, looping on short writes. When
    /// the command channel has switched this socket to non-blocking mode,
    /// a write that can't complete immediately (ordinary TCP backpressure,
    /// not an error) waits for writability via a short sleep-poll retry
    /// instead of surfacing as a fatal error.
    fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        let mut remaining = bytes;
        while !remaining.is_empty() {
            match self.stream.write(remaining) {
                Ok(0) => {
                    return Err(Error::FatalSend(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "failed to write whole buffer",
                    )))
                }
                Ok(n) => remaining = &remaining[n..],
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    thread::sleep(WRITE_RETRY_INTERVAL);
                }
                Err(e) => return Err(Error::FatalSend(e)),
            }
        }
        Ok(())
    }
}

/// Write to a UDP peer (unicast or multicast). IPv4 only.
pub struct UdpSink {
    socket: UdpSocket,
}

impl UdpSink {
    pub fn connect(host: &str, port: u16, multicast_if: Option<Ipv4Addr>) -> Result<Self> {
        let dest = resolve_v4_addr(host, port)?;

        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).map_err(Error::Open)?;
        socket
            .bind(&SockAddr::from(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0)))
            .map_err(Error::Open)?;

        if dest.ip().is_multicast() {
            socket
                .set_multicast_ttl_v4(MULTICAST_TTL)
                .map_err(Error::Open)?;
            if let Some(iface) = multicast_if {
                socket.set_multicast_if_v4(&iface).map_err(Error::Open)?;
            }
        }

        socket.connect(&SockAddr::from(dest)).map_err(Error::Open)?;

        let socket: UdpSocket = socket.into();
        Ok(Self { socket })
    }
}

impl Sink for UdpSink {
    fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        loop {
            match self.socket.send(bytes) {
                Ok(_) => return Ok(()),
                Err(e) if e.raw_os_error() == Some(libc_enobufs()) => {
                    warn!("UDP send hit ENOBUFS, retrying");
                    continue;
                }
                Err(e) => {
                    warn!("UDP send error (swallowed, stream continues): {e}");
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(target_os = "linux")]
fn libc_enobufs() -> i32 {
    105 // ENOBUFS on Linux
}

#[cfg(not(target_os = "linux"))]
fn libc_enobufs() -> i32 {
    55 // ENOBUFS on most BSD-derived platforms (incl. macOS)
}

fn resolve_v4(host: &str, port: u16) -> Result<std::net::SocketAddrV4> {
    resolve_v4_addr(host, port)
}

fn resolve_v4_addr(host: &str, port: u16) -> Result<SocketAddrV4> {
    (host, port)
        .to_socket_addrs()
        .map_err(Error::Open)?
        .find_map(|addr| match addr {
            std::net::SocketAddr::V4(v4) => Some(v4),
            std::net::SocketAddr::V6(_) => None,
        })
        .ok_or_else(|| Error::Open(io::Error::new(io::ErrorKind::Other, "no IPv4 address found for host")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    /// A non-blocking TCP data socket (as used when the command channel is
    /// enabled) must ride out `WouldBlock` instead of failing the whole
    /// send: push enough bytes to exceed the OS send buffer before the
    /// peer starts reading, and confirm every byte still arrives.
    #[test]
    fn write_all_rides_out_would_block_on_a_non_blocking_socket() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let accept_thread = thread::spawn(move || listener.accept().unwrap().0);

        let stream = TcpStream::connect(addr).unwrap();
        stream.set_nonblocking(true).unwrap();
        let mut sink = TcpSink { stream };

        let mut peer = accept_thread.join().unwrap();

        // Comfortably larger than any default OS send/receive buffer, so
        // the write is guaranteed to hit WouldBlock at least once before
        // the peer below starts draining it.
        let payload = vec![0xABu8; 16 * 1024 * 1024];
        let expected_len = payload.len();
        let writer_thread = thread::spawn(move || sink.write_all(&payload));

        thread::sleep(Duration::from_millis(50));

        let mut received = Vec::with_capacity(expected_len);
        let mut buf = [0u8; 64 * 1024];
        while received.len() < expected_len {
            match peer.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => received.extend_from_slice(&buf[..n]),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => panic!("peer read failed: {e}"),
            }
        }

        writer_thread.join().unwrap().unwrap();
        assert_eq!(received.len(), expected_len);
        assert!(received.iter().all(|&b| b == 0xAB));
    }
}
