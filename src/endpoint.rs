//! Adapter around one already-connected, non-blocking socket.

use std::io::Result as IoResult;
use std::os::fd::{AsFd, BorrowedFd};
use std::os::unix::prelude::{AsRawFd, OwnedFd, RawFd};

use bytes::Bytes;
use nix::errno::Errno;
use nix::sys::socket::{MsgFlags, Shutdown, send, shutdown};
use tracing::debug;

use crate::pipe::os_err;

/// Outcome of a non-blocking direct send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Sent(usize),
    WouldBlock,
    /// Peer reset or closed its read side; further sends are pointless.
    Reset,
}

/// One side of a bridged session: a connected socket descriptor plus any
/// bytes already read from it before relaying began.
///
/// The endpoint owns its descriptor and outlives the bridges working on it;
/// bridges operate on `dup()`ed copies and only ever shut down one direction
/// of the socket, never close it. The descriptor must already be in
/// non-blocking mode.
pub struct Endpoint {
    fd: OwnedFd,
    leftover: Bytes,
}

impl Endpoint {
    pub fn new(fd: OwnedFd) -> Self {
        Self {
            fd,
            leftover: Bytes::new(),
        }
    }

    /// Wrap a descriptor together with bytes consumed from it during an
    /// earlier protocol phase (e.g. while sniffing a header). The bridge
    /// delivers them to the peer before anything it reads itself.
    pub fn with_leftover(fd: OwnedFd, leftover: Bytes) -> Self {
        Self { fd, leftover }
    }

    /// Build an endpoint from a connected tokio `TcpStream`.
    pub fn from_tcp(stream: tokio::net::TcpStream) -> IoResult<Self> {
        let stream = stream.into_std()?;
        stream.set_nonblocking(true)?;
        Ok(Self::new(stream.into()))
    }

    /// Return and clear the pre-read bytes. Empty after the first call.
    pub fn take_leftover(&mut self) -> Bytes {
        std::mem::take(&mut self.leftover)
    }

    pub fn has_leftover(&self) -> bool {
        !self.leftover.is_empty()
    }

    /// Duplicate the descriptor for a bridge's own reactor registration.
    pub(crate) fn dup(&self) -> IoResult<OwnedFd> {
        self.fd.try_clone()
    }

    /// Non-blocking write directly to the socket, bypassing the pipe.
    /// Partial writes are expected; the caller retries on the next writable
    /// signal.
    pub fn try_send(&self, buf: &[u8]) -> IoResult<SendOutcome> {
        send_nonblocking(self.fd.as_raw_fd(), buf)
    }

    /// Stop the peer from sending more data. Best effort and idempotent.
    pub fn shutdown_read(&self) {
        shutdown_read_fd(self.fd.as_raw_fd());
    }

    /// Signal end of stream to the peer. Best effort and idempotent.
    pub fn shutdown_write(&self) {
        shutdown_write_fd(self.fd.as_raw_fd());
    }
}

impl AsFd for Endpoint {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

impl AsRawFd for Endpoint {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

pub(crate) fn send_nonblocking(fd: RawFd, buf: &[u8]) -> IoResult<SendOutcome> {
    loop {
        match send(fd, buf, MsgFlags::MSG_DONTWAIT | MsgFlags::MSG_NOSIGNAL) {
            Ok(n) => return Ok(SendOutcome::Sent(n)),
            Err(e) if e == Errno::EWOULDBLOCK => return Ok(SendOutcome::WouldBlock),
            Err(e) if e == Errno::EINTR => continue,
            Err(e) if e == Errno::EPIPE || e == Errno::ECONNRESET => {
                return Ok(SendOutcome::Reset);
            }
            Err(e) => return Err(os_err(e)),
        }
    }
}

pub(crate) fn shutdown_read_fd(fd: RawFd) {
    match shutdown(fd, Shutdown::Read) {
        Ok(()) => {}
        // Losing the race against a peer close is expected, not a failure.
        Err(e) if e == Errno::ENOTCONN || e == Errno::EINVAL => {}
        Err(e) => debug!("shutdown(read) on fd {} failed: {}", fd, e),
    }
}

pub(crate) fn shutdown_write_fd(fd: RawFd) {
    match shutdown(fd, Shutdown::Write) {
        Ok(()) => {}
        Err(e) if e == Errno::ENOTCONN || e == Errno::EINVAL => {}
        Err(e) => debug!("shutdown(write) on fd {} failed: {}", fd, e),
    }
}
