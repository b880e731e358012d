//! Kernel pipe used as the staging buffer between two `splice()` calls.

use std::io::{self, Result as IoResult};
use std::os::fd::AsFd;
use std::os::unix::prelude::{AsRawFd, OwnedFd, RawFd};

use nix::errno::Errno;
use nix::fcntl::{FcntlArg, OFlag, SpliceFFlags, fcntl, splice};
use nix::unistd::pipe2;
use tokio::io::unix::AsyncFd;

use crate::ready;

/// Request size for a single `splice()` into the pipe. The kernel clips the
/// move to the pipe's free capacity, so a short transfer is the normal case
/// and callers must consult [`PipeBuffer::occupied`] rather than assume the
/// full request completed.
pub(crate) const SPLICE_CHUNK: usize = 1 << 20;

/// Outcome of a single non-blocking transfer attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Transfer {
    Moved(usize),
    WouldBlock,
    /// Source is at end of stream. Only produced when filling: the pipe is
    /// filled strictly after a readiness signal, so a zero-byte `splice()`
    /// there unambiguously means EOF.
    Eof,
    /// Peer connection reset (`ECONNRESET`, or `EPIPE` on the write side).
    /// Distinct from EOF so the caller can suppress further attempts.
    Reset,
}

pub(crate) fn os_err(errno: Errno) -> io::Error {
    io::Error::from_raw_os_error(errno as i32)
}

fn splice_flags() -> SpliceFFlags {
    SpliceFFlags::SPLICE_F_NONBLOCK | SpliceFFlags::SPLICE_F_MOVE
}

/// Bounded, unidirectional kernel byte buffer owned by exactly one bridge.
///
/// Both ends are non-blocking and registered with the reactor, so the write
/// end can be awaited like any other descriptor. The occupied counter is
/// bookkeeping against the `F_GETPIPE_SZ` capacity; the kernel bound itself is
/// what enforces backpressure. Dropping the buffer closes both ends and
/// removes the registrations, on every exit path including cancellation.
pub(crate) struct PipeBuffer {
    rd: AsyncFd<OwnedFd>,
    wr: AsyncFd<OwnedFd>,
    capacity: usize,
    occupied: usize,
}

impl PipeBuffer {
    pub(crate) fn open() -> IoResult<Self> {
        let (rd, wr) = pipe2(OFlag::O_NONBLOCK | OFlag::O_CLOEXEC).map_err(os_err)?;
        let capacity = fcntl(&wr, FcntlArg::F_GETPIPE_SZ).map_err(os_err)? as usize;
        Ok(Self {
            rd: AsyncFd::new(rd)?,
            wr: AsyncFd::new(wr)?,
            capacity,
            occupied: 0,
        })
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn occupied(&self) -> usize {
        self.occupied
    }

    pub(crate) fn has_capacity(&self) -> bool {
        self.occupied < self.capacity
    }

    /// Suspend until the write end can accept bytes again.
    pub(crate) async fn writable(&self) -> IoResult<()> {
        ready::wait_writable(&self.wr).await
    }

    /// One splice attempt from `from` into the pipe.
    pub(crate) fn splice_in(&mut self, from: impl AsFd) -> IoResult<Transfer> {
        loop {
            let ret = splice(
                from.as_fd(),
                None,
                self.wr.get_ref().as_fd(),
                None,
                SPLICE_CHUNK,
                splice_flags(),
            );
            match ret {
                Ok(0) => return Ok(Transfer::Eof),
                Ok(n) => {
                    self.occupied += n;
                    debug_assert!(self.occupied <= self.capacity);
                    return Ok(Transfer::Moved(n));
                }
                Err(e) if e == Errno::EWOULDBLOCK => return Ok(Transfer::WouldBlock),
                Err(e) if e == Errno::EINTR => continue,
                Err(e) if e == Errno::ECONNRESET => return Ok(Transfer::Reset),
                Err(e) => return Err(os_err(e)),
            }
        }
    }

    /// One splice attempt moving up to `occupied` bytes from the pipe into
    /// `to`. Never reports EOF: draining a pipe says nothing about the stream.
    pub(crate) fn splice_out(&mut self, to: impl AsFd) -> IoResult<Transfer> {
        if self.occupied == 0 {
            return Ok(Transfer::Moved(0));
        }
        loop {
            let ret = splice(
                self.rd.get_ref().as_fd(),
                None,
                to.as_fd(),
                None,
                self.occupied,
                splice_flags(),
            );
            match ret {
                Ok(n) => {
                    self.occupied -= n;
                    return Ok(Transfer::Moved(n));
                }
                Err(e) if e == Errno::EWOULDBLOCK => return Ok(Transfer::WouldBlock),
                Err(e) if e == Errno::EINTR => continue,
                Err(e) if e == Errno::ECONNRESET || e == Errno::EPIPE => {
                    return Ok(Transfer::Reset);
                }
                Err(e) => return Err(os_err(e)),
            }
        }
    }
}

impl AsRawFd for PipeBuffer {
    /// The read end, mainly for diagnostics.
    fn as_raw_fd(&self) -> RawFd {
        self.rd.as_raw_fd()
    }
}
