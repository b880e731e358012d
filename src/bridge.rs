//! One direction of a duplex session: source socket -> pipe -> destination.

use std::io::Result as IoResult;
use std::os::unix::prelude::{AsRawFd, OwnedFd};

use bytes::{Buf, Bytes};
use tokio::io::unix::AsyncFd;
use tracing::{debug, trace};

use crate::endpoint::{self, Endpoint, SendOutcome};
use crate::pipe::{PipeBuffer, Transfer};
use crate::ready;

/// Callback invoked with each chunk delivered to the destination.
pub(crate) type StatsFn = Box<dyn FnMut(usize) + Send>;

/// Readiness-driven relay state machine.
///
/// The bridge keeps its own view of which descriptors are known ready and
/// clears an entry after every attempt that consumed it, whether or not the
/// attempt moved bytes. Re-arming goes through the probe-verified waits in
/// [`ready`], so a stale cached edge cannot cause a busy loop and a genuine
/// edge is never lost. Once `done` is set no further syscalls are issued.
///
/// All owned resources (both pipe ends, both duplicated socket descriptors
/// and their reactor registrations) are released by drop, so cancellation
/// mid-transfer cleans up exactly like normal completion.
pub(crate) struct Bridge {
    src: AsyncFd<OwnedFd>,
    dst: AsyncFd<OwnedFd>,
    pipe: PipeBuffer,
    leftover: Bytes,
    source_readable: bool,
    pipe_writable: bool,
    dest_writable: bool,
    at_source_eof: bool,
    done: bool,
    delivered: u64,
    stats: Option<StatsFn>,
}

impl Bridge {
    pub(crate) fn new(
        src: &Endpoint,
        dst: &Endpoint,
        leftover: Bytes,
        stats: Option<StatsFn>,
    ) -> IoResult<Self> {
        Ok(Self {
            src: AsyncFd::new(src.dup()?)?,
            dst: AsyncFd::new(dst.dup()?)?,
            pipe: PipeBuffer::open()?,
            leftover,
            // Optimistic: attempt the syscalls first, let EAGAIN teach us.
            source_readable: true,
            pipe_writable: true,
            dest_writable: true,
            at_source_eof: false,
            done: false,
            delivered: 0,
            stats,
        })
    }

    /// Relay until the direction is done. Peer resets terminate the direction
    /// quietly; only descriptor and resource failures surface as errors.
    /// Returns the number of bytes delivered to the destination.
    pub(crate) async fn run(mut self) -> IoResult<u64> {
        while !self.done {
            self.advance()?;
            if self.done {
                break;
            }
            self.wait_ready().await?;
        }
        trace!("bridge done, {} bytes delivered", self.delivered);
        Ok(self.delivered)
    }

    /// Perform every transfer currently possible without blocking, then
    /// record which readiness conditions stopped us.
    fn advance(&mut self) -> IoResult<()> {
        self.fill()?;
        if self.drain()? {
            // The destination is the failing party; tell our source to stop
            // producing and finish. The sibling direction is unaffected.
            debug!("destination reset, shutting down source read side");
            endpoint::shutdown_read_fd(self.src.as_raw_fd());
            self.done = true;
            return Ok(());
        }
        if self.at_source_eof && self.pipe.occupied() == 0 && self.leftover.is_empty() {
            // Nothing left to move; propagate end of stream to the peer.
            endpoint::shutdown_write_fd(self.dst.as_raw_fd());
            self.done = true;
        }
        Ok(())
    }

    /// Source -> pipe. A single attempt per readiness pass: the kernel may
    /// clip the move to the pipe's free space, so both flags are dropped
    /// after every attempt and re-checked before the next one.
    fn fill(&mut self) -> IoResult<()> {
        if self.at_source_eof
            || !self.source_readable
            || !self.pipe_writable
            || !self.pipe.has_capacity()
        {
            return Ok(());
        }
        match self.pipe.splice_in(self.src.get_ref())? {
            Transfer::Moved(n) => {
                trace!("{} bytes into pipe, {} occupied", n, self.pipe.occupied());
                self.source_readable = false;
                self.pipe_writable = false;
            }
            Transfer::WouldBlock => {
                // splice() does not say which side blocked; the probe on
                // re-arm sorts it out.
                self.source_readable = false;
                self.pipe_writable = false;
            }
            Transfer::Eof => {
                trace!("source at end of stream, {} to drain", self.pipe.occupied());
                self.at_source_eof = true;
            }
            Transfer::Reset => {
                // Same forward progress as EOF, reads are just as over.
                debug!("source reset, draining {} staged bytes", self.pipe.occupied());
                self.at_source_eof = true;
            }
        }
        Ok(())
    }

    /// Leftover and pipe -> destination. Returns true on destination reset.
    fn drain(&mut self) -> IoResult<bool> {
        // Bytes read before the bridge existed go first, always.
        while !self.leftover.is_empty() && self.dest_writable {
            match endpoint::send_nonblocking(self.dst.as_raw_fd(), &self.leftover)? {
                SendOutcome::Sent(n) if n > 0 => {
                    self.leftover.advance(n);
                    self.account(n);
                }
                SendOutcome::Sent(_) | SendOutcome::WouldBlock => {
                    self.dest_writable = false;
                }
                SendOutcome::Reset => return Ok(true),
            }
        }
        while self.leftover.is_empty() && self.pipe.occupied() > 0 && self.dest_writable {
            match self.pipe.splice_out(self.dst.get_ref())? {
                Transfer::Moved(n) => self.account(n),
                Transfer::WouldBlock => self.dest_writable = false,
                Transfer::Reset => return Ok(true),
                // splice_out never reports EOF.
                Transfer::Eof => break,
            }
        }
        Ok(false)
    }

    fn account(&mut self, n: usize) {
        self.delivered += n as u64;
        if let Some(cb) = self.stats.as_mut() {
            cb(n);
        }
    }

    /// Suspend until one of the readiness conditions the state machine is
    /// missing becomes true, then record it. Only conditions that can lead
    /// to work are waited on; a condition already known true is never
    /// registered again.
    async fn wait_ready(&mut self) -> IoResult<()> {
        let want_fill = !self.at_source_eof && self.pipe.has_capacity();
        let want_drain = !self.leftover.is_empty() || self.pipe.occupied() > 0;
        tokio::select! {
            r = ready::wait_readable(&self.src), if want_fill && !self.source_readable => {
                r?;
                self.source_readable = true;
            }
            r = self.pipe.writable(), if want_fill && !self.pipe_writable => {
                r?;
                self.pipe_writable = true;
            }
            r = ready::wait_writable(&self.dst), if want_drain && !self.dest_writable => {
                r?;
                self.dest_writable = true;
            }
            else => {}
        }
        Ok(())
    }
}
