//! Level-triggered readiness probing for raw descriptors.
//!
//! tokio caches readiness per `AsyncFd` and only drops the cache on
//! `clear_ready()`, so after a syscall reports `EAGAIN` the cached state may be
//! stale. `poll(2)` is always level-triggered and needs no registration, so
//! every wakeup is verified against it before the state machine trusts it:
//! stale readiness is cleared and the wait continues, a genuine edge is never
//! thrown away.

use std::io::{self, Result as IoResult};
use std::os::unix::prelude::{AsRawFd, OwnedFd, RawFd};
use tokio::io::unix::AsyncFd;

pub(crate) fn is_readable(fd: RawFd) -> IoResult<bool> {
    probe(fd, libc::POLLIN)
}

pub(crate) fn is_writable(fd: RawFd) -> IoResult<bool> {
    probe(fd, libc::POLLOUT)
}

fn probe(fd: RawFd, events: libc::c_short) -> IoResult<bool> {
    let mut pfd = libc::pollfd {
        fd,
        events,
        revents: 0,
    };

    // Zero timeout so the probe never blocks.
    let ret = unsafe { libc::poll(&mut pfd, 1, 0) };
    if ret == -1 {
        return Err(io::Error::last_os_error());
    }

    if pfd.revents & libc::POLLNVAL != 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "descriptor is invalid",
        ));
    }

    // POLLERR/POLLHUP count as ready: the next syscall will report the
    // condition (EOF, reset) instead of blocking.
    Ok(pfd.revents & (events | libc::POLLERR | libc::POLLHUP) != 0)
}

/// Suspend until `fd` is readable, re-checking each wakeup with `poll(2)`.
pub(crate) async fn wait_readable(fd: &AsyncFd<OwnedFd>) -> IoResult<()> {
    loop {
        let mut guard = fd.readable().await?;
        if is_readable(fd.as_raw_fd())? {
            return Ok(());
        }
        guard.clear_ready();
    }
}

/// Suspend until `fd` is writable, re-checking each wakeup with `poll(2)`.
pub(crate) async fn wait_writable(fd: &AsyncFd<OwnedFd>) -> IoResult<()> {
    loop {
        let mut guard = fd.writable().await?;
        if is_writable(fd.as_raw_fd())? {
            return Ok(());
        }
        guard.clear_ready();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::fcntl::OFlag;
    use nix::unistd::pipe2;

    #[test]
    fn fresh_pipe_is_writable_not_readable() {
        let (rd, wr) = pipe2(OFlag::O_NONBLOCK).unwrap();
        assert!(!is_readable(rd.as_raw_fd()).unwrap());
        assert!(is_writable(wr.as_raw_fd()).unwrap());
    }

    #[test]
    fn pipe_with_data_is_readable() {
        let (rd, wr) = pipe2(OFlag::O_NONBLOCK).unwrap();
        nix::unistd::write(&wr, b"x").unwrap();
        assert!(is_readable(rd.as_raw_fd()).unwrap());
    }

    #[test]
    fn closed_write_end_reports_readable() {
        // POLLHUP on the read end must count as readable so the caller
        // observes EOF instead of waiting forever.
        let (rd, wr) = pipe2(OFlag::O_NONBLOCK).unwrap();
        drop(wr);
        assert!(is_readable(rd.as_raw_fd()).unwrap());
    }
}
