//! Cross-thread wake primitive for descriptor wait sets.
//!
//! On Linux the channel is an `eventfd`; on other unix targets it is a
//! non-blocking self-pipe. Either way the read end is what gets
//! registered with the multiplexer.
//!
//! Signals coalesce: once the channel is pending, further `set` calls
//! do not touch the descriptor until the next `reset`. The pending flag
//! and the descriptor change together under one lock, so the flag is
//! set exactly while the read end is readable.

use super::unix::{sys_close, sys_read, sys_write};

use parking_lot::Mutex;
use std::io;
use std::os::fd::RawFd;

pub(crate) struct SignalChannel {
    read_fd: RawFd,
    write_fd: RawFd,
    pending: Mutex<bool>,
}

impl SignalChannel {
    #[cfg(target_os = "linux")]
    pub(crate) fn new() -> io::Result<Self> {
        let fd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(Self {
            read_fd: fd,
            write_fd: fd,
            pending: Mutex::new(false),
        })
    }

    #[cfg(not(target_os = "linux"))]
    pub(crate) fn new() -> io::Result<Self> {
        let (read_fd, write_fd) = super::unix::sys_pipe()?;

        Ok(Self {
            read_fd,
            write_fd,
            pending: Mutex::new(false),
        })
    }

    /// Descriptor to register for `IN` readiness.
    pub(crate) fn fd(&self) -> RawFd {
        self.read_fd
    }

    /// Makes the read end readable, unless a signal is already pending.
    pub(crate) fn set(&self) {
        let mut pending = self.pending.lock();
        if *pending {
            return;
        }

        let buf = 1u64.to_ne_bytes();
        let len = if self.read_fd == self.write_fd { 8 } else { 1 };

        // A full pipe already reads as ready.
        if sys_write(self.write_fd, &buf[..len]) < 0 {
            tracing::trace!(
                fd = self.write_fd,
                error = %io::Error::last_os_error(),
                "signal write skipped"
            );
        }

        *pending = true;
    }

    /// Drains the channel. Must run before the caller re-checks its sources.
    pub(crate) fn reset(&self) {
        let mut pending = self.pending.lock();
        if !*pending {
            return;
        }

        let mut buf = [0u8; 64];
        while sys_read(self.read_fd, &mut buf) > 0 {}

        *pending = false;
    }
}

impl Drop for SignalChannel {
    fn drop(&mut self) {
        sys_close(self.read_fd);
        if self.write_fd != self.read_fd {
            sys_close(self.write_fd);
        }
    }
}
