//! Readiness multiplexer used by descriptor wait sets.
//!
//! Two backends are available and picked when the wait set is created:
//! - `epoll` (Linux), a kernel notification queue with a single native
//!   descriptor of its own,
//! - `pollfds`, a descriptor array handed to `poll(2)` on every wait.
//!
//! Both report readiness as the `u64` context given at registration.

pub(crate) mod signal;
pub(crate) mod unix;

#[cfg(target_os = "linux")]
mod epoll;
mod pollfds;

use bitflags::bitflags;
use std::io;
use std::os::fd::RawFd;
use std::time::Duration;

bitflags! {
    /// Readiness events a descriptor is registered for.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Events: u32 {
        const IN  = 1 << 0;
        const OUT = 1 << 1;
        const PRI = 1 << 2;
        const ERR = 1 << 3;
        const HUP = 1 << 4;
    }
}

/// One entry of a descriptor-array snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollFd {
    pub fd: RawFd,
    pub events: Events,
}

/// Context reported when the wait set's own signal channel fires.
///
/// Never handed out for a user registration.
pub(crate) const SIGNAL_TOKEN: u64 = u64::MAX;

pub(crate) enum Multiplexer {
    #[cfg(target_os = "linux")]
    Epoll(epoll::EpollPoller),
    PollFds(pollfds::PollFdsPoller),
}

impl Multiplexer {
    /// Notification-queue backend; falls back to the array where epoll
    /// is not available.
    pub(crate) fn notify() -> io::Result<Self> {
        #[cfg(target_os = "linux")]
        return Ok(Self::Epoll(epoll::EpollPoller::new()?));

        #[cfg(not(target_os = "linux"))]
        return Ok(Self::PollFds(pollfds::PollFdsPoller::new()));
    }

    pub(crate) fn poll_array() -> Self {
        Self::PollFds(pollfds::PollFdsPoller::new())
    }

    pub(crate) fn add(&self, fd: RawFd, events: Events, context: u64) -> io::Result<()> {
        match self {
            #[cfg(target_os = "linux")]
            Self::Epoll(p) => p.add(fd, events, context),
            Self::PollFds(p) => p.add(fd, events, context),
        }
    }

    pub(crate) fn del(&self, fd: RawFd) -> io::Result<()> {
        match self {
            #[cfg(target_os = "linux")]
            Self::Epoll(p) => p.del(fd),
            Self::PollFds(p) => p.del(fd),
        }
    }

    /// Blocks until something is ready or `timeout` elapses.
    ///
    /// `contexts` is cleared and refilled with the contexts that fired;
    /// it stays empty on timeout and on `EINTR`.
    pub(crate) fn wait(&self, contexts: &mut Vec<u64>, timeout: Option<Duration>) -> io::Result<()> {
        contexts.clear();

        match self {
            #[cfg(target_os = "linux")]
            Self::Epoll(p) => p.wait(contexts, timeout),
            Self::PollFds(p) => p.wait(contexts, timeout),
        }
    }

    /// The backend's own pollable descriptor, if it has one.
    pub(crate) fn native_fd(&self) -> Option<RawFd> {
        match self {
            #[cfg(target_os = "linux")]
            Self::Epoll(p) => Some(p.fd()),
            Self::PollFds(_) => None,
        }
    }

    /// Current descriptor array; empty for the notification queue.
    pub(crate) fn snapshot(&self) -> Vec<PollFd> {
        match self {
            #[cfg(target_os = "linux")]
            Self::Epoll(_) => Vec::new(),
            Self::PollFds(p) => p.snapshot(),
        }
    }
}

/// Converts a timeout to the milliseconds `epoll_wait`/`poll` expect.
///
/// Partial milliseconds round up so a short remaining time never turns
/// into a busy zero-timeout poll.
pub(crate) fn timeout_ms(timeout: Option<Duration>) -> libc::c_int {
    match timeout {
        None => -1,
        Some(t) => {
            let ms = t.as_micros().div_ceil(1000);
            ms.min(libc::c_int::MAX as u128) as libc::c_int
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_rounds_up() {
        assert_eq!(timeout_ms(None), -1);
        assert_eq!(timeout_ms(Some(Duration::ZERO)), 0);
        assert_eq!(timeout_ms(Some(Duration::from_micros(1))), 1);
        assert_eq!(timeout_ms(Some(Duration::from_millis(25))), 25);
        assert_eq!(timeout_ms(Some(Duration::from_secs(u64::MAX))), libc::c_int::MAX);
    }
}
