//! Linux `epoll`-based multiplexer backend.
//!
//! The epoll descriptor is itself pollable, which is what lets a
//! descriptor wait set be nested inside another one.

use super::unix::sys_close;
use super::{Events, timeout_ms};

use libc::{
    EPOLL_CLOEXEC, EPOLL_CTL_ADD, EPOLL_CTL_DEL, EPOLLERR, EPOLLHUP, EPOLLIN, EPOLLOUT, EPOLLPRI,
    epoll_create1, epoll_ctl, epoll_event, epoll_wait,
};
use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

/// Maximum number of events collected by a single wait.
const EVENT_BATCH: usize = 16;

pub(crate) struct EpollPoller {
    /// Epoll file descriptor.
    epoll: RawFd,
}

impl EpollPoller {
    pub(crate) fn new() -> io::Result<Self> {
        let epoll = unsafe { epoll_create1(EPOLL_CLOEXEC) };
        if epoll < 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(Self { epoll })
    }

    pub(crate) fn fd(&self) -> RawFd {
        self.epoll
    }

    /// Register a file descriptor with the poller.
    pub(crate) fn add(&self, fd: RawFd, events: Events, context: u64) -> io::Result<()> {
        let mut event = epoll_event {
            events: epoll_flags(events),
            u64: context,
        };

        let rc = unsafe { epoll_ctl(self.epoll, EPOLL_CTL_ADD, fd, &mut event) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(())
    }

    /// Remove a file descriptor from the poller.
    pub(crate) fn del(&self, fd: RawFd) -> io::Result<()> {
        let rc = unsafe { epoll_ctl(self.epoll, EPOLL_CTL_DEL, fd, std::ptr::null_mut()) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(())
    }

    /// Blocks until:
    /// - at least one registered descriptor becomes ready,
    /// - or the optional timeout expires.
    pub(crate) fn wait(&self, contexts: &mut Vec<u64>, timeout: Option<Duration>) -> io::Result<()> {
        // Several threads may wait on one set, so the batch lives on each
        // caller's stack rather than in the poller.
        let mut events = [epoll_event { events: 0, u64: 0 }; EVENT_BATCH];

        let n = unsafe {
            epoll_wait(
                self.epoll,
                events.as_mut_ptr(),
                EVENT_BATCH as i32,
                timeout_ms(timeout),
            )
        };

        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(());
            }
            return Err(err);
        }

        contexts.extend(events[..n as usize].iter().map(|ev| ev.u64));
        Ok(())
    }
}

impl Drop for EpollPoller {
    fn drop(&mut self) {
        sys_close(self.epoll);
    }
}

fn epoll_flags(events: Events) -> u32 {
    let mut flags = 0;

    if events.contains(Events::IN) {
        flags |= EPOLLIN;
    }
    if events.contains(Events::OUT) {
        flags |= EPOLLOUT;
    }
    if events.contains(Events::PRI) {
        flags |= EPOLLPRI;
    }
    if events.contains(Events::ERR) {
        flags |= EPOLLERR;
    }
    if events.contains(Events::HUP) {
        flags |= EPOLLHUP;
    }

    flags as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::poller::unix::{sys_close, sys_pipe, sys_write};

    #[test]
    fn test_wait_caps_batch_and_repeats() {
        let poller = EpollPoller::new().expect("epoll");

        let pipes: Vec<(RawFd, RawFd)> = (0..EVENT_BATCH + 4)
            .map(|_| sys_pipe().expect("pipe"))
            .collect();

        for (i, &(r, w)) in pipes.iter().enumerate() {
            poller.add(r, Events::IN, i as u64).expect("add");
            assert_eq!(sys_write(w, b"x"), 1);
        }

        let mut contexts = Vec::new();
        for _ in 0..3 {
            contexts.clear();
            poller
                .wait(&mut contexts, Some(Duration::ZERO))
                .expect("wait");
            assert_eq!(contexts.len(), EVENT_BATCH);
        }

        for (r, w) in pipes {
            sys_close(r);
            sys_close(w);
        }
    }

    #[test]
    fn test_wait_times_out_empty() {
        let poller = EpollPoller::new().expect("epoll");
        let mut contexts = Vec::new();

        poller
            .wait(&mut contexts, Some(Duration::from_millis(5)))
            .expect("wait");
        assert!(contexts.is_empty());
    }
}
