//! `poll(2)`-based multiplexer backend.
//!
//! Keeps the registered descriptors as a flat array that is copied out
//! under the lock and then handed to `poll(2)`, so registrations made
//! while a thread is blocked take effect on its next wait.

use super::{Events, PollFd, timeout_ms};

use libc::{POLLERR, POLLHUP, POLLIN, POLLOUT, POLLPRI, nfds_t, poll, pollfd};
use parking_lot::Mutex;
use std::io;
use std::os::fd::RawFd;
use std::time::Duration;

pub(crate) struct PollFdsPoller {
    inner: Mutex<PollFds>,
}

#[derive(Default)]
struct PollFds {
    /// Registered descriptors: `(fd, events)`.
    fds: Vec<PollFd>,

    /// Context per entry of `fds`, same index.
    contexts: Vec<u64>,
}

impl PollFdsPoller {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(PollFds::default()),
        }
    }

    pub(crate) fn add(&self, fd: RawFd, events: Events, context: u64) -> io::Result<()> {
        let mut inner = self.inner.lock();

        if inner.fds.iter().any(|p| p.fd == fd) {
            return Err(io::Error::from_raw_os_error(libc::EEXIST));
        }

        inner.fds.push(PollFd { fd, events });
        inner.contexts.push(context);
        Ok(())
    }

    pub(crate) fn del(&self, fd: RawFd) -> io::Result<()> {
        let mut inner = self.inner.lock();

        let index = inner
            .fds
            .iter()
            .position(|p| p.fd == fd)
            .ok_or_else(|| io::Error::from_raw_os_error(libc::ENOENT))?;

        inner.fds.remove(index);
        inner.contexts.remove(index);
        Ok(())
    }

    pub(crate) fn snapshot(&self) -> Vec<PollFd> {
        self.inner.lock().fds.clone()
    }

    pub(crate) fn wait(&self, contexts: &mut Vec<u64>, timeout: Option<Duration>) -> io::Result<()> {
        let (mut fds, tokens): (Vec<pollfd>, Vec<u64>) = {
            let inner = self.inner.lock();
            let fds = inner
                .fds
                .iter()
                .map(|p| pollfd {
                    fd: p.fd,
                    events: poll_flags(p.events),
                    revents: 0,
                })
                .collect();
            (fds, inner.contexts.clone())
        };

        let n = unsafe { poll(fds.as_mut_ptr(), fds.len() as nfds_t, timeout_ms(timeout)) };

        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(());
            }
            return Err(err);
        }

        contexts.extend(
            fds.iter()
                .zip(tokens)
                .filter(|(p, _)| p.revents != 0)
                .map(|(_, token)| token),
        );

        Ok(())
    }
}

fn poll_flags(events: Events) -> i16 {
    let mut flags = 0;

    if events.contains(Events::IN) {
        flags |= POLLIN;
    }
    if events.contains(Events::OUT) {
        flags |= POLLOUT;
    }
    if events.contains(Events::PRI) {
        flags |= POLLPRI;
    }
    if events.contains(Events::ERR) {
        flags |= POLLERR;
    }
    if events.contains(Events::HUP) {
        flags |= POLLHUP;
    }

    flags
}
