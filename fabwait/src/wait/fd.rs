//! Descriptor wait sets: block in the multiplexer between poll passes.

use super::{WaitDescriptor, WaitKind, WaitPollFd, WaitSet};

use crate::error::{Error, Result};
use crate::fid::Readiness;
use crate::poller::signal::SignalChannel;
use crate::poller::{Events, Multiplexer, SIGNAL_TOKEN};

use parking_lot::RwLock;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// OS resources of an open descriptor wait set.
pub(super) struct FdState {
    pub(super) mux: Multiplexer,
    pub(super) signal: SignalChannel,
}

pub(super) struct FdWait {
    /// `None` once closed. `run` holds a read guard for its whole wait,
    /// so `close` can only take the write side when nobody is blocked.
    pub(super) state: RwLock<Option<FdState>>,
}

impl FdWait {
    pub(super) fn new(kind: WaitKind) -> Result<Self> {
        let signal = SignalChannel::new()?;

        let mux = match kind {
            WaitKind::DescriptorNotify => Multiplexer::notify()?,
            _ => Multiplexer::poll_array(),
        };

        mux.add(signal.fd(), Events::IN, SIGNAL_TOKEN)?;

        Ok(Self {
            state: RwLock::new(Some(FdState { mux, signal })),
        })
    }
}

/// Absolute deadline for a millisecond timeout; negative means none.
fn deadline_after(timeout_ms: i32) -> Option<Instant> {
    u64::try_from(timeout_ms)
        .ok()
        .map(|ms| Instant::now() + Duration::from_millis(ms))
}

/// Time left before `deadline`. No time left is a timeout.
fn remaining(deadline: Option<Instant>) -> Result<Option<Duration>> {
    let Some(deadline) = deadline else {
        return Ok(None);
    };

    let left = deadline.saturating_duration_since(Instant::now());
    if left.is_zero() {
        return Err(Error::Timeout);
    }

    Ok(Some(left))
}

impl WaitSet {
    /// One non-blocking pass: drain the signal, run the callbacks, then
    /// check the poll-set.
    pub(super) fn fd_try(&self, state: &FdState) -> Result<Readiness> {
        state.signal.reset();

        if self.try_all()?.is_ready() {
            return Ok(Readiness::Ready);
        }

        Ok(self.poll_sources())
    }

    pub(super) fn fd_run(&self, fd: &FdWait, timeout_ms: i32) -> Result<()> {
        let state = fd.state.read();
        let state = state.as_ref().ok_or(Error::InvalidArgument)?;

        let deadline = deadline_after(timeout_ms);
        let mut fired = Vec::new();

        loop {
            if self.fd_try(state)?.is_ready() {
                return Ok(());
            }

            let timeout = remaining(deadline)?;

            state.mux.wait(&mut fired, timeout).map_err(|e| {
                warn!(wait = %self.fid, error = %e, "poll failed");
                Error::Poller(e)
            })?;

            if fired.iter().any(|&context| context != SIGNAL_TOKEN) {
                return Ok(());
            }

            if !fired.is_empty() {
                trace!(wait = %self.fid, "woken by signal");
            }
        }
    }

    pub(super) fn fd_get_wait(&self, desc: &mut WaitDescriptor) -> Result<()> {
        self.with_registry(|registry, state| {
            let state = state.ok_or(Error::InvalidArgument)?;

            if self.kind == WaitKind::DescriptorNotify {
                return match state.mux.native_fd() {
                    Some(fd) => {
                        *desc = WaitDescriptor::Fd(fd);
                        Ok(())
                    }
                    None => Err(Error::NoData),
                };
            }

            let fds = state.mux.snapshot();

            let mut out = match std::mem::replace(desc, WaitDescriptor::Fd(-1)) {
                WaitDescriptor::PollFd(out) => out,
                WaitDescriptor::Fd(_) => WaitPollFd::default(),
            };

            out.nfds = fds.len();
            out.change_index = registry.change_index;

            let fits = out.capacity >= fds.len();
            if fits {
                out.fds = fds;
            }

            *desc = WaitDescriptor::PollFd(out);

            if !fits {
                debug!(wait = %self.fid, nfds = registry.fds.len(), "pollfd buffer too small");
                return Err(Error::TooSmall);
            }

            Ok(())
        })
    }

    pub(super) fn fd_close(&self, fd: &FdWait) -> Result<()> {
        let mut guard = fd.state.try_write().ok_or(Error::Busy)?;
        let Some(state) = guard.as_ref() else {
            return Err(Error::InvalidArgument);
        };

        {
            let mut registry = self.registry.lock();
            for entry in registry.fds.drain() {
                if let Err(e) = state.mux.del(entry.fd) {
                    debug!(wait = %self.fid, fd = entry.fd, error = %e, "fd already gone from poller");
                }
            }
            registry.change_index += 1;
        }

        self.cleanup()?;

        if let Err(e) = state.mux.del(state.signal.fd()) {
            debug!(wait = %self.fid, error = %e, "signal fd already gone from poller");
        }

        *guard = None;
        Ok(())
    }
}
