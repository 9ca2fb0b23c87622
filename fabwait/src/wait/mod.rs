//! Wait sets.
//!
//! A [`WaitSet`] aggregates completion sources behind one blocking
//! [`run`](WaitSet::run). Sources are registered three ways:
//! - fids ([`add_fid`](WaitSet::add_fid)), e.g. another wait set, checked
//!   through their try callback and, for descriptor kinds, through their
//!   wait descriptor,
//! - raw descriptors ([`add_fd`](WaitSet::add_fd)), descriptor kinds only,
//! - queues and counters bound on open (see [`crate::queue`]), which land
//!   in the set's internal poll-set.
//!
//! Two blocking strategies share this interface: descriptor wait sets
//! block in `epoll_wait`/`poll`, yield wait sets spin and yield the CPU.
//!
//! Lock order is: descriptor state (read or write), then the registry
//! lock, then the multiplexer's own lock. Try callbacks run with the
//! registry lock held and must not call back into the same wait set.

mod attr;
mod fd;
mod registry;
mod yield_wait;

pub use attr::{WaitAttr, WaitKind, check_wait_attr};

use crate::error::{Error, Result};
use crate::fabric::Fabric;
use crate::fid::{Fid, FidClass, FidId, Readiness, TryFn};
use crate::poller::{Events, PollFd, SIGNAL_TOKEN};
use crate::pollset::PollSet;

use fd::{FdState, FdWait};
use parking_lot::Mutex;
use registry::{FdEntry, FidEntry, Registry, Release};
use yield_wait::YieldWait;

use std::os::fd::RawFd;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

/// Control commands understood by [`WaitSet::control`].
pub enum Control<'a> {
    /// Reports the wait set's kind.
    GetWaitObj(&'a mut WaitKind),
    /// Reports what to block on outside the library.
    ///
    /// Notification-queue sets answer with [`WaitDescriptor::Fd`];
    /// poll-array sets fill a [`WaitDescriptor::PollFd`].
    GetWait(&'a mut WaitDescriptor),
}

/// Answer to [`Control::GetWait`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitDescriptor {
    Fd(RawFd),
    PollFd(WaitPollFd),
}

/// Descriptor-array snapshot of a poll-array wait set.
///
/// `nfds` and `change_index` are always filled in. `fds` is filled only
/// when `capacity` is large enough; otherwise the call fails with
/// [`Error::TooSmall`] and the caller retries with at least `nfds`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WaitPollFd {
    pub capacity: usize,
    pub fds: Vec<PollFd>,
    pub nfds: usize,
    pub change_index: u64,
}

impl WaitPollFd {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            ..Self::default()
        }
    }
}

enum WaitImpl {
    Fd(FdWait),
    Yield(YieldWait),
}

/// A wait object bound to a fabric.
pub struct WaitSet {
    fid: FidId,
    kind: WaitKind,

    /// Components that registered this set into themselves.
    refs: AtomicUsize,

    /// Threads currently inside `run`.
    waiters: AtomicUsize,

    closed: AtomicBool,

    registry: Mutex<Registry>,
    pub(crate) pollset: PollSet,

    fabric: Weak<Fabric>,

    imp: WaitImpl,
}

/// Decrements the waiter count when a `run` exits, whatever the path.
struct WaiterGuard<'a>(&'a AtomicUsize);

impl<'a> WaiterGuard<'a> {
    fn enter(waiters: &'a AtomicUsize) -> Self {
        waiters.fetch_add(1, Ordering::AcqRel);
        Self(waiters)
    }
}

impl Drop for WaiterGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

impl WaitSet {
    /// Opens a wait set of the requested kind on `fabric`.
    ///
    /// `Yield` opens a yield wait set; every other kind goes to the
    /// descriptor opener, which rejects what it cannot serve.
    pub fn open(fabric: &Arc<Fabric>, attr: &WaitAttr) -> Result<Arc<Self>> {
        match attr.kind {
            WaitKind::Yield => Self::open_yield(fabric, attr),
            _ => Self::open_fd(fabric, attr),
        }
    }

    /// Opens a descriptor wait set. `Unspecified` resolves to
    /// [`WaitKind::DescriptorNotify`].
    pub fn open_fd(fabric: &Arc<Fabric>, attr: &WaitAttr) -> Result<Arc<Self>> {
        attr::verify_wait_attr(attr, &[WaitKind::DescriptorNotify, WaitKind::DescriptorPoll])?;

        let kind = match attr.kind {
            WaitKind::Unspecified => WaitKind::DescriptorNotify,
            kind => kind,
        };

        let imp = WaitImpl::Fd(FdWait::new(kind)?);
        Ok(Arc::new(Self::init(fabric, kind, imp)))
    }

    /// Opens a yield wait set. `Unspecified` resolves to
    /// [`WaitKind::Yield`].
    pub fn open_yield(fabric: &Arc<Fabric>, attr: &WaitAttr) -> Result<Arc<Self>> {
        attr::verify_wait_attr(attr, &[WaitKind::Yield])?;

        let imp = WaitImpl::Yield(YieldWait::new());
        Ok(Arc::new(Self::init(fabric, WaitKind::Yield, imp)))
    }

    /// Base state shared by both kinds. Attaches to `fabric`.
    fn init(fabric: &Arc<Fabric>, kind: WaitKind, imp: WaitImpl) -> Self {
        fabric.retain();

        let wait = Self {
            fid: FidId::next(),
            kind,
            refs: AtomicUsize::new(0),
            waiters: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            registry: Mutex::new(Registry::new()),
            pollset: PollSet::new(),
            fabric: Arc::downgrade(fabric),
            imp,
        };

        debug!(wait = %wait.fid, ?kind, fabric = %fabric.fid(), "wait set opened");
        wait
    }

    pub fn kind(&self) -> WaitKind {
        self.kind
    }

    pub fn fabric(&self) -> Option<Arc<Fabric>> {
        self.fabric.upgrade()
    }

    /// Records that another component registered this wait set.
    pub fn retain(&self) {
        self.refs.fetch_add(1, Ordering::AcqRel);
    }

    /// Drops a reference taken with [`retain`](Self::retain).
    pub fn release(&self) {
        let prev = self.refs.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "wait set reference count underflow");
    }

    pub fn ref_count(&self) -> usize {
        self.refs.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Current reference count of a registered fid.
    pub fn fid_refs(&self, fid: FidId) -> Option<usize> {
        self.registry.lock().fids.refs(fid)
    }

    /// Current reference count of a registered descriptor.
    pub fn fd_refs(&self, fd: RawFd) -> Option<usize> {
        self.registry.lock().fds.refs(fd)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::InvalidArgument);
        }
        Ok(())
    }

    /// Runs `f` with the registry locked and, for descriptor kinds, the
    /// multiplexer state borrowed.
    fn with_registry<R>(
        &self,
        f: impl FnOnce(&mut Registry, Option<&FdState>) -> Result<R>,
    ) -> Result<R> {
        self.ensure_open()?;

        match &self.imp {
            WaitImpl::Fd(fd) => {
                let state = fd.state.read();
                let state = state.as_ref().ok_or(Error::InvalidArgument)?;
                let mut registry = self.registry.lock();
                f(&mut registry, Some(state))
            }
            WaitImpl::Yield(_) => {
                let mut registry = self.registry.lock();
                f(&mut registry, None)
            }
        }
    }

    /// Registers `fid` with its readiness check.
    ///
    /// Registering the same fid again only bumps its count; `events` and
    /// `try_fn` of later registrations are ignored. On descriptor kinds
    /// the fid's wait descriptor is added to the multiplexer on first
    /// registration.
    pub fn add_fid(&self, fid: Arc<dyn Fid>, events: Events, try_fn: TryFn) -> Result<()> {
        let id = fid.fid();

        if !fid.class().is_waitable() || id == self.fid {
            warn!(wait = %self.fid, fid = %id, class = ?fid.class(), "fid cannot be waited on");
            return Err(Error::InvalidArgument);
        }

        self.with_registry(|registry, state| {
            if registry.fids.acquire(id) {
                debug!(wait = %self.fid, fid = %id, "fid already added to wait list");
                return Ok(());
            }

            registry.fids.reserve()?;

            let wait_fd = match state {
                Some(state) => {
                    let fd = fid.wait_fd().inspect_err(|e| {
                        warn!(wait = %self.fid, fid = %id, error = %e, "unable to get wait fd");
                    })?;

                    state.mux.add(fd, events, id.as_u64()).map_err(|e| {
                        warn!(wait = %self.fid, fid = %id, fd, error = %e, "unable to add fid to poller");
                        Error::Poller(e)
                    })?;

                    registry.change_index += 1;
                    Some(fd)
                }
                None => None,
            };

            fid.on_register();
            registry.fids.insert(FidEntry {
                fid,
                try_fn,
                wait_fd,
            });
            Ok(())
        })
    }

    /// Drops one registration of `fid`.
    ///
    /// The last registration also removes the descriptor resolved at
    /// registration from the multiplexer. If that fails the registration
    /// is kept.
    pub fn remove_fid(&self, fid: FidId) -> Result<()> {
        let wait = self.fid;

        self.with_registry(|registry, state| {
            let entry = match registry.fids.release(fid) {
                Ok(Release::Shared) => return Ok(()),
                Ok(Release::Last(entry)) => entry,
                Err(e) => {
                    info!(%wait, %fid, "fid not found in wait list");
                    return Err(e);
                }
            };

            if let (Some(state), Some(fd)) = (state, entry.wait_fd) {
                state.mux.del(fd).map_err(|e| {
                    warn!(%wait, %fid, fd, error = %e, "failed to delete fid from poller");
                    Error::Poller(e)
                })?;
                registry.change_index += 1;
            }

            if let Some(entry) = registry.fids.unlink(fid) {
                entry.fid.on_unregister();
            }
            Ok(())
        })
    }

    /// Registers a raw descriptor. Descriptor kinds only.
    ///
    /// `context` is what the multiplexer reports when `fd` fires;
    /// `u64::MAX` is reserved.
    pub fn add_fd(&self, fd: RawFd, events: Events, try_fn: TryFn, context: u64) -> Result<()> {
        if context == SIGNAL_TOKEN {
            return Err(Error::InvalidArgument);
        }

        self.with_registry(|registry, state| {
            let state = state.ok_or(Error::InvalidArgument)?;

            if registry.fds.acquire(fd) {
                debug!(wait = %self.fid, fd, "fd already added to wait list");
                return Ok(());
            }

            registry.fds.reserve()?;

            state.mux.add(fd, events, context).map_err(|e| {
                warn!(wait = %self.fid, fd, error = %e, "unable to add fd to poller");
                Error::Poller(e)
            })?;

            registry.fds.insert(FdEntry { fd, try_fn });
            registry.change_index += 1;
            Ok(())
        })
    }

    /// Drops one registration of a raw descriptor. Descriptor kinds only.
    pub fn remove_fd(&self, fd: RawFd) -> Result<()> {
        let wait = self.fid;

        self.with_registry(|registry, state| {
            let state = state.ok_or(Error::InvalidArgument)?;

            match registry.fds.release(fd) {
                Ok(Release::Shared) => return Ok(()),
                Ok(Release::Last(_)) => {}
                Err(e) => {
                    info!(%wait, fd, "fd not found in wait list");
                    return Err(e);
                }
            }

            state.mux.del(fd).map_err(|e| {
                warn!(%wait, fd, error = %e, "failed to delete fd from poller");
                Error::Poller(e)
            })?;

            registry.fds.unlink(fd);
            registry.change_index += 1;
            Ok(())
        })
    }

    /// Runs every registered callback, descriptors first, each list in
    /// registration order. Stops at the first `Ready` or error.
    pub(crate) fn try_all(&self) -> Result<Readiness> {
        let registry = self.registry.lock();

        for entry in registry.fds.iter() {
            if (entry.try_fn)()?.is_ready() {
                return Ok(Readiness::Ready);
            }
        }

        for entry in registry.fids.iter() {
            if (entry.try_fn)()?.is_ready() {
                return Ok(Readiness::Ready);
            }
        }

        Ok(Readiness::Idle)
    }

    fn poll_sources(&self) -> Readiness {
        if self.pollset.poll(1).is_empty() {
            Readiness::Idle
        } else {
            Readiness::Ready
        }
    }

    /// Non-blocking check of everything this set waits on.
    ///
    /// `Idle` means the caller may block in [`run`](Self::run) without
    /// missing work.
    pub fn try_wait(&self) -> Result<Readiness> {
        self.ensure_open()?;

        match &self.imp {
            WaitImpl::Fd(fd) => {
                let state = fd.state.read();
                let state = state.as_ref().ok_or(Error::InvalidArgument)?;
                self.fd_try(state)
            }
            WaitImpl::Yield(_) => match self.try_all()? {
                Readiness::Ready => Ok(Readiness::Ready),
                Readiness::Idle => Ok(self.poll_sources()),
            },
        }
    }

    /// Blocks until something is ready, the set is signaled, or
    /// `timeout_ms` elapses. A negative timeout waits forever.
    ///
    /// Yield wait sets ignore the timeout.
    pub fn run(&self, timeout_ms: i32) -> Result<()> {
        self.ensure_open()?;
        let _waiter = WaiterGuard::enter(&self.waiters);

        match &self.imp {
            WaitImpl::Fd(fd) => self.fd_run(fd, timeout_ms),
            WaitImpl::Yield(y) => self.yield_run(y),
        }
    }

    /// Wakes a thread blocked in [`run`](Self::run).
    pub fn signal(&self) {
        match &self.imp {
            WaitImpl::Fd(fd) => {
                if let Some(state) = fd.state.read().as_ref() {
                    state.signal.set();
                }
            }
            WaitImpl::Yield(y) => y.signal(),
        }
    }

    pub fn control(&self, command: Control<'_>) -> Result<()> {
        self.ensure_open()?;

        match command {
            Control::GetWaitObj(kind) => {
                *kind = self.kind;
                Ok(())
            }
            Control::GetWait(desc) => match &self.imp {
                WaitImpl::Fd(_) => self.fd_get_wait(desc),
                WaitImpl::Yield(_) => {
                    info!(wait = %self.fid, "yield wait set has no wait descriptor");
                    Err(Error::NoData)
                }
            },
        }
    }

    /// Closes the wait set.
    ///
    /// Fails with [`Error::Busy`] and changes nothing while other
    /// components hold references or a thread is inside `run`.
    pub fn close(&self) -> Result<()> {
        if self.ref_count() != 0 || self.waiters.load(Ordering::Acquire) != 0 {
            return Err(Error::Busy);
        }

        match &self.imp {
            WaitImpl::Fd(fd) => self.fd_close(fd),
            WaitImpl::Yield(_) => self.cleanup(),
        }
    }

    /// Shared tail of `close`: drops fid entries and the poll-set and
    /// detaches from the fabric.
    fn cleanup(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(Error::InvalidArgument);
        }

        let dropped = self.drain_fids();
        let sources = self.pollset.len();
        self.pollset.clear();

        if let Some(fabric) = self.fabric.upgrade() {
            fabric.release();
        }

        debug!(wait = %self.fid, fids = dropped, sources, "wait set closed");
        Ok(())
    }

    /// Drops every fid registration, releasing the registered objects.
    fn drain_fids(&self) -> usize {
        let entries: Vec<FidEntry> = self.registry.lock().fids.drain().collect();

        for entry in &entries {
            entry.fid.on_unregister();
        }
        entries.len()
    }
}

impl Fid for WaitSet {
    fn fid(&self) -> FidId {
        self.fid
    }

    fn class(&self) -> FidClass {
        FidClass::Wait
    }

    fn wait_fd(&self) -> Result<RawFd> {
        if self.kind != WaitKind::DescriptorNotify {
            return Err(Error::NoData);
        }

        let mut desc = WaitDescriptor::Fd(-1);
        self.control(Control::GetWait(&mut desc))?;

        match desc {
            WaitDescriptor::Fd(fd) => Ok(fd),
            WaitDescriptor::PollFd(_) => Err(Error::NoData),
        }
    }

    /// A wait set registered in another one stays open until removed.
    fn on_register(&self) {
        self.retain();
    }

    fn on_unregister(&self) {
        self.release();
    }
}

impl Drop for WaitSet {
    fn drop(&mut self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.drain_fids();
            if let Some(fabric) = self.fabric.upgrade() {
                fabric.release();
            }
        }
    }
}
