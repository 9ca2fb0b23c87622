//! Completion queues, event queues and counters.
//!
//! These are the sources a wait set is normally used for. Each can be
//! opened with a wait set, which binds it: the wait set gains a
//! reference, the object joins the wait set's poll-set, and every post
//! signals the wait set. Closing or dropping the object unbinds it.

use crate::error::{Error, Result};
use crate::fid::{Fid, FidClass, FidId};
use crate::pollset::Pollable;
use crate::wait::WaitSet;

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::debug;

/// A live attachment of one source to one wait set.
struct WaitBinding {
    wait: Arc<WaitSet>,
    fid: FidId,
}

impl WaitBinding {
    fn attach(wait: &Arc<WaitSet>, source: Weak<dyn Pollable>, fid: FidId) -> Result<Self> {
        if wait.is_closed() {
            return Err(Error::InvalidArgument);
        }

        wait.pollset.add(fid, source, fid.as_u64())?;
        wait.retain();

        debug!(%fid, wait = %wait.fid(), "bound to wait set");
        Ok(Self {
            wait: Arc::clone(wait),
            fid,
        })
    }
}

impl Drop for WaitBinding {
    fn drop(&mut self) {
        if let Err(e) = self.wait.pollset.del(self.fid) {
            debug!(fid = %self.fid, error = %e, "source already gone from poll-set");
        }
        self.wait.release();
    }
}

/// Optional binding slot shared by every source type.
struct Binding {
    slot: Mutex<Option<WaitBinding>>,
}

impl Binding {
    fn new() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }

    /// Binds `source` to `wait`, if one was given.
    fn attach<S>(&self, source: &Arc<S>, fid: FidId, wait: Option<&Arc<WaitSet>>) -> Result<()>
    where
        S: Pollable + 'static,
    {
        let Some(wait) = wait else {
            return Ok(());
        };

        let weak = Arc::downgrade(source) as Weak<dyn Pollable>;
        *self.slot.lock() = Some(WaitBinding::attach(wait, weak, fid)?);
        Ok(())
    }

    fn wait(&self) -> Option<Arc<WaitSet>> {
        self.slot.lock().as_ref().map(|b| Arc::clone(&b.wait))
    }

    fn signal(&self) {
        if let Some(wait) = self.wait() {
            wait.signal();
        }
    }

    fn wait_fd(&self) -> Result<RawFd> {
        self.wait().ok_or(Error::NoData)?.wait_fd()
    }

    fn detach(&self) -> Option<WaitBinding> {
        self.slot.lock().take()
    }
}

/// Queue of completed operation contexts.
pub struct CompletionQueue {
    fid: FidId,
    entries: Mutex<VecDeque<u64>>,
    binding: Binding,
}

impl CompletionQueue {
    pub fn open(wait: Option<&Arc<WaitSet>>) -> Result<Arc<Self>> {
        let cq = Arc::new(Self {
            fid: FidId::next(),
            entries: Mutex::new(VecDeque::new()),
            binding: Binding::new(),
        });

        cq.binding.attach(&cq, cq.fid, wait)?;
        Ok(cq)
    }

    /// Appends a completion and wakes the bound wait set.
    pub fn post(&self, context: u64) -> Result<()> {
        {
            let mut entries = self.entries.lock();
            entries.try_reserve(1).map_err(Error::from_alloc)?;
            entries.push_back(context);
        }

        self.binding.signal();
        Ok(())
    }

    pub fn read(&self) -> Option<u64> {
        self.entries.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// The wait set this queue is bound to.
    pub fn wait(&self) -> Option<Arc<WaitSet>> {
        self.binding.wait()
    }

    /// Unbinds from the wait set. Pending entries stay readable.
    pub fn close(&self) {
        drop(self.binding.detach());
    }
}

impl Pollable for CompletionQueue {
    fn fid(&self) -> FidId {
        self.fid
    }

    fn has_events(&self) -> bool {
        !self.is_empty()
    }
}

impl Fid for CompletionQueue {
    fn fid(&self) -> FidId {
        self.fid
    }

    fn class(&self) -> FidClass {
        FidClass::Cq
    }

    fn wait_fd(&self) -> Result<RawFd> {
        self.binding.wait_fd()
    }
}

/// Entry of an [`EventQueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EqEvent {
    pub event: u32,
    pub context: u64,
}

/// Queue of control-path events.
pub struct EventQueue {
    fid: FidId,
    events: Mutex<VecDeque<EqEvent>>,
    binding: Binding,
}

impl EventQueue {
    pub fn open(wait: Option<&Arc<WaitSet>>) -> Result<Arc<Self>> {
        let eq = Arc::new(Self {
            fid: FidId::next(),
            events: Mutex::new(VecDeque::new()),
            binding: Binding::new(),
        });

        eq.binding.attach(&eq, eq.fid, wait)?;
        Ok(eq)
    }

    pub fn write(&self, event: EqEvent) -> Result<()> {
        {
            let mut events = self.events.lock();
            events.try_reserve(1).map_err(Error::from_alloc)?;
            events.push_back(event);
        }

        self.binding.signal();
        Ok(())
    }

    pub fn read(&self) -> Option<EqEvent> {
        self.events.lock().pop_front()
    }

    pub fn wait(&self) -> Option<Arc<WaitSet>> {
        self.binding.wait()
    }

    pub fn close(&self) {
        drop(self.binding.detach());
    }
}

impl Pollable for EventQueue {
    fn fid(&self) -> FidId {
        self.fid
    }

    fn has_events(&self) -> bool {
        !self.events.lock().is_empty()
    }
}

impl Fid for EventQueue {
    fn fid(&self) -> FidId {
        self.fid
    }

    fn class(&self) -> FidClass {
        FidClass::Eq
    }

    fn wait_fd(&self) -> Result<RawFd> {
        self.binding.wait_fd()
    }
}

/// Completion counter. Has events while its value moved past the last
/// [`read`](Counter::read).
pub struct Counter {
    fid: FidId,
    value: AtomicU64,
    checked: AtomicU64,
    binding: Binding,
}

impl Counter {
    pub fn open(wait: Option<&Arc<WaitSet>>) -> Result<Arc<Self>> {
        let cntr = Arc::new(Self {
            fid: FidId::next(),
            value: AtomicU64::new(0),
            checked: AtomicU64::new(0),
            binding: Binding::new(),
        });

        cntr.binding.attach(&cntr, cntr.fid, wait)?;
        Ok(cntr)
    }

    pub fn add(&self, n: u64) {
        self.value.fetch_add(n, Ordering::AcqRel);
        self.binding.signal();
    }

    /// Current value. Marks it as seen.
    pub fn read(&self) -> u64 {
        let value = self.value.load(Ordering::Acquire);
        self.checked.store(value, Ordering::Release);
        value
    }

    pub fn wait(&self) -> Option<Arc<WaitSet>> {
        self.binding.wait()
    }

    pub fn close(&self) {
        drop(self.binding.detach());
    }
}

impl Pollable for Counter {
    fn fid(&self) -> FidId {
        self.fid
    }

    fn has_events(&self) -> bool {
        self.value.load(Ordering::Acquire) != self.checked.load(Ordering::Acquire)
    }
}

impl Fid for Counter {
    fn fid(&self) -> FidId {
        self.fid
    }

    fn class(&self) -> FidClass {
        FidClass::Cntr
    }

    fn wait_fd(&self) -> Result<RawFd> {
        self.binding.wait_fd()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fabric::{Fabric, FabricAttr};
    use crate::fid::Readiness;
    use crate::wait::{WaitAttr, WaitKind};

    fn yield_wait() -> (Arc<Fabric>, Arc<WaitSet>) {
        let fabric = Fabric::open(&FabricAttr::new("psm"));
        let wait = fabric
            .wait_open(&WaitAttr::new(WaitKind::Yield))
            .expect("open wait set");
        (fabric, wait)
    }

    #[test]
    fn test_binding_holds_wait_reference() {
        let (_fabric, wait) = yield_wait();

        let cq = CompletionQueue::open(Some(&wait)).expect("open cq");
        assert_eq!(wait.ref_count(), 1);
        assert!(matches!(wait.close(), Err(Error::Busy)));

        cq.close();
        assert_eq!(wait.ref_count(), 0);
        assert!(cq.wait().is_none());
        wait.close().expect("close wait set");
    }

    #[test]
    fn test_drop_unbinds() {
        let (_fabric, wait) = yield_wait();

        let cntr = Counter::open(Some(&wait)).expect("open counter");
        assert_eq!(wait.ref_count(), 1);

        drop(cntr);
        assert_eq!(wait.ref_count(), 0);
    }

    #[test]
    fn test_posted_completion_makes_wait_ready() {
        let (_fabric, wait) = yield_wait();
        let cq = CompletionQueue::open(Some(&wait)).expect("open cq");

        assert_eq!(wait.try_wait().expect("try"), Readiness::Idle);

        cq.post(7).expect("post");
        assert_eq!(wait.try_wait().expect("try"), Readiness::Ready);

        assert_eq!(cq.read(), Some(7));
        assert_eq!(wait.try_wait().expect("try"), Readiness::Idle);
    }

    #[test]
    fn test_counter_events_until_read() {
        let cntr = Counter::open(None).expect("open counter");
        assert!(!cntr.has_events());

        cntr.add(3);
        assert!(cntr.has_events());
        assert_eq!(cntr.read(), 3);
        assert!(!cntr.has_events());
    }

    #[test]
    fn test_unbound_has_no_wait_fd() {
        let eq = EventQueue::open(None).expect("open eq");
        assert!(matches!(eq.wait_fd(), Err(Error::NoData)));
        assert_eq!(eq.class(), FidClass::Eq);
    }

    #[test]
    fn test_bind_to_closed_wait_fails() {
        let (_fabric, wait) = yield_wait();
        wait.close().expect("close");

        assert!(matches!(
            EventQueue::open(Some(&wait)),
            Err(Error::InvalidArgument)
        ));
    }
}
