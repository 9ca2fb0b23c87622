//! Ordered, reference-counted registries of a wait set.
//!
//! Insertion order is poll order. A key is present at most once; adding
//! it again only bumps its count. The caller holds the wait set's lock
//! across lookup, multiplexer update and insert/unlink, so the registry
//! and the multiplexer never disagree.

use crate::error::{Error, Result};
use crate::fid::{Fid, FidId, TryFn};

use std::os::fd::RawFd;
use std::sync::Arc;

pub(crate) trait Keyed {
    type Key: PartialEq + Copy;

    fn key(&self) -> Self::Key;
}

pub(crate) struct FidEntry {
    pub(crate) fid: Arc<dyn Fid>,
    pub(crate) try_fn: TryFn,
    /// Descriptor given to the multiplexer, descriptor kinds only.
    pub(crate) wait_fd: Option<RawFd>,
}

impl Keyed for FidEntry {
    type Key = FidId;

    fn key(&self) -> FidId {
        self.fid.fid()
    }
}

pub(crate) struct FdEntry {
    pub(crate) fd: RawFd,
    pub(crate) try_fn: TryFn,
}

impl Keyed for FdEntry {
    type Key = RawFd;

    fn key(&self) -> RawFd {
        self.fd
    }
}

struct Slot<E> {
    entry: E,
    refs: usize,
}

/// Result of dropping one reference.
pub(crate) enum Release<'a, E> {
    /// Other holders remain; nothing else to do.
    Shared,
    /// This was the last reference. The entry stays linked until the
    /// caller commits with [`RefList::unlink`].
    Last(&'a E),
}

pub(crate) struct RefList<E> {
    slots: Vec<Slot<E>>,
}

impl<E: Keyed> RefList<E> {
    pub(crate) fn new() -> Self {
        Self { slots: Vec::new() }
    }

    fn position(&self, key: E::Key) -> Option<usize> {
        self.slots.iter().position(|s| s.entry.key() == key)
    }

    /// Bumps the count of an existing entry. Returns `false` if absent.
    pub(crate) fn acquire(&mut self, key: E::Key) -> bool {
        match self.position(key) {
            Some(i) => {
                self.slots[i].refs += 1;
                true
            }
            None => false,
        }
    }

    /// Makes room for one more entry before any OS resource is touched.
    pub(crate) fn reserve(&mut self) -> Result<()> {
        self.slots.try_reserve(1).map_err(Error::from_alloc)
    }

    /// Appends a new entry with a count of one.
    pub(crate) fn insert(&mut self, entry: E) {
        self.slots.push(Slot { entry, refs: 1 });
    }

    pub(crate) fn release(&mut self, key: E::Key) -> Result<Release<'_, E>> {
        let i = self.position(key).ok_or(Error::InvalidArgument)?;
        let slot = &mut self.slots[i];

        if slot.refs > 1 {
            slot.refs -= 1;
            return Ok(Release::Shared);
        }

        Ok(Release::Last(&self.slots[i].entry))
    }

    pub(crate) fn unlink(&mut self, key: E::Key) -> Option<E> {
        let i = self.position(key)?;
        Some(self.slots.remove(i).entry)
    }

    pub(crate) fn refs(&self, key: E::Key) -> Option<usize> {
        self.position(key).map(|i| self.slots[i].refs)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &E> {
        self.slots.iter().map(|s| &s.entry)
    }

    pub(crate) fn drain(&mut self) -> impl Iterator<Item = E> + '_ {
        self.slots.drain(..).map(|s| s.entry)
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }
}

/// Everything guarded by the wait set's lock.
pub(crate) struct Registry {
    pub(crate) fids: RefList<FidEntry>,
    pub(crate) fds: RefList<FdEntry>,
    /// Bumped whenever the multiplexer's descriptor set changes.
    pub(crate) change_index: u64,
}

impl Registry {
    pub(crate) fn new() -> Self {
        Self {
            fids: RefList::new(),
            fds: RefList::new(),
            change_index: 0,
        }
    }
}
