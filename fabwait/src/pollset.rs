//! Poll-set of completion sources owned by every wait set.
//!
//! Queues and counters bound to a wait set are added here rather than to
//! the fid registry: they have no descriptor of their own, so the wait
//! set checks them directly after running its registered callbacks.
//!
//! Sources are held weakly; the source owns the binding, not the set.

use crate::error::{Error, Result};
use crate::fid::FidId;

use parking_lot::Mutex;
use std::sync::Weak;

/// A completion source that can report pending events without blocking.
pub trait Pollable: Send + Sync {
    fn fid(&self) -> FidId;

    fn has_events(&self) -> bool;
}

struct PollEntry {
    fid: FidId,
    source: Weak<dyn Pollable>,
    context: u64,
}

pub(crate) struct PollSet {
    entries: Mutex<Vec<PollEntry>>,
}

impl PollSet {
    pub(crate) fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn add(&self, fid: FidId, source: Weak<dyn Pollable>, context: u64) -> Result<()> {
        let mut entries = self.entries.lock();

        if entries.iter().any(|e| e.fid == fid) {
            return Err(Error::InvalidArgument);
        }

        entries.try_reserve(1).map_err(Error::from_alloc)?;
        entries.push(PollEntry {
            fid,
            source,
            context,
        });
        Ok(())
    }

    pub(crate) fn del(&self, fid: FidId) -> Result<()> {
        let mut entries = self.entries.lock();

        let index = entries
            .iter()
            .position(|e| e.fid == fid)
            .ok_or(Error::InvalidArgument)?;

        entries.remove(index);
        Ok(())
    }

    /// Contexts of up to `max` sources with pending events, in the order
    /// the sources were added.
    pub(crate) fn poll(&self, max: usize) -> Vec<u64> {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.source.upgrade().is_some_and(|s| s.has_events()))
            .take(max)
            .map(|e| e.context)
            .collect()
    }

    pub(crate) fn clear(&self) {
        self.entries.lock().clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }
}
