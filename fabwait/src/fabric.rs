//! Fabrics own wait sets and fan trywait out over completion objects.

use crate::error::{Error, Result};
use crate::fid::{Fid, FidClass, FidId, Readiness};
use crate::queue::{CompletionQueue, Counter, EventQueue};
use crate::wait::{WaitAttr, WaitSet};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tracing::debug;

/// Attributes of a fabric to open.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FabricAttr {
    pub name: String,
    pub prov_name: Option<String>,
}

impl FabricAttr {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            prov_name: None,
        }
    }
}

/// Top-level transport domain handle.
///
/// Every open wait set holds one reference; the fabric cannot be closed
/// while any remain.
pub struct Fabric {
    fid: FidId,
    name: String,
    refs: AtomicUsize,
    closed: AtomicBool,
}

impl Fabric {
    pub fn open(attr: &FabricAttr) -> Arc<Self> {
        let fabric = Arc::new(Self {
            fid: FidId::next(),
            name: attr.name.clone(),
            refs: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        });

        debug!(fabric = %fabric.fid, name = %fabric.name, "fabric opened");
        fabric
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ref_count(&self) -> usize {
        self.refs.load(Ordering::Acquire)
    }

    pub(crate) fn retain(&self) {
        self.refs.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn release(&self) {
        let prev = self.refs.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "fabric reference count underflow");
    }

    /// Opens a wait set on this fabric.
    pub fn wait_open(self: &Arc<Self>, attr: &WaitAttr) -> Result<Arc<WaitSet>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::InvalidArgument);
        }

        WaitSet::open(self, attr)
    }

    /// Checks each object's wait set in turn without blocking.
    ///
    /// Returns `Idle` only if every object is idle; the first `Ready` or
    /// error ends the scan.
    pub fn try_wait(&self, fids: &[FidRef<'_>]) -> Result<Readiness> {
        for fid in fids {
            if fid.try_ready()?.is_ready() {
                return Ok(Readiness::Ready);
            }
        }

        Ok(Readiness::Idle)
    }

    pub fn close(&self) -> Result<()> {
        if self.ref_count() != 0 {
            return Err(Error::Busy);
        }

        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(Error::InvalidArgument);
        }

        debug!(fabric = %self.fid, "fabric closed");
        Ok(())
    }
}

impl Fid for Fabric {
    fn fid(&self) -> FidId {
        self.fid
    }

    fn class(&self) -> FidClass {
        FidClass::Fabric
    }
}

/// An object [`Fabric::try_wait`] can check.
#[derive(Clone, Copy)]
pub enum FidRef<'a> {
    Cq(&'a CompletionQueue),
    Eq(&'a EventQueue),
    Cntr(&'a Counter),
    Wait(&'a WaitSet),
}

impl FidRef<'_> {
    pub fn class(&self) -> FidClass {
        match self {
            Self::Cq(_) => FidClass::Cq,
            Self::Eq(_) => FidClass::Eq,
            Self::Cntr(_) => FidClass::Cntr,
            Self::Wait(_) => FidClass::Wait,
        }
    }

    /// Runs the try step of the wait set behind this object.
    ///
    /// Objects opened without a wait set cannot be waited on.
    pub fn try_ready(&self) -> Result<Readiness> {
        let wait = match self {
            Self::Cq(cq) => cq.wait(),
            Self::Eq(eq) => eq.wait(),
            Self::Cntr(cntr) => cntr.wait(),
            Self::Wait(wait) => return wait.try_wait(),
        };

        wait.ok_or(Error::InvalidArgument)?.try_wait()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wait::WaitKind;

    #[test]
    fn test_closed_fabric_refuses_wait_sets() {
        let fabric = Fabric::open(&FabricAttr::new("psm"));
        fabric.close().expect("close");

        assert!(matches!(fabric.close(), Err(Error::InvalidArgument)));
        assert!(matches!(
            fabric.wait_open(&WaitAttr::new(WaitKind::Yield)),
            Err(Error::InvalidArgument)
        ));
    }

    #[test]
    fn test_wait_sets_hold_fabric_reference() {
        let fabric = Fabric::open(&FabricAttr::new("psm"));
        let a = fabric.wait_open(&WaitAttr::new(WaitKind::Yield)).expect("open a");
        let b = fabric.wait_open(&WaitAttr::new(WaitKind::Yield)).expect("open b");
        assert_eq!(fabric.ref_count(), 2);

        a.close().expect("close a");
        assert!(matches!(fabric.close(), Err(Error::Busy)));

        drop(b);
        assert_eq!(fabric.ref_count(), 0);
        fabric.close().expect("close fabric");
    }
}
