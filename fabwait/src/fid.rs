//! Fabric identifiers and the readiness vocabulary shared by every
//! waitable object.

use crate::error::{Error, Result};

use std::fmt;
use std::os::fd::RawFd;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Next identifier handed out by [`FidId::next`].
static NEXT_FID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a fabric resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FidId(u64);

impl FidId {
    pub(crate) fn next() -> Self {
        Self(NEXT_FID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for FidId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fid#{}", self.0)
    }
}

/// Class tag of a fabric resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FidClass {
    Fabric,
    Wait,
    Cq,
    Eq,
    Cntr,
}

impl FidClass {
    /// Whether objects of this class can be registered into a wait set.
    pub fn is_waitable(self) -> bool {
        matches!(self, Self::Wait | Self::Cq | Self::Eq | Self::Cntr)
    }
}

/// Outcome of a non-blocking readiness check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// Nothing pending; it is safe to block.
    Idle,
    /// Something is pending; the caller must not block.
    Ready,
}

impl Readiness {
    pub fn is_ready(self) -> bool {
        self == Self::Ready
    }
}

/// Readiness check registered alongside a fid or descriptor.
///
/// An `Err` aborts the poll pass and is handed to the caller unchanged.
pub type TryFn = Arc<dyn Fn() -> Result<Readiness> + Send + Sync>;

/// A fabric resource that can be registered into a wait set.
pub trait Fid: Send + Sync {
    fn fid(&self) -> FidId;

    fn class(&self) -> FidClass;

    /// Descriptor that becomes readable when this object has work.
    ///
    /// Objects without one report [`Error::NoData`].
    fn wait_fd(&self) -> Result<RawFd> {
        Err(Error::NoData)
    }

    /// Called once when a wait set first registers this object. Objects
    /// that must not close while registered count it here.
    fn on_register(&self) {}

    /// Undoes [`on_register`](Fid::on_register) when the last
    /// registration goes away.
    fn on_unregister(&self) {}
}
