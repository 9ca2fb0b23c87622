use crate::error::{Error, Result};

use tracing::warn;

/// Blocking strategy of a wait set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum WaitKind {
    /// Let the opener choose. Never the kind of an open wait set.
    #[default]
    Unspecified,
    /// Kernel notification queue (`epoll`) with one native descriptor.
    DescriptorNotify,
    /// Descriptor array handed to `poll(2)`.
    DescriptorPoll,
    MutexCond,
    /// Spin-and-yield, no kernel blocking.
    Yield,
}

/// Attributes requested when opening a wait set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WaitAttr {
    pub kind: WaitKind,
    /// Reserved; must be zero.
    pub flags: u64,
}

impl WaitAttr {
    pub fn new(kind: WaitKind) -> Self {
        Self { kind, flags: 0 }
    }
}

/// Validates a requested wait kind and flags.
pub fn check_wait_attr(attr: &WaitAttr) -> Result<()> {
    if attr.flags != 0 {
        warn!(flags = attr.flags, "invalid wait flags");
        return Err(Error::InvalidArgument);
    }

    Ok(())
}

/// Verifies `attr` for an opener that supports only `supported` kinds.
pub(crate) fn verify_wait_attr(attr: &WaitAttr, supported: &[WaitKind]) -> Result<()> {
    check_wait_attr(attr)?;

    if attr.kind != WaitKind::Unspecified && !supported.contains(&attr.kind) {
        warn!(kind = ?attr.kind, "unsupported wait object");
        return Err(Error::InvalidArgument);
    }

    Ok(())
}
