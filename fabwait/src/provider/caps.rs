//! Capability, operation-flag and mode bits, and the provider's limits.

use bitflags::bitflags;

bitflags! {
    /// Endpoint capabilities.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Caps: u64 {
        const MSG          = 1 << 1;
        const RMA          = 1 << 2;
        const TAGGED       = 1 << 3;
        const ATOMIC       = 1 << 4;
        const MULTI_RECV   = 1 << 5;
        const READ         = 1 << 8;
        const WRITE        = 1 << 9;
        const RECV         = 1 << 10;
        const SEND         = 1 << 11;
        const REMOTE_READ  = 1 << 12;
        const REMOTE_WRITE = 1 << 13;
    }
}

bitflags! {
    /// Default flags of data-transfer operations.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct OpFlags: u64 {
        const INJECT     = 1 << 0;
        const MULTI_RECV = 1 << 1;
        const COMPLETION = 1 << 2;
    }
}

bitflags! {
    /// Obligations the application accepts.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Mode: u64 {
        /// Every operation carries a provider-owned context.
        const CONTEXT = 1 << 0;
    }
}

/// Everything the provider can do.
pub const PROVIDER_CAPS: Caps = Caps::all();

pub const PROVIDER_OP_FLAGS: OpFlags = OpFlags::all();

/// Mode bits every application must accept.
pub const PROVIDER_MODE: Mode = Mode::CONTEXT;

pub const MAX_MSG_SIZE: u64 = u32::MAX as u64;

pub const INJECT_SIZE: u64 = 64;

/// Tag bit withheld for untagged message support.
pub const MSG_BIT: u64 = 1 << 63;

/// Tag bit withheld for tagged RMA acceleration.
pub const RMA_BIT: u64 = 1 << 62;

/// Alternating bit pattern describing generic tag fields.
pub const TAG_GENERIC: u64 = 0xAAAA_AAAA_AAAA_AAAA;

/// Largest tag value describable by `format`: every bit up to its
/// highest set bit.
pub fn tag_bits(format: u64) -> u64 {
    if format == 0 {
        return 0;
    }

    u64::MAX >> format.leading_zeros()
}

/// Tag format advertised for tags within `max_tag`.
pub fn tag_format(max_tag: u64) -> u64 {
    TAG_GENERIC & max_tag
}
