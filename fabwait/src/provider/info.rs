//! Discovery hints and the descriptor the provider answers with.

use super::caps::{
    Caps, INJECT_SIZE, MAX_MSG_SIZE, Mode, OpFlags, PROVIDER_CAPS, PROVIDER_MODE,
    PROVIDER_OP_FLAGS, tag_format,
};
use super::env::ProviderEnv;

use crate::error::{Error, Result};
use crate::fabric::FabricAttr;

use bitflags::bitflags;
use tracing::debug;

/// Prefix every fabric, provider and domain name must carry.
pub const NAME_PREFIX: &str = "psm";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EpType {
    #[default]
    Unspecified,
    Msg,
    Datagram,
    ReliableDatagram,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Protocol {
    #[default]
    Unspecified,
    Psm,
    Iwarp,
    InfiniBand,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Threading {
    #[default]
    Unspecified,
    Safe,
    Fid,
    Domain,
    Completion,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Progress {
    #[default]
    Unspecified,
    Auto,
    Manual,
}

bitflags! {
    /// Ordering guarantees between operations.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Order: u64 {
        /// Send after send.
        const SAS = 1 << 0;
        /// Read after write.
        const RAW = 1 << 1;
        /// Write after read.
        const WAR = 1 << 2;
        /// Write after write.
        const WAW = 1 << 3;
    }
}

bitflags! {
    /// Flags of [`Provider::getinfo`](super::Provider::getinfo).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct GetInfoFlags: u64 {
        /// The node names the local side, not a destination.
        const SOURCE = 1 << 0;
    }
}

/// Transport endpoint address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EpAddr(pub u64);

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EpAttr {
    pub protocol: Protocol,
    pub max_msg_size: u64,
    pub inject_size: u64,
    pub total_buffered_recv: u64,
    pub mem_tag_format: u64,
    pub msg_order: Order,
    pub comp_order: Order,
    pub tx_ctx_cnt: usize,
    pub rx_ctx_cnt: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TxAttr {
    pub caps: Caps,
    pub mode: Mode,
    pub op_flags: OpFlags,
    pub msg_order: Order,
    pub comp_order: Order,
    pub inject_size: u64,
    pub size: u64,
    pub iov_limit: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RxAttr {
    pub caps: Caps,
    pub mode: Mode,
    pub op_flags: OpFlags,
    pub msg_order: Order,
    pub comp_order: Order,
    pub total_buffered_recv: u64,
    pub size: u64,
    pub iov_limit: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DomainAttr {
    pub name: Option<String>,
    pub threading: Threading,
    pub control_progress: Progress,
    pub data_progress: Progress,
}

/// Constraints a caller puts on discovery. Unset fields do not constrain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Hints {
    pub ep_type: EpType,
    pub caps: Caps,
    pub mode: Mode,
    pub ep_attr: Option<EpAttr>,
    pub tx_attr: Option<TxAttr>,
    pub rx_attr: Option<RxAttr>,
    pub fabric_attr: Option<FabricAttr>,
    pub domain_attr: Option<DomainAttr>,
}

/// What the provider offers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Info {
    pub ep_type: EpType,
    pub caps: Caps,
    pub mode: Mode,
    pub src_addr: Option<EpAddr>,
    pub dest_addr: Option<EpAddr>,
    pub dest_addrlen: usize,
    pub ep_attr: EpAttr,
    pub tx_attr: TxAttr,
    pub rx_attr: RxAttr,
    pub domain_attr: DomainAttr,
    pub fabric_attr: FabricAttr,
}

/// Logs the rejected hint when the provider's debug toggle is on, then
/// fails the discovery with [`Error::NoData`].
macro_rules! reject {
    ($env:expr, $($arg:tt)+) => {{
        if $env.debug {
            debug!($($arg)+);
        }
        return Err(Error::NoData);
    }};
}

fn has_prefix(name: &str) -> bool {
    name.starts_with(NAME_PREFIX)
}

/// Checks `hints` against what the provider supports.
pub(crate) fn check_hints(hints: &Hints, env: &ProviderEnv) -> Result<()> {
    if !matches!(hints.ep_type, EpType::Unspecified | EpType::ReliableDatagram) {
        reject!(env, ep_type = ?hints.ep_type, "unsupported endpoint type");
    }

    if let Some(ep) = &hints.ep_attr {
        if !matches!(ep.protocol, Protocol::Unspecified | Protocol::Psm) {
            reject!(env, protocol = ?ep.protocol, "unsupported protocol");
        }

        if ep.tx_ctx_cnt > 1 {
            reject!(env, tx_ctx_cnt = ep.tx_ctx_cnt, "at most one tx context supported");
        }

        if ep.rx_ctx_cnt > 1 {
            reject!(env, rx_ctx_cnt = ep.rx_ctx_cnt, "at most one rx context supported");
        }
    }

    if !PROVIDER_CAPS.contains(hints.caps) {
        reject!(env, caps = ?hints.caps, supported = ?PROVIDER_CAPS, "unsupported caps");
    }

    if let Some(tx) = &hints.tx_attr {
        if !PROVIDER_OP_FLAGS.contains(tx.op_flags) {
            reject!(env, op_flags = ?tx.op_flags, "unsupported tx op flags");
        }
    }

    if let Some(rx) = &hints.rx_attr {
        if !PROVIDER_OP_FLAGS.contains(rx.op_flags) {
            reject!(env, op_flags = ?rx.op_flags, "unsupported rx op flags");
        }
    }

    if !hints.mode.contains(PROVIDER_MODE) {
        reject!(env, mode = ?hints.mode, required = ?PROVIDER_MODE, "required mode bits missing");
    }

    if let Some(fabric) = &hints.fabric_attr {
        if !fabric.name.is_empty() && !has_prefix(&fabric.name) {
            reject!(env, name = %fabric.name, "unsupported fabric name");
        }

        if let Some(prov) = fabric.prov_name.as_deref().filter(|p| !has_prefix(p)) {
            reject!(env, prov_name = %prov, "unsupported provider name");
        }
    }

    if let Some(name) = hints
        .domain_attr
        .as_ref()
        .and_then(|d| d.name.as_deref())
        .filter(|n| !has_prefix(n))
    {
        reject!(env, name = %name, "unsupported domain name");
    }

    if let Some(ep) = &hints.ep_attr {
        if ep.max_msg_size > MAX_MSG_SIZE {
            reject!(env, max_msg_size = ep.max_msg_size, supported = MAX_MSG_SIZE, "message size too large");
        }

        if ep.inject_size > INJECT_SIZE {
            reject!(env, inject_size = ep.inject_size, supported = INJECT_SIZE, "inject size too large");
        }
    }

    Ok(())
}

impl Info {
    /// Builds the provider's answer for the granted `caps` and usable
    /// tag mask.
    pub(crate) fn new(caps: Caps, max_tag: u64, hints: Option<&Hints>, dest_addr: Option<EpAddr>) -> Self {
        let ep_attr = EpAttr {
            protocol: Protocol::Psm,
            max_msg_size: MAX_MSG_SIZE,
            inject_size: INJECT_SIZE,
            total_buffered_recv: u64::MAX,
            mem_tag_format: tag_format(max_tag),
            msg_order: Order::SAS,
            comp_order: Order::empty(),
            tx_ctx_cnt: 1,
            rx_ctx_cnt: 1,
        };

        let tx_op_flags = hints
            .and_then(|h| h.tx_attr.as_ref())
            .map(|tx| tx.op_flags)
            .unwrap_or_default();

        let rx_op_flags = hints
            .and_then(|h| h.rx_attr.as_ref())
            .map(|rx| rx.op_flags)
            .unwrap_or_default();

        let tx_attr = TxAttr {
            caps,
            mode: PROVIDER_MODE,
            op_flags: tx_op_flags,
            msg_order: ep_attr.msg_order,
            comp_order: ep_attr.comp_order,
            inject_size: ep_attr.inject_size,
            size: u64::MAX,
            iov_limit: 1,
        };

        let rx_attr = RxAttr {
            caps,
            mode: PROVIDER_MODE,
            op_flags: rx_op_flags,
            msg_order: ep_attr.msg_order,
            comp_order: ep_attr.comp_order,
            total_buffered_recv: ep_attr.total_buffered_recv,
            size: u64::MAX,
            iov_limit: 1,
        };

        Self {
            ep_type: EpType::ReliableDatagram,
            caps,
            mode: PROVIDER_MODE,
            src_addr: None,
            dest_addr,
            dest_addrlen: size_of::<EpAddr>(),
            ep_attr,
            tx_attr,
            rx_attr,
            domain_attr: DomainAttr {
                name: Some(NAME_PREFIX.to_string()),
                threading: Threading::Completion,
                control_progress: Progress::Manual,
                data_progress: Progress::Manual,
            },
            fabric_attr: FabricAttr::new(NAME_PREFIX),
        }
    }
}
