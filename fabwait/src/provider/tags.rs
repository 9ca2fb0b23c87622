//! Tag-bit reservation.
//!
//! Untagged messages and tagged RMA are carried over the transport's
//! tagged path. Each needs one high bit of the tag space to tell its
//! traffic apart, which is then hidden from the caller's tag range.

use super::caps::{Caps, MSG_BIT, PROVIDER_CAPS, RMA_BIT};
use super::env::ProviderEnv;

use crate::error::{Error, Result};

use tracing::debug;

/// Reserves the tag bits needed by the requested capabilities.
///
/// `caps` empty means best-effort: every provider capability is
/// considered and those that cannot get their bit are dropped. Otherwise
/// a capability whose bit falls inside `max_tag` fails the call with
/// [`Error::NotSupported`]. A `max_tag` of zero places no bound.
///
/// Returns the capabilities granted and the usable tag mask.
pub fn reserve_tag_bits(caps: Caps, max_tag: u64, env: &ProviderEnv) -> Result<(Caps, u64)> {
    let best_effort = caps.is_empty();
    let mut granted = if best_effort { PROVIDER_CAPS } else { caps };
    let mut reserved = 0u64;

    if granted.contains(Caps::MSG) && !env.am_msg {
        if max_tag < MSG_BIT {
            reserved |= MSG_BIT;
        } else if best_effort {
            debug!(max_tag, "no tag bit for untagged messages, dropping MSG; set FI_PSM_AM_MSG=1 to keep it");
            granted.remove(Caps::MSG);
        } else {
            debug!(
                max_tag,
                "no tag bit for untagged messages; lower max_tag, drop MSG or set FI_PSM_AM_MSG=1"
            );
            return Err(Error::NotSupported);
        }
    }

    if granted.contains(Caps::RMA) && env.tagged_rma {
        if max_tag < RMA_BIT {
            reserved |= RMA_BIT;
        } else if best_effort {
            debug!(max_tag, "no tag bit for tagged RMA, dropping RMA; set FI_PSM_TAGGED_RMA=0 to keep it");
            granted.remove(Caps::RMA);
        } else {
            debug!(
                max_tag,
                "no tag bit for tagged RMA; lower max_tag, drop RMA or set FI_PSM_TAGGED_RMA=0"
            );
            return Err(Error::NotSupported);
        }
    }

    reserved |= reserved << 1;

    Ok((granted, !reserved))
}
