//! PSM provider: library lifecycle, discovery and fabric open.
//!
//! The transport library itself is reached through [`Transport`]; this
//! module only decides what the provider offers on top of it.

mod caps;
mod env;
mod info;
mod tags;

pub use caps::{
    Caps, INJECT_SIZE, MAX_MSG_SIZE, MSG_BIT, Mode, OpFlags, PROVIDER_CAPS, PROVIDER_MODE,
    PROVIDER_OP_FLAGS, RMA_BIT, TAG_GENERIC, tag_bits, tag_format,
};
pub use env::{
    ENV_AM_MSG, ENV_DEBUG, ENV_NAME_SERVER, ENV_TAGGED_RMA, ENV_UUID, ENV_VERSION_CHECK,
    ENV_WARNING, ProviderEnv, get_int_env,
};
pub use info::{
    DomainAttr, EpAddr, EpAttr, EpType, GetInfoFlags, Hints, Info, NAME_PREFIX, Order, Progress,
    Protocol, RxAttr, Threading, TxAttr,
};
pub use tags::reserve_tag_bits;

use crate::error::{Error, Result};
use crate::fabric::{Fabric, FabricAttr};

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, warn};
use uuid::Uuid;

/// Providers currently initialized in this process. The transport
/// library is finalized when the last one goes away.
static INIT_COUNT: AtomicUsize = AtomicUsize::new(0);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Version {
    pub major: u16,
    pub minor: u16,
}

impl Version {
    pub const fn new(major: u16, minor: u16) -> Self {
        Self { major, minor }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Transport library version this provider is written against.
pub const TRANSPORT_VERSION: Version = Version::new(1, 12);

/// The native transport library.
pub trait Transport: Send + Sync {
    /// Initializes the library and reports its version.
    fn init(&self) -> Result<Version>;

    fn finalize(&self);

    /// Number of usable devices.
    fn device_count(&self) -> Result<u32>;

    /// Resolves a host name to an endpoint address.
    fn resolve_name(&self, node: &str, use_name_server: bool) -> Option<EpAddr>;
}

/// An initialized PSM provider.
pub struct Provider {
    env: ProviderEnv,
    transport: Arc<dyn Transport>,
}

impl Provider {
    pub const NAME: &'static str = "PSM";

    pub const VERSION: Version = Version::new(0, 9);

    /// Initializes the provider with settings from the process
    /// environment.
    pub fn init(transport: Arc<dyn Transport>) -> Result<Self> {
        Self::with_env(transport, ProviderEnv::from_env())
    }

    /// Initializes the provider with explicit settings.
    ///
    /// Fails with [`Error::NotSupported`] when version checking is on and
    /// the library's major version differs from [`TRANSPORT_VERSION`].
    pub fn with_env(transport: Arc<dyn Transport>, env: ProviderEnv) -> Result<Self> {
        let version = transport.init().inspect_err(|e| {
            warn!(error = %e, "transport init failed");
        })?;

        if env.version_check && version.major != TRANSPORT_VERSION.major {
            if env.warning {
                warn!(
                    header = %TRANSPORT_VERSION,
                    library = %version,
                    "transport version mismatch; set {ENV_VERSION_CHECK}=0 to bypass"
                );
            }
            return Err(Error::NotSupported);
        }

        let count = INIT_COUNT.fetch_add(1, Ordering::AcqRel) + 1;
        debug!(%version, count, "provider initialized");

        Ok(Self { env, transport })
    }

    /// Number of providers alive in this process.
    pub fn init_count() -> usize {
        INIT_COUNT.load(Ordering::Acquire)
    }

    pub fn env(&self) -> &ProviderEnv {
        &self.env
    }

    pub fn uuid(&self) -> Option<Uuid> {
        self.env.uuid
    }

    /// Describes what the provider can offer under `hints`.
    ///
    /// `node` names the destination unless `flags` has
    /// [`GetInfoFlags::SOURCE`]. Fails with [`Error::NoData`] when no
    /// device is present or the hints ask for something unsupported, and
    /// with [`Error::NotSupported`] when the needed tag bits cannot be
    /// reserved.
    pub fn getinfo(
        &self,
        version: Version,
        node: Option<&str>,
        flags: GetInfoFlags,
        hints: Option<&Hints>,
    ) -> Result<Info> {
        debug!(%version, ?node, ?flags, "getinfo");

        match self.transport.device_count() {
            Ok(count) if count > 0 => {}
            _ => {
                debug!("no transport device found");
                return Err(Error::NoData);
            }
        }

        let dest_addr = match node {
            Some(node) if !flags.contains(GetInfoFlags::SOURCE) => {
                self.transport.resolve_name(node, self.env.name_server)
            }
            _ => None,
        };

        let mut caps = Caps::empty();
        let mut max_tag = 0;

        if let Some(hints) = hints {
            info::check_hints(hints, &self.env)?;

            if let Some(ep) = &hints.ep_attr {
                max_tag = tag_bits(ep.mem_tag_format);
            }
            caps = hints.caps;
        }

        let (caps, max_tag) = reserve_tag_bits(caps, max_tag, &self.env)?;

        Ok(Info::new(caps, max_tag, hints, dest_addr))
    }

    /// Opens a fabric. Only names starting with `psm` are served.
    pub fn fabric(&self, attr: &FabricAttr) -> Result<Arc<Fabric>> {
        if !attr.name.starts_with(NAME_PREFIX) {
            debug!(name = %attr.name, "fabric name not served by this provider");
            return Err(Error::NoData);
        }

        Ok(Fabric::open(attr))
    }
}

impl Drop for Provider {
    fn drop(&mut self) {
        if INIT_COUNT.fetch_sub(1, Ordering::AcqRel) == 1 {
            debug!("last provider gone, finalizing transport");
            self.transport.finalize();
        }
    }
}
