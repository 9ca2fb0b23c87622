//! Error taxonomy shared by wait sets, fabrics and the provider.
//!
//! Every operation reports exactly one [`Error`]. Which descriptor or
//! which fid caused a failure is only reported through `tracing`.

use std::io;

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors returned by wait-set, fabric and provider operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Malformed identifier or unsupported attribute combination.
    #[error("invalid argument")]
    InvalidArgument,

    /// Allocation failed; all partial state has been unwound.
    #[error("out of memory")]
    NoMemory,

    /// The resource is still referenced.
    #[error("resource busy")]
    Busy,

    /// A requested capability cannot be provided.
    #[error("operation not supported")]
    NotSupported,

    /// No matching data, device or descriptor is available.
    #[error("no data available")]
    NoData,

    /// The wait deadline elapsed with nothing ready.
    #[error("timed out")]
    Timeout,

    /// The caller-provided buffer is too small; retry with a larger one.
    #[error("buffer too small")]
    TooSmall,

    /// The readiness multiplexer or signal channel failed.
    #[error("poller failure: {0}")]
    Poller(#[from] io::Error),
}

impl Error {
    /// Maps an allocation failure to [`Error::NoMemory`].
    #[inline]
    pub(crate) fn from_alloc(_: std::collections::TryReserveError) -> Self {
        Self::NoMemory
    }
}
