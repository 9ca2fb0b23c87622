//! # fabwait
//!
//! **fabwait** is the wait and event-notification core of a fabric
//! communication library. Completion queues, event queues and counters
//! are aggregated into a single [`WaitSet`] that a consumer thread blocks
//! on, regardless of which transport produced the completions.
//!
//! It provides:
//!
//! - **Descriptor wait sets** backed by `epoll` (Linux) or a `poll(2)`
//!   descriptor array, woken by an eventfd or self-pipe signal channel
//! - **Yield wait sets** that spin and yield the CPU instead of blocking
//! - **Reference-counted registration** of fids and raw descriptors, so
//!   several consumers can share one underlying resource
//! - **Batch trywait** over heterogeneous completion objects through
//!   [`Fabric::try_wait`]
//! - **PSM provider discovery** with tag-bit reservation for untagged
//!   messages and tagged RMA
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use fabwait::{CompletionQueue, Fabric, FabricAttr, WaitAttr, WaitKind};
//!
//! # fn main() -> fabwait::Result<()> {
//! let fabric = Fabric::open(&FabricAttr::new("psm"));
//! let wait = fabric.wait_open(&WaitAttr::new(WaitKind::DescriptorNotify))?;
//! let cq = CompletionQueue::open(Some(&wait))?;
//!
//! cq.post(42)?;
//! wait.run(100)?;
//! assert_eq!(cq.read(), Some(42));
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`wait`]: Wait sets and their control commands
//! - [`fabric`]: Fabric handles and batch trywait
//! - [`queue`]: Completion queues, event queues and counters
//! - [`provider`]: PSM provider lifecycle and discovery
//!
//! The library logs through `tracing` and never installs a subscriber.

mod error;
mod fid;
mod poller;
mod pollset;

pub mod fabric;
pub mod provider;
pub mod queue;
pub mod wait;

pub use error::{Error, Result};
pub use fabric::{Fabric, FabricAttr, FidRef};
pub use fid::{Fid, FidClass, FidId, Readiness, TryFn};
pub use poller::{Events, PollFd};
pub use pollset::Pollable;
pub use queue::{CompletionQueue, Counter, EqEvent, EventQueue};
pub use wait::{
    Control, WaitAttr, WaitDescriptor, WaitKind, WaitPollFd, WaitSet, check_wait_attr,
};
