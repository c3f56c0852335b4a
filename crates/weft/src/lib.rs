//! weft - a portable resource-abstraction core.
//!
//! Exposes heterogeneous compute, memory, and communication resources
//! through a uniform interface so that higher-level runtimes can be
//! written once and retargeted across hosts, accelerators, and
//! distributed-memory transports.
//!
//! This crate holds the transport-neutral pieces:
//!
//! - the [`Topology`] model (devices, compute resources, memory spaces)
//!   with its JSON contract;
//! - [`LocalMemorySlot`] / [`GlobalMemorySlot`], the currency of
//!   one-sided communication;
//! - the [`MemoryManager`] and [`CommunicationManager`] capability
//!   traits that backends realize.
//!
//! Channel frontends live in `weft-channels`; an in-process host backend
//! lives in `weft-host`. Frontends are parameterized over the capability
//! traits so no dynamic dispatch sits on the push/pop hot path.
//!
//! # Example
//!
//! ```ignore
//! use weft::{CommunicationManager, MemoryManager};
//!
//! let space = manager.memory_spaces().into_iter().next().unwrap();
//! let slot = manager.allocate_local_memory_slot(&space, 1024)?;
//! comm.exchange_global_memory_slots(TAG, &[(KEY, slot.clone())])?;
//! comm.fence(TAG)?;
//! let global = comm.get_global_memory_slot(TAG, KEY)?;
//! ```

mod comm;
mod error;
mod memory;
mod slot;
mod topology;

pub use comm::{CommunicationManager, SlotView};
pub use error::{depth_violation, protocol_violation, Error, Result};
pub use memory::MemoryManager;
pub use slot::{GlobalKey, GlobalMemorySlot, LocalMemorySlot, SlotProvenance, Tag};
pub use topology::{ComputeResource, Device, MemorySpace, Topology};
