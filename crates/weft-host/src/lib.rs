//! weft-host - the in-process host backend for `weft`.
//!
//! Realizes the full capability set for threads of a single process:
//! [`host_topology`] discovers the machine, [`HostMemoryManager`] hands
//! out slots in host RAM, and [`HostCommunicationManager`] implements
//! slot exchange, fences, one-sided copies, and global locks over shared
//! memory. Distributed transports (message passing, device copy engines)
//! implement the same traits elsewhere; everything built on the traits -
//! including the channel frontends - runs unchanged on either.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use weft::{CommunicationManager, MemoryManager, SlotView};
//! use weft_host::{host_topology, HostCommunicationManager, HostMemoryManager};
//!
//! let topology = host_topology();
//! let space = Arc::clone(&topology.devices()[0].memory_spaces()[0]);
//! let memory = HostMemoryManager::new(vec![Arc::clone(&space)]);
//! let comm = HostCommunicationManager::new(1);
//!
//! let slot = memory.allocate_local_memory_slot(&space, 64).unwrap();
//! comm.exchange_global_memory_slots(7, &[(0, Arc::clone(&slot))]).unwrap();
//! comm.fence(7).unwrap();
//!
//! let global = comm.get_global_memory_slot(7, 0).unwrap();
//! let payload = memory.allocate_local_memory_slot(&space, 64).unwrap();
//! comm.memcpy(SlotView::Global(&global), 0, SlotView::Local(&payload), 0, 64)
//!     .unwrap();
//! assert_eq!(slot.messages_recv(), 1);
//! ```

mod comm;
mod memory;
mod topology;

pub use comm::HostCommunicationManager;
pub use memory::HostMemoryManager;
pub use topology::host_topology;
