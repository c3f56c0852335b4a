//! Host memory manager: raw 8-aligned zeroed allocations with usage
//! accounting, plus registration of caller-owned memory.

use parking_lot::Mutex;
use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::collections::HashMap;
use std::ptr::NonNull;
use std::sync::Arc;
use weft::{
    protocol_violation, Error, LocalMemorySlot, MemoryManager, MemorySpace, Result,
    SlotProvenance,
};

/// Every allocation is at least 8-aligned so that coordination counter
/// words inside any slot can be addressed atomically.
const SLOT_ALIGN: usize = 8;

struct Allocation {
    ptr: NonNull<u8>,
    layout: Layout,
    space: Arc<MemorySpace>,
}

// Safety: the allocation table only moves raw pointers between threads;
// the bytes themselves are managed under the slot protocol.
unsafe impl Send for Allocation {}

struct Inner {
    spaces: Vec<Arc<MemorySpace>>,
    allocations: Mutex<HashMap<usize, Allocation>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        // Return leaked allocations on manager teardown.
        for (_, allocation) in self.allocations.lock().drain() {
            allocation.space.release(allocation.layout.size() as u64);
            // Safety: each entry was produced by alloc_zeroed with this
            // exact layout and is deallocated exactly once.
            unsafe { dealloc(allocation.ptr.as_ptr(), allocation.layout) };
        }
    }
}

/// Memory manager over a fixed set of host memory spaces.
///
/// Cloning yields another handle to the same manager; all clones share
/// the allocation table and ownership identity.
#[derive(Clone)]
pub struct HostMemoryManager {
    inner: Arc<Inner>,
}

impl HostMemoryManager {
    /// Creates a manager owning the given memory spaces.
    pub fn new(spaces: Vec<Arc<MemorySpace>>) -> Self {
        Self {
            inner: Arc::new(Inner {
                spaces,
                allocations: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Opaque identity baked into the provenance of every slot this
    /// manager issues.
    fn token(&self) -> usize {
        Arc::as_ptr(&self.inner) as usize
    }

    fn owns_space(&self, space: &Arc<MemorySpace>) -> bool {
        self.inner.spaces.iter().any(|s| Arc::ptr_eq(s, space))
    }
}

impl MemoryManager for HostMemoryManager {
    fn memory_spaces(&self) -> Vec<Arc<MemorySpace>> {
        self.inner.spaces.clone()
    }

    fn allocate_local_memory_slot(
        &self,
        space: &Arc<MemorySpace>,
        size: usize,
    ) -> Result<Arc<LocalMemorySlot>> {
        if !self.owns_space(space) {
            return Err(Error::InvalidArgument(
                "memory space is not owned by this manager".into(),
            ));
        }
        if size == 0 {
            return Err(Error::InvalidArgument(
                "cannot allocate a zero-sized slot".into(),
            ));
        }

        space.try_reserve(size as u64)?;

        let layout = Layout::from_size_align(size, SLOT_ALIGN)
            .map_err(|e| Error::InvalidArgument(format!("slot layout: {e}")))?;
        // Safety: layout has nonzero size (checked above).
        let raw = unsafe { alloc_zeroed(layout) };
        let Some(ptr) = NonNull::new(raw) else {
            space.release(size as u64);
            return Err(Error::OutOfResource(format!(
                "host allocation of {size} bytes failed"
            )));
        };

        self.inner.allocations.lock().insert(
            ptr.as_ptr() as usize,
            Allocation {
                ptr,
                layout,
                space: Arc::clone(space),
            },
        );

        // Safety: the region was just allocated with `size` writable
        // zeroed bytes and lives until freed through this manager.
        Ok(unsafe {
            LocalMemorySlot::new(
                ptr,
                size,
                Arc::clone(space),
                SlotProvenance {
                    manager: self.token(),
                    allocated: true,
                },
            )
        })
    }

    unsafe fn register_local_memory_slot(
        &self,
        space: &Arc<MemorySpace>,
        ptr: NonNull<u8>,
        size: usize,
    ) -> Result<Arc<LocalMemorySlot>> {
        if !self.owns_space(space) {
            return Err(Error::InvalidArgument(
                "memory space is not owned by this manager".into(),
            ));
        }
        if size == 0 {
            return Err(Error::InvalidArgument(
                "cannot register a zero-sized slot".into(),
            ));
        }

        // Safety: forwarded from the caller per the trait contract.
        Ok(LocalMemorySlot::new(
            ptr,
            size,
            Arc::clone(space),
            SlotProvenance {
                manager: self.token(),
                allocated: false,
            },
        ))
    }

    fn free_local_memory_slot(&self, slot: Arc<LocalMemorySlot>) -> Result<()> {
        let provenance = slot.provenance();
        if provenance.manager != self.token() || !provenance.allocated {
            protocol_violation("freeing a slot this manager did not allocate");
        }

        // The caller must hold the last reference. An exchanged slot
        // keeps a clone alive inside the communication manager's arena
        // until deregistration fences; deallocating under it would leave
        // that clone dangling. Teardown order is channels, then global
        // slots (with a fence), then local slots.
        let Ok(slot) = Arc::try_unwrap(slot) else {
            protocol_violation(
                "freeing a local memory slot that is still shared (deregister it and fence first)",
            );
        };

        let key = slot.ptr().as_ptr() as usize;
        let Some(allocation) = self.inner.allocations.lock().remove(&key) else {
            protocol_violation("double free of a local memory slot");
        };

        allocation.space.release(allocation.layout.size() as u64);
        drop(slot);
        // Safety: the entry's presence in the table proves this region is
        // still live and owned by the manager, and the unwrap above
        // proves no other handle can reach it.
        unsafe { dealloc(allocation.ptr.as_ptr(), allocation.layout) };
        Ok(())
    }

    fn deregister_local_memory_slot(&self, slot: Arc<LocalMemorySlot>) -> Result<()> {
        let provenance = slot.provenance();
        if provenance.manager != self.token() || provenance.allocated {
            protocol_violation("deregistering a slot this manager did not register");
        }
        drop(slot);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager_with_space(size: u64) -> (HostMemoryManager, Arc<MemorySpace>) {
        let space = Arc::new(MemorySpace::new("host RAM", size));
        (HostMemoryManager::new(vec![Arc::clone(&space)]), space)
    }

    #[test]
    fn allocate_accounts_usage_and_free_returns_it() {
        let (manager, space) = manager_with_space(1024);

        let slot = manager.allocate_local_memory_slot(&space, 256).unwrap();
        assert_eq!(space.usage(), 256);
        assert_eq!(slot.size(), 256);
        assert_eq!(slot.ptr().as_ptr() as usize % SLOT_ALIGN, 0);

        manager.free_local_memory_slot(slot).unwrap();
        assert_eq!(space.usage(), 0);
    }

    #[test]
    fn allocation_past_capacity_fails() {
        let (manager, space) = manager_with_space(100);
        let _held = manager.allocate_local_memory_slot(&space, 80).unwrap();
        assert!(matches!(
            manager.allocate_local_memory_slot(&space, 21),
            Err(Error::OutOfResource(_))
        ));
        // Failed allocation leaves usage untouched.
        assert_eq!(space.usage(), 80);
    }

    #[test]
    fn foreign_space_is_rejected() {
        let (manager, _space) = manager_with_space(1024);
        let foreign = Arc::new(MemorySpace::new("other", 1024));
        assert!(matches!(
            manager.allocate_local_memory_slot(&foreign, 16),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn register_does_no_accounting() {
        let (manager, space) = manager_with_space(1024);
        let mut backing = [0u8; 64];
        let slot = unsafe {
            manager
                .register_local_memory_slot(
                    &space,
                    NonNull::new(backing.as_mut_ptr()).unwrap(),
                    backing.len(),
                )
                .unwrap()
        };
        assert_eq!(space.usage(), 0);
        manager.deregister_local_memory_slot(slot).unwrap();
    }

    #[test]
    #[should_panic(expected = "still shared")]
    fn freeing_shared_slot_is_fatal() {
        let (manager, space) = manager_with_space(1024);
        let slot = manager.allocate_local_memory_slot(&space, 64).unwrap();
        // A second handle, as the communication manager's arena would
        // hold for an exchanged slot.
        let held = Arc::clone(&slot);
        let _ = manager.free_local_memory_slot(slot);
        drop(held);
    }

    #[test]
    #[should_panic(expected = "protocol violation")]
    fn freeing_registered_slot_is_fatal() {
        let (manager, space) = manager_with_space(1024);
        let mut backing = [0u8; 64];
        let slot = unsafe {
            manager
                .register_local_memory_slot(
                    &space,
                    NonNull::new(backing.as_mut_ptr()).unwrap(),
                    backing.len(),
                )
                .unwrap()
        };
        let _ = manager.free_local_memory_slot(slot);
    }

    #[test]
    #[should_panic(expected = "protocol violation")]
    fn deregistering_allocated_slot_is_fatal() {
        let (manager, space) = manager_with_space(1024);
        let slot = manager.allocate_local_memory_slot(&space, 64).unwrap();
        let _ = manager.deregister_local_memory_slot(slot);
    }
}
