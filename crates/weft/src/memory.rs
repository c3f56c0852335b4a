//! The memory-manager capability: allocate, register, free, deregister.

use crate::error::Result;
use crate::slot::LocalMemorySlot;
use crate::topology::MemorySpace;
use std::ptr::NonNull;
use std::sync::Arc;

/// Allocates and registers local memory slots within the memory spaces a
/// backend owns.
///
/// Two acquisition paths exist with opposite ownership rules:
///
/// - `allocate_local_memory_slot` - the manager owns the bytes and
///   accounts them against the space's usage; release with
///   `free_local_memory_slot`.
/// - `register_local_memory_slot` - the caller retains ownership and no
///   accounting happens; release with `deregister_local_memory_slot`.
///
/// Crossing the two (freeing a registered slot, deregistering an
/// allocated one) is a fatal protocol violation.
pub trait MemoryManager {
    /// The memory spaces this manager can allocate from.
    fn memory_spaces(&self) -> Vec<Arc<MemorySpace>>;

    /// Allocates `size` bytes inside `space` and wraps them as a slot.
    ///
    /// Fails with `InvalidArgument` when the space is not owned by this
    /// manager or `size` is zero, and with `OutOfResource` when the
    /// allocation would exceed the space's remaining capacity. On success
    /// the space's usage grows by `size`.
    fn allocate_local_memory_slot(
        &self,
        space: &Arc<MemorySpace>,
        size: usize,
    ) -> Result<Arc<LocalMemorySlot>>;

    /// Wraps caller-owned memory as a slot without taking ownership. No
    /// usage accounting is performed.
    ///
    /// # Safety
    ///
    /// The region `[ptr, ptr + size)` must be readable and writable, stay
    /// valid until the slot is deregistered and every clone of it is
    /// dropped, and must not be accessed outside the communication
    /// protocol while the slot exists.
    unsafe fn register_local_memory_slot(
        &self,
        space: &Arc<MemorySpace>,
        ptr: NonNull<u8>,
        size: usize,
    ) -> Result<Arc<LocalMemorySlot>>;

    /// Releases an allocation made by this manager and returns its bytes
    /// to the space's usage budget.
    ///
    /// The caller must hold the last reference to the slot: a global
    /// slot promoted from it keeps a clone alive inside the
    /// communication manager until deregistration fences, so teardown
    /// runs channels first, then global slots (with a fence), then local
    /// slots.
    ///
    /// Fatal if the slot was not allocated by this manager or is still
    /// shared.
    fn free_local_memory_slot(&self, slot: Arc<LocalMemorySlot>) -> Result<()>;

    /// Forgets a registered slot. The caller's memory is untouched.
    ///
    /// Fatal if the slot was allocated rather than registered, or belongs
    /// to a different manager.
    fn deregister_local_memory_slot(&self, slot: Arc<LocalMemorySlot>) -> Result<()>;
}
