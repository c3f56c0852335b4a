//! Shared wiring helpers for the channel integration tests: a host
//! backend fixture plus token read/write utilities.

#![allow(dead_code)]

use std::sync::Arc;
use std::thread;
use weft::{LocalMemorySlot, MemoryManager, MemorySpace};
use weft_host::{HostCommunicationManager, HostMemoryManager};

/// A host backend with one memory space, sized generously for tests.
pub fn harness(participants: usize) -> (HostMemoryManager, Arc<MemorySpace>, HostCommunicationManager) {
    let space = Arc::new(MemorySpace::new("host RAM", 1 << 20));
    let memory = HostMemoryManager::new(vec![Arc::clone(&space)]);
    let comm = HostCommunicationManager::new(participants);
    (memory, space, comm)
}

/// Allocates and zero-initializes a coordination buffer.
pub fn coordination_buffer(
    memory: &HostMemoryManager,
    space: &Arc<MemorySpace>,
) -> Arc<LocalMemorySlot> {
    let slot = memory
        .allocate_local_memory_slot(space, weft_channels::coordination_buffer_size())
        .unwrap();
    weft_channels::initialize_coordination_buffer(&slot).unwrap();
    slot
}

/// Writes a `u32` token value into a (at least 4-byte) source slot.
pub fn write_token(slot: &LocalMemorySlot, value: u32) {
    // Safety: the slot holds at least 4 aligned writable bytes.
    unsafe { slot.ptr().as_ptr().cast::<u32>().write(value) };
}

/// Reads the `u32` token at `position` of a token buffer.
pub fn read_token(buffer: &LocalMemorySlot, position: usize) -> u32 {
    // Safety: allocations are 8-aligned and positions index whole
    // 4-byte tokens inside the buffer.
    unsafe { buffer.ptr().as_ptr().add(position * 4).cast::<u32>().read() }
}

/// Fills the first `bytes.len()` bytes of a slot.
pub fn write_bytes(slot: &LocalMemorySlot, bytes: &[u8]) {
    assert!(bytes.len() <= slot.size());
    // Safety: in-bounds per the assert; the caller owns the slot.
    unsafe {
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), slot.ptr().as_ptr(), bytes.len());
    }
}

/// Reads `range` from a payload buffer.
pub fn read_bytes(buffer: &LocalMemorySlot, range: std::ops::Range<usize>) -> Vec<u8> {
    assert!(range.end <= buffer.size());
    // Safety: in-bounds per the assert; single-writer protocol keeps
    // the popped range stable.
    unsafe {
        std::slice::from_raw_parts(buffer.ptr().as_ptr().add(range.start), range.len()).to_vec()
    }
}

/// Spins until `condition` yields `Some`, yielding the thread between
/// probes.
pub fn spin_until<T>(mut condition: impl FnMut() -> Option<T>) -> T {
    loop {
        if let Some(value) = condition() {
            return value;
        }
        thread::yield_now();
    }
}
