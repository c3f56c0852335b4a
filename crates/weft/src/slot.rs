//! Local and global memory slots.
//!
//! A local slot is a contiguous region inside a memory space, owned by the
//! memory manager that allocated it or merely described by it when the
//! user registered their own memory. A global slot is the `(tag, key)`
//! handle a local slot becomes once exchanged, usable as either end of a
//! one-sided copy.

use crate::topology::MemorySpace;
use crossbeam_utils::CachePadded;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// User-assigned 64-bit label grouping slot exchanges and fences.
pub type Tag = u64;

/// User-assigned 64-bit identifier of a slot within a tag.
pub type GlobalKey = u64;

/// How a local slot came to exist, and which manager vouches for it.
///
/// The `manager` token identifies the issuing memory manager so that
/// free/deregister calls can enforce their ownership rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotProvenance {
    /// Opaque token of the issuing memory manager.
    pub manager: usize,
    /// `true` when the manager owns the allocation; `false` for
    /// user-registered memory.
    pub allocated: bool,
}

/// An owned or registered contiguous buffer in a memory space.
///
/// The pointer, size, and owning space are immutable for the slot's
/// lifetime. The message counters are updated by communication managers
/// on completion of remote operations with this slot as source
/// (`messages_sent`) or destination (`messages_recv`); both are
/// monotonically non-decreasing.
#[derive(Debug)]
pub struct LocalMemorySlot {
    ptr: NonNull<u8>,
    size: usize,
    space: Arc<MemorySpace>,
    provenance: SlotProvenance,
    // The counters sit on separate cache lines: one is written on the
    // send path, the other on the receive path, often from different
    // threads.
    messages_sent: CachePadded<AtomicU64>,
    messages_recv: CachePadded<AtomicU64>,
}

// Safety: the slot only hands out a raw pointer; all concurrent access to
// the underlying bytes goes through a communication manager, whose
// protocol (single writer per region, acquire/release counter words)
// provides the synchronization. The counters themselves are atomics.
unsafe impl Send for LocalMemorySlot {}
unsafe impl Sync for LocalMemorySlot {}

impl LocalMemorySlot {
    /// Wraps a raw region as a slot. Called by memory-manager backends;
    /// user code obtains slots through [`crate::MemoryManager`].
    ///
    /// # Safety
    ///
    /// `ptr` must point to `size` readable and writable bytes that stay
    /// valid for the slot's lifetime and are not accessed outside the
    /// communication-manager protocol while the slot exists.
    pub unsafe fn new(
        ptr: NonNull<u8>,
        size: usize,
        space: Arc<MemorySpace>,
        provenance: SlotProvenance,
    ) -> Arc<Self> {
        Arc::new(Self {
            ptr,
            size,
            space,
            provenance,
            messages_sent: CachePadded::new(AtomicU64::new(0)),
            messages_recv: CachePadded::new(AtomicU64::new(0)),
        })
    }

    /// Raw base pointer of the region.
    #[inline]
    pub fn ptr(&self) -> NonNull<u8> {
        self.ptr
    }

    /// Size of the region in bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// The memory space this slot lives in.
    #[inline]
    pub fn memory_space(&self) -> &Arc<MemorySpace> {
        &self.space
    }

    /// Provenance record set by the issuing memory manager.
    #[inline]
    pub fn provenance(&self) -> SlotProvenance {
        self.provenance
    }

    /// Completed copies that used this slot as their source.
    #[inline]
    pub fn messages_sent(&self) -> u64 {
        self.messages_sent.load(Ordering::Acquire)
    }

    /// Completed copies that used this slot as their destination.
    #[inline]
    pub fn messages_recv(&self) -> u64 {
        self.messages_recv.load(Ordering::Acquire)
    }

    /// Records `n` completed sends. Transport-side API: called by
    /// communication managers once per completed copy, never by users.
    #[inline]
    pub fn record_messages_sent(&self, n: u64) {
        self.messages_sent.fetch_add(n, Ordering::AcqRel);
    }

    /// Records `n` completed receives. Transport-side API.
    #[inline]
    pub fn record_messages_recv(&self, n: u64) {
        self.messages_recv.fetch_add(n, Ordering::AcqRel);
    }
}

/// A `(tag, key)`-named handle to a (possibly remote) memory slot.
///
/// `source` is `Some` iff the slot was promoted from a local slot
/// resolvable by the owning communication manager; transports that reach
/// across address spaces return `None` for slots promoted elsewhere and
/// keep the rest of their connection state in their own per-tag arena.
/// The `manager` token identifies the resolving manager so that copies
/// crossing managers can be rejected instead of guessed at.
#[derive(Debug)]
pub struct GlobalMemorySlot {
    tag: Tag,
    key: GlobalKey,
    source: Option<Arc<LocalMemorySlot>>,
    manager: usize,
}

impl GlobalMemorySlot {
    /// Creates a global slot handle. Called by communication-manager
    /// backends during exchange resolution.
    pub fn new(
        tag: Tag,
        key: GlobalKey,
        source: Option<Arc<LocalMemorySlot>>,
        manager: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            tag,
            key,
            source,
            manager,
        })
    }

    /// The tag this slot was exchanged under.
    #[inline]
    pub fn tag(&self) -> Tag {
        self.tag
    }

    /// The key this slot was published with.
    #[inline]
    pub fn key(&self) -> GlobalKey {
        self.key
    }

    /// The local slot this global slot was promoted from, when the
    /// promotion is resolvable by the owning manager.
    #[inline]
    pub fn source_local_memory_slot(&self) -> Option<&Arc<LocalMemorySlot>> {
        self.source.as_ref()
    }

    /// Opaque token of the communication manager that resolved this
    /// slot.
    #[inline]
    pub fn manager(&self) -> usize {
        self.manager
    }
}
