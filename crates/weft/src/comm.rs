//! The communication-manager capability: slot exchange, fences, one-sided
//! copies, counter queries, and global locks.

use crate::error::Result;
use crate::slot::{GlobalKey, GlobalMemorySlot, LocalMemorySlot, Tag};
use std::sync::Arc;

/// Either operand of a one-sided copy: a local slot or an exchanged
/// global slot.
#[derive(Debug, Clone, Copy)]
pub enum SlotView<'a> {
    /// A slot in this instance's address space.
    Local(&'a LocalMemorySlot),
    /// An exchanged `(tag, key)` handle, possibly remote.
    Global(&'a GlobalMemorySlot),
}

impl<'a> From<&'a LocalMemorySlot> for SlotView<'a> {
    fn from(slot: &'a LocalMemorySlot) -> Self {
        Self::Local(slot)
    }
}

impl<'a> From<&'a GlobalMemorySlot> for SlotView<'a> {
    fn from(slot: &'a GlobalMemorySlot) -> Self {
        Self::Global(slot)
    }
}

/// Brokers one-sided data movement and metadata exchange among a
/// statically-known participant set defined by the backend.
///
/// # Ordering contract
///
/// `memcpy` operations are unordered with respect to each other between
/// fences, except that for a given `(src, dst)` slot pair within a tag,
/// completions observe FIFO order, and the counter increments a copy
/// induces are observed no earlier than its payload becomes readable.
/// Channel frontends rely on both properties.
///
/// # Failure semantics
///
/// Transport errors during a fence void the tag's epoch and surface as
/// [`crate::Error::FenceFailure`]; individual copy failures are deferred
/// to the surrounding fence. Lock acquire/release never fail at the
/// protocol level.
pub trait CommunicationManager {
    /// Publishes zero or more local slots under `(tag, key)` for the
    /// current epoch. Passing an empty list participates as a consumer of
    /// the exchange only. Resolution requires [`Self::fence`] on `tag`.
    fn exchange_global_memory_slots(
        &self,
        tag: Tag,
        slots: &[(GlobalKey, Arc<LocalMemorySlot>)],
    ) -> Result<()>;

    /// Collective barrier on `tag`: completes in-flight tagged
    /// operations, finalizes pending promotions and deregistrations from
    /// the epoch's exchanges. After return, every `(tag, key)` any
    /// participant published resolves on every participant.
    fn fence(&self, tag: Tag) -> Result<()>;

    /// Point-to-point fence: returns once `slot.messages_sent() >=
    /// expected_sent` and `slot.messages_recv() >= expected_recv`. Used
    /// where a collective barrier is too coarse.
    fn fence_slot(
        &self,
        slot: &LocalMemorySlot,
        expected_sent: u64,
        expected_recv: u64,
    ) -> Result<()>;

    /// Resolves an exchanged slot; fails with [`crate::Error::NotFound`]
    /// when `(tag, key)` was not published in the most recent epoch.
    fn get_global_memory_slot(&self, tag: Tag, key: GlobalKey) -> Result<Arc<GlobalMemorySlot>>;

    /// Marks a global slot for removal at the next fence on its tag.
    fn deregister_global_memory_slot(&self, slot: &Arc<GlobalMemorySlot>) -> Result<()>;

    /// Enqueues a one-sided copy of `size` bytes. Completion is not
    /// guaranteed until a subsequent fence on the involved tag or a
    /// point-to-point fence on the involved slot; on completion the
    /// source's `messages_sent` and the destination's `messages_recv`
    /// each grow by exactly one.
    ///
    /// Both operands must be resolvable by this manager; cross-manager
    /// copies are rejected with `InvalidArgument`.
    fn memcpy(
        &self,
        dst: SlotView<'_>,
        dst_offset: usize,
        src: SlotView<'_>,
        src_offset: usize,
        size: usize,
    ) -> Result<()>;

    /// Refreshes the local view of the slot's message counters. Required
    /// on transports where peers update them asynchronously; a no-op
    /// where the counters are shared atomics.
    fn query_memory_slot_updates(&self, slot: &LocalMemorySlot) -> Result<()>;

    /// Tries to atomically swap the slot's coordination lock word from 0
    /// to 1. Returns `true` when the caller now owns the lock. Never
    /// blocks.
    fn acquire_global_lock(&self, slot: &GlobalMemorySlot) -> Result<bool>;

    /// Sets the lock word back to 0. The caller must own the lock;
    /// releasing an unheld lock is fatal. All copies the caller issued
    /// while holding the lock happen-before the release.
    fn release_global_lock(&self, slot: &GlobalMemorySlot) -> Result<()>;
}
