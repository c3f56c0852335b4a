//! Shared-memory communication manager.
//!
//! All participants live in one process (one handle clone per
//! participant), so "remote" memory is directly addressable: exchanged
//! slots resolve to their promoter's local slot, copies complete
//! immediately, and the message counters are shared atomics.
//!
//! What is deliberately preserved from the distributed-transport model:
//!
//! - fences are collective per tag (a generation-counted barrier over the
//!   fixed participant count);
//! - copies whose size is a multiple of 8 with 8-aligned endpoints are
//!   performed word-by-word with acquire loads and release stores, which
//!   is the word-atomicity the channel protocols assume of an RDMA NIC
//!   when they poll remotely-written counter words;
//! - counter increments are release operations issued after the data is
//!   in place, so an observed counter implies a readable payload.

use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, HashSet};
use std::mem;
use std::ptr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use weft::{
    protocol_violation, CommunicationManager, Error, GlobalKey, GlobalMemorySlot,
    LocalMemorySlot, Result, SlotView, Tag,
};

/// Byte offset of the lock word inside a lockable slot (the third word
/// of a coordination buffer).
const LOCK_WORD_OFFSET: usize = 16;

/// Smallest slot a global lock can live in: head, tail, and lock words.
const LOCKABLE_SLOT_SIZE: usize = 24;

#[derive(Default)]
struct TagState {
    /// Slots resolved by the most recent fence, keyed by global key.
    resolved: HashMap<GlobalKey, Arc<GlobalMemorySlot>>,
    /// Publications accumulated since that fence.
    pending_publish: Vec<(GlobalKey, Arc<GlobalMemorySlot>)>,
    /// Keys marked for removal at the next fence.
    pending_deregister: HashSet<GlobalKey>,
    /// Participants currently blocked in `fence` on this tag.
    arrivals: usize,
    /// Completed fence count; waiters block until it advances.
    generation: u64,
}

struct Shared {
    participants: usize,
    state: Mutex<HashMap<Tag, TagState>>,
    fence_done: Condvar,
}

/// Communication manager for threads of one process.
///
/// Create it with the participant count, clone one handle per
/// participant, and have every participant call [`CommunicationManager::fence`]
/// for a tag to resolve that tag's exchanges.
#[derive(Clone)]
pub struct HostCommunicationManager {
    shared: Arc<Shared>,
}

impl HostCommunicationManager {
    /// Creates a manager for a fixed participant set.
    ///
    /// # Panics
    ///
    /// Panics if `participants` is zero.
    pub fn new(participants: usize) -> Self {
        assert!(participants > 0, "participant set cannot be empty");
        Self {
            shared: Arc::new(Shared {
                participants,
                state: Mutex::new(HashMap::new()),
                fence_done: Condvar::new(),
            }),
        }
    }

    /// Number of participants in the set.
    #[inline]
    pub fn participants(&self) -> usize {
        self.shared.participants
    }

    /// Opaque identity stamped into every global slot this manager
    /// resolves.
    fn token(&self) -> usize {
        Arc::as_ptr(&self.shared) as usize
    }

    /// Resolves a copy operand to the local slot backing it. Slots
    /// resolved by a different manager are rejected rather than guessed
    /// at.
    fn backing<'a>(&self, view: SlotView<'a>) -> Result<&'a LocalMemorySlot> {
        match view {
            SlotView::Local(slot) => Ok(slot),
            SlotView::Global(global) => {
                if global.manager() != self.token() {
                    return Err(Error::InvalidArgument(format!(
                        "global slot (tag {}, key {}) belongs to a different manager",
                        global.tag(),
                        global.key()
                    )));
                }
                global
                    .source_local_memory_slot()
                    .map(Arc::as_ref)
                    .ok_or_else(|| {
                        Error::InvalidArgument(format!(
                            "global slot (tag {}, key {}) is not resolvable by this manager",
                            global.tag(),
                            global.key()
                        ))
                    })
            }
        }
    }

    /// Locates the lock word of a lockable slot.
    fn lock_word<'a>(&self, slot: &'a GlobalMemorySlot) -> Result<&'a AtomicU64> {
        let backing = self.backing(SlotView::Global(slot))?;
        let addr = backing.ptr().as_ptr() as usize;
        if backing.size() < LOCKABLE_SLOT_SIZE || addr % 8 != 0 {
            return Err(Error::InvalidArgument(format!(
                "global slot (tag {}, key {}) has no addressable lock word",
                slot.tag(),
                slot.key()
            )));
        }
        // Safety: the region holds at least 24 bytes, is 8-aligned, and
        // the word at offset 16 is only ever accessed atomically.
        Ok(unsafe { &*backing.ptr().as_ptr().add(LOCK_WORD_OFFSET).cast::<AtomicU64>() })
    }
}

impl CommunicationManager for HostCommunicationManager {
    fn exchange_global_memory_slots(
        &self,
        tag: Tag,
        slots: &[(GlobalKey, Arc<LocalMemorySlot>)],
    ) -> Result<()> {
        let mut state = self.shared.state.lock();
        let tag_state = state.entry(tag).or_default();
        for (key, local) in slots {
            log::trace!("publishing slot under tag {tag}, key {key}");
            tag_state.pending_publish.push((
                *key,
                GlobalMemorySlot::new(tag, *key, Some(Arc::clone(local)), self.token()),
            ));
        }
        Ok(())
    }

    fn fence(&self, tag: Tag) -> Result<()> {
        let mut state = self.shared.state.lock();
        let tag_state = state.entry(tag).or_default();
        let generation = tag_state.generation;
        tag_state.arrivals += 1;

        if tag_state.arrivals == self.shared.participants {
            // Last arrival resolves the epoch for everyone.
            for (key, slot) in mem::take(&mut tag_state.pending_publish) {
                if tag_state.resolved.insert(key, slot).is_some() {
                    protocol_violation(&format!(
                        "duplicate publication of (tag {tag}, key {key}) in one epoch"
                    ));
                }
            }
            for key in mem::take(&mut tag_state.pending_deregister) {
                log::trace!("retiring slot (tag {tag}, key {key})");
                tag_state.resolved.remove(&key);
            }
            tag_state.arrivals = 0;
            tag_state.generation += 1;
            log::debug!(
                "fence on tag {tag} complete, {} slots resolved",
                tag_state.resolved.len()
            );
            self.shared.fence_done.notify_all();
            return Ok(());
        }

        while state
            .get(&tag)
            .map_or(false, |tag_state| tag_state.generation == generation)
        {
            self.shared.fence_done.wait(&mut state);
        }
        Ok(())
    }

    fn fence_slot(
        &self,
        slot: &LocalMemorySlot,
        expected_sent: u64,
        expected_recv: u64,
    ) -> Result<()> {
        while slot.messages_sent() < expected_sent || slot.messages_recv() < expected_recv {
            thread::yield_now();
        }
        Ok(())
    }

    fn get_global_memory_slot(&self, tag: Tag, key: GlobalKey) -> Result<Arc<GlobalMemorySlot>> {
        self.shared
            .state
            .lock()
            .get(&tag)
            .and_then(|tag_state| tag_state.resolved.get(&key))
            .cloned()
            .ok_or(Error::NotFound { tag, key })
    }

    fn deregister_global_memory_slot(&self, slot: &Arc<GlobalMemorySlot>) -> Result<()> {
        let mut state = self.shared.state.lock();
        let Some(tag_state) = state.get_mut(&slot.tag()) else {
            return Err(Error::NotFound {
                tag: slot.tag(),
                key: slot.key(),
            });
        };
        if !tag_state.resolved.contains_key(&slot.key()) {
            return Err(Error::NotFound {
                tag: slot.tag(),
                key: slot.key(),
            });
        }
        tag_state.pending_deregister.insert(slot.key());
        Ok(())
    }

    fn memcpy(
        &self,
        dst: SlotView<'_>,
        dst_offset: usize,
        src: SlotView<'_>,
        src_offset: usize,
        size: usize,
    ) -> Result<()> {
        let dst_slot = self.backing(dst)?;
        let src_slot = self.backing(src)?;

        let dst_end = dst_offset
            .checked_add(size)
            .filter(|end| *end <= dst_slot.size());
        let src_end = src_offset
            .checked_add(size)
            .filter(|end| *end <= src_slot.size());
        if dst_end.is_none() || src_end.is_none() {
            return Err(Error::InvalidArgument(format!(
                "copy of {size} bytes exceeds a slot bound (src {}+{src_offset}, dst {}+{dst_offset})",
                src_slot.size(),
                dst_slot.size()
            )));
        }

        let src_ptr = unsafe { src_slot.ptr().as_ptr().add(src_offset) };
        let dst_ptr = unsafe { dst_slot.ptr().as_ptr().add(dst_offset) };

        let src_range = src_ptr as usize..src_ptr as usize + size;
        let dst_range = dst_ptr as usize..dst_ptr as usize + size;
        if size > 0 && src_range.start < dst_range.end && dst_range.start < src_range.end {
            return Err(Error::InvalidArgument(
                "source and destination regions overlap".into(),
            ));
        }

        if size % 8 == 0 && src_ptr as usize % 8 == 0 && dst_ptr as usize % 8 == 0 {
            // Word-atomic path: this is how counter words shared with a
            // concurrently polling peer must be written.
            for word in 0..size / 8 {
                // Safety: both regions are in-bounds (checked above),
                // 8-aligned, and non-overlapping.
                unsafe {
                    let value = (*src_ptr.add(word * 8).cast::<AtomicU64>()).load(Ordering::Acquire);
                    (*dst_ptr.add(word * 8).cast::<AtomicU64>()).store(value, Ordering::Release);
                }
            }
        } else {
            // Safety: in-bounds and non-overlapping, per the checks above.
            unsafe { ptr::copy_nonoverlapping(src_ptr, dst_ptr, size) };
        }

        // Release increments after the data is in place: a peer that
        // observes the new counter value may read the payload.
        src_slot.record_messages_sent(1);
        dst_slot.record_messages_recv(1);
        Ok(())
    }

    fn query_memory_slot_updates(&self, _slot: &LocalMemorySlot) -> Result<()> {
        // Counters are shared atomics in this backend; every read is
        // already current.
        Ok(())
    }

    fn acquire_global_lock(&self, slot: &GlobalMemorySlot) -> Result<bool> {
        let word = self.lock_word(slot)?;
        Ok(word
            .compare_exchange(0, 1, Ordering::Acquire, Ordering::Relaxed)
            .is_ok())
    }

    fn release_global_lock(&self, slot: &GlobalMemorySlot) -> Result<()> {
        let word = self.lock_word(slot)?;
        if word
            .compare_exchange(1, 0, Ordering::Release, Ordering::Relaxed)
            .is_err()
        {
            protocol_violation(&format!(
                "release of a lock not held (tag {}, key {})",
                slot.tag(),
                slot.key()
            ));
        }
        Ok(())
    }
}
