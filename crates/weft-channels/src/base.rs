//! Shared channel plumbing: buffer sizing contracts, the coordination
//! buffer layout, and the endpoint lifecycle.
//!
//! A coordination buffer is the 24-byte region a channel endpoint shares
//! with its peer. It carries three logically distinct single-writer
//! words:
//!
//! | offset | word | written by |
//! |---|---|---|
//! | 0 | head | the producing side (remotely, for a consumer's buffer) |
//! | 8 | tail | the consuming side (remotely, for a producer's buffer) |
//! | 16 | lock | whichever caller wins the acquire |
//!
//! The layout is transport-invariant: three little-endian `u64` words,
//! all zero after initialization.

use crate::circular::CircularBuffer;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use weft::{protocol_violation, CommunicationManager, Error, LocalMemorySlot, Result};

/// Size in bytes of a coordination buffer (head, tail, lock words).
pub const COORDINATION_BUFFER_SIZE: usize = 24;

/// Byte offset of the head counter word.
pub const HEAD_WORD_OFFSET: usize = 0;

/// Byte offset of the tail counter word.
pub const TAIL_WORD_OFFSET: usize = 8;

/// Byte offset of the remote-mutex word.
pub const LOCK_WORD_OFFSET: usize = 16;

/// Bytes a coordination buffer occupies, for allocation sizing.
#[inline]
pub fn coordination_buffer_size() -> usize {
    COORDINATION_BUFFER_SIZE
}

/// Bytes a token buffer occupies for `capacity` tokens of `token_size`
/// bytes each. Both factors must be nonzero.
pub fn token_buffer_size(token_size: usize, capacity: usize) -> Result<usize> {
    if token_size == 0 || capacity == 0 {
        return Err(Error::InvalidArgument(
            "token size and capacity must both be nonzero".into(),
        ));
    }
    token_size.checked_mul(capacity).ok_or_else(|| {
        Error::InvalidArgument(format!(
            "token buffer of {capacity} x {token_size} bytes overflows"
        ))
    })
}

/// Checks that a slot can hold a coordination buffer: at least 24 bytes,
/// 8-aligned so the words can be addressed atomically.
fn check_coordination_slot(slot: &LocalMemorySlot) -> Result<()> {
    if slot.size() < COORDINATION_BUFFER_SIZE {
        return Err(Error::InvalidArgument(format!(
            "coordination buffer needs {COORDINATION_BUFFER_SIZE} bytes, slot has {}",
            slot.size()
        )));
    }
    if slot.ptr().as_ptr() as usize % 8 != 0 {
        return Err(Error::InvalidArgument(
            "coordination buffer must be 8-byte aligned".into(),
        ));
    }
    Ok(())
}

/// Zeroes the head, tail, and lock words of a coordination buffer.
///
/// Must run on every coordination buffer before it is exchanged.
pub fn initialize_coordination_buffer(slot: &LocalMemorySlot) -> Result<()> {
    check_coordination_slot(slot)?;
    for offset in [HEAD_WORD_OFFSET, TAIL_WORD_OFFSET, LOCK_WORD_OFFSET] {
        // Safety: in-bounds and 8-aligned per the check above; the words
        // are only ever accessed atomically.
        unsafe {
            (*slot.ptr().as_ptr().add(offset).cast::<AtomicU64>()).store(0, Ordering::Release);
        }
    }
    Ok(())
}

/// Borrows the head and tail words of a checked coordination slot.
pub(crate) fn coordination_words(
    slot: &LocalMemorySlot,
) -> Result<(NonNull<AtomicU64>, NonNull<AtomicU64>)> {
    check_coordination_slot(slot)?;
    let base = slot.ptr().as_ptr();
    // Safety: in-bounds and aligned per the check above.
    unsafe {
        Ok((
            NonNull::new_unchecked(base.add(HEAD_WORD_OFFSET).cast::<AtomicU64>()),
            NonNull::new_unchecked(base.add(TAIL_WORD_OFFSET).cast::<AtomicU64>()),
        ))
    }
}

/// Lifecycle of a channel endpoint.
///
/// Allocation, exchange, and the first fence all happen before an
/// endpoint value exists, so a fresh endpoint starts out `Active`.
/// `Draining` is entered once its slots' deregistration has been
/// requested, `Destroyed` after the final fence retires them. Moving
/// backwards, skipping `Draining`, or operating on a non-active endpoint
/// is fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointState {
    /// push/peek/pop are permitted.
    Active,
    /// Deregistration requested; only teardown may proceed.
    Draining,
    /// Final fence completed; the endpoint is inert.
    Destroyed,
}

/// State shared by every channel endpoint: the communication manager,
/// the endpoint's own coordination buffer with its circular-buffer view,
/// and the token-buffer sizing contract.
#[derive(Debug)]
pub(crate) struct Base<M> {
    comm: M,
    coordination: Arc<LocalMemorySlot>,
    circ: CircularBuffer,
    token_size: usize,
    capacity: usize,
    state: EndpointState,
}

impl<M: CommunicationManager> Base<M> {
    pub(crate) fn new(
        comm: M,
        coordination: Arc<LocalMemorySlot>,
        token_size: usize,
        capacity: usize,
    ) -> Result<Self> {
        // Re-validates the same contract as token_buffer_size so an
        // endpoint can never outlive a sizing mistake.
        token_buffer_size(token_size, capacity)?;
        let (head, tail) = coordination_words(&coordination)?;
        // Safety: the Arc held alongside keeps the words alive; all
        // access is atomic.
        let circ = unsafe { CircularBuffer::new(capacity as u64, head, tail) };
        log::trace!("channel endpoint up: {capacity} tokens of {token_size} bytes");
        Ok(Self {
            comm,
            coordination,
            circ,
            token_size,
            capacity,
            state: EndpointState::Active,
        })
    }

    #[inline]
    pub(crate) fn comm(&self) -> &M {
        &self.comm
    }

    #[inline]
    pub(crate) fn coordination(&self) -> &Arc<LocalMemorySlot> {
        &self.coordination
    }

    #[inline]
    pub(crate) fn circ(&self) -> &CircularBuffer {
        &self.circ
    }

    #[inline]
    pub(crate) fn token_size(&self) -> usize {
        self.token_size
    }

    #[inline]
    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub(crate) fn state(&self) -> EndpointState {
        self.state
    }

    /// Pulls any asynchronously-delivered counter updates for the
    /// endpoint's own coordination buffer.
    pub(crate) fn refresh(&self) -> Result<()> {
        self.comm.query_memory_slot_updates(&self.coordination)
    }

    /// Fatal unless the endpoint is still active.
    pub(crate) fn ensure_active(&self) {
        if self.state != EndpointState::Active {
            protocol_violation(&format!(
                "channel endpoint operated on while {:?}",
                self.state
            ));
        }
    }

    /// `Active -> Draining`; any other transition is fatal.
    pub(crate) fn begin_drain(&mut self) {
        if self.state != EndpointState::Active {
            protocol_violation(&format!("draining an endpoint that is {:?}", self.state));
        }
        log::debug!("channel endpoint draining");
        self.state = EndpointState::Draining;
    }

    /// `Draining -> Destroyed`; any other transition is fatal.
    pub(crate) fn destroy(&mut self) {
        if self.state != EndpointState::Draining {
            protocol_violation(&format!("destroying an endpoint that is {:?}", self.state));
        }
        self.state = EndpointState::Destroyed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizing_contracts() {
        assert_eq!(coordination_buffer_size(), 24);
        assert_eq!(token_buffer_size(4, 16).unwrap(), 64);
        assert!(token_buffer_size(0, 16).is_err());
        assert!(token_buffer_size(4, 0).is_err());
        assert!(token_buffer_size(usize::MAX, 2).is_err());
    }

    #[test]
    fn initialization_zeroes_all_words() {
        let space = Arc::new(weft::MemorySpace::new("scratch", 64));
        // A u64 array guarantees the 8-byte alignment the layout needs.
        let mut words = [u64::MAX; 3];
        // Safety: `words` outlives the slot within this test.
        let slot = unsafe {
            weft::LocalMemorySlot::new(
                NonNull::new(words.as_mut_ptr().cast::<u8>()).unwrap(),
                COORDINATION_BUFFER_SIZE,
                space,
                weft::SlotProvenance {
                    manager: 0,
                    allocated: false,
                },
            )
        };

        initialize_coordination_buffer(&slot).unwrap();
        assert_eq!(words_of(&slot), [0, 0, 0]);
    }

    fn words_of(slot: &weft::LocalMemorySlot) -> [u64; 3] {
        let base = slot.ptr().as_ptr();
        // Safety: 24 readable bytes, 8-aligned.
        unsafe {
            [
                (*base.cast::<AtomicU64>()).load(Ordering::Acquire),
                (*base.add(8).cast::<AtomicU64>()).load(Ordering::Acquire),
                (*base.add(16).cast::<AtomicU64>()).load(Ordering::Acquire),
            ]
        }
    }

    #[test]
    fn undersized_coordination_slot_is_rejected() {
        let space = Arc::new(weft::MemorySpace::new("scratch", 64));
        let mut words = [0u64; 2];
        let slot = unsafe {
            weft::LocalMemorySlot::new(
                NonNull::new(words.as_mut_ptr().cast::<u8>()).unwrap(),
                16,
                space,
                weft::SlotProvenance {
                    manager: 0,
                    allocated: false,
                },
            )
        };
        assert!(matches!(
            initialize_coordination_buffer(&slot),
            Err(Error::InvalidArgument(_))
        ));
    }
}
