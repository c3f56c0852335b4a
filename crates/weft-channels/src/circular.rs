//! Circular-buffer algebra over a pair of counter words.
//!
//! The head and tail counters are unbounded `u64` sequence numbers, not
//! wrapped indices; only the derived *positions* wrap at `capacity`.
//! With 2^64 values the counters never wrap in practice, which rules out
//! ABA confusion between a full and an empty buffer.
//!
//! The counters live inside a coordination buffer rather than in this
//! struct because the paired endpoint updates one of them *remotely*
//! through one-sided copies:
//!
//! - the endpoint that owns this view writes exactly one counter (head
//!   for a producer, tail for a consumer) and only reads the other;
//! - the peer's copies land word-atomically, so an acquire load here
//!   observes them safely.
//!
//! Any advance that would break `0 <= depth <= capacity` aborts the
//! process: the counter would otherwise be published to the peer and
//! corrupt the channel beyond repair.

use crate::invariants::{debug_assert_counter_monotonic, debug_assert_position_in_bounds};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering};
use weft::depth_violation;

/// View over `{head, tail}` counter words with wrap arithmetic.
#[derive(Debug)]
pub struct CircularBuffer {
    capacity: u64,
    head: NonNull<AtomicU64>,
    tail: NonNull<AtomicU64>,
}

// Safety: the words are only ever accessed atomically; the single-writer
// protocol above governs who stores to which word.
unsafe impl Send for CircularBuffer {}

impl CircularBuffer {
    /// Creates a view over two counter words.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    ///
    /// # Safety
    ///
    /// Both pointers must stay valid for the lifetime of the view and be
    /// accessed only atomically (which every communication backend's
    /// word-aligned copy path guarantees).
    pub unsafe fn new(capacity: u64, head: NonNull<AtomicU64>, tail: NonNull<AtomicU64>) -> Self {
        assert!(capacity > 0, "circular buffer capacity cannot be zero");
        Self {
            capacity,
            head,
            tail,
        }
    }

    #[inline]
    fn head_value(&self) -> u64 {
        // Safety: valid per the constructor contract.
        unsafe { self.head.as_ref() }.load(Ordering::Acquire)
    }

    #[inline]
    fn tail_value(&self) -> u64 {
        // Safety: valid per the constructor contract.
        unsafe { self.tail.as_ref() }.load(Ordering::Acquire)
    }

    /// Maximum number of unconsumed tokens.
    #[inline]
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Tokens currently pushed but not yet popped.
    #[inline]
    pub fn depth(&self) -> u64 {
        // Both counters only ever advance and each advance records a
        // completed fact, so any interleaving of these two loads yields
        // a valid (possibly slightly stale) depth.
        let tail = self.tail_value();
        let head = self.head_value();
        head.wrapping_sub(tail)
    }

    /// `true` when no token is available.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.depth() == 0
    }

    /// `true` when no space is available.
    #[inline]
    pub fn is_full(&self) -> bool {
        self.depth() >= self.capacity
    }

    /// Slot position the next push writes to.
    #[inline]
    pub fn head_position(&self) -> u64 {
        let position = self.head_value() % self.capacity;
        debug_assert_position_in_bounds!(position, self.capacity);
        position
    }

    /// Slot position the next pop reads from.
    #[inline]
    pub fn tail_position(&self) -> u64 {
        let position = self.tail_value() % self.capacity;
        debug_assert_position_in_bounds!(position, self.capacity);
        position
    }

    /// Advances the head counter by `n` pushed tokens.
    ///
    /// Aborts the process when the advance would exceed capacity.
    pub fn advance_head(&self, n: u64) {
        let head = self.head_value();
        let depth = head.wrapping_sub(self.tail_value());
        if depth.saturating_add(n) > self.capacity {
            depth_violation(&format!(
                "advancing head by {n} with depth {depth} of capacity {}",
                self.capacity
            ));
        }
        let new_head = head + n;
        debug_assert_counter_monotonic!("head", head, new_head);
        // Safety: valid per the constructor contract; this endpoint is
        // the only writer of the head word.
        unsafe { self.head.as_ref() }.store(new_head, Ordering::Release);
    }

    /// Advances the tail counter by `n` popped tokens.
    ///
    /// Aborts the process when fewer than `n` tokens are available.
    pub fn advance_tail(&self, n: u64) {
        let tail = self.tail_value();
        let depth = self.head_value().wrapping_sub(tail);
        if n > depth {
            depth_violation(&format!(
                "advancing tail by {n} with only {depth} tokens available"
            ));
        }
        let new_tail = tail + n;
        debug_assert_counter_monotonic!("tail", tail, new_tail);
        // Safety: valid per the constructor contract; this endpoint is
        // the only writer of the tail word.
        unsafe { self.tail.as_ref() }.store(new_tail, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CAPACITY: u64 = 5;

    struct Counters {
        head: AtomicU64,
        tail: AtomicU64,
    }

    fn buffer(counters: &Counters) -> CircularBuffer {
        // Safety: the words outlive the view and are only accessed
        // atomically.
        unsafe {
            CircularBuffer::new(
                CAPACITY,
                NonNull::from(&counters.head),
                NonNull::from(&counters.tail),
            )
        }
    }

    fn fresh() -> Counters {
        Counters {
            head: AtomicU64::new(0),
            tail: AtomicU64::new(0),
        }
    }

    #[test]
    fn starts_empty() {
        let counters = fresh();
        let b = buffer(&counters);
        assert!(b.is_empty());
        assert!(!b.is_full());
        assert_eq!(b.depth(), 0);
    }

    #[test]
    fn advance_moves_positions() {
        let counters = fresh();
        let b = buffer(&counters);
        assert_eq!(b.head_position(), 0);
        assert_eq!(b.tail_position(), 0);

        b.advance_head(2);
        assert_eq!(b.head_position(), 2);
        assert_eq!(b.tail_position(), 0);

        b.advance_tail(2);
        assert_eq!(b.head_position(), 2);
        assert_eq!(b.tail_position(), 2);
    }

    #[test]
    fn positions_wrap_at_capacity() {
        let counters = fresh();
        let b = buffer(&counters);
        for _ in 0..CAPACITY * 2 {
            b.advance_head(1);
            b.advance_tail(1);
        }
        assert_eq!(b.head_position(), (CAPACITY * 2) % CAPACITY);
        assert_eq!(b.tail_position(), (CAPACITY * 2) % CAPACITY);
    }

    #[test]
    fn depth_tracks_pushes_minus_pops() {
        let counters = fresh();
        let b = buffer(&counters);

        for round in 0..2 {
            b.advance_head(CAPACITY);
            for i in 0..CAPACITY {
                assert_eq!(b.depth(), CAPACITY - i, "round {round}");
                b.advance_tail(1);
            }
        }
        assert!(b.is_empty());
    }

    #[test]
    fn fills_at_capacity() {
        let counters = fresh();
        let b = buffer(&counters);
        for _ in 0..CAPACITY {
            b.advance_head(1);
        }
        assert!(b.is_full());
        assert!(!b.is_empty());
    }

    #[test]
    fn capacity_one_alternates() {
        let counters = fresh();
        // Safety: as in `buffer`.
        let b = unsafe {
            CircularBuffer::new(
                1,
                NonNull::from(&counters.head),
                NonNull::from(&counters.tail),
            )
        };
        for _ in 0..3 {
            assert!(b.is_empty());
            b.advance_head(1);
            assert!(b.is_full());
            assert_eq!(b.head_position(), 0);
            b.advance_tail(1);
        }
    }

    #[test]
    #[should_panic(expected = "depth violation")]
    fn over_advancing_head_is_fatal() {
        let counters = fresh();
        let b = buffer(&counters);
        b.advance_head(CAPACITY + 1);
    }

    #[test]
    #[should_panic(expected = "depth violation")]
    fn advancing_tail_past_head_is_fatal() {
        let counters = fresh();
        let b = buffer(&counters);
        b.advance_head(1);
        b.advance_tail(2);
    }

    #[test]
    #[should_panic(expected = "depth violation")]
    fn head_cannot_creep_past_capacity() {
        let counters = fresh();
        let b = buffer(&counters);
        for _ in 0..=CAPACITY {
            b.advance_head(1);
        }
    }
}
