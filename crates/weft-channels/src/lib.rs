//! weft-channels - token channels over one-sided memory operations.
//!
//! Builds fixed- and variable-size single- and multi-producer
//! single-consumer channels from three primitives a [`weft`]
//! communication manager provides: one-sided `memcpy`, remotely-written
//! counter words, and a remote mutex word. The channel code itself never
//! suspends and owns no thread; `push`/`peek`/`pop` returning `false` or
//! `None` is the normal full/empty signal and the caller spins, backs
//! off, or schedules around it.
//!
//! Channel endpoints are generic over the
//! [`weft::CommunicationManager`] capability set, so backend selection
//! happens at construction and the push/pop hot path is monomorphic.
//!
//! # Layout
//!
//! - [`circular`] - the head/tail counter algebra every channel shares
//! - [`base`] - buffer sizing contracts, the 24-byte coordination-buffer
//!   layout, endpoint lifecycle
//! - [`fixed`] - fixed-size tokens: [`fixed::spsc`], and
//!   [`fixed::mpsc`] in locking and non-locking (shard-per-producer)
//!   variants
//! - [`variable`] - `(offset, size)` control records over a separate
//!   payload byte buffer, in the same three variants
//!
//! # Wiring a channel
//!
//! Each side allocates its buffers through a memory manager, zeroes its
//! coordination buffers with [`base::initialize_coordination_buffer`],
//! publishes them with `exchange_global_memory_slots`, fences the tag,
//! resolves the peer's slots, and only then constructs its endpoint.
//! Teardown runs in reverse: deregister the global slots, fence, then
//! drop endpoints and free the local slots.

pub mod base;
pub mod circular;
pub mod fixed;
mod invariants;
pub mod variable;

pub use base::{
    coordination_buffer_size, initialize_coordination_buffer, token_buffer_size, EndpointState,
    COORDINATION_BUFFER_SIZE, HEAD_WORD_OFFSET, LOCK_WORD_OFFSET, TAIL_WORD_OFFSET,
};
pub use circular::CircularBuffer;
pub use variable::{ControlRecord, CONTROL_RECORD_SIZE};
