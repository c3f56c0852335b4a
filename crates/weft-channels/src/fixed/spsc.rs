//! Fixed-size single-producer single-consumer channel.
//!
//! Wiring (each side allocates, initializes, exchanges, fences before
//! constructing its endpoint):
//!
//! - the consumer owns the token buffer and a coordination buffer, both
//!   promoted globally;
//! - the producer owns a coordination buffer, promoted globally.
//!
//! The producer's circular-buffer view runs over its *own* coordination
//! buffer: it writes the head word locally and the consumer pushes tail
//! updates into the tail word remotely. Symmetrically, the consumer's
//! view runs over its own buffer, whose head word the producer updates
//! remotely. Every counter word therefore has exactly one writer, and
//! ordering follows from the transport's per-pair FIFO completion rule:
//! a head update is sent strictly after the token it publishes.

use crate::base::{Base, EndpointState, HEAD_WORD_OFFSET, TAIL_WORD_OFFSET};
use std::sync::Arc;
use weft::{
    CommunicationManager, Error, GlobalMemorySlot, LocalMemorySlot, Result, SlotView,
};

/// Producing endpoint of a fixed-size SPSC channel.
#[derive(Debug)]
pub struct Producer<M> {
    base: Base<M>,
    /// The consumer's token buffer.
    token_buffer: Arc<GlobalMemorySlot>,
    /// The consumer's coordination buffer; head updates land here.
    consumer_coordination: Arc<GlobalMemorySlot>,
}

impl<M: CommunicationManager> Producer<M> {
    /// Builds the producer endpoint.
    ///
    /// `coordination_buffer` is this producer's own initialized
    /// coordination buffer (already exchanged so the consumer can write
    /// its tail word); `token_buffer` and `consumer_coordination` are
    /// the consumer's exchanged slots.
    pub fn new(
        comm: M,
        token_buffer: Arc<GlobalMemorySlot>,
        coordination_buffer: Arc<LocalMemorySlot>,
        consumer_coordination: Arc<GlobalMemorySlot>,
        token_size: usize,
        capacity: usize,
    ) -> Result<Self> {
        Ok(Self {
            base: Base::new(comm, coordination_buffer, token_size, capacity)?,
            token_buffer,
            consumer_coordination,
        })
    }

    /// Copies one token out of `source` into the channel.
    ///
    /// Returns `Ok(false)` when the channel is full - not an error; the
    /// caller retries after the consumer makes progress.
    pub fn push(&mut self, source: &LocalMemorySlot) -> Result<bool> {
        self.base.ensure_active();
        let token_size = self.base.token_size();
        if source.size() < token_size {
            return Err(Error::InvalidArgument(format!(
                "source slot holds {} bytes, token needs {token_size}",
                source.size()
            )));
        }

        // The consumer writes pop updates into our tail word; pull them
        // before judging fullness.
        self.base.refresh()?;
        if self.base.circ().is_full() {
            return Ok(false);
        }

        let position = self.base.circ().head_position() as usize;
        self.base.comm().memcpy(
            SlotView::Global(&self.token_buffer),
            position * token_size,
            SlotView::Local(source),
            0,
            token_size,
        )?;

        // Advance locally, then publish: the transport's per-pair FIFO
        // rule delivers the head update after the token write above.
        self.base.circ().advance_head(1);
        self.publish_head()
    }

    fn publish_head(&self) -> Result<bool> {
        self.base.comm().memcpy(
            SlotView::Global(&self.consumer_coordination),
            HEAD_WORD_OFFSET,
            SlotView::Local(self.base.coordination()),
            HEAD_WORD_OFFSET,
            8,
        )?;
        Ok(true)
    }

    /// Re-reads the consumer's pop progress.
    pub fn update_depth(&mut self) -> Result<()> {
        self.base.ensure_active();
        self.base.refresh()
    }

    /// Tokens pushed but not yet popped, as last observed.
    #[inline]
    pub fn depth(&self) -> u64 {
        self.base.circ().depth()
    }

    /// `true` when the last observed state has no room.
    #[inline]
    pub fn is_full(&self) -> bool {
        self.base.circ().is_full()
    }

    /// `true` when the last observed state has no tokens.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.base.circ().is_empty()
    }

    /// Channel capacity in tokens.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.base.capacity()
    }

    /// Bytes per token.
    #[inline]
    pub fn token_size(&self) -> usize {
        self.base.token_size()
    }

    /// Current lifecycle state.
    #[inline]
    pub fn state(&self) -> EndpointState {
        self.base.state()
    }

    /// Marks the endpoint as draining once its slots' deregistration has
    /// been requested. Further pushes are fatal.
    pub fn begin_drain(&mut self) {
        self.base.begin_drain();
    }

    /// Marks the endpoint destroyed after the final fence.
    pub fn destroy(&mut self) {
        self.base.destroy();
    }
}

/// Consuming endpoint of a fixed-size SPSC channel.
#[derive(Debug)]
pub struct Consumer<M> {
    base: Base<M>,
    /// This consumer's own token storage; peek positions index into it.
    token_buffer: Arc<LocalMemorySlot>,
    /// The producer's coordination buffer; tail updates land here.
    producer_coordination: Arc<GlobalMemorySlot>,
}

impl<M: CommunicationManager> Consumer<M> {
    /// Builds the consumer endpoint over its own token and coordination
    /// buffers and the producer's exchanged coordination slot.
    pub fn new(
        comm: M,
        token_buffer: Arc<LocalMemorySlot>,
        coordination_buffer: Arc<LocalMemorySlot>,
        producer_coordination: Arc<GlobalMemorySlot>,
        token_size: usize,
        capacity: usize,
    ) -> Result<Self> {
        let needed = crate::base::token_buffer_size(token_size, capacity)?;
        let base = Base::new(comm, coordination_buffer, token_size, capacity)?;
        if token_buffer.size() < needed {
            return Err(Error::InvalidArgument(format!(
                "token buffer holds {} bytes, channel needs {needed}",
                token_buffer.size()
            )));
        }
        Ok(Self {
            base,
            token_buffer,
            producer_coordination,
        })
    }

    /// Position of the `n`-th unconsumed token in the token buffer, or
    /// `None` when fewer than `n + 1` tokens are available.
    ///
    /// Peeking does not consume; repeated peeks see the same token until
    /// a pop.
    pub fn peek(&mut self, n: usize) -> Result<Option<usize>> {
        self.base.ensure_active();
        // Producers write push updates into our head word.
        self.base.refresh()?;
        let circ = self.base.circ();
        if circ.depth() <= n as u64 {
            return Ok(None);
        }
        Ok(Some(
            ((circ.tail_position() + n as u64) % circ.capacity()) as usize,
        ))
    }

    /// Discards the `n` oldest tokens and reports the space to the
    /// producer. Returns `Ok(false)` when fewer than `n` are available.
    pub fn pop(&mut self, n: usize) -> Result<bool> {
        self.base.ensure_active();
        if n == 0 {
            return Err(Error::InvalidArgument("cannot pop zero tokens".into()));
        }
        self.base.refresh()?;
        if self.base.circ().depth() < n as u64 {
            return Ok(false);
        }

        self.base.circ().advance_tail(n as u64);
        self.publish_tail()?;
        Ok(true)
    }

    fn publish_tail(&self) -> Result<()> {
        self.base.comm().memcpy(
            SlotView::Global(&self.producer_coordination),
            TAIL_WORD_OFFSET,
            SlotView::Local(self.base.coordination()),
            TAIL_WORD_OFFSET,
            8,
        )
    }

    /// Re-reads the producers' push progress.
    pub fn update_depth(&mut self) -> Result<()> {
        self.base.ensure_active();
        self.base.refresh()
    }

    /// Tokens available to pop, as last observed.
    #[inline]
    pub fn depth(&self) -> u64 {
        self.base.circ().depth()
    }

    /// `true` when the last observed state has no tokens.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.base.circ().is_empty()
    }

    /// `true` when the last observed state has no room.
    #[inline]
    pub fn is_full(&self) -> bool {
        self.base.circ().is_full()
    }

    /// Channel capacity in tokens.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.base.capacity()
    }

    /// Bytes per token.
    #[inline]
    pub fn token_size(&self) -> usize {
        self.base.token_size()
    }

    /// The token storage peek positions index into.
    #[inline]
    pub fn token_buffer(&self) -> &Arc<LocalMemorySlot> {
        &self.token_buffer
    }

    /// Current lifecycle state.
    #[inline]
    pub fn state(&self) -> EndpointState {
        self.base.state()
    }

    /// Marks the endpoint as draining once its slots' deregistration has
    /// been requested. Further peeks and pops are fatal.
    pub fn begin_drain(&mut self) {
        self.base.begin_drain();
    }

    /// Marks the endpoint destroyed after the final fence.
    pub fn destroy(&mut self) {
        self.base.destroy();
    }
}
