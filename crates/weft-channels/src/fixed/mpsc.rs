//! Fixed-size multi-producer single-consumer channels.
//!
//! Two arbitration strategies:
//!
//! - [`locking`] - every producer targets one shared token buffer and
//!   serializes on the remote mutex word of the consumer's coordination
//!   buffer. Simple wiring, contended under load.
//! - [`nonlocking`] - every producer gets a private SPSC shard (its own
//!   token buffer on the consumer side and its own coordination pair);
//!   the consumer multiplexes across shards with a carried round-robin
//!   cursor. No producer-producer contention at all.

/// Producers arbitrated by the consumer's coordination lock word.
pub mod locking {
    use crate::base::{Base, EndpointState, HEAD_WORD_OFFSET};
    use std::sync::Arc;
    use weft::{
        CommunicationManager, Error, GlobalMemorySlot, LocalMemorySlot, Result, SlotView,
    };

    /// Producing endpoint of a locking fixed-size MPSC channel.
    ///
    /// The producer's own coordination buffer is a private mirror: both
    /// of its words are refreshed from the consumer's coordination
    /// buffer under the lock, since other producers move the head
    /// between this producer's pushes.
    #[derive(Debug)]
    pub struct Producer<M> {
        base: Base<M>,
        /// The consumer's token buffer, shared by all producers.
        token_buffer: Arc<GlobalMemorySlot>,
        /// The consumer's lockable coordination buffer.
        consumer_coordination: Arc<GlobalMemorySlot>,
    }

    impl<M: CommunicationManager> Producer<M> {
        /// Builds a producer endpoint. `coordination_buffer` is this
        /// producer's private mirror buffer; it does not need to be
        /// exchanged.
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
        /// Returns `Ok(false)` when the lock is contended or the channel
        /// is full; the caller retries later. Successful pushes are
        /// totally ordered by their lock acquisitions.
        pub fn push(&mut self, source: &LocalMemorySlot) -> Result<bool> {
            self.base.ensure_active();
            let token_size = self.base.token_size();
            if source.size() < token_size {
                return Err(Error::InvalidArgument(format!(
                    "source slot holds {} bytes, token needs {token_size}",
                    source.size()
                )));
            }

            if !self
                .base
                .comm()
                .acquire_global_lock(&self.consumer_coordination)?
            {
                return Ok(false);
            }

            // Everything between acquire and release; errors must not
            // leak the lock.
            let pushed = self.push_locked(source);
            self.base
                .comm()
                .release_global_lock(&self.consumer_coordination)?;
            pushed
        }

        fn push_locked(&mut self, source: &LocalMemorySlot) -> Result<bool> {
            // Mirror the consumer's head and tail words: other producers
            // have moved the head since we last held the lock.
            self.base.comm().memcpy(
                SlotView::Local(self.base.coordination()),
                HEAD_WORD_OFFSET,
                SlotView::Global(&self.consumer_coordination),
                HEAD_WORD_OFFSET,
                16,
            )?;

            if self.base.circ().is_full() {
                return Ok(false);
            }

            let token_size = self.base.token_size();
            let position = self.base.circ().head_position() as usize;
            self.base.comm().memcpy(
                SlotView::Global(&self.token_buffer),
                position * token_size,
                SlotView::Local(source),
                0,
                token_size,
            )?;

            self.base.circ().advance_head(1);
            self.base.comm().memcpy(
                SlotView::Global(&self.consumer_coordination),
                HEAD_WORD_OFFSET,
                SlotView::Local(self.base.coordination()),
                HEAD_WORD_OFFSET,
                8,
            )?;
            Ok(true)
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

        /// Marks the endpoint as draining. Further pushes are fatal.
        pub fn begin_drain(&mut self) {
            self.base.begin_drain();
        }

        /// Marks the endpoint destroyed after the final fence.
        pub fn destroy(&mut self) {
            self.base.destroy();
        }
    }

    /// Consuming endpoint of a locking fixed-size MPSC channel.
    ///
    /// The consumer's coordination buffer *is* the shared channel state:
    /// producers pull both counter words from it under the lock, so a
    /// pop only advances the tail word locally and needs no remote
    /// publication.
    #[derive(Debug)]
    pub struct Consumer<M> {
        base: Base<M>,
        token_buffer: Arc<LocalMemorySlot>,
    }

    impl<M: CommunicationManager> Consumer<M> {
        /// Builds the consumer endpoint over its own token storage and
        /// its lockable (exchanged) coordination buffer.
        pub fn new(
            comm: M,
            token_buffer: Arc<LocalMemorySlot>,
            coordination_buffer: Arc<LocalMemorySlot>,
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
            Ok(Self { base, token_buffer })
        }

        /// Position of the `n`-th unconsumed token, or `None` when fewer
        /// than `n + 1` tokens are available.
        pub fn peek(&mut self, n: usize) -> Result<Option<usize>> {
            self.base.ensure_active();
            self.base.refresh()?;
            let circ = self.base.circ();
            if circ.depth() <= n as u64 {
                return Ok(None);
            }
            Ok(Some(
                ((circ.tail_position() + n as u64) % circ.capacity()) as usize,
            ))
        }

        /// Discards the `n` oldest tokens. Returns `Ok(false)` when
        /// fewer than `n` are available.
        pub fn pop(&mut self, n: usize) -> Result<bool> {
            self.base.ensure_active();
            if n == 0 {
                return Err(Error::InvalidArgument("cannot pop zero tokens".into()));
            }
            self.base.refresh()?;
            if self.base.circ().depth() < n as u64 {
                return Ok(false);
            }
            // The tail word lives in our exchanged coordination buffer;
            // producers observe the advance on their next locked pull.
            self.base.circ().advance_tail(n as u64);
            Ok(true)
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

        /// Marks the endpoint as draining. Further peeks/pops are fatal.
        pub fn begin_drain(&mut self) {
            self.base.begin_drain();
        }

        /// Marks the endpoint destroyed after the final fence.
        pub fn destroy(&mut self) {
            self.base.destroy();
        }
    }
}

/// Per-producer SPSC shards multiplexed by the consumer.
pub mod nonlocking {
    use crate::fixed::spsc;
    use std::sync::Arc;
    use weft::{CommunicationManager, Error, LocalMemorySlot, Result};

    /// A non-locking MPSC producer is exactly an SPSC producer over its
    /// private shard.
    pub type Producer<M> = spsc::Producer<M>;

    /// Consuming endpoint multiplexing one SPSC shard per producer.
    #[derive(Debug)]
    pub struct Consumer<M> {
        shards: Vec<spsc::Consumer<M>>,
        /// Next shard to offer a turn; carried across peeks so a busy
        /// shard cannot starve the others.
        cursor: usize,
    }

    impl<M: CommunicationManager> Consumer<M> {
        /// Builds the consumer over one SPSC consumer endpoint per
        /// producer, indexed by producer id.
        pub fn new(shards: Vec<spsc::Consumer<M>>) -> Result<Self> {
            if shards.is_empty() {
                return Err(Error::InvalidArgument(
                    "a channel needs at least one producer shard".into(),
                ));
            }
            Ok(Self { shards, cursor: 0 })
        }

        /// Number of producers.
        #[inline]
        pub fn producer_count(&self) -> usize {
            self.shards.len()
        }

        /// Finds the next shard with an available token, round-robin
        /// from the carried cursor. Returns the producer id and the
        /// token's position in that producer's shard buffer.
        ///
        /// A producer with tokens available waits at most `P - 1`
        /// consumer steps while other shards are served.
        pub fn peek(&mut self) -> Result<Option<(usize, usize)>> {
            let count = self.shards.len();
            for step in 0..count {
                let producer = (self.cursor + step) % count;
                if let Some(position) = self.shards[producer].peek(0)? {
                    self.cursor = (producer + 1) % count;
                    return Ok(Some((producer, position)));
                }
            }
            Ok(None)
        }

        /// Discards the oldest token of the given producer's shard and
        /// reports the space to that producer only.
        pub fn pop(&mut self, producer: usize) -> Result<bool> {
            let shard = self.shards.get_mut(producer).ok_or_else(|| {
                Error::InvalidArgument(format!("no producer {producer} in this channel"))
            })?;
            shard.pop(1)
        }

        /// Tokens available across all shards, as last observed.
        pub fn depth(&self) -> u64 {
            self.shards.iter().map(spsc::Consumer::depth).sum()
        }

        /// Re-reads every producer's push progress.
        pub fn update_depth(&mut self) -> Result<()> {
            for shard in &mut self.shards {
                shard.update_depth()?;
            }
            Ok(())
        }

        /// The shard buffer peek positions of `producer` index into.
        pub fn token_buffer(&self, producer: usize) -> Result<&Arc<LocalMemorySlot>> {
            self.shards
                .get(producer)
                .map(spsc::Consumer::token_buffer)
                .ok_or_else(|| {
                    Error::InvalidArgument(format!("no producer {producer} in this channel"))
                })
        }

        /// Direct access to one shard, e.g. for per-producer depth.
        pub fn shard(&self, producer: usize) -> Result<&spsc::Consumer<M>> {
            self.shards.get(producer).ok_or_else(|| {
                Error::InvalidArgument(format!("no producer {producer} in this channel"))
            })
        }

        /// Marks every shard as draining. Further peeks/pops are fatal.
        pub fn begin_drain(&mut self) {
            for shard in &mut self.shards {
                shard.begin_drain();
            }
        }

        /// Marks every shard destroyed after the final fence.
        pub fn destroy(&mut self) {
            for shard in &mut self.shards {
                shard.destroy();
            }
        }
    }
}
