//! Variable-size multi-producer single-consumer channels.
//!
//! The same two arbitration strategies as the fixed-size flavor: a
//! remote mutex serializing producers over one shared buffer pair, or a
//! private SPSC shard pair per producer.

/// Producers arbitrated by the consumer's control-coordination lock word.
pub mod locking {
    use crate::base::{Base, EndpointState, HEAD_WORD_OFFSET};
    use crate::invariants::debug_assert_record_in_payload;
    use crate::variable::{ControlRecord, PayloadHalf, CONTROL_RECORD_SIZE};
    use std::ops::Range;
    use std::sync::Arc;
    use weft::{
        CommunicationManager, Error, GlobalMemorySlot, LocalMemorySlot, Result, SlotView,
    };

    /// Producing endpoint of a locking variable-size MPSC channel.
    ///
    /// Both of the producer's coordination buffers are private mirrors
    /// refreshed from the consumer's buffers under the lock.
    #[derive(Debug)]
    pub struct Producer<M> {
        base: Base<M>,
        payload: PayloadHalf,
        control_buffer: Arc<GlobalMemorySlot>,
        payload_buffer: Arc<GlobalMemorySlot>,
        /// Lockable; also receives the control head.
        consumer_control_coordination: Arc<GlobalMemorySlot>,
        consumer_payload_coordination: Arc<GlobalMemorySlot>,
        record_staging: Arc<LocalMemorySlot>,
    }

    impl<M: CommunicationManager> Producer<M> {
        /// Builds a producer endpoint. The two coordination buffers are
        /// this producer's private mirrors and do not need to be
        /// exchanged.
        pub fn new(
            comm: M,
            control_buffer: Arc<GlobalMemorySlot>,
            payload_buffer: Arc<GlobalMemorySlot>,
            control_coordination: Arc<LocalMemorySlot>,
            payload_coordination: Arc<LocalMemorySlot>,
            consumer_control_coordination: Arc<GlobalMemorySlot>,
            consumer_payload_coordination: Arc<GlobalMemorySlot>,
            record_staging: Arc<LocalMemorySlot>,
            message_capacity: usize,
            payload_capacity: usize,
        ) -> Result<Self> {
            if record_staging.size() < CONTROL_RECORD_SIZE {
                return Err(Error::InvalidArgument(format!(
                    "record staging slot holds {} bytes, a record needs {CONTROL_RECORD_SIZE}",
                    record_staging.size()
                )));
            }
            Ok(Self {
                base: Base::new(
                    comm,
                    control_coordination,
                    CONTROL_RECORD_SIZE,
                    message_capacity,
                )?,
                payload: PayloadHalf::new(payload_coordination, payload_capacity)?,
                control_buffer,
                payload_buffer,
                consumer_control_coordination,
                consumer_payload_coordination,
                record_staging,
            })
        }

        /// Copies `payload_size` bytes out of `source` into the channel
        /// as one message, holding the consumer's coordination lock for
        /// the whole protocol.
        ///
        /// Returns `Ok(false)` when the lock is contended or either
        /// buffer lacks room.
        pub fn push(&mut self, source: &LocalMemorySlot, payload_size: usize) -> Result<bool> {
            self.base.ensure_active();
            if payload_size == 0 {
                return Err(Error::InvalidArgument(
                    "cannot push an empty message".into(),
                ));
            }
            if payload_size > source.size() {
                return Err(Error::InvalidArgument(format!(
                    "source slot holds {} bytes, message needs {payload_size}",
                    source.size()
                )));
            }
            let payload_capacity = self.payload.circ().capacity();
            if payload_size as u64 > payload_capacity {
                return Err(Error::InvalidArgument(format!(
                    "message of {payload_size} bytes exceeds payload capacity {payload_capacity}"
                )));
            }

            if !self
                .base
                .comm()
                .acquire_global_lock(&self.consumer_control_coordination)?
            {
                return Ok(false);
            }
            let pushed = self.push_locked(source, payload_size);
            self.base
                .comm()
                .release_global_lock(&self.consumer_control_coordination)?;
            pushed
        }

        fn push_locked(&mut self, source: &LocalMemorySlot, payload_size: usize) -> Result<bool> {
            // Mirror both counter pairs: other producers have moved the
            // heads since this producer last held the lock.
            self.base.comm().memcpy(
                SlotView::Local(self.base.coordination()),
                HEAD_WORD_OFFSET,
                SlotView::Global(&self.consumer_control_coordination),
                HEAD_WORD_OFFSET,
                16,
            )?;
            self.base.comm().memcpy(
                SlotView::Local(self.payload.coordination()),
                HEAD_WORD_OFFSET,
                SlotView::Global(&self.consumer_payload_coordination),
                HEAD_WORD_OFFSET,
                16,
            )?;

            let payload_capacity = self.payload.circ().capacity();
            if self.base.circ().is_full() {
                return Ok(false);
            }
            if self.payload.circ().depth() + payload_size as u64 > payload_capacity {
                return Ok(false);
            }

            let offset = self.payload.circ().head_position();
            let first = ((payload_capacity - offset) as usize).min(payload_size);
            self.base.comm().memcpy(
                SlotView::Global(&self.payload_buffer),
                offset as usize,
                SlotView::Local(source),
                0,
                first,
            )?;
            if first < payload_size {
                self.base.comm().memcpy(
                    SlotView::Global(&self.payload_buffer),
                    0,
                    SlotView::Local(source),
                    first,
                    payload_size - first,
                )?;
            }

            let record = ControlRecord {
                payload_offset: offset,
                payload_size: payload_size as u64,
            };
            debug_assert_record_in_payload!(record, payload_capacity);
            // Safety: the staging slot holds at least 16 writable bytes
            // and only this producer touches it.
            unsafe {
                self.record_staging
                    .ptr()
                    .as_ptr()
                    .cast::<[u8; CONTROL_RECORD_SIZE]>()
                    .write(record.to_le_bytes());
            }
            let control_position = self.base.circ().head_position() as usize;
            self.base.comm().memcpy(
                SlotView::Global(&self.control_buffer),
                control_position * CONTROL_RECORD_SIZE,
                SlotView::Local(&self.record_staging),
                0,
                CONTROL_RECORD_SIZE,
            )?;

            self.payload.circ().advance_head(payload_size as u64);
            self.base.circ().advance_head(1);
            self.base.comm().memcpy(
                SlotView::Global(&self.consumer_payload_coordination),
                HEAD_WORD_OFFSET,
                SlotView::Local(self.payload.coordination()),
                HEAD_WORD_OFFSET,
                8,
            )?;
            self.base.comm().memcpy(
                SlotView::Global(&self.consumer_control_coordination),
                HEAD_WORD_OFFSET,
                SlotView::Local(self.base.coordination()),
                HEAD_WORD_OFFSET,
                8,
            )?;
            Ok(true)
        }

        /// Message capacity of the channel.
        #[inline]
        pub fn capacity(&self) -> usize {
            self.base.capacity()
        }

        /// Payload capacity of the channel in bytes.
        #[inline]
        pub fn payload_capacity(&self) -> u64 {
            self.payload.circ().capacity()
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

    /// Consuming endpoint of a locking variable-size MPSC channel.
    ///
    /// Both coordination buffers are the shared channel state producers
    /// pull under the lock, so pops advance the tail words locally and
    /// publish nothing.
    #[derive(Debug)]
    pub struct Consumer<M> {
        base: Base<M>,
        payload: PayloadHalf,
        control_buffer: Arc<LocalMemorySlot>,
        payload_buffer: Arc<LocalMemorySlot>,
    }

    impl<M: CommunicationManager> Consumer<M> {
        /// Builds the consumer endpoint over its own buffers. Both
        /// coordination buffers must be exchanged (the control one
        /// carries the lock word producers contend on).
        pub fn new(
            comm: M,
            control_buffer: Arc<LocalMemorySlot>,
            payload_buffer: Arc<LocalMemorySlot>,
            control_coordination: Arc<LocalMemorySlot>,
            payload_coordination: Arc<LocalMemorySlot>,
            message_capacity: usize,
            payload_capacity: usize,
        ) -> Result<Self> {
            let control_needed =
                crate::base::token_buffer_size(CONTROL_RECORD_SIZE, message_capacity)?;
            if control_buffer.size() < control_needed {
                return Err(Error::InvalidArgument(format!(
                    "control buffer holds {} bytes, channel needs {control_needed}",
                    control_buffer.size()
                )));
            }
            if payload_buffer.size() < payload_capacity {
                return Err(Error::InvalidArgument(format!(
                    "payload buffer holds {} bytes, channel needs {payload_capacity}",
                    payload_buffer.size()
                )));
            }
            Ok(Self {
                base: Base::new(
                    comm,
                    control_coordination,
                    CONTROL_RECORD_SIZE,
                    message_capacity,
                )?,
                payload: PayloadHalf::new(payload_coordination, payload_capacity)?,
                control_buffer,
                payload_buffer,
            })
        }

        /// The record of the `n`-th unconsumed message, or `None` when
        /// fewer than `n + 1` messages are available.
        pub fn peek(&mut self, n: usize) -> Result<Option<ControlRecord>> {
            self.base.ensure_active();
            self.base.refresh()?;
            let circ = self.base.circ();
            if circ.depth() <= n as u64 {
                return Ok(None);
            }
            let index = (circ.tail_position() + n as u64) % circ.capacity();
            let record = self.read_record(index as usize);
            debug_assert_record_in_payload!(record, self.payload.circ().capacity());
            Ok(Some(record))
        }

        /// Discards the `n` oldest messages and their payload bytes.
        /// Returns `Ok(false)` when fewer than `n` are available.
        pub fn pop(&mut self, n: usize) -> Result<bool> {
            self.base.ensure_active();
            if n == 0 {
                return Err(Error::InvalidArgument("cannot pop zero messages".into()));
            }
            self.base.refresh()?;
            let circ = self.base.circ();
            if circ.depth() < n as u64 {
                return Ok(false);
            }

            let mut payload_bytes = 0u64;
            for i in 0..n {
                let index = (circ.tail_position() + i as u64) % circ.capacity();
                payload_bytes += self.read_record(index as usize).payload_size;
            }

            // The tail words live in our exchanged coordination buffers;
            // producers observe the advance on their next locked pull.
            self.base.circ().advance_tail(n as u64);
            self.payload.circ().advance_tail(payload_bytes);
            Ok(true)
        }

        fn read_record(&self, index: usize) -> ControlRecord {
            // Safety: index is in [0, capacity) and records between tail
            // and head are stable: producers only write beyond the head,
            // serialized by the lock.
            let bytes = unsafe {
                self.control_buffer
                    .ptr()
                    .as_ptr()
                    .add(index * CONTROL_RECORD_SIZE)
                    .cast::<[u8; CONTROL_RECORD_SIZE]>()
                    .read()
            };
            ControlRecord::from_le_bytes(bytes)
        }

        /// The byte ranges of the payload buffer a record's message
        /// occupies (contiguous range plus wrapped remainder).
        pub fn payload_ranges(
            &self,
            record: ControlRecord,
        ) -> (Range<usize>, Option<Range<usize>>) {
            let capacity = self.payload.circ().capacity();
            let offset = record.payload_offset as usize;
            let size = record.payload_size as usize;
            let first = ((capacity - record.payload_offset) as usize).min(size);
            if first == size {
                (offset..offset + size, None)
            } else {
                (offset..capacity as usize, Some(0..size - first))
            }
        }

        /// Messages available to pop, as last observed.
        #[inline]
        pub fn depth(&self) -> u64 {
            self.base.circ().depth()
        }

        /// `true` when the last observed state has no messages.
        #[inline]
        pub fn is_empty(&self) -> bool {
            self.base.circ().is_empty()
        }

        /// Message capacity of the channel.
        #[inline]
        pub fn capacity(&self) -> usize {
            self.base.capacity()
        }

        /// Payload capacity of the channel in bytes.
        #[inline]
        pub fn payload_capacity(&self) -> u64 {
            self.payload.circ().capacity()
        }

        /// Own payload storage; records' offsets index into it.
        #[inline]
        pub fn payload_buffer(&self) -> &Arc<LocalMemorySlot> {
            &self.payload_buffer
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

/// Per-producer SPSC shard pairs multiplexed by the consumer.
pub mod nonlocking {
    use crate::variable::{spsc, ControlRecord};
    use std::sync::Arc;
    use weft::{CommunicationManager, Error, LocalMemorySlot, Result};

    /// A non-locking variable-size MPSC producer is exactly a
    /// variable-size SPSC producer over its private shard pair.
    pub type Producer<M> = spsc::Producer<M>;

    /// Consuming endpoint multiplexing one variable-size SPSC shard per
    /// producer.
    #[derive(Debug)]
    pub struct Consumer<M> {
        shards: Vec<spsc::Consumer<M>>,
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

        /// Finds the next shard with an available message, round-robin
        /// from the carried cursor. Returns the producer id and the
        /// message's control record.
        pub fn peek(&mut self) -> Result<Option<(usize, ControlRecord)>> {
            let count = self.shards.len();
            for step in 0..count {
                let producer = (self.cursor + step) % count;
                if let Some(record) = self.shards[producer].peek(0)? {
                    self.cursor = (producer + 1) % count;
                    return Ok(Some((producer, record)));
                }
            }
            Ok(None)
        }

        /// Discards the oldest message of the given producer's shard.
        pub fn pop(&mut self, producer: usize) -> Result<bool> {
            let shard = self.shards.get_mut(producer).ok_or_else(|| {
                Error::InvalidArgument(format!("no producer {producer} in this channel"))
            })?;
            shard.pop(1)
        }

        /// Messages available across all shards, as last observed.
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

        /// The payload storage of `producer`'s shard.
        pub fn payload_buffer(&self, producer: usize) -> Result<&Arc<LocalMemorySlot>> {
            self.shards
                .get(producer)
                .map(spsc::Consumer::payload_buffer)
                .ok_or_else(|| {
                    Error::InvalidArgument(format!("no producer {producer} in this channel"))
                })
        }

        /// Direct access to one shard, e.g. for `payload_ranges`.
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
