//! Variable-size single-producer single-consumer channel.
//!
//! The producer runs two circular views side by side - messages over the
//! control buffer, bytes over the payload buffer - and a push succeeds
//! only when both have room. The control-head publication goes out last:
//! once the consumer observes a new control record, the record bytes and
//! the payload bytes it points at have already landed.

use crate::base::{Base, EndpointState, HEAD_WORD_OFFSET, TAIL_WORD_OFFSET};
use crate::invariants::debug_assert_record_in_payload;
use crate::variable::{ControlRecord, PayloadHalf, CONTROL_RECORD_SIZE};
use std::ops::Range;
use std::sync::Arc;
use weft::{
    CommunicationManager, Error, GlobalMemorySlot, LocalMemorySlot, Result, SlotView,
};

/// Producing endpoint of a variable-size SPSC channel.
#[derive(Debug)]
pub struct Producer<M> {
    /// Control side: capacity counts messages, tokens are records.
    base: Base<M>,
    /// Payload side: capacity counts bytes.
    payload: PayloadHalf,
    /// The consumer's control buffer.
    control_buffer: Arc<GlobalMemorySlot>,
    /// The consumer's payload buffer.
    payload_buffer: Arc<GlobalMemorySlot>,
    /// The consumer's control coordination buffer (control head lands
    /// here).
    consumer_control_coordination: Arc<GlobalMemorySlot>,
    /// The consumer's payload coordination buffer (payload head lands
    /// here).
    consumer_payload_coordination: Arc<GlobalMemorySlot>,
    /// Staging area the control record is serialized into before its
    /// one-sided copy.
    record_staging: Arc<LocalMemorySlot>,
}

impl<M: CommunicationManager> Producer<M> {
    /// Builds the producer endpoint.
    ///
    /// `control_coordination` and `payload_coordination` are this
    /// producer's own initialized coordination buffers (exchanged so the
    /// consumer can write the tail words); the four global slots are the
    /// consumer's; `record_staging` is a local slot of at least 16
    /// bytes.
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
            base: Base::new(comm, control_coordination, CONTROL_RECORD_SIZE, message_capacity)?,
            payload: PayloadHalf::new(payload_coordination, payload_capacity)?,
            control_buffer,
            payload_buffer,
            consumer_control_coordination,
            consumer_payload_coordination,
            record_staging,
        })
    }

    /// Copies `payload_size` bytes out of `source` into the channel as
    /// one message.
    ///
    /// Returns `Ok(false)` when either the message capacity or the
    /// payload capacity lacks room; a payload larger than the whole
    /// payload buffer can never fit and is an error instead.
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

        self.update_depth()?;
        if self.base.circ().is_full() {
            return Ok(false);
        }
        if self.payload.circ().depth() + payload_size as u64 > payload_capacity {
            return Ok(false);
        }

        // Payload bytes first, split at the wrap boundary when needed.
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

        // Then the record describing them.
        let record = ControlRecord {
            payload_offset: offset,
            payload_size: payload_size as u64,
        };
        debug_assert_record_in_payload!(record, payload_capacity);
        // Safety: the staging slot holds at least 16 writable bytes and
        // only this producer touches it.
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

        // Advance and publish, control head strictly last: its arrival
        // is what makes the message visible.
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

    /// Re-reads the consumer's pop progress on both buffers.
    pub fn update_depth(&mut self) -> Result<()> {
        self.base.ensure_active();
        self.base.refresh()?;
        self.base
            .comm()
            .query_memory_slot_updates(self.payload.coordination())
    }

    /// Messages pushed but not yet popped, as last observed.
    #[inline]
    pub fn depth(&self) -> u64 {
        self.base.circ().depth()
    }

    /// Payload bytes in flight, as last observed.
    #[inline]
    pub fn payload_depth(&self) -> u64 {
        self.payload.circ().depth()
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

/// Consuming endpoint of a variable-size SPSC channel.
#[derive(Debug)]
pub struct Consumer<M> {
    base: Base<M>,
    payload: PayloadHalf,
    /// Own control storage; records are read from here.
    control_buffer: Arc<LocalMemorySlot>,
    /// Own payload storage; records point into it.
    payload_buffer: Arc<LocalMemorySlot>,
    /// The producer's control coordination buffer (control tail lands
    /// here).
    producer_control_coordination: Arc<GlobalMemorySlot>,
    /// The producer's payload coordination buffer (payload tail lands
    /// here).
    producer_payload_coordination: Arc<GlobalMemorySlot>,
}

impl<M: CommunicationManager> Consumer<M> {
    /// Builds the consumer endpoint over its own buffers and the
    /// producer's exchanged coordination slots.
    pub fn new(
        comm: M,
        control_buffer: Arc<LocalMemorySlot>,
        payload_buffer: Arc<LocalMemorySlot>,
        control_coordination: Arc<LocalMemorySlot>,
        payload_coordination: Arc<LocalMemorySlot>,
        producer_control_coordination: Arc<GlobalMemorySlot>,
        producer_payload_coordination: Arc<GlobalMemorySlot>,
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
            base: Base::new(comm, control_coordination, CONTROL_RECORD_SIZE, message_capacity)?,
            payload: PayloadHalf::new(payload_coordination, payload_capacity)?,
            control_buffer,
            payload_buffer,
            producer_control_coordination,
            producer_payload_coordination,
        })
    }

    /// The record of the `n`-th unconsumed message, or `None` when fewer
    /// than `n + 1` messages are available.
    pub fn peek(&mut self, n: usize) -> Result<Option<ControlRecord>> {
        self.base.ensure_active();
        self.update_depth()?;
        let circ = self.base.circ();
        if circ.depth() <= n as u64 {
            return Ok(None);
        }
        let index = (circ.tail_position() + n as u64) % circ.capacity();
        let record = self.read_record(index as usize);
        debug_assert_record_in_payload!(record, self.payload.circ().capacity());
        Ok(Some(record))
    }

    /// Discards the `n` oldest messages and their payload bytes,
    /// reporting the space to the producer. Returns `Ok(false)` when
    /// fewer than `n` messages are available.
    pub fn pop(&mut self, n: usize) -> Result<bool> {
        self.base.ensure_active();
        if n == 0 {
            return Err(Error::InvalidArgument("cannot pop zero messages".into()));
        }
        self.update_depth()?;
        let circ = self.base.circ();
        if circ.depth() < n as u64 {
            return Ok(false);
        }

        let mut payload_bytes = 0u64;
        for i in 0..n {
            let index = (circ.tail_position() + i as u64) % circ.capacity();
            payload_bytes += self.read_record(index as usize).payload_size;
        }

        self.base.circ().advance_tail(n as u64);
        self.payload.circ().advance_tail(payload_bytes);
        self.publish_tails()?;
        Ok(true)
    }

    fn publish_tails(&self) -> Result<()> {
        self.base.comm().memcpy(
            SlotView::Global(&self.producer_payload_coordination),
            TAIL_WORD_OFFSET,
            SlotView::Local(self.payload.coordination()),
            TAIL_WORD_OFFSET,
            8,
        )?;
        self.base.comm().memcpy(
            SlotView::Global(&self.producer_control_coordination),
            TAIL_WORD_OFFSET,
            SlotView::Local(self.base.coordination()),
            TAIL_WORD_OFFSET,
            8,
        )
    }

    fn read_record(&self, index: usize) -> ControlRecord {
        // Safety: index is in [0, capacity) and records between tail and
        // head are stable: the producer only writes beyond the head.
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
    /// occupies: the contiguous range, plus the wrapped-around remainder
    /// when the message crosses the buffer end.
    pub fn payload_ranges(&self, record: ControlRecord) -> (Range<usize>, Option<Range<usize>>) {
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

    /// Re-reads the producer's push progress on both buffers.
    pub fn update_depth(&mut self) -> Result<()> {
        self.base.ensure_active();
        self.base.refresh()?;
        self.base
            .comm()
            .query_memory_slot_updates(self.payload.coordination())
    }

    /// Messages available to pop, as last observed.
    #[inline]
    pub fn depth(&self) -> u64 {
        self.base.circ().depth()
    }

    /// Payload bytes available, as last observed.
    #[inline]
    pub fn payload_depth(&self) -> u64 {
        self.payload.circ().depth()
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
