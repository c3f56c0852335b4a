//! Variable-size channels.
//!
//! Two buffers travel together: a control buffer of fixed-size
//! [`ControlRecord`]s (its capacity is the message capacity) and a
//! payload buffer of raw bytes (its capacity is user-chosen). Each has
//! its own circular buffer and coordination words; a message is one
//! control record plus `payload_size` payload bytes, and a payload copy
//! that crosses the end of the payload buffer is split at the wrap
//! boundary.

use crate::base::coordination_words;
use crate::circular::CircularBuffer;
use std::sync::Arc;
use weft::{Error, LocalMemorySlot, Result};

pub mod mpsc;
pub mod spsc;

/// Size in bytes of a serialized control record.
pub const CONTROL_RECORD_SIZE: usize = 16;

/// Fixed-size descriptor of one variable-size token: where its bytes
/// start in the payload buffer and how many there are.
///
/// Wire form: two little-endian `u64` words, offset then size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlRecord {
    /// Byte offset of the token's first byte in the payload buffer.
    pub payload_offset: u64,
    /// Token length in bytes.
    pub payload_size: u64,
}

impl ControlRecord {
    /// Serializes to the 16-byte wire form.
    pub fn to_le_bytes(self) -> [u8; CONTROL_RECORD_SIZE] {
        let mut bytes = [0u8; CONTROL_RECORD_SIZE];
        bytes[..8].copy_from_slice(&self.payload_offset.to_le_bytes());
        bytes[8..].copy_from_slice(&self.payload_size.to_le_bytes());
        bytes
    }

    /// Reconstructs from the 16-byte wire form.
    pub fn from_le_bytes(bytes: [u8; CONTROL_RECORD_SIZE]) -> Self {
        let mut offset = [0u8; 8];
        let mut size = [0u8; 8];
        offset.copy_from_slice(&bytes[..8]);
        size.copy_from_slice(&bytes[8..]);
        Self {
            payload_offset: u64::from_le_bytes(offset),
            payload_size: u64::from_le_bytes(size),
        }
    }
}

/// The payload side of a variable-size endpoint: its own coordination
/// buffer with a byte-granular circular view.
#[derive(Debug)]
pub(crate) struct PayloadHalf {
    coordination: Arc<LocalMemorySlot>,
    circ: CircularBuffer,
}

impl PayloadHalf {
    pub(crate) fn new(coordination: Arc<LocalMemorySlot>, capacity_bytes: usize) -> Result<Self> {
        if capacity_bytes == 0 {
            return Err(Error::InvalidArgument(
                "payload capacity must be nonzero".into(),
            ));
        }
        let (head, tail) = coordination_words(&coordination)?;
        // Safety: the Arc held alongside keeps the words alive; all
        // access is atomic.
        let circ = unsafe { CircularBuffer::new(capacity_bytes as u64, head, tail) };
        Ok(Self { coordination, circ })
    }

    #[inline]
    pub(crate) fn coordination(&self) -> &Arc<LocalMemorySlot> {
        &self.coordination
    }

    #[inline]
    pub(crate) fn circ(&self) -> &CircularBuffer {
        &self.circ
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_record_wire_round_trip() {
        let record = ControlRecord {
            payload_offset: 12,
            payload_size: 6,
        };
        let bytes = record.to_le_bytes();
        assert_eq!(ControlRecord::from_le_bytes(bytes), record);
        // Little-endian, offset word first.
        assert_eq!(bytes[0], 12);
        assert_eq!(bytes[8], 6);
    }
}
