//! Debug assertion macros for channel-protocol invariants.
//!
//! Only active in debug builds, so there is zero overhead on the
//! push/pop hot path in release builds. The always-on depth checks live
//! in `circular.rs`; these catch secondary bookkeeping mistakes early.

/// Assert that a buffer position stayed inside `[0, capacity)`.
macro_rules! debug_assert_position_in_bounds {
    ($position:expr, $capacity:expr) => {
        debug_assert!(
            $position < $capacity,
            "position {} escaped capacity {}",
            $position,
            $capacity
        )
    };
}

/// Assert that a counter only ever grows.
macro_rules! debug_assert_counter_monotonic {
    ($name:literal, $old:expr, $new:expr) => {
        debug_assert!(
            $new >= $old,
            "{} counter decreased from {} to {}",
            $name,
            $old,
            $new
        )
    };
}

/// Assert that a control record describes bytes inside the payload
/// buffer.
macro_rules! debug_assert_record_in_payload {
    ($record:expr, $payload_capacity:expr) => {
        debug_assert!(
            $record.payload_offset < $payload_capacity
                && $record.payload_size <= $payload_capacity,
            "control record ({}, {}) escapes payload capacity {}",
            $record.payload_offset,
            $record.payload_size,
            $payload_capacity
        )
    };
}

pub(crate) use {
    debug_assert_counter_monotonic, debug_assert_position_in_bounds,
    debug_assert_record_in_payload,
};
