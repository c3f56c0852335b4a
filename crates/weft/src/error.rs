//! Error types shared by the core, backends, and channel frontends.
//!
//! Recoverable conditions are ordinary `Err` values. Depth and protocol
//! violations are not: they indicate a programming bug whose continuation
//! would corrupt remote state, so they log and abort the offending call
//! by panicking.

use crate::slot::{GlobalKey, Tag};
use thiserror::Error;

/// Recoverable error kinds surfaced to the caller.
///
/// All of these leave manager and channel state unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// A call precondition was violated (null-sized buffer, mismatched
    /// memory space, out-of-range copy, and similar).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// An allocation or registration could not be satisfied.
    #[error("out of resources: {0}")]
    OutOfResource(String),

    /// The `(tag, key)` pair was not published in the resolved epoch.
    #[error("global memory slot not found (tag {tag}, key {key})")]
    NotFound {
        /// Tag the lookup was issued under.
        tag: Tag,
        /// Key the lookup was issued under.
        key: GlobalKey,
    },

    /// The transport reported an unrecoverable collective failure; the
    /// affected tag's epoch is void.
    #[error("fence failed on tag {tag}: {reason}")]
    FenceFailure {
        /// Tag whose epoch failed.
        tag: Tag,
        /// Transport-provided failure description.
        reason: String,
    },
}

/// Convenience alias used across the workspace.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Returns `true` when retrying the same call later may succeed.
    #[inline]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::OutOfResource(_) | Self::NotFound { .. })
    }
}

/// Aborts on a circular-buffer depth violation.
///
/// Advancing a head or tail counter past the `0 <= depth <= capacity`
/// bound would publish an unreachable position to the remote peer, so the
/// process must not continue.
#[cold]
#[inline(never)]
pub fn depth_violation(detail: &str) -> ! {
    log::error!("circular buffer depth violation: {detail}");
    panic!("circular buffer depth violation: {detail}");
}

/// Aborts on a protocol violation.
///
/// Covers release of a lock not held, free of an unallocated slot, reuse
/// of a drained channel endpoint, and duplicate slot publication.
#[cold]
#[inline(never)]
pub fn protocol_violation(detail: &str) -> ! {
    log::error!("protocol violation: {detail}");
    panic!("protocol violation: {detail}");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recoverable_classification() {
        assert!(Error::OutOfResource("x".into()).is_recoverable());
        assert!(Error::NotFound { tag: 1, key: 2 }.is_recoverable());
        assert!(!Error::InvalidArgument("x".into()).is_recoverable());
        assert!(!Error::FenceFailure {
            tag: 0,
            reason: "x".into()
        }
        .is_recoverable());
    }

    #[test]
    fn not_found_reports_pair() {
        let message = Error::NotFound { tag: 7, key: 9 }.to_string();
        assert!(message.contains("tag 7"));
        assert!(message.contains("key 9"));
    }
}
