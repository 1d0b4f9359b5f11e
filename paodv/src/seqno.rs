//! Destination sequence numbers.
//!
//! Sequence numbers are 32-bit counters that wrap. Two numbers are compared
//! by the sign of their wrapping difference, so `0` is newer than
//! `u32::MAX` and freshness survives rollover as long as the two values are
//! less than 2^31 apart.

use core::cmp::Ordering;
use core::fmt;

/// A destination sequence number with wraparound-aware ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SeqNo(pub u32);

impl SeqNo {
    /// Zero, the value before a node has issued anything.
    pub const ZERO: SeqNo = SeqNo(0);

    /// Raw value as carried on the wire.
    #[inline]
    pub const fn get(self) -> u32 {
        self.0
    }

    /// The next sequence number, wrapping at `u32::MAX`.
    #[inline]
    pub const fn next(self) -> SeqNo {
        SeqNo(self.0.wrapping_add(1))
    }

    /// Signed distance from `other` to `self`.
    #[inline]
    pub const fn diff(self, other: SeqNo) -> i32 {
        self.0.wrapping_sub(other.0) as i32
    }

    /// True if `self` is strictly fresher than `other`.
    #[inline]
    pub const fn is_newer_than(self, other: SeqNo) -> bool {
        self.diff(other) > 0
    }

    /// The fresher of the two values.
    #[inline]
    pub fn freshest(self, other: SeqNo) -> SeqNo {
        if other.is_newer_than(self) {
            other
        } else {
            self
        }
    }

    /// Freshness ordering. Not a total order across the whole `u32` range,
    /// which is why `SeqNo` does not implement `Ord`.
    #[inline]
    pub fn compare(self, other: SeqNo) -> Ordering {
        self.diff(other).cmp(&0)
    }
}

impl fmt::Display for SeqNo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Issues this node's own sequence numbers.
///
/// Only ever moves forward: either by one on [`bump`](Self::bump), or up to
/// a fresher value observed in a request addressed to us.
#[derive(Debug, Clone, Default)]
pub struct SequenceCounter {
    current: SeqNo,
}

impl SequenceCounter {
    /// Start issuing from zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a given value.
    pub fn starting_at(current: SeqNo) -> Self {
        Self { current }
    }

    /// The current value.
    pub fn current(&self) -> SeqNo {
        self.current
    }

    /// Advance by one and return the new value.
    pub fn bump(&mut self) -> SeqNo {
        self.current = self.current.next();
        self.current
    }

    /// Raise the counter to `seen` if it is fresher. Never moves backwards.
    pub fn observe(&mut self, seen: SeqNo) {
        self.current = self.current.freshest(seen);
    }
}
