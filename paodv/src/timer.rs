//! Named, cancellable virtual-time timers.
//!
//! Every timer is identified by a [`TimerKey`] (purpose + target). Arming a
//! key that is already armed replaces the earlier deadline, and cancelling a
//! key removes it so it can never fire. Expired timers are popped in
//! deadline order, ties broken by arming order.

use alloc::collections::BTreeMap;
use hashbrown::HashMap;

use crate::time::Timestamp;
use crate::types::Addr;

/// Purpose and target of a protocol timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TimerKey {
    /// Retry or give up on the route search for a destination.
    RreqRetry(Addr),
    /// Remove an invalid route after the delete period.
    RouteDelete(Addr),
    /// Declare a neighbor lost after missed hellos.
    NeighborLoss(Addr),
    /// Blacklist a neighbor that did not acknowledge a forwarded RREP.
    RrepAckWait(Addr),
    /// Periodic hello broadcast.
    Hello,
    /// Periodic expiry sweep over routes, seen requests and queued packets.
    Purge,
}

/// Ordered set of armed timers.
#[derive(Debug, Default)]
pub struct TimerWheel {
    by_deadline: BTreeMap<(Timestamp, u64), TimerKey>,
    by_key: HashMap<TimerKey, (Timestamp, u64)>,
    next_seq: u64,
}

impl TimerWheel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm `key` to fire at `deadline`, replacing any earlier schedule.
    pub fn arm(&mut self, key: TimerKey, deadline: Timestamp) {
        self.cancel(key);
        let slot = (deadline, self.next_seq);
        self.next_seq = self.next_seq.wrapping_add(1);
        self.by_deadline.insert(slot, key);
        self.by_key.insert(key, slot);
    }

    /// Cancel `key`. Returns true if it was armed.
    pub fn cancel(&mut self, key: TimerKey) -> bool {
        match self.by_key.remove(&key) {
            Some(slot) => {
                self.by_deadline.remove(&slot);
                true
            }
            None => false,
        }
    }

    /// Deadline of `key`, if armed.
    pub fn deadline(&self, key: TimerKey) -> Option<Timestamp> {
        self.by_key.get(&key).map(|(t, _)| *t)
    }

    pub fn is_armed(&self, key: TimerKey) -> bool {
        self.by_key.contains_key(&key)
    }

    /// Earliest armed deadline.
    pub fn next_deadline(&self) -> Option<Timestamp> {
        self.by_deadline.keys().next().map(|(t, _)| *t)
    }

    /// Remove and return the earliest timer whose deadline is `<= now`.
    pub fn pop_expired(&mut self, now: Timestamp) -> Option<TimerKey> {
        let (&slot, _) = self.by_deadline.iter().next()?;
        if slot.0 > now {
            return None;
        }
        let key = self.by_deadline.remove(&slot)?;
        self.by_key.remove(&key);
        Some(key)
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }
}
