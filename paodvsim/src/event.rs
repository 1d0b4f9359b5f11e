//! Events of the discrete event simulation and their ordering.

use std::cmp::Ordering;

use paodv::{Addr, Timestamp};

/// Scenario actions that can be scheduled during simulation.
#[derive(Debug, Clone, PartialEq)]
pub enum ScenarioAction {
    /// Teleport a node to a new position.
    MoveNode { node: Addr, x: f64, y: f64 },
    /// Block a link even while both ends are in range.
    DisableLink { a: Addr, b: Addr },
    /// Lift a block placed by `DisableLink`.
    EnableLink { a: Addr, b: Addr },
    /// Record every node's counters.
    TakeSnapshot,
}

/// Events in the discrete event simulation.
#[derive(Debug, Clone)]
pub enum Event {
    /// A frame arrives at `to`, transmitted by its neighbor `from`.
    FrameDelivery {
        to: Addr,
        from: Addr,
        data: Vec<u8>,
    },
    /// The link layer of `node` reports that `next_hop` did not take a unicast.
    TxFailure { node: Addr, next_hop: Addr },
    /// Wake a node whose earliest timer is due.
    TimerFire { node: Addr },
    /// Application sends data from one node to another.
    AppSend {
        from: Addr,
        to: Addr,
        payload: Vec<u8>,
    },
    /// Execute a scenario action.
    ScenarioAction(ScenarioAction),
}

/// An event stamped with its due time and insertion order.
///
/// Orders by `(time, seq)`, earliest first. The simulator keeps these in a
/// `BinaryHeap<Reverse<_>>`, so equal times pop in insertion order.
#[derive(Debug, Clone)]
pub struct ScheduledEvent {
    pub time: Timestamp,
    pub seq: u64,
    pub event: Event,
}

impl ScheduledEvent {
    pub fn new(time: Timestamp, seq: u64, event: Event) -> Self {
        Self { time, seq, event }
    }

    fn key(&self) -> (Timestamp, u64) {
        (self.time, self.seq)
    }
}

impl PartialEq for ScheduledEvent {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for ScheduledEvent {}

impl PartialOrd for ScheduledEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

#[cfg(test)]
mod tests {
    use std::cmp::Reverse;
    use std::collections::BinaryHeap;
    use std::net::Ipv4Addr;

    use super::*;

    const N: Addr = Ipv4Addr::new(10, 0, 0, 1);

    fn timer(ms: u64, seq: u64) -> ScheduledEvent {
        ScheduledEvent::new(Timestamp::from_millis(ms), seq, Event::TimerFire { node: N })
    }

    #[test]
    fn test_earlier_time_wins_over_lower_seq() {
        assert!(timer(5, 9) < timer(10, 1));
    }

    #[test]
    fn test_heap_pops_earliest_then_fifo() {
        let mut heap = BinaryHeap::new();
        for (ms, seq) in [(20, 0), (10, 1), (10, 2), (5, 3), (10, 4)] {
            heap.push(Reverse(timer(ms, seq)));
        }
        let order: Vec<u64> = std::iter::from_fn(|| heap.pop())
            .map(|Reverse(e)| e.seq)
            .collect();
        assert_eq!(order, vec![3, 1, 2, 4, 0]);
    }
}
