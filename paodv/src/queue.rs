//! Buffer for locally originated packets waiting on a route search.

use alloc::collections::VecDeque;
use alloc::vec::Vec;
use core::marker::PhantomData;

use crate::config::NodeConfig;
use crate::time::{Duration, Timestamp};
use crate::types::{Addr, Payload};

/// A packet parked until its destination becomes reachable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedPacket {
    pub destination: Addr,
    pub payload: Payload,
    pub queued_at: Timestamp,
}

/// FIFO of packets awaiting routes, bounded by `Cfg::MAX_QUEUED_PACKETS`.
///
/// Packets for different destinations share the buffer. Release order for a
/// destination is arrival order.
pub struct RequestQueue<Cfg: NodeConfig> {
    packets: VecDeque<QueuedPacket>,
    _config: PhantomData<Cfg>,
}

impl<Cfg: NodeConfig> Default for RequestQueue<Cfg> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Cfg: NodeConfig> RequestQueue<Cfg> {
    pub fn new() -> Self {
        Self {
            packets: VecDeque::new(),
            _config: PhantomData,
        }
    }

    /// Append a packet. If the queue is full the oldest packet is evicted
    /// and returned.
    pub fn enqueue(
        &mut self,
        destination: Addr,
        payload: Payload,
        now: Timestamp,
    ) -> Option<QueuedPacket> {
        let evicted = if self.packets.len() >= Cfg::MAX_QUEUED_PACKETS {
            self.packets.pop_front()
        } else {
            None
        };
        self.packets.push_back(QueuedPacket {
            destination,
            payload,
            queued_at: now,
        });
        evicted
    }

    /// Remove and return every payload for `destination`, oldest first.
    pub fn take_for(&mut self, destination: Addr) -> Vec<Payload> {
        let mut taken = Vec::new();
        self.packets.retain(|p| {
            if p.destination == destination {
                taken.push(p.payload.clone());
                false
            } else {
                true
            }
        });
        taken
    }

    /// Drop every packet for `destination`. Returns how many were dropped.
    pub fn drop_for(&mut self, destination: Addr) -> usize {
        let before = self.packets.len();
        self.packets.retain(|p| p.destination != destination);
        before - self.packets.len()
    }

    pub fn has_packets_for(&self, destination: Addr) -> bool {
        self.packets.iter().any(|p| p.destination == destination)
    }

    /// Drop packets older than `max_age`. Returns (destination, count)
    /// pairs in order of first appearance.
    pub fn purge(&mut self, now: Timestamp, max_age: Duration) -> Vec<(Addr, usize)> {
        let mut dropped: Vec<(Addr, usize)> = Vec::new();
        self.packets.retain(|p| {
            if now.saturating_sub(p.queued_at) < max_age {
                return true;
            }
            match dropped.iter_mut().find(|(d, _)| *d == p.destination) {
                Some((_, n)) => *n += 1,
                None => dropped.push((p.destination, 1)),
            }
            false
        });
        dropped
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DefaultConfig, SmallConfig};
    use alloc::vec;
    use core::net::Ipv4Addr;

    const C: Addr = Ipv4Addr::new(10, 0, 0, 3);
    const D: Addr = Ipv4Addr::new(10, 0, 0, 4);

    #[test]
    fn test_release_is_fifo_per_destination() {
        let mut q = RequestQueue::<DefaultConfig>::new();
        let now = Timestamp::ZERO;
        q.enqueue(D, vec![1], now);
        q.enqueue(C, vec![9], now);
        q.enqueue(D, vec![2], now);
        q.enqueue(D, vec![3], now);

        assert_eq!(q.take_for(D), vec![vec![1], vec![2], vec![3]]);
        assert_eq!(q.len(), 1);
        assert!(q.has_packets_for(C));
        assert!(!q.has_packets_for(D));
    }

    #[test]
    fn test_full_queue_evicts_oldest() {
        let mut q = RequestQueue::<SmallConfig>::new();
        for i in 0..SmallConfig::MAX_QUEUED_PACKETS {
            assert!(q.enqueue(D, vec![i as u8], Timestamp::ZERO).is_none());
        }
        let evicted = q.enqueue(D, vec![99], Timestamp::ZERO).unwrap();
        assert_eq!(evicted.payload, vec![0]);
        assert_eq!(q.len(), SmallConfig::MAX_QUEUED_PACKETS);
    }

    #[test]
    fn test_purge_counts_per_destination() {
        let mut q = RequestQueue::<DefaultConfig>::new();
        q.enqueue(D, vec![1], Timestamp::from_secs(0));
        q.enqueue(C, vec![2], Timestamp::from_secs(1));
        q.enqueue(D, vec![3], Timestamp::from_secs(2));
        q.enqueue(D, vec![4], Timestamp::from_secs(20));

        let dropped = q.purge(Timestamp::from_millis(30_500), Duration::from_secs(30));
        assert_eq!(dropped, vec![(D, 1)]);

        let dropped = q.purge(Timestamp::from_secs(33), Duration::from_secs(30));
        assert_eq!(dropped, vec![(C, 1), (D, 1)]);
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn test_drop_for() {
        let mut q = RequestQueue::<DefaultConfig>::new();
        q.enqueue(D, vec![1], Timestamp::ZERO);
        q.enqueue(C, vec![2], Timestamp::ZERO);
        q.enqueue(D, vec![3], Timestamp::ZERO);
        assert_eq!(q.drop_for(D), 2);
        assert_eq!(q.drop_for(D), 0);
        assert_eq!(q.len(), 1);
    }
}
