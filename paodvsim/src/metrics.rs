//! Metrics collection for simulation analysis.

use hashbrown::HashMap;
use paodv::{Addr, Counters, Timestamp};

/// Every node's protocol counters at a point in time.
#[derive(Debug, Clone)]
pub struct CounterSnapshot {
    /// When this snapshot was taken.
    pub time: Timestamp,
    pub counters: HashMap<Addr, Counters>,
}

impl CounterSnapshot {
    /// Create a new empty snapshot.
    pub fn new(time: Timestamp) -> Self {
        Self {
            time,
            counters: HashMap::new(),
        }
    }

    /// Record a node's counters.
    pub fn record_node(&mut self, node: Addr, counters: Counters) {
        self.counters.insert(node, counters);
    }

    /// Sum one counter over all nodes.
    pub fn total(&self, counter: impl Fn(&Counters) -> u64) -> u64 {
        self.counters.values().map(counter).sum()
    }

    /// Fraction of originated DATA packets that reached their destination.
    ///
    /// `None` while nothing was originated.
    pub fn delivery_ratio(&self) -> Option<f64> {
        let originated = self.total(Counters::data_originated);
        if originated == 0 {
            return None;
        }
        Some(self.total(Counters::data_delivered) as f64 / originated as f64)
    }
}

/// Simulation metrics collected over time.
#[derive(Debug, Clone, Default)]
pub struct SimMetrics {
    /// Frames handed to the radio by any node.
    pub frames_sent: u64,
    /// Frames lost to the link loss rate.
    pub frames_dropped: u64,
    /// Frame copies delivered to a receiver.
    pub frames_delivered: u64,
    /// Unicasts whose next hop was out of reach.
    pub tx_failures: u64,
    /// Counter snapshots taken at intervals.
    pub snapshots: Vec<CounterSnapshot>,
}

impl SimMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_snapshot(&mut self, snapshot: CounterSnapshot) {
        self.snapshots.push(snapshot);
    }

    pub fn latest_snapshot(&self) -> Option<&CounterSnapshot> {
        self.snapshots.last()
    }
}

/// Result of running a simulation.
#[derive(Debug, Clone)]
pub struct SimulationResult {
    /// Final simulation time.
    pub end_time: Timestamp,
    /// Collected metrics.
    pub metrics: SimMetrics,
    /// Whether simulation ended due to event queue exhaustion (vs time limit).
    pub queue_exhausted: bool,
}

impl SimulationResult {
    /// Sum one counter over all nodes at the end of the run.
    pub fn total(&self, counter: impl Fn(&Counters) -> u64) -> u64 {
        self.metrics
            .latest_snapshot()
            .map(|s| s.total(counter))
            .unwrap_or(0)
    }

    pub fn delivery_ratio(&self) -> Option<f64> {
        self.metrics
            .latest_snapshot()
            .and_then(CounterSnapshot::delivery_ratio)
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;

    #[test]
    fn test_empty_snapshot() {
        let snapshot = CounterSnapshot::new(Timestamp::ZERO);
        assert_eq!(snapshot.total(Counters::rreq_sent), 0);
        assert_eq!(snapshot.delivery_ratio(), None);
    }

    #[test]
    fn test_result_without_snapshots() {
        let result = SimulationResult {
            end_time: Timestamp::from_secs(1),
            metrics: SimMetrics::new(),
            queue_exhausted: true,
        };
        assert_eq!(result.total(Counters::hello_sent), 0);
        assert_eq!(result.delivery_ratio(), None);
    }

    #[test]
    fn test_totals_cover_every_node() {
        let mut snapshot = CounterSnapshot::new(Timestamp::from_secs(2));
        snapshot.record_node(Ipv4Addr::new(10, 0, 0, 1), Counters::new());
        snapshot.record_node(Ipv4Addr::new(10, 0, 0, 2), Counters::new());
        assert_eq!(snapshot.counters.len(), 2);
        assert_eq!(snapshot.total(Counters::data_forwarded), 0);
    }
}
