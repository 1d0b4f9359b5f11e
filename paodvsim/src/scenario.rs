//! Scenario builder for setting up and running simulations.

use std::net::Ipv4Addr;

use paodv::{Addr, Duration, Error, ProtocolConfig, Timestamp};

use crate::event::ScenarioAction;
use crate::metrics::SimulationResult;
use crate::sim::Simulator;
use crate::topology::{
    chain_positions, grid_positions, random_positions, LinkProfile, Topology, DEFAULT_RANGE,
};

/// Spacing that keeps only adjacent chain nodes in range at the default range.
pub const DEFAULT_SPACING: f64 = 80.0;

/// Address of the node at `index`: 10.0.0.1, 10.0.0.2, ...
pub fn node_addr(index: usize) -> Addr {
    Ipv4Addr::from(0x0A00_0001u32.wrapping_add(index as u32))
}

/// How nodes are placed.
#[derive(Debug, Clone)]
enum Layout {
    Chain { spacing: f64 },
    Grid { columns: usize, spacing: f64 },
    Random { width: f64, height: f64 },
    Custom(Vec<(f64, f64)>),
}

/// Builder for simulation scenarios.
///
/// Actions and sends refer to nodes by creation index.
pub struct ScenarioBuilder {
    num_nodes: usize,
    seed: u64,
    layout: Layout,
    range: f64,
    link: LinkProfile,
    config: ProtocolConfig,
    /// Per-node overrides, by index.
    overrides: Vec<(usize, ProtocolConfig)>,
    malicious: Vec<usize>,
    sends: Vec<(Timestamp, usize, usize, Vec<u8>)>,
    actions: Vec<(Timestamp, IndexedAction)>,
    /// Stream index given to the first node, if streams are assigned.
    first_stream: Option<i64>,
    snapshot_interval: Option<Duration>,
}

/// A scenario action naming nodes by index.
#[derive(Debug, Clone)]
enum IndexedAction {
    Move { node: usize, x: f64, y: f64 },
    Disable { a: usize, b: usize },
    Enable { a: usize, b: usize },
}

impl Default for ScenarioBuilder {
    fn default() -> Self {
        Self::new(0)
    }
}

impl ScenarioBuilder {
    /// Create a scenario with `num_nodes` nodes on a chain.
    pub fn new(num_nodes: usize) -> Self {
        Self {
            num_nodes,
            seed: 42,
            layout: Layout::Chain {
                spacing: DEFAULT_SPACING,
            },
            range: DEFAULT_RANGE,
            link: LinkProfile::default(),
            config: ProtocolConfig::default(),
            overrides: Vec::new(),
            malicious: Vec::new(),
            sends: Vec::new(),
            actions: Vec::new(),
            first_stream: None,
            snapshot_interval: None,
        }
    }

    /// Set the RNG seed for deterministic simulation.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Place nodes on a line, `spacing` metres apart.
    pub fn chain(mut self, spacing: f64) -> Self {
        self.layout = Layout::Chain { spacing };
        self
    }

    /// Place nodes on a grid, `columns` wide.
    pub fn grid(mut self, columns: usize, spacing: f64) -> Self {
        self.layout = Layout::Grid { columns, spacing };
        self
    }

    /// Scatter nodes uniformly over an area, seeded by the scenario seed.
    pub fn random_area(mut self, width: f64, height: f64) -> Self {
        self.layout = Layout::Random { width, height };
        self
    }

    /// Explicit positions, one per node.
    pub fn positions(mut self, positions: Vec<(f64, f64)>) -> Self {
        self.layout = Layout::Custom(positions);
        self
    }

    pub fn with_range(mut self, range: f64) -> Self {
        self.range = range;
        self
    }

    pub fn with_loss_rate(mut self, rate: f64) -> Self {
        self.link = self.link.with_loss_rate(rate);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.link = self.link.with_delay(delay);
        self
    }

    /// Protocol options for every node.
    pub fn with_config(mut self, config: ProtocolConfig) -> Self {
        self.config = config;
        self
    }

    /// Protocol options for one node, replacing the shared ones.
    pub fn with_node_config(mut self, index: usize, config: ProtocolConfig) -> Self {
        self.overrides.push((index, config));
        self
    }

    /// Set the trust/distance threshold on every node.
    pub fn with_distance_threshold(mut self, threshold: Option<f64>) -> Self {
        self.config = self.config.with_distance_threshold(threshold);
        self
    }

    /// Run node `index` in blackhole mode.
    pub fn malicious(mut self, index: usize) -> Self {
        self.malicious.push(index);
        self
    }

    /// Pin node random sources to streams starting at `start`.
    pub fn with_streams(mut self, start: i64) -> Self {
        self.first_stream = Some(start);
        self
    }

    pub fn with_snapshot_interval(mut self, interval: Duration) -> Self {
        self.snapshot_interval = Some(interval);
        self
    }

    /// Send `payload` from node `from` to node `to` at `time`.
    pub fn send_at(mut self, time: Timestamp, from: usize, to: usize, payload: Vec<u8>) -> Self {
        self.sends.push((time, from, to, payload));
        self
    }

    pub fn move_at(mut self, time: Timestamp, node: usize, x: f64, y: f64) -> Self {
        self.actions.push((time, IndexedAction::Move { node, x, y }));
        self
    }

    pub fn disable_link_at(mut self, time: Timestamp, a: usize, b: usize) -> Self {
        self.actions.push((time, IndexedAction::Disable { a, b }));
        self
    }

    pub fn enable_link_at(mut self, time: Timestamp, a: usize, b: usize) -> Self {
        self.actions.push((time, IndexedAction::Enable { a, b }));
        self
    }

    /// Build the simulator with all nodes placed and started.
    pub fn build(self) -> Result<(Simulator, Vec<Addr>), Error> {
        let topology = Topology::new(self.range).with_link_profile(self.link);
        let mut sim = Simulator::new(self.seed).with_topology(topology);
        if let Some(interval) = self.snapshot_interval {
            sim = sim.with_snapshot_interval(interval);
        }

        let positions = match self.layout {
            Layout::Chain { spacing } => chain_positions(self.num_nodes, spacing),
            Layout::Grid { columns, spacing } => grid_positions(self.num_nodes, columns, spacing),
            Layout::Random { width, height } => {
                random_positions(self.num_nodes, width, height, self.seed)
            }
            Layout::Custom(positions) => positions,
        };

        let mut addrs = Vec::with_capacity(self.num_nodes);
        for (i, (x, y)) in positions.into_iter().enumerate().take(self.num_nodes) {
            let mut config = self
                .overrides
                .iter()
                .rev()
                .find(|(index, _)| *index == i)
                .map(|(_, c)| c.clone())
                .unwrap_or_else(|| self.config.clone());
            if self.malicious.contains(&i) {
                config = config.with_malicious(true);
            }
            addrs.push(sim.add_node(node_addr(i), config, x, y)?);
        }

        if let Some(start) = self.first_stream {
            sim.assign_streams(start);
        }

        for (time, from, to, payload) in self.sends {
            if let (Some(&from), Some(&to)) = (addrs.get(from), addrs.get(to)) {
                sim.schedule_send(time, from, to, payload);
            }
        }

        for (time, action) in self.actions {
            let action = match action {
                IndexedAction::Move { node, x, y } => addrs
                    .get(node)
                    .map(|&node| ScenarioAction::MoveNode { node, x, y }),
                IndexedAction::Disable { a, b } => addrs
                    .get(a)
                    .zip(addrs.get(b))
                    .map(|(&a, &b)| ScenarioAction::DisableLink { a, b }),
                IndexedAction::Enable { a, b } => addrs
                    .get(a)
                    .zip(addrs.get(b))
                    .map(|(&a, &b)| ScenarioAction::EnableLink { a, b }),
            };
            if let Some(action) = action {
                sim.schedule_action(time, action);
            }
        }

        Ok((sim, addrs))
    }

    /// Build and run the simulation for the specified duration.
    pub fn run_for(self, duration: Duration) -> Result<SimulationResult, Error> {
        let (mut sim, _) = self.build()?;
        Ok(sim.run_for(duration))
    }

    /// Build and run until the specified time.
    pub fn run_until(self, time: Timestamp) -> Result<SimulationResult, Error> {
        let (mut sim, _) = self.build()?;
        Ok(sim.run_until(time))
    }
}

/// An `n`-node chain with hellos off, for quiet end-to-end checks.
pub fn quiet_chain(num_nodes: usize) -> ScenarioBuilder {
    ScenarioBuilder::new(num_nodes).with_config(ProtocolConfig::default().with_hello(false))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_addr() {
        assert_eq!(node_addr(0), Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(node_addr(255), Ipv4Addr::new(10, 0, 1, 0));
    }

    #[test]
    fn test_scenario_builder_basic() {
        let (sim, nodes) = ScenarioBuilder::new(3).with_seed(123).build().unwrap();
        assert_eq!(nodes.len(), 3);
        assert_eq!(sim.node_addrs(), nodes.as_slice());
        assert!(sim.topology().is_connected(nodes[0], nodes[1]));
        assert!(!sim.topology().is_connected(nodes[0], nodes[2]));
    }

    #[test]
    fn test_malicious_and_override() {
        let (sim, nodes) = ScenarioBuilder::new(3)
            .malicious(1)
            .with_node_config(2, ProtocolConfig::default().with_rreq_bound(5))
            .build()
            .unwrap();
        assert!(sim.node(nodes[1]).unwrap().inner().is_malicious());
        assert!(!sim.node(nodes[0]).unwrap().inner().is_malicious());
        assert_eq!(sim.node(nodes[2]).unwrap().inner().config().rreq_bound, 5);
    }

    #[test]
    fn test_invalid_config_fails_build() {
        let result = ScenarioBuilder::new(2)
            .with_config(ProtocolConfig::default().with_rreq_bound(0))
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_scheduled_link_actions() {
        let (mut sim, nodes) = ScenarioBuilder::new(2)
            .disable_link_at(Timestamp::from_millis(100), 0, 1)
            .enable_link_at(Timestamp::from_millis(300), 1, 0)
            .build()
            .unwrap();
        sim.run_until(Timestamp::from_millis(200));
        assert!(!sim.topology().is_connected(nodes[0], nodes[1]));
        sim.run_until(Timestamp::from_millis(400));
        assert!(sim.topology().is_connected(nodes[0], nodes[1]));
    }
}
