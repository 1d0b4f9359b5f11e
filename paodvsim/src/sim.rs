//! Discrete event simulator for paodv networks.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use hashbrown::HashMap;
use paodv::{Addr, Duration, Error, Frame, LinkEvent, NextHop, ProtocolConfig, Timestamp};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, trace};

use crate::event::{Event, ScenarioAction, ScheduledEvent};
use crate::metrics::{CounterSnapshot, SimMetrics, SimulationResult};
use crate::node::SimNode;
use crate::topology::Topology;

/// Discrete event simulator for paodv networks.
pub struct Simulator {
    nodes: HashMap<Addr, SimNode>,
    /// Node addresses in creation order.
    order: Vec<Addr>,
    topology: Topology,
    current_time: Timestamp,
    /// Pending events, earliest first.
    queue: BinaryHeap<Reverse<ScheduledEvent>>,
    metrics: SimMetrics,
    /// Insertion counter breaking ties between same-time events.
    next_seq: u64,
    /// Earliest wake-up already queued for each node.
    wakeups: HashMap<Addr, Timestamp>,
    seed: u64,
    /// Drives link loss.
    rng: StdRng,
    snapshot_interval: Option<Duration>,
    next_snapshot: Option<Timestamp>,
}

impl Simulator {
    /// Create a new simulator with given RNG seed.
    pub fn new(seed: u64) -> Self {
        Self {
            nodes: HashMap::new(),
            order: Vec::new(),
            topology: Topology::default(),
            current_time: Timestamp::ZERO,
            queue: BinaryHeap::new(),
            metrics: SimMetrics::new(),
            next_seq: 0,
            wakeups: HashMap::new(),
            seed,
            rng: StdRng::seed_from_u64(seed),
            snapshot_interval: None,
            next_snapshot: None,
        }
    }

    /// Set the network topology. Nodes added afterwards locate themselves in it.
    pub fn with_topology(mut self, topology: Topology) -> Self {
        self.topology = topology;
        self
    }

    /// Set the snapshot interval for automatic counter recording.
    pub fn with_snapshot_interval(mut self, interval: Duration) -> Self {
        self.snapshot_interval = Some(interval);
        self.next_snapshot = Some(self.current_time + interval);
        self
    }

    /// Place a node at `(x, y)` and start it.
    ///
    /// The node's random source is seeded from the simulator seed and its
    /// creation index.
    pub fn add_node(
        &mut self,
        address: Addr,
        config: ProtocolConfig,
        x: f64,
        y: f64,
    ) -> Result<Addr, Error> {
        let node_seed = self
            .seed
            .wrapping_add((self.order.len() as u64).wrapping_mul(1000));
        let mut node = SimNode::new(
            address,
            config,
            node_seed,
            self.topology.shared_positions(),
            self.current_time,
        )?;
        self.topology.place(address, x, y);
        node.initialize(self.current_time);

        self.nodes.insert(address, node);
        self.order.push(address);
        self.after_activity(address);
        Ok(address)
    }

    pub fn node(&self, address: Addr) -> Option<&SimNode> {
        self.nodes.get(&address)
    }

    pub fn node_mut(&mut self, address: Addr) -> Option<&mut SimNode> {
        self.nodes.get_mut(&address)
    }

    /// All node addresses, in creation order.
    pub fn node_addrs(&self) -> &[Addr] {
        &self.order
    }

    pub fn current_time(&self) -> Timestamp {
        self.current_time
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn topology_mut(&mut self) -> &mut Topology {
        &mut self.topology
    }

    pub fn metrics(&self) -> &SimMetrics {
        &self.metrics
    }

    /// Give every node its own reproducible random stream.
    ///
    /// Nodes are visited in creation order starting at stream `start`.
    /// Returns the number of streams consumed.
    pub fn assign_streams(&mut self, start: i64) -> i64 {
        let mut current = start;
        for address in &self.order {
            if let Some(node) = self.nodes.get_mut(address) {
                current += node.inner_mut().assign_streams(current);
            }
        }
        current - start
    }

    /// Schedule an event.
    pub fn schedule(&mut self, time: Timestamp, event: Event) {
        self.queue
            .push(Reverse(ScheduledEvent::new(time, self.next_seq, event)));
        self.next_seq += 1;
    }

    /// Schedule a scenario action.
    pub fn schedule_action(&mut self, time: Timestamp, action: ScenarioAction) {
        self.schedule(time, Event::ScenarioAction(action));
    }

    /// Schedule an application send.
    pub fn schedule_send(&mut self, time: Timestamp, from: Addr, to: Addr, payload: Vec<u8>) {
        self.schedule(time, Event::AppSend { from, to, payload });
    }

    /// Process every event due at or before `end_time`, then stop the
    /// clock at `end_time`.
    pub fn run_until(&mut self, end_time: Timestamp) -> SimulationResult {
        while self
            .queue
            .peek()
            .is_some_and(|Reverse(next)| next.time <= end_time)
        {
            let Some(Reverse(scheduled)) = self.queue.pop() else {
                break;
            };
            self.advance_time(scheduled.time);
            self.process_event(scheduled.event);
            self.maybe_take_snapshot();
        }

        self.advance_time(end_time);
        self.take_snapshot();

        SimulationResult {
            end_time: self.current_time,
            metrics: self.metrics.clone(),
            queue_exhausted: self.queue.is_empty(),
        }
    }

    /// Run simulation for specified duration.
    pub fn run_for(&mut self, duration: Duration) -> SimulationResult {
        self.run_until(self.current_time + duration)
    }

    fn advance_time(&mut self, time: Timestamp) {
        if time > self.current_time {
            self.current_time = time;
        }
    }

    fn process_event(&mut self, event: Event) {
        match event {
            Event::FrameDelivery { to, from, data } => self.deliver_frame(to, from, data),
            Event::TxFailure { node, next_hop } => self.report_tx_failure(node, next_hop),
            Event::TimerFire { node } => self.fire_timer(node),
            Event::AppSend { from, to, payload } => self.app_send(from, to, payload),
            Event::ScenarioAction(action) => self.execute_action(action),
        }
    }

    fn deliver_frame(&mut self, to: Addr, from: Addr, data: Vec<u8>) {
        let now = self.current_time;
        if let Some(node) = self.nodes.get_mut(&to) {
            node.handle_frame(from, data, now);
            self.metrics.frames_delivered += 1;
        }
        self.after_activity(to);
    }

    fn report_tx_failure(&mut self, node: Addr, next_hop: Addr) {
        let now = self.current_time;
        if let Some(n) = self.nodes.get_mut(&node) {
            n.handle_link_event(LinkEvent::TxFailed { next_hop }, now);
        }
        self.after_activity(node);
    }

    fn fire_timer(&mut self, address: Addr) {
        let now = self.current_time;
        if self.wakeups.get(&address) == Some(&now) {
            self.wakeups.remove(&address);
        }
        if let Some(node) = self.nodes.get_mut(&address) {
            node.handle_timer(now);
        }
        self.after_activity(address);
    }

    fn app_send(&mut self, from: Addr, to: Addr, payload: Vec<u8>) {
        let now = self.current_time;
        if let Some(node) = self.nodes.get_mut(&from) {
            node.app_send(to, payload, now);
        }
        self.after_activity(from);
    }

    /// Route a node's output and queue its next wake-up.
    fn after_activity(&mut self, address: Addr) {
        let frames = match self.nodes.get_mut(&address) {
            Some(node) => {
                node.drain_app();
                node.take_outgoing()
            }
            None => return,
        };
        for frame in frames {
            self.route_frame(address, frame);
        }
        self.schedule_wakeup(address);
    }

    /// Queue a timer event for the node's earliest deadline unless an
    /// earlier one is already queued.
    fn schedule_wakeup(&mut self, address: Addr) {
        let Some(deadline) = self.nodes.get(&address).and_then(SimNode::next_deadline) else {
            return;
        };
        let deadline = deadline.max(self.current_time);
        if let Some(&queued) = self.wakeups.get(&address) {
            if queued <= deadline && queued >= self.current_time {
                return;
            }
        }
        self.wakeups.insert(address, deadline);
        self.schedule(deadline, Event::TimerFire { node: address });
    }

    /// Hand a frame to every neighbor that should hear it.
    fn route_frame(&mut self, sender: Addr, frame: Frame) {
        self.metrics.frames_sent += 1;
        let delay = self.topology.link_profile().delay;
        let loss_rate = self.topology.link_profile().loss_rate;
        let now = self.current_time;

        let receivers = match frame.next_hop {
            NextHop::Broadcast => self.topology.neighbors(sender),
            NextHop::Unicast(next_hop) => {
                if !self.topology.is_connected(sender, next_hop) {
                    trace!(from = %sender, to = %next_hop, "unicast out of reach");
                    self.metrics.tx_failures += 1;
                    self.schedule(
                        now + delay,
                        Event::TxFailure {
                            node: sender,
                            next_hop,
                        },
                    );
                    return;
                }
                vec![next_hop]
            }
        };

        for receiver in receivers {
            if loss_rate > 0.0 && self.rng.gen::<f64>() < loss_rate {
                self.metrics.frames_dropped += 1;
                continue;
            }
            self.schedule(
                now + delay,
                Event::FrameDelivery {
                    to: receiver,
                    from: sender,
                    data: frame.data.clone(),
                },
            );
        }
    }

    fn execute_action(&mut self, action: ScenarioAction) {
        debug!(time = %self.current_time, ?action, "scenario action");
        match action {
            ScenarioAction::MoveNode { node, x, y } => self.topology.place(node, x, y),
            ScenarioAction::DisableLink { a, b } => self.topology.disable_link(a, b),
            ScenarioAction::EnableLink { a, b } => self.topology.enable_link(a, b),
            ScenarioAction::TakeSnapshot => self.take_snapshot(),
        }
    }

    fn maybe_take_snapshot(&mut self) {
        if let Some(next) = self.next_snapshot {
            if self.current_time >= next {
                self.take_snapshot();
                if let Some(interval) = self.snapshot_interval {
                    self.next_snapshot = Some(next + interval);
                }
            }
        }
    }

    /// Record every node's counters.
    pub fn take_snapshot(&mut self) {
        let mut snapshot = CounterSnapshot::new(self.current_time);
        for (address, node) in &self.nodes {
            snapshot.record_node(*address, node.counters().clone());
        }
        self.metrics.add_snapshot(snapshot);
    }
}
