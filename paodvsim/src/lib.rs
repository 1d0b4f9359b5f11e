//! paodvsim - Discrete event network simulator for paodv protocol testing.
//!
//! This crate provides a deterministic, discrete-event simulator for running
//! many paodv nodes in one process without real-time delays.
//!
//! # Features
//!
//! - **Discrete event simulation**: No real-time delays, deterministic ordering
//! - **Geometric radio model**: Nodes hear each other within a fixed range
//! - **Link failures**: Unicasts to unreachable neighbors are reported back
//!   to the sender's routing core
//! - **Scenario builder**: Chains, grids, scheduled moves and link cuts
//! - **Metrics collection**: Per-node counter snapshots, delivery ratio
//!
//! # Example
//!
//! ```
//! use paodvsim::{node_addr, quiet_chain, Counters, Duration, Timestamp};
//!
//! // Four nodes in a line, the ends three hops apart.
//! let (mut sim, nodes) = quiet_chain(4)
//!     .send_at(Timestamp::from_millis(100), 0, 3, vec![7])
//!     .build()
//!     .unwrap();
//! let result = sim.run_for(Duration::from_secs(1));
//!
//! assert_eq!(nodes[3], node_addr(3));
//! assert_eq!(sim.node(nodes[3]).unwrap().received().len(), 1);
//! assert_eq!(result.total(Counters::data_forwarded), 2);
//! ```
//!
//! # Architecture
//!
//! The simulator uses a priority queue of events ordered by (time, sequence_number).
//! The main loop:
//! 1. Pop next event from queue
//! 2. Advance simulation time
//! 3. Process event (call node handlers)
//! 4. Collect outgoing frames, delivered data and protocol events
//! 5. Route frames through the topology, schedule deliveries or failures
//! 6. Queue a wake-up for the node's earliest timer
//!
//! Handlers are called directly (`handle_link_event`, `handle_timer`)
//! instead of through the async `Node::run()` loop.

pub mod event;
pub mod metrics;
pub mod node;
pub mod scenario;
pub mod sim;
pub mod topology;

// Re-export main types
pub use event::{Event, ScenarioAction, ScheduledEvent};
pub use metrics::{CounterSnapshot, SimMetrics, SimulationResult};
pub use node::{SimLocator, SimNode, SimRandom};
pub use paodv::{Addr, Counters, Duration, ProtocolConfig, Timestamp};
pub use scenario::{node_addr, quiet_chain, ScenarioBuilder};
pub use sim::Simulator;
pub use topology::{LinkProfile, Topology};
