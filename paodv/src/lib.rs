#![forbid(unsafe_code)]
//! paodv - On-demand distance-vector routing for mobile ad-hoc networks
//!
//! A sans-IO implementation of an AODV-family routing core with a
//! proximity-based trust policy and a blackhole attack mode for
//! experimentation.
//!
//! This crate is `no_std` but **requires the `alloc` crate**. Collections are
//! heap-allocated with capacity limits fixed by a [`NodeConfig`].
//!
//! # Key Properties
//!
//! - Routes are discovered only when needed, by flooding route requests
//! - Destination sequence numbers keep routes loop-free and fresh
//! - Neighbors further away than a distance threshold may not create routes
//! - A malicious node keeps an honest control plane and drops transit data
//! - All timing runs on virtual time supplied by the host
//!
//! # Example (basic usage)
//!
//! ```
//! use core::net::Ipv4Addr;
//! use paodv::traits::test_impls::{MockClock, MockLocator, MockRandom, MockTransport};
//! use paodv::{DefaultConfig, Node, ProtocolConfig, SearchState, Timestamp};
//!
//! let mut node = Node::<_, _, _, _, DefaultConfig>::new(
//!     Ipv4Addr::new(10, 0, 0, 1),
//!     ProtocolConfig::default(),
//!     MockTransport::new(),
//!     MockRandom::new(),
//!     MockClock::new(),
//!     MockLocator::new(),
//! )
//! .unwrap();
//!
//! // No route yet: the packet is buffered and a search starts.
//! let dst = Ipv4Addr::new(10, 0, 0, 9);
//! node.send(dst, vec![1, 2, 3], Timestamp::from_secs(1)).unwrap();
//! assert_eq!(node.queued_packets(), 1);
//! assert!(matches!(node.search_state(dst), SearchState::Searching { retries: 1, .. }));
//! assert_eq!(node.counters().rreq_sent(), 1);
//! ```
//!
//! # Module Structure
//!
//! - [`types`] - Core types (messages, frames, events, errors)
//! - [`wire`] - Wire format serialization
//! - [`traits`] - Transport, Clock, Random, Locator traits
//! - [`node`] - Main Node struct and public API
//! - [`table`] - Routing table
//! - [`discovery`] - RREQ/RREP route discovery
//! - [`maintenance`] - Hellos, link breaks and RERRs
//! - [`routing`] - Data forwarding
//! - [`policy`] - Trust/distance policy
//! - [`flood`] - Duplicate suppression and rate limiting
//! - [`queue`] - Packets waiting for a route
//! - [`seqno`] - Sequence numbers
//! - [`timer`] - Named virtual-time timers
//! - [`metrics`] - Protocol counters
//! - [`time`] - Timestamp and Duration types
//! - [`config`] - Compile-time bounds and runtime options

#![cfg_attr(not(test), no_std)]

// Prevent test features from being used in release builds.
#[cfg(all(feature = "test-support", not(test), not(debug_assertions)))]
compile_error!(
    "The `test-support` feature must not be enabled in release builds. \
     It includes mock transport, clock and locator implementations meant only for tests."
);

extern crate alloc;

pub mod config;
pub mod discovery;
pub mod flood;
pub mod maintenance;
pub mod metrics;
pub mod node;
pub mod policy;
pub mod queue;
pub mod routing;
pub mod seqno;
pub mod table;
pub mod time;
pub mod timer;
pub mod traits;
pub mod types;
pub mod wire;

// Re-export main types at crate root
pub use config::{ConfigError, DefaultConfig, NodeConfig, ProtocolConfig, SmallConfig};
pub use metrics::Counters;
pub use node::{LocalRepair, Node, PendingRequest, SearchState};
pub use policy::{Candidate, TrustPolicy, Verdict};
pub use seqno::{SeqNo, SequenceCounter};
pub use table::{RouteEntry, RouteState, RoutingTable};
pub use time::{Duration, Timestamp};
pub use timer::TimerKey;
pub use traits::{
    AppInChannel, AppOutChannel, Clock, EventChannel, IncomingData, Locator, OutgoingData, Random,
    Transport, TransportInChannel, TransportOutChannel,
};
pub use types::{
    Addr, Data, Error, Event, Frame, IfaceId, LinkEvent, NextHop, Payload, Position, Rerr, Rrep,
    RrepAck, Rreq,
};
pub use wire::{Decode, DecodeError, Encode, Message};

// Re-export constants
pub use routing::DATA_OVERHEAD;
pub use types::{DATA_TTL, EXT_POSITION, PRIMARY_IFACE};
pub use wire::MAX_RERR_DESTINATIONS;

#[cfg(test)]
mod tests {
    use alloc::vec;
    use core::net::Ipv4Addr;

    use super::*;
    use crate::traits::test_impls::{MockClock, MockLocator, MockRandom, MockTransport};

    /// Type alias for test nodes using default config.
    type TestNode = Node<MockTransport, MockRandom, MockClock, MockLocator, DefaultConfig>;

    fn make_node(addr: Addr, config: ProtocolConfig) -> TestNode {
        Node::new(
            addr,
            config,
            MockTransport::new(),
            MockRandom::new(),
            MockClock::new(),
            MockLocator::new(),
        )
        .unwrap()
    }

    /// Move every queued frame from `from` to the nodes in `to` that should
    /// hear it. Returns the number of frames moved.
    fn pump(from: &TestNode, to: &mut [&mut TestNode], now: Timestamp) -> usize {
        let frames = from.transport().take_sent();
        let moved = frames.len();
        for frame in frames {
            for node in to.iter_mut() {
                let hears = match frame.next_hop {
                    NextHop::Broadcast => true,
                    NextHop::Unicast(addr) => addr == node.address(),
                };
                if hears {
                    let _ = node.handle_frame(from.address(), PRIMARY_IFACE, &frame.data, now);
                }
            }
        }
        moved
    }

    #[test]
    fn test_node_creation() {
        let node = make_node(Ipv4Addr::new(10, 0, 0, 1), ProtocolConfig::default());
        assert_eq!(node.address(), Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(node.own_seq(), SeqNo::ZERO);
        assert!(node.routing_table().is_empty());
        assert!(!node.is_malicious());
        assert_eq!(node.counters(), &Counters::new());
    }

    #[test]
    fn test_two_node_discovery_and_delivery() {
        let a_addr = Ipv4Addr::new(10, 0, 0, 1);
        let b_addr = Ipv4Addr::new(10, 0, 0, 2);
        let mut a = make_node(a_addr, ProtocolConfig::default());
        let mut b = make_node(b_addr, ProtocolConfig::default());
        let now = Timestamp::from_secs(1);

        a.send(b_addr, vec![42], now).unwrap();
        // RREQ out, RREP back, then the released DATA.
        assert_eq!(pump(&a, &mut [&mut b], now), 1);
        assert_eq!(pump(&b, &mut [&mut a], now), 1);
        assert_eq!(pump(&a, &mut [&mut b], now), 1);

        assert_eq!(
            b.incoming().try_receive().ok(),
            Some(IncomingData {
                source: a_addr,
                payload: vec![42]
            })
        );
        assert_eq!(
            a.events().try_receive().ok(),
            Some(Event::RouteFound {
                destination: b_addr,
                hop_count: 1
            })
        );
        assert_eq!(a.search_state(b_addr), SearchState::Idle);
        assert_eq!(b.own_seq(), SeqNo(1));
    }
}
