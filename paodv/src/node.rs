//! Node implementation - the main protocol state machine.
//!
//! The Node struct holds all protocol state for one host and provides an
//! async `run()` method that drives the protocol. It is fully event-driven:
//! - Incoming link events trigger message handling or link-break handling
//! - Application sends trigger data forwarding or a route search
//! - Armed timers trigger retries, hellos, expiry and deletion
//!
//! Every handler is also callable directly with an explicit `now`, which is
//! how a discrete-event simulator drives many nodes on one thread.
//!
//! # Usage
//!
//! ```ignore
//! let node = Node::new(addr, ProtocolConfig::default(), transport, random, clock, locator)?;
//!
//! // Spawn the node's run loop
//! spawn(async move {
//!     node.run().await;
//! });
//!
//! // Send data to another node
//! node.outgoing().send(OutgoingData { destination, payload }).await;
//!
//! // Receive data from other nodes
//! let data = node.incoming().receive().await;
//! ```

use alloc::vec::Vec;
use hashbrown::HashMap;

use embassy_sync::channel::Channel;
use tracing::{debug, warn};

use crate::config::{DefaultConfig, NodeConfig, ProtocolConfig};
use crate::flood::{RateLimiter, RebroadcastLedger, SeenRequests};
use crate::metrics::Counters;
use crate::policy::{Candidate, TrustPolicy, Verdict};
use crate::queue::RequestQueue;
use crate::seqno::{SeqNo, SequenceCounter};
use crate::table::{RouteEntry, RouteState, RoutingTable};
use crate::time::{Duration, Timestamp};
use crate::timer::{TimerKey, TimerWheel};
use crate::traits::{
    AppInChannel, AppOutChannel, Clock, EventChannel, IncomingData, Locator, OutgoingData, Random,
    Transport,
};
use crate::types::{Addr, Error, Event, Frame, IfaceId, LinkEvent, NextHop, Position};
use crate::wire::{Decode, Encode, Message};

/// Upper bound on the random delay before the first hello.
const HELLO_START_JITTER_MS: u64 = 100;

/// Bookkeeping for an in-flight route search.
#[derive(Clone, Debug)]
pub struct PendingRequest {
    pub destination: Addr,
    /// Flood attempts made so far. Expanding-ring attempts are not counted.
    pub retries: u8,
    /// Id of the most recent RREQ.
    pub request_id: u32,
    /// When the current attempt times out.
    pub next_retry: Timestamp,
    /// TTL of the current ring while expanding-ring search is active.
    pub ring_ttl: Option<u8>,
    /// Set when the search repairs a broken route locally.
    pub repair: Option<LocalRepair>,
}

/// Saved state of a local repair attempt.
#[derive(Clone, Debug)]
pub struct LocalRepair {
    /// TTL used for the repair flood.
    pub ttl: u8,
    /// Precursors of the broken route, told if the repair fails.
    pub precursors: Vec<Addr>,
    pub dest_seq: SeqNo,
}

/// Externally visible state of the search for one destination.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SearchState {
    Idle,
    Searching { retries: u8, request_id: u32 },
}

/// The main protocol node.
///
/// Generic over:
/// - `T`: Transport implementation
/// - `R`: Random number generator
/// - `Clk`: Clock/timer implementation
/// - `L`: Position/distance source for the trust policy
/// - `Cfg`: Compile-time memory bounds
///
/// The node is fully event-driven. Call `run()` to start the main loop, or
/// call the `handle_*` methods from a simulator.
pub struct Node<T, R, Clk, L, Cfg: NodeConfig = DefaultConfig> {
    // Dependencies (injected)
    pub(crate) transport: T,
    pub(crate) random: R,
    pub(crate) clock: Clk,
    pub(crate) locator: L,

    // Application-level channels
    pub(crate) app_incoming: AppInChannel,
    pub(crate) app_outgoing: AppOutChannel,
    pub(crate) events: EventChannel,

    // Identity and options
    pub(crate) address: Addr,
    pub(crate) config: ProtocolConfig,
    pub(crate) policy: TrustPolicy,
    pub(crate) seq: SequenceCounter,
    pub(crate) next_request_id: u32,

    // Protocol state
    pub(crate) table: RoutingTable<Cfg>,
    pub(crate) timers: TimerWheel,
    pub(crate) pending: HashMap<Addr, PendingRequest>,
    pub(crate) seen: SeenRequests<Cfg>,
    pub(crate) rebroadcasts: RebroadcastLedger<Cfg>,
    pub(crate) queue: RequestQueue<Cfg>,
    /// Neighbors heard through hellos, with their liveness deadline.
    pub(crate) neighbors: HashMap<Addr, Timestamp>,
    /// Neighbors whose RREQs are ignored until the deadline.
    pub(crate) blacklist: HashMap<Addr, Timestamp>,

    // Scheduling
    pub(crate) rreq_limiter: RateLimiter,
    pub(crate) rerr_limiter: RateLimiter,
    pub(crate) last_broadcast: Option<Timestamp>,

    // Metrics
    pub(crate) counters: Counters,
}

impl<T, R, Clk, L, Cfg> Node<T, R, Clk, L, Cfg>
where
    T: Transport,
    R: Random,
    Clk: Clock,
    L: Locator,
    Cfg: NodeConfig,
{
    /// Create a node for `address`.
    ///
    /// Fails with [`Error::Config`] if `config` does not validate.
    pub fn new(
        address: Addr,
        config: ProtocolConfig,
        transport: T,
        random: R,
        clock: Clk,
        locator: L,
    ) -> Result<Self, Error> {
        config.validate()?;
        Ok(Self {
            transport,
            random,
            clock,
            locator,
            app_incoming: Channel::new(),
            app_outgoing: Channel::new(),
            events: Channel::new(),
            address,
            policy: TrustPolicy::from_config(&config),
            rreq_limiter: RateLimiter::new(config.rreq_rate_limit),
            rerr_limiter: RateLimiter::new(config.rerr_rate_limit),
            config,
            seq: SequenceCounter::new(),
            next_request_id: 0,
            table: RoutingTable::new(address),
            timers: TimerWheel::new(),
            pending: HashMap::new(),
            seen: SeenRequests::new(),
            rebroadcasts: RebroadcastLedger::new(),
            queue: RequestQueue::new(),
            neighbors: HashMap::new(),
            blacklist: HashMap::new(),
            last_broadcast: None,
            counters: Counters::new(),
        })
    }

    // --- Public accessors ---

    pub fn address(&self) -> Addr {
        self.address
    }

    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    pub fn is_malicious(&self) -> bool {
        self.config.is_malicious
    }

    /// This node's current own sequence number.
    pub fn own_seq(&self) -> SeqNo {
        self.seq.current()
    }

    pub fn counters(&self) -> &Counters {
        &self.counters
    }

    pub fn routing_table(&self) -> &RoutingTable<Cfg> {
        &self.table
    }

    /// Route search state for `destination`.
    pub fn search_state(&self, destination: Addr) -> SearchState {
        match self.pending.get(&destination) {
            Some(p) => SearchState::Searching {
                retries: p.retries,
                request_id: p.request_id,
            },
            None => SearchState::Idle,
        }
    }

    /// Full bookkeeping of the search for `destination`, if one is running.
    pub fn pending_request(&self, destination: Addr) -> Option<&PendingRequest> {
        self.pending.get(&destination)
    }

    /// Neighbors currently considered alive through hellos.
    pub fn neighbors(&self) -> impl Iterator<Item = Addr> + '_ {
        self.neighbors.keys().copied()
    }

    pub fn is_blacklisted(&self, neighbor: Addr, now: Timestamp) -> bool {
        self.blacklist
            .get(&neighbor)
            .is_some_and(|until| *until > now)
    }

    /// Number of packets waiting for a route.
    pub fn queued_packets(&self) -> usize {
        self.queue.len()
    }

    /// Get the incoming data channel (data delivered to this node).
    pub fn incoming(&self) -> &AppInChannel {
        &self.app_incoming
    }

    /// Get the outgoing data channel (data to send).
    pub fn outgoing(&self) -> &AppOutChannel {
        &self.app_outgoing
    }

    /// Get the events channel.
    pub fn events(&self) -> &EventChannel {
        &self.events
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn locator(&self) -> &L {
        &self.locator
    }

    pub fn clock(&self) -> &Clk {
        &self.clock
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    /// Earliest armed timer.
    pub fn next_deadline(&self) -> Option<Timestamp> {
        self.timers.next_deadline()
    }

    /// Forward `start` to the injected random source as its stream index.
    ///
    /// Returns the number of streams consumed, which is always one.
    pub fn assign_streams(&mut self, start: i64) -> i64 {
        self.random.assign_stream(start as u64);
        1
    }

    /// Arm the periodic timers. Called by `run()`; simulators call it once
    /// per node at start-up.
    pub fn initialize(&mut self, now: Timestamp) {
        if self.config.enable_hello {
            let jitter = Duration::from_millis(self.random.gen_range(0, HELLO_START_JITTER_MS));
            self.timers.arm(TimerKey::Hello, now + jitter);
        }
        self.timers
            .arm(TimerKey::Purge, now + self.config.purge_interval);
    }

    /// Run the node's main loop.
    ///
    /// This is fully event-driven and runs forever. It handles:
    /// - Incoming link events
    /// - Outgoing application data
    /// - Armed timers
    ///
    /// Call this from an async task/executor.
    pub async fn run(&mut self) -> ! {
        use embassy_futures::select::{select3, Either3};

        let now = self.clock.now();
        self.initialize(now);

        loop {
            let wake = self
                .timers
                .next_deadline()
                .unwrap_or_else(|| self.clock.now() + Duration::from_secs(60));

            let result = select3(
                self.transport.incoming().receive(),
                self.app_outgoing.receive(),
                self.clock.sleep_until(wake),
            )
            .await;

            match result {
                Either3::First(event) => {
                    let now = self.clock.now();
                    self.handle_link_event(event, now);
                }
                Either3::Second(data) => {
                    let now = self.clock.now();
                    self.handle_app_send(data, now);
                }
                Either3::Third(()) => {
                    let now = self.clock.now();
                    self.handle_timer(now);
                }
            }
        }
    }

    /// Handle one event from the link layer.
    pub fn handle_link_event(&mut self, event: LinkEvent, now: Timestamp) {
        match event {
            LinkEvent::Received { from, iface, data } => {
                let _ = self.handle_frame(from, iface, &data, now);
            }
            LinkEvent::TxFailed { next_hop } => self.handle_link_failure(next_hop, now),
        }
    }

    /// Decode and dispatch a frame received from neighbor `from`.
    ///
    /// A frame that fails to decode is counted and dropped without any
    /// state change.
    pub fn handle_frame(
        &mut self,
        from: Addr,
        iface: IfaceId,
        data: &[u8],
        now: Timestamp,
    ) -> Result<(), Error> {
        let msg = match Message::decode_from_slice(data) {
            Ok(m) => m,
            Err(e) => {
                self.counters.record_malformed();
                debug!(node = %self.address, from = %from, error = %e, "dropping malformed frame");
                return Err(e.into());
            }
        };
        if from == self.address {
            return Ok(());
        }

        match msg {
            Message::Rreq(rreq) => self.handle_rreq(from, iface, rreq, now),
            Message::Rrep(rrep) => self.handle_rrep(from, iface, rrep, now),
            Message::Rerr(rerr) => self.handle_rerr(from, rerr, now),
            Message::RrepAck(_) => self.handle_rrep_ack(from),
            Message::Data(data) => self.handle_data(from, data, now),
        }
        Ok(())
    }

    /// Handle an application send request from the outgoing channel.
    pub fn handle_app_send(&mut self, data: OutgoingData, now: Timestamp) {
        let OutgoingData {
            destination,
            payload,
        } = data;
        if let Err(e) = self.send(destination, payload, now) {
            debug!(node = %self.address, dst = %destination, error = %e, "send refused");
        }
    }

    /// Fire every timer whose deadline is at or before `now`.
    pub fn handle_timer(&mut self, now: Timestamp) {
        while let Some(key) = self.timers.pop_expired(now) {
            match key {
                TimerKey::RreqRetry(destination) => self.on_rreq_timeout(destination, now),
                TimerKey::RouteDelete(destination) => self.on_route_delete(destination),
                TimerKey::NeighborLoss(neighbor) => self.on_neighbor_loss(neighbor, now),
                TimerKey::RrepAckWait(neighbor) => self.on_rrep_ack_timeout(neighbor, now),
                TimerKey::Hello => self.on_hello_timer(now),
                TimerKey::Purge => self.on_purge_timer(now),
            }
        }
    }

    // --- Internal helpers for other modules ---

    /// Encode `msg` and queue it for transmission.
    ///
    /// Unicasts go out on the interface of the route to the next hop.
    pub(crate) fn send_message(
        &mut self,
        next_hop: NextHop,
        msg: &Message,
        now: Timestamp,
    ) -> Result<(), Error> {
        let data = msg.encode_to_vec();
        if data.len() > self.transport.mtu() {
            warn!(node = %self.address, len = data.len(), "message exceeds MTU");
            return Err(Error::MessageTooLarge);
        }
        let iface = match next_hop {
            NextHop::Broadcast => {
                self.last_broadcast = Some(now);
                None
            }
            NextHop::Unicast(addr) => self.table.lookup(addr).map(|e| e.iface),
        };
        if self
            .transport
            .outgoing()
            .try_send(Frame {
                next_hop,
                iface,
                data,
            })
            .is_err()
        {
            self.counters.record_transport_dropped();
            warn!(node = %self.address, "transport queue full, frame dropped");
        }
        Ok(())
    }

    /// Evaluate a neighbor's offer against the trust policy.
    ///
    /// Returns the verdict of the active policy and whether the cooperative
    /// policy would have trusted the neighbor. The two differ only in
    /// blackhole mode.
    pub(crate) fn assess(
        &self,
        from: Addr,
        advertised: Option<Position>,
        dest_seq: SeqNo,
        hop_count: u8,
    ) -> (Verdict, bool) {
        let candidate = Candidate {
            dest_seq,
            hop_count,
            distance: self.locator.distance_to(from, advertised),
        };
        let verdict = self.policy.evaluate(&candidate);
        let trusted = if self.policy.is_adversarial() {
            TrustPolicy::cooperative(self.config.distance_threshold).evaluate(&candidate)
                == Verdict::Accept
        } else {
            verdict == Verdict::Accept
        };
        (verdict, trusted)
    }

    /// Arm deletion of an invalid route once the delete period has passed.
    pub(crate) fn schedule_route_delete(&mut self, destination: Addr, now: Timestamp) {
        self.timers.arm(
            TimerKey::RouteDelete(destination),
            now + self.config.delete_period(),
        );
    }

    fn on_route_delete(&mut self, destination: Addr) {
        if self
            .table
            .lookup(destination)
            .is_some_and(|e| e.state == RouteState::Invalid)
        {
            self.table.remove(destination);
            debug!(node = %self.address, dst = %destination, "invalid route deleted");
        }
    }

    /// Push an event to the events channel.
    pub(crate) fn push_event(&mut self, event: Event) {
        if self.events.try_send(event).is_err() {
            warn!(node = %self.address, "event channel full, event dropped");
        }
    }

    /// Push delivered data to the app_incoming channel.
    pub(crate) fn push_incoming_data(&mut self, source: Addr, payload: Vec<u8>) {
        if self
            .app_incoming
            .try_send(IncomingData { source, payload })
            .is_err()
        {
            warn!(node = %self.address, "incoming data channel full, payload dropped");
        }
    }

    /// Refresh the route to a neighbor that was just heard from.
    pub(crate) fn touch_neighbor(&mut self, neighbor: Addr, iface: IfaceId, now: Timestamp, trusted: bool) {
        let lifetime = now + self.config.active_route_timeout;
        if let Err(e) = self.table.refresh_neighbor(neighbor, iface, lifetime, trusted) {
            warn!(node = %self.address, neighbor = %neighbor, error = %e, "cannot record neighbor route");
        }
        if self.neighbors.contains_key(&neighbor) {
            self.note_neighbor_alive(neighbor, now + self.config.hello_lifetime());
        }
    }

    /// Install `entry`, logging anything but a stale update.
    ///
    /// Returns true if the table changed.
    pub(crate) fn install_route(&mut self, entry: RouteEntry) -> bool {
        let destination = entry.destination;
        match self.table.insert_or_update(entry) {
            Ok(_) => true,
            Err(Error::StaleUpdate) => {
                debug!(node = %self.address, dst = %destination, "stale route update ignored");
                false
            }
            Err(e) => {
                warn!(node = %self.address, dst = %destination, error = %e, "route not installed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::test_impls::{MockClock, MockLocator, MockRandom, MockTransport};
    use crate::types::{Rreq, PRIMARY_IFACE};
    use core::net::Ipv4Addr;

    type TestNode = Node<MockTransport, MockRandom, MockClock, MockLocator>;

    const A: Addr = Ipv4Addr::new(10, 0, 0, 1);
    const B: Addr = Ipv4Addr::new(10, 0, 0, 2);

    fn make_node(config: ProtocolConfig) -> TestNode {
        Node::new(
            A,
            config,
            MockTransport::new(),
            MockRandom::new(),
            MockClock::new(),
            MockLocator::new(),
        )
        .unwrap()
    }

    #[test]
    fn test_invalid_config_rejected() {
        let result = Node::<_, _, _, _, DefaultConfig>::new(
            A,
            ProtocolConfig::default().with_rreq_bound(0),
            MockTransport::new(),
            MockRandom::new(),
            MockClock::new(),
            MockLocator::new(),
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_initialize_arms_periodic_timers() {
        let mut node = make_node(ProtocolConfig::default());
        node.initialize(Timestamp::ZERO);
        let first = node.next_deadline().unwrap();
        assert!(first < Timestamp::from_millis(HELLO_START_JITTER_MS));

        let mut quiet = make_node(ProtocolConfig::default().with_hello(false));
        quiet.initialize(Timestamp::ZERO);
        assert_eq!(quiet.next_deadline(), Some(Timestamp::from_millis(500)));
    }

    #[test]
    fn test_malformed_frame_counted() {
        let mut node = make_node(ProtocolConfig::default());
        let result = node.handle_frame(B, PRIMARY_IFACE, &[1, 0], Timestamp::ZERO);
        assert!(matches!(result, Err(Error::MalformedMessage(_))));
        assert_eq!(node.counters().malformed_dropped(), 1);
        assert!(node.routing_table().is_empty());
        assert!(node.transport().take_sent().is_empty());
    }

    #[test]
    fn test_own_echo_ignored() {
        let mut node = make_node(ProtocolConfig::default());
        let rreq = Rreq {
            gratuitous: false,
            destination_only: false,
            unknown_seq: true,
            ttl: 10,
            hop_count: 0,
            request_id: 1,
            destination: B,
            dest_seq: SeqNo::ZERO,
            originator: A,
            orig_seq: SeqNo(1),
            position: None,
        };
        let bytes = Message::Rreq(rreq).encode_to_vec();
        node.handle_frame(A, PRIMARY_IFACE, &bytes, Timestamp::ZERO)
            .unwrap();
        assert_eq!(node.counters().rreq_received(), 0);
    }

    #[test]
    fn test_assign_streams_consumes_one() {
        let mut node = make_node(ProtocolConfig::default());
        assert_eq!(node.assign_streams(7), 1);
    }

    #[test]
    fn test_mtu_enforced() {
        let mut node = Node::<_, _, _, _, DefaultConfig>::new(
            A,
            ProtocolConfig::default(),
            MockTransport::with_mtu(16),
            MockRandom::new(),
            MockClock::new(),
            MockLocator::new(),
        )
        .unwrap();
        let result = node.send(B, alloc::vec![0u8; 64], Timestamp::ZERO);
        assert_eq!(result, Err(Error::MessageTooLarge));
        assert_eq!(node.queued_packets(), 0);
    }
}
