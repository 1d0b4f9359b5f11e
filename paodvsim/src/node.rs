//! SimNode wrapper for simulated paodv nodes.

use std::cell::Cell;
use std::future::{ready, Ready};

use embassy_sync::channel::Channel;
use paodv::config::DefaultConfig;
use paodv::traits::{Clock, Locator, Random, Transport, TransportInChannel, TransportOutChannel};
use paodv::{
    Addr, Counters, Duration, Error, Event, Frame, IncomingData, LinkEvent, Node, OutgoingData,
    Position, ProtocolConfig, Timestamp, PRIMARY_IFACE,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::topology::SharedPositions;

/// MTU of the simulated radio.
pub const SIM_MTU: usize = 1500;

/// Odd constant spreading consecutive stream indices across the seed space.
const STREAM_SPREAD: u64 = 0x9E37_79B9_7F4A_7C15;

/// Transport whose channels are drained by the simulator.
pub struct SimTransport {
    mtu: usize,
    outgoing: TransportOutChannel,
    incoming: TransportInChannel,
}

impl SimTransport {
    pub fn new() -> Self {
        Self {
            mtu: SIM_MTU,
            outgoing: Channel::new(),
            incoming: Channel::new(),
        }
    }

    pub fn with_mtu(mut self, mtu: usize) -> Self {
        self.mtu = mtu;
        self
    }

    /// Take every frame the node queued for transmission.
    pub fn take_sent(&self) -> Vec<Frame> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.outgoing.try_receive() {
            frames.push(frame);
        }
        frames
    }
}

impl Default for SimTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for SimTransport {
    fn mtu(&self) -> usize {
        self.mtu
    }

    fn outgoing(&self) -> &TransportOutChannel {
        &self.outgoing
    }

    fn incoming(&self) -> &TransportInChannel {
        &self.incoming
    }
}

/// Clock for simulation.
///
/// Time is controlled externally by the simulator.
pub struct SimClock {
    current: Cell<Timestamp>,
}

impl SimClock {
    pub fn new() -> Self {
        Self::at(Timestamp::ZERO)
    }

    pub fn at(time: Timestamp) -> Self {
        Self {
            current: Cell::new(time),
        }
    }

    pub fn set(&self, time: Timestamp) {
        self.current.set(time);
    }

    pub fn advance(&self, duration: Duration) {
        self.current.set(self.current.get() + duration);
    }
}

impl Default for SimClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SimClock {
    type SleepFuture<'a> = Ready<()>;

    fn now(&self) -> Timestamp {
        self.current.get()
    }

    fn sleep_until(&self, _time: Timestamp) -> Self::SleepFuture<'_> {
        ready(())
    }
}

/// Seeded random source that can be pinned to a numbered stream.
pub struct SimRandom {
    seed: u64,
    rng: StdRng,
}

impl SimRandom {
    pub fn with_seed(seed: u64) -> Self {
        Self {
            seed,
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Random for SimRandom {
    fn gen_range(&mut self, min: u64, max: u64) -> u64 {
        if max <= min {
            return min;
        }
        self.rng.gen_range(min..max)
    }

    fn assign_stream(&mut self, stream: u64) {
        self.rng = StdRng::seed_from_u64(self.seed ^ stream.wrapping_mul(STREAM_SPREAD));
    }
}

/// Locator reading the simulator's ground-truth positions.
pub struct SimLocator {
    address: Addr,
    positions: SharedPositions,
}

impl SimLocator {
    pub fn new(address: Addr, positions: SharedPositions) -> Self {
        Self { address, positions }
    }
}

impl Locator for SimLocator {
    fn position(&self) -> Option<Position> {
        self.positions
            .borrow()
            .get(&self.address)
            .map(|&(x, y)| Position::new(x as f32, y as f32))
    }

    fn distance_to(&self, peer: Addr, advertised: Option<Position>) -> Option<f64> {
        let positions = self.positions.borrow();
        let (x, y) = *positions.get(&self.address)?;
        let (px, py) = match positions.get(&peer) {
            Some(&p) => p,
            None => {
                let p = advertised?;
                (p.x as f64, p.y as f64)
            }
        };
        Some(((x - px).powi(2) + (y - py).powi(2)).sqrt())
    }
}

/// Type alias for simulated nodes.
pub type SimNodeInner = Node<SimTransport, SimRandom, SimClock, SimLocator, DefaultConfig>;

/// Wrapper around a paodv Node for simulation.
///
/// Keeps everything the node hands to its application so scenarios can
/// inspect deliveries and protocol events after a run.
pub struct SimNode {
    inner: SimNodeInner,
    /// When the node was created.
    pub created_at: Timestamp,
    received: Vec<IncomingData>,
    events: Vec<Event>,
}

impl SimNode {
    pub fn new(
        address: Addr,
        config: ProtocolConfig,
        seed: u64,
        positions: SharedPositions,
        created_at: Timestamp,
    ) -> Result<Self, Error> {
        let inner = Node::new(
            address,
            config,
            SimTransport::new(),
            SimRandom::with_seed(seed),
            SimClock::at(created_at),
            SimLocator::new(address, positions),
        )?;
        Ok(Self {
            inner,
            created_at,
            received: Vec::new(),
            events: Vec::new(),
        })
    }

    pub fn address(&self) -> Addr {
        self.inner.address()
    }

    pub fn inner(&self) -> &SimNodeInner {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut SimNodeInner {
        &mut self.inner
    }

    pub fn counters(&self) -> &Counters {
        self.inner.counters()
    }

    /// Payloads delivered to this node's application so far.
    pub fn received(&self) -> &[IncomingData] {
        &self.received
    }

    /// Protocol events emitted by this node so far.
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn next_deadline(&self) -> Option<Timestamp> {
        self.inner.next_deadline()
    }

    pub fn initialize(&mut self, now: Timestamp) {
        self.inner.clock().set(now);
        self.inner.initialize(now);
    }

    /// Handle a frame or a delivery failure from the link layer.
    pub fn handle_link_event(&mut self, event: LinkEvent, now: Timestamp) {
        // Keep the clock in step for code that reads clock.now()
        self.inner.clock().set(now);
        self.inner.handle_link_event(event, now);
    }

    /// Convenience wrapper delivering a frame on the primary interface.
    pub fn handle_frame(&mut self, from: Addr, data: Vec<u8>, now: Timestamp) {
        self.handle_link_event(
            LinkEvent::Received {
                from,
                iface: PRIMARY_IFACE,
                data,
            },
            now,
        );
    }

    pub fn handle_timer(&mut self, now: Timestamp) {
        self.inner.clock().set(now);
        self.inner.handle_timer(now);
    }

    /// Send application data to `destination`.
    pub fn app_send(&mut self, destination: Addr, payload: Vec<u8>, now: Timestamp) {
        self.inner.clock().set(now);
        self.inner.handle_app_send(
            OutgoingData {
                destination,
                payload,
            },
            now,
        );
    }

    /// Take all outgoing frames from the transport.
    pub fn take_outgoing(&self) -> Vec<Frame> {
        self.inner.transport().take_sent()
    }

    /// Move delivered data and events out of the node's bounded channels.
    pub fn drain_app(&mut self) {
        while let Ok(data) = self.inner.incoming().try_receive() {
            self.received.push(data);
        }
        while let Ok(event) = self.inner.events().try_receive() {
            self.events.push(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::net::Ipv4Addr;
    use std::rc::Rc;

    use hashbrown::HashMap;
    use paodv::NextHop;

    use super::*;

    const A: Addr = Ipv4Addr::new(10, 0, 0, 1);
    const B: Addr = Ipv4Addr::new(10, 0, 0, 2);

    fn positions() -> SharedPositions {
        let mut map = HashMap::new();
        map.insert(A, (0.0, 0.0));
        map.insert(B, (30.0, 40.0));
        Rc::new(RefCell::new(map))
    }

    #[test]
    fn test_simnode_creation() {
        let node = SimNode::new(A, ProtocolConfig::default(), 1, positions(), Timestamp::ZERO)
            .unwrap();
        assert_eq!(node.address(), A);
        assert!(node.received().is_empty());
        assert_eq!(node.counters(), &Counters::new());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = ProtocolConfig::default().with_rreq_bound(0);
        assert!(SimNode::new(A, config, 1, positions(), Timestamp::ZERO).is_err());
    }

    #[test]
    fn test_locator_uses_true_positions() {
        let locator = SimLocator::new(A, positions());
        assert_eq!(locator.position(), Some(Position::new(0.0, 0.0)));
        assert_eq!(locator.distance_to(B, None), Some(50.0));

        // Unknown peer falls back to its advertised position.
        let stranger = Ipv4Addr::new(10, 0, 0, 9);
        assert_eq!(locator.distance_to(stranger, None), None);
        assert_eq!(
            locator.distance_to(stranger, Some(Position::new(0.0, 20.0))),
            Some(20.0)
        );
    }

    #[test]
    fn test_random_streams_are_reproducible() {
        let mut a = SimRandom::with_seed(7);
        let mut b = SimRandom::with_seed(7);
        a.assign_stream(3);
        b.assign_stream(3);
        let xs: Vec<u64> = (0..8).map(|_| a.gen_range(0, 1000)).collect();
        let ys: Vec<u64> = (0..8).map(|_| b.gen_range(0, 1000)).collect();
        assert_eq!(xs, ys);

        let mut c = SimRandom::with_seed(7);
        c.assign_stream(4);
        let zs: Vec<u64> = (0..8).map(|_| c.gen_range(0, 1000)).collect();
        assert_ne!(xs, zs);
    }

    #[test]
    fn test_empty_range() {
        let mut r = SimRandom::with_seed(1);
        assert_eq!(r.gen_range(5, 5), 5);
    }

    #[test]
    fn test_app_send_emits_rreq() {
        let mut node = SimNode::new(A, ProtocolConfig::default(), 1, positions(), Timestamp::ZERO)
            .unwrap();
        node.app_send(B, vec![1, 2, 3], Timestamp::from_secs(1));
        let frames = node.take_outgoing();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].next_hop, NextHop::Broadcast);
        assert_eq!(node.inner().now(), Timestamp::from_secs(1));
    }
}
