//! Core traits for transport, time, randomness and position abstraction.
//!
//! These traits allow the protocol to be used with different:
//! - Link layers (802.11 ad-hoc, UDP overlays, simulation)
//! - Time sources (real hardware time, simulated time)
//! - Random number generators
//! - Positioning sources (GNSS, ranging radios, a simulator's mobility model)

use alloc::vec::Vec;
use core::future::Future;

use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use embassy_sync::channel::Channel;

use crate::time::Timestamp;
use crate::types::{Addr, Event, Frame, LinkEvent, Payload, Position};

/// Queue size for received link events.
pub(crate) const TRANSPORT_IN_QUEUE_SIZE: usize = 32;

/// Queue size for outgoing frames. A single timer tick can emit one RERR per
/// precursor plus the released contents of a request queue.
pub(crate) const TRANSPORT_OUT_QUEUE_SIZE: usize = 128;

/// Queue size for application-level channels.
pub(crate) const APP_QUEUE_SIZE: usize = 16;

/// Queue size for event channel.
pub(crate) const EVENT_QUEUE_SIZE: usize = 16;

/// Mutex type used for channels. A node runs on a single executor.
pub(crate) type ChannelMutex = NoopRawMutex;

/// Link events delivered to the node.
pub type TransportInChannel = Channel<ChannelMutex, LinkEvent, TRANSPORT_IN_QUEUE_SIZE>;

/// Frames the node wants transmitted.
pub type TransportOutChannel = Channel<ChannelMutex, Frame, TRANSPORT_OUT_QUEUE_SIZE>;

/// Data delivered to this node (application level).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingData {
    /// Node that originated this data.
    pub source: Addr,
    pub payload: Payload,
}

/// Data to send to another node (application level).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingData {
    pub destination: Addr,
    pub payload: Payload,
}

/// Application-level incoming data channel.
pub type AppInChannel = Channel<ChannelMutex, IncomingData, APP_QUEUE_SIZE>;

/// Application-level outgoing data channel.
pub type AppOutChannel = Channel<ChannelMutex, OutgoingData, APP_QUEUE_SIZE>;

/// Protocol event channel.
pub type EventChannel = Channel<ChannelMutex, Event, EVENT_QUEUE_SIZE>;

/// Link-layer backend.
///
/// - `outgoing()`: frames the node hands down, addressed to a neighbor or
///   to every neighbor
/// - `incoming()`: received frames and delivery-failure reports
///
/// # Usage Pattern
///
/// ```
/// use core::net::Ipv4Addr;
/// use paodv::traits::test_impls::MockTransport;
/// use paodv::traits::Transport;
/// use paodv::{Frame, NextHop};
///
/// let transport = MockTransport::new();
/// let _ = transport.outgoing().try_send(Frame {
///     next_hop: NextHop::Unicast(Ipv4Addr::new(10, 0, 0, 2)),
///     iface: None,
///     data: vec![4, 0],
/// });
///
/// let sent = transport.take_sent();
/// assert_eq!(sent.len(), 1);
/// assert_eq!(sent[0].data, vec![4, 0]);
/// ```
pub trait Transport {
    /// Maximum transmission unit for this transport.
    ///
    /// The node checks encoded size before sending and refuses oversized
    /// DATA messages.
    fn mtu(&self) -> usize;

    /// Channel for outgoing frames.
    fn outgoing(&self) -> &TransportOutChannel;

    /// Channel for incoming link events.
    ///
    /// - Radio driver calls `incoming().try_send(..)` on receive or on a
    ///   MAC-level retransmission failure
    /// - Simulator calls `incoming().try_send(..)` to deliver frames
    /// - Node calls `incoming().receive().await` to receive
    fn incoming(&self) -> &TransportInChannel;
}

/// Monotonic clock the routing core reads for lifetimes and deadlines.
///
/// Handlers are always passed `now` explicitly; the clock is only consulted
/// by the async run loop, which sleeps until the next timer deadline.
///
/// # Example
///
/// ```
/// use paodv::traits::test_impls::MockClock;
/// use paodv::{Clock, Duration, Timestamp};
///
/// let clock = MockClock::new();
/// assert_eq!(clock.now(), Timestamp::ZERO);
///
/// clock.advance(Duration::from_secs(10));
/// assert_eq!(clock.now(), Timestamp::from_secs(10));
///
/// clock.set(Timestamp::from_millis(5000));
/// assert_eq!(clock.now().as_millis(), 5000);
/// ```
pub trait Clock {
    type SleepFuture<'a>: Future<Output = ()>
    where
        Self: 'a;

    fn now(&self) -> Timestamp;

    /// Resolves once `now()` has reached `time`.
    fn sleep_until(&self, time: Timestamp) -> Self::SleepFuture<'_>;
}

/// Randomness for hello jitter and the first request id.
pub trait Random {
    /// Uniform draw from `[min, max)`.
    fn gen_range(&mut self, min: u64, max: u64) -> u64;

    /// Generate a random u32.
    fn gen_u32(&mut self) -> u32 {
        self.gen_range(0, u32::MAX as u64 + 1) as u32
    }

    /// Pin this generator to an independent, reproducible stream.
    ///
    /// Generators without stream support ignore this.
    fn assign_stream(&mut self, stream: u64) {
        let _ = stream;
    }
}

/// Position and distance queries for the trust policy.
pub trait Locator {
    /// This node's current position, if known. Advertised in control messages.
    fn position(&self) -> Option<Position>;

    /// Distance to a one-hop neighbor.
    ///
    /// `advertised` is the position the neighbor put in its last message.
    /// Returns `None` when no distance can be determined, in which case the
    /// policy does not reject.
    fn distance_to(&self, peer: Addr, advertised: Option<Position>) -> Option<f64>;
}

#[cfg(any(test, feature = "test-support"))]
pub mod test_impls {
    //! Mock implementations of traits for unit testing and doc tests.
    //!
    //! Available when running tests or with the `test-support` feature enabled.

    use core::cell::{Cell, RefCell};
    use core::future::{ready, Ready};

    use hashbrown::HashMap;

    use super::*;

    /// Mock transport backed by the real channels.
    pub struct MockTransport {
        mtu: usize,
        outgoing: TransportOutChannel,
        incoming: TransportInChannel,
    }

    impl Default for MockTransport {
        fn default() -> Self {
            Self::with_mtu(1500)
        }
    }

    impl MockTransport {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_mtu(mtu: usize) -> Self {
            Self {
                mtu,
                outgoing: Channel::new(),
                incoming: Channel::new(),
            }
        }

        /// Inject a frame as if it was received from `from`.
        pub fn inject_rx(&self, from: Addr, data: Vec<u8>) {
            let _ = self.incoming.try_send(LinkEvent::Received {
                from,
                iface: crate::types::PRIMARY_IFACE,
                data,
            });
        }

        /// Inject a lower-layer delivery failure toward `next_hop`.
        pub fn inject_tx_failure(&self, next_hop: Addr) {
            let _ = self.incoming.try_send(LinkEvent::TxFailed { next_hop });
        }

        /// Take all sent frames in send order.
        pub fn take_sent(&self) -> Vec<Frame> {
            let mut frames = Vec::new();
            while let Ok(frame) = self.outgoing.try_receive() {
                frames.push(frame);
            }
            frames
        }
    }

    impl Transport for MockTransport {
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

    /// Mock clock for testing (synchronous, time advances manually).
    pub struct MockClock {
        current: Cell<Timestamp>,
    }

    impl Default for MockClock {
        fn default() -> Self {
            Self {
                current: Cell::new(Timestamp::ZERO),
            }
        }
    }

    impl MockClock {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn at(time: Timestamp) -> Self {
            Self {
                current: Cell::new(time),
            }
        }

        pub fn set(&self, time: Timestamp) {
            self.current.set(time);
        }

        pub fn advance(&self, duration: crate::time::Duration) {
            self.current.set(self.current.get() + duration);
        }
    }

    impl Clock for MockClock {
        type SleepFuture<'a> = Ready<()>;

        fn now(&self) -> Timestamp {
            self.current.get()
        }

        fn sleep_until(&self, _time: Timestamp) -> Self::SleepFuture<'_> {
            // Tests advance time manually.
            ready(())
        }
    }

    /// Mock random for testing (deterministic).
    pub struct MockRandom {
        pub state: u64,
    }

    impl Default for MockRandom {
        fn default() -> Self {
            Self { state: 12345 }
        }
    }

    impl MockRandom {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_seed(seed: u64) -> Self {
            Self { state: seed }
        }
    }

    impl Random for MockRandom {
        fn gen_range(&mut self, min: u64, max: u64) -> u64 {
            // Simple LCG
            self.state = self.state.wrapping_mul(6364136223846793005).wrapping_add(1);
            let range = max.saturating_sub(min);
            if range == 0 {
                return min;
            }
            min + (self.state % range)
        }

        fn assign_stream(&mut self, stream: u64) {
            self.state = 12345 ^ stream.wrapping_mul(0x9E37_79B9_7F4A_7C15);
        }
    }

    /// Mock locator with per-neighbor distances set by the test.
    #[derive(Default)]
    pub struct MockLocator {
        position: Cell<Option<Position>>,
        distances: RefCell<HashMap<Addr, f64>>,
    }

    impl MockLocator {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn set_position(&self, position: Option<Position>) {
            self.position.set(position);
        }

        /// Report `distance` for `peer` from now on.
        pub fn set_distance(&self, peer: Addr, distance: f64) {
            self.distances.borrow_mut().insert(peer, distance);
        }
    }

    impl Locator for MockLocator {
        fn position(&self) -> Option<Position> {
            self.position.get()
        }

        fn distance_to(&self, peer: Addr, _advertised: Option<Position>) -> Option<f64> {
            self.distances.borrow().get(&peer).copied()
        }
    }
}
