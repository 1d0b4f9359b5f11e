//! Core types and constants for the paodv protocol.

use alloc::vec::Vec;
use core::net::Ipv4Addr;

use crate::config::ConfigError;
use crate::seqno::SeqNo;
use crate::time::Duration;
use crate::wire::DecodeError;

/// Node address. The protocol routes between IPv4 hosts.
pub type Addr = Ipv4Addr;

/// Application payload carried by DATA messages.
pub type Payload = Vec<u8>;

/// Network interface index a route was learned on.
pub type IfaceId = u8;

/// Interface used by single-radio hosts.
pub const PRIMARY_IFACE: IfaceId = 0;

/// Initial TTL for locally originated DATA messages.
pub const DATA_TTL: u8 = 64;

/// Extension type carrying the sender's position.
pub const EXT_POSITION: u8 = 0x01;

/// Planar position in metres, as advertised in the position extension.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

impl Position {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Route request, flooded to discover a destination.
#[derive(Debug, Clone, PartialEq)]
pub struct Rreq {
    /// Ask intermediate responders to notify the destination too.
    pub gratuitous: bool,
    /// Only the destination itself may answer.
    pub destination_only: bool,
    /// The originator knows no sequence number for the destination.
    pub unknown_seq: bool,
    /// Remaining rebroadcast radius.
    pub ttl: u8,
    pub hop_count: u8,
    pub request_id: u32,
    pub destination: Addr,
    pub dest_seq: SeqNo,
    pub originator: Addr,
    pub orig_seq: SeqNo,
    /// Position of the node that transmitted this copy.
    pub position: Option<Position>,
}

/// Route reply, unicast back along the reverse path.
#[derive(Debug, Clone, PartialEq)]
pub struct Rrep {
    /// Receiver must answer with an RREP-ACK.
    pub ack_required: bool,
    pub prefix_size: u8,
    pub hop_count: u8,
    pub destination: Addr,
    pub dest_seq: SeqNo,
    pub originator: Addr,
    pub lifetime: Duration,
    /// Position of the node that transmitted this copy.
    pub position: Option<Position>,
}

impl Rrep {
    /// A hello: an RREP advertising the sender itself at zero hops.
    pub fn hello(sender: Addr, seq: SeqNo, lifetime: Duration, position: Option<Position>) -> Self {
        Self {
            ack_required: false,
            prefix_size: 0,
            hop_count: 0,
            destination: sender,
            dest_seq: seq,
            originator: sender,
            lifetime,
            position,
        }
    }

    /// True if this reply is a hello advertisement.
    pub fn is_hello(&self) -> bool {
        self.destination == self.originator && self.hop_count == 0
    }
}

/// Route error, listing destinations that became unreachable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rerr {
    /// Upstream nodes should not delete the route (local repair under way).
    pub no_delete: bool,
    pub unreachable: Vec<(Addr, SeqNo)>,
}

/// Acknowledgement of an RREP carrying the ack-required flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RrepAck;

/// Application data forwarded hop by hop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Data {
    pub ttl: u8,
    pub source: Addr,
    pub destination: Addr,
    pub payload: Payload,
}

/// Link-layer next hop for an outgoing frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NextHop {
    /// All one-hop neighbors.
    Broadcast,
    /// A single neighbor.
    Unicast(Addr),
}

/// An encoded message handed to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub next_hop: NextHop,
    /// Interface to send on, `None` for all of them.
    pub iface: Option<IfaceId>,
    pub data: Vec<u8>,
}

/// Something the link layer reports to the protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// A frame arrived from a one-hop neighbor.
    Received {
        from: Addr,
        iface: IfaceId,
        data: Vec<u8>,
    },
    /// The link layer gave up delivering a unicast frame.
    TxFailed { next_hop: Addr },
}

/// Events emitted by the node for application handling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A search completed and buffered packets were released.
    RouteFound { destination: Addr, hop_count: u8 },
    /// Buffered packets for `destination` were dropped.
    Undeliverable {
        destination: Addr,
        dropped: usize,
        reason: Error,
    },
    /// A route used by this node was invalidated.
    RouteLost { destination: Addr },
}

/// Error taxonomy of the protocol core.
///
/// None of these are fatal. They are returned to callers that care, counted,
/// and otherwise absorbed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// Decoding failed. The message was dropped without touching state.
    #[error("malformed message: {0}")]
    MalformedMessage(#[from] DecodeError),
    /// A route update was not fresher than the installed entry.
    #[error("route update is not fresher than the installed entry")]
    StaleUpdate,
    /// The retry bound was reached without an answer.
    #[error("route search exhausted")]
    SearchExhausted,
    /// No valid route and none being searched.
    #[error("no route to destination")]
    NoRoute,
    /// Zero hop count for a destination other than the local node.
    #[error("hop count 0 is reserved for the local node")]
    InvalidRoute,
    /// The routing table is at capacity.
    #[error("routing table full")]
    TableFull,
    /// The encoded message exceeds the transport MTU.
    #[error("message exceeds transport MTU")]
    MessageTooLarge,
    /// Rejected configuration.
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
}
