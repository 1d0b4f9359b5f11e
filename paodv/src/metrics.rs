//! Protocol counters.
//!
//! Every counter only ever increases for the lifetime of a [`Node`](crate::Node).
//! Reading is public, writing is crate-internal.

/// Read-only instrumentation for one protocol instance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Counters {
    rreq_sent: u64,
    rreq_received: u64,
    rrep_sent: u64,
    rerr_sent: u64,
    hello_sent: u64,
    broken_links: u64,
    malicious_drops: u64,
    trust_rejections: u64,
    data_originated: u64,
    data_forwarded: u64,
    data_delivered: u64,
    data_undeliverable: u64,
    malformed_dropped: u64,
    transport_dropped: u64,
}

impl Counters {
    pub fn new() -> Self {
        Self::default()
    }

    /// RREQs originated or re-flooded by this node.
    pub fn rreq_sent(&self) -> u64 {
        self.rreq_sent
    }

    pub fn rreq_received(&self) -> u64 {
        self.rreq_received
    }

    /// RREPs generated or forwarded. Hellos are counted separately.
    pub fn rrep_sent(&self) -> u64 {
        self.rrep_sent
    }

    pub fn rerr_sent(&self) -> u64 {
        self.rerr_sent
    }

    pub fn hello_sent(&self) -> u64 {
        self.hello_sent
    }

    /// Next-hop failures detected, whether or not an RERR followed.
    pub fn broken_links(&self) -> u64 {
        self.broken_links
    }

    /// Transit data packets discarded in blackhole mode.
    pub fn malicious_drops(&self) -> u64 {
        self.malicious_drops
    }

    /// Control messages whose sender failed the distance check.
    pub fn trust_rejections(&self) -> u64 {
        self.trust_rejections
    }

    pub fn data_originated(&self) -> u64 {
        self.data_originated
    }

    pub fn data_forwarded(&self) -> u64 {
        self.data_forwarded
    }

    pub fn data_delivered(&self) -> u64 {
        self.data_delivered
    }

    /// Locally originated packets dropped without being sent.
    pub fn data_undeliverable(&self) -> u64 {
        self.data_undeliverable
    }

    pub fn malformed_dropped(&self) -> u64 {
        self.malformed_dropped
    }

    /// Frames lost because the transport queue was full.
    pub fn transport_dropped(&self) -> u64 {
        self.transport_dropped
    }

    pub(crate) fn record_rreq_sent(&mut self) {
        self.rreq_sent += 1;
    }

    pub(crate) fn record_rreq_received(&mut self) {
        self.rreq_received += 1;
    }

    pub(crate) fn record_rrep_sent(&mut self) {
        self.rrep_sent += 1;
    }

    pub(crate) fn record_rerr_sent(&mut self) {
        self.rerr_sent += 1;
    }

    pub(crate) fn record_hello_sent(&mut self) {
        self.hello_sent += 1;
    }

    pub(crate) fn record_broken_link(&mut self) {
        self.broken_links += 1;
    }

    pub(crate) fn record_malicious_drop(&mut self) {
        self.malicious_drops += 1;
    }

    pub(crate) fn record_trust_rejection(&mut self) {
        self.trust_rejections += 1;
    }

    pub(crate) fn record_data_originated(&mut self) {
        self.data_originated += 1;
    }

    pub(crate) fn record_data_forwarded(&mut self) {
        self.data_forwarded += 1;
    }

    pub(crate) fn record_data_delivered(&mut self) {
        self.data_delivered += 1;
    }

    pub(crate) fn record_data_undeliverable(&mut self, n: usize) {
        self.data_undeliverable += n as u64;
    }

    pub(crate) fn record_malformed(&mut self) {
        self.malformed_dropped += 1;
    }

    pub(crate) fn record_transport_dropped(&mut self) {
        self.transport_dropped += 1;
    }
}
