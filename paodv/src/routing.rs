//! Data plane: origination, forwarding and local delivery of DATA messages.
//!
//! Packets travel hop by hop along routes installed by discovery. Every use
//! of a route keeps it alive: the route to the destination, the route back
//! to the source and the next-hop neighbor route are all pushed out to
//! `active_route_timeout`.
//!
//! In blackhole mode the control plane behaves normally, so the node still
//! attracts traffic, but transit packets are counted and discarded instead
//! of forwarded.

use alloc::vec;
use tracing::debug;

use crate::config::NodeConfig;
use crate::node::Node;
use crate::seqno::SeqNo;
use crate::time::Timestamp;
use crate::traits::{Clock, Locator, Random, Transport};
use crate::types::{Addr, Data, Error, NextHop, Payload, DATA_TTL};
use crate::wire::Message;

/// Bytes a DATA message adds around its payload.
pub const DATA_OVERHEAD: usize = 12;

impl<T, R, Clk, L, Cfg> Node<T, R, Clk, L, Cfg>
where
    T: Transport,
    R: Random,
    Clk: Clock,
    L: Locator,
    Cfg: NodeConfig,
{
    /// Send `payload` to `destination`.
    ///
    /// Goes out immediately over a valid route. Otherwise the packet is
    /// buffered and a route search starts; the outcome is reported through
    /// the event channel. Fails only if the payload cannot fit in one frame.
    pub fn send(&mut self, destination: Addr, payload: Payload, now: Timestamp) -> Result<(), Error> {
        if destination == self.address {
            self.counters.record_data_delivered();
            self.push_incoming_data(self.address, payload);
            return Ok(());
        }
        if payload.len() > usize::from(u16::MAX)
            || DATA_OVERHEAD + payload.len() > self.transport.mtu()
        {
            return Err(Error::MessageTooLarge);
        }
        self.counters.record_data_originated();

        if self.table.lookup_valid(destination, now).is_some() {
            self.forward_originated(destination, payload, now);
            return Ok(());
        }

        if let Some(evicted) = self.queue.enqueue(destination, payload, now) {
            debug!(node = %self.address, dst = %evicted.destination, "request queue full, oldest packet dropped");
            self.report_undeliverable(evicted.destination, 1, Error::NoRoute);
        }
        self.start_discovery(destination, now, None);
        Ok(())
    }

    /// Transmit a locally originated packet over the current route.
    pub(crate) fn forward_originated(&mut self, destination: Addr, payload: Payload, now: Timestamp) {
        let Some(next_hop) = self
            .table
            .lookup_valid(destination, now)
            .map(|r| r.next_hop)
        else {
            self.report_undeliverable(destination, 1, Error::NoRoute);
            return;
        };
        let data = Data {
            ttl: DATA_TTL,
            source: self.address,
            destination,
            payload,
        };
        if self
            .send_message(NextHop::Unicast(next_hop), &Message::Data(data), now)
            .is_ok()
        {
            self.refresh_active_route(destination, next_hop, now);
        }
    }

    /// Handle a DATA message from neighbor `from`.
    pub(crate) fn handle_data(&mut self, from: Addr, data: Data, now: Timestamp) {
        let keep_alive = now + self.config.active_route_timeout;
        self.table.extend_lifetime(from, keep_alive);

        if data.destination == self.address {
            self.table.extend_lifetime(data.source, keep_alive);
            self.counters.record_data_delivered();
            self.push_incoming_data(data.source, data.payload);
            return;
        }
        if data.ttl <= 1 {
            debug!(node = %self.address, src = %data.source, dst = %data.destination, "DATA TTL expired");
            return;
        }

        let Some(next_hop) = self
            .table
            .lookup_valid(data.destination, now)
            .map(|r| r.next_hop)
        else {
            self.report_no_route(from, data.destination, now);
            return;
        };

        let (source, destination) = (data.source, data.destination);
        if self.is_malicious() {
            // Same route bookkeeping as a forward; only the transmit is skipped.
            self.note_transit(from, source, destination, next_hop, now);
            self.counters.record_malicious_drop();
            debug!(node = %self.address, src = %source, dst = %destination, "transit packet dropped");
            return;
        }

        let forwarded = Data {
            ttl: data.ttl - 1,
            ..data
        };
        if self
            .send_message(NextHop::Unicast(next_hop), &Message::Data(forwarded), now)
            .is_ok()
        {
            self.counters.record_data_forwarded();
            self.note_transit(from, source, destination, next_hop, now);
        }
    }

    /// Keep the routes a transit packet used alive and remember `from` as
    /// a precursor toward `destination`.
    fn note_transit(
        &mut self,
        from: Addr,
        source: Addr,
        destination: Addr,
        next_hop: Addr,
        now: Timestamp,
    ) {
        self.refresh_active_route(destination, next_hop, now);
        self.table
            .extend_lifetime(source, now + self.config.active_route_timeout);
        self.table.add_precursor(destination, from);
    }

    /// A transit packet hit a missing route: tell the previous hop.
    fn report_no_route(&mut self, from: Addr, destination: Addr, now: Timestamp) {
        if self
            .pending
            .get(&destination)
            .is_some_and(|p| p.repair.is_some())
        {
            debug!(node = %self.address, dst = %destination, "transit packet dropped during local repair");
            return;
        }
        let dest_seq = self
            .table
            .lookup(destination)
            .filter(|e| e.valid_seq)
            .map_or(SeqNo::ZERO, |e| e.dest_seq);
        debug!(node = %self.address, dst = %destination, from = %from, "no route for transit packet");
        self.send_rerr_to(&[from], vec![(destination, dest_seq)], false, now);
    }

    fn refresh_active_route(&mut self, destination: Addr, next_hop: Addr, now: Timestamp) {
        let until = now + self.config.active_route_timeout;
        self.table.extend_lifetime(destination, until);
        self.table.extend_lifetime(next_hop, until);
    }
}
