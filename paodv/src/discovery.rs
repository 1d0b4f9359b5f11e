//! Route discovery: RREQ origination, flooding and RREP handling.
//!
//! Search state machine per destination:
//!
//! ```text
//! Idle --(packet, no valid route)--> Searching --(RREP)--> Found
//!                                      |   ^
//!                             timeout  |   | retries < bound: new id,
//!                                      v   | backoff doubled
//!                                   Exhausted (queue dropped, reported once)
//! ```
//!
//! With expanding-ring search enabled, a search first sends RREQs with a
//! growing TTL. Those rings do not count against the retry bound. Once the
//! ring passes the threshold the search floods with the network diameter.

use alloc::vec::Vec;
use tracing::{debug, info, warn};

use crate::config::NodeConfig;
use crate::node::{LocalRepair, Node, PendingRequest};
use crate::policy::Verdict;
use crate::seqno::SeqNo;
use crate::table::{RouteEntry, RouteState};
use crate::time::Timestamp;
use crate::timer::TimerKey;
use crate::traits::{Clock, Locator, Random, Transport};
use crate::types::{Addr, Error, Event, IfaceId, NextHop, Rerr, Rrep, RrepAck, Rreq};
use crate::wire::Message;

impl<T, R, Clk, L, Cfg> Node<T, R, Clk, L, Cfg>
where
    T: Transport,
    R: Random,
    Clk: Clock,
    L: Locator,
    Cfg: NodeConfig,
{
    /// Start searching for `destination` unless a search is already running.
    pub(crate) fn start_discovery(
        &mut self,
        destination: Addr,
        now: Timestamp,
        repair: Option<LocalRepair>,
    ) {
        if self.pending.contains_key(&destination) {
            return;
        }
        if self.pending.len() >= Cfg::MAX_PENDING_REQUESTS {
            warn!(node = %self.address, dst = %destination, "too many searches in flight");
            let dropped = self.queue.drop_for(destination);
            self.report_undeliverable(destination, dropped, Error::NoRoute);
            return;
        }

        // Mark the destination as being searched for, keeping a known
        // sequence number if the route was invalidated earlier.
        match self.table.lookup_mut(destination) {
            Some(entry) if entry.state == RouteState::Invalid => {
                entry.state = RouteState::InSearch;
            }
            Some(_) => {}
            None => {
                let placeholder =
                    RouteEntry::in_search(destination, now + self.config.path_discovery_time());
                self.install_route(placeholder);
            }
        }

        let ring_ttl = (self.config.expanding_ring && repair.is_none())
            .then_some(self.config.ttl_start);
        self.pending.insert(
            destination,
            PendingRequest {
                destination,
                retries: 0,
                request_id: 0,
                next_retry: now,
                ring_ttl,
                repair,
            },
        );
        self.attempt_search(destination, now);
    }

    /// Send the next RREQ of a search, or give up if the bound is reached.
    fn attempt_search(&mut self, destination: Addr, now: Timestamp) {
        let Some(p) = self.pending.get(&destination) else {
            return;
        };
        let (ttl, counted) = match p.ring_ttl {
            Some(ttl) => (ttl, false),
            None => (
                p.repair
                    .as_ref()
                    .map_or(self.config.net_diameter, |r| r.ttl),
                true,
            ),
        };
        if counted && p.retries >= self.config.rreq_bound {
            self.exhaust_search(destination, now);
            return;
        }

        if !self.rreq_limiter.try_acquire(now) {
            debug!(node = %self.address, dst = %destination, "RREQ rate limit reached, deferring");
            let retry_at = now + self.config.request_timeout;
            if let Some(p) = self.pending.get_mut(&destination) {
                p.next_retry = retry_at;
            }
            self.timers.arm(TimerKey::RreqRetry(destination), retry_at);
            return;
        }

        let request_id = self.broadcast_rreq(destination, ttl, now);
        let Some(p) = self.pending.get_mut(&destination) else {
            return;
        };
        p.request_id = request_id;
        let wait = if counted {
            p.retries += 1;
            self.config
                .request_timeout
                .doubled(u32::from(p.retries.saturating_sub(1)))
        } else {
            self.config.ring_traversal_time(ttl)
        };
        p.next_retry = now + wait;
        let retries = p.retries;
        self.timers
            .arm(TimerKey::RreqRetry(destination), now + wait);
        debug!(node = %self.address, dst = %destination, id = request_id, ttl, retries, "RREQ sent");
    }

    /// Originate one RREQ and return its id.
    fn broadcast_rreq(&mut self, destination: Addr, ttl: u8, now: Timestamp) -> u32 {
        self.next_request_id = self.next_request_id.wrapping_add(1);
        let request_id = self.next_request_id;
        let orig_seq = self.seq.bump();
        let (dest_seq, unknown_seq) = match self.table.lookup(destination) {
            Some(e) if e.valid_seq => (e.dest_seq, false),
            _ => (SeqNo::ZERO, true),
        };
        self.seen.check_and_record(
            self.address,
            request_id,
            now,
            self.config.path_discovery_time(),
        );

        let rreq = Rreq {
            gratuitous: self.config.gratuitous_reply,
            destination_only: self.config.destination_only,
            unknown_seq,
            ttl,
            hop_count: 0,
            request_id,
            destination,
            dest_seq,
            originator: self.address,
            orig_seq,
            position: self.locator.position(),
        };
        if self
            .send_message(NextHop::Broadcast, &Message::Rreq(rreq), now)
            .is_ok()
        {
            self.counters.record_rreq_sent();
        }
        request_id
    }

    /// Retry timer fired for `destination`.
    pub(crate) fn on_rreq_timeout(&mut self, destination: Addr, now: Timestamp) {
        let increment = self.config.ttl_increment;
        let threshold = self.config.ttl_threshold;
        let Some(p) = self.pending.get_mut(&destination) else {
            return;
        };
        if let Some(ttl) = p.ring_ttl {
            let next = ttl.saturating_add(increment);
            p.ring_ttl = (next <= threshold).then_some(next);
        }
        self.attempt_search(destination, now);
    }

    /// Terminate a search that ran out of attempts.
    fn exhaust_search(&mut self, destination: Addr, now: Timestamp) {
        let Some(p) = self.pending.remove(&destination) else {
            return;
        };
        self.timers.cancel(TimerKey::RreqRetry(destination));

        if let Some(entry) = self.table.lookup_mut(destination) {
            if entry.state == RouteState::InSearch {
                entry.state = RouteState::Invalid;
                entry.lifetime = now + self.config.delete_period();
                entry.precursors.clear();
            }
        }
        self.schedule_route_delete(destination, now);

        let dropped = self.queue.drop_for(destination);
        info!(node = %self.address, dst = %destination, retries = p.retries, dropped, "route search exhausted");
        self.report_undeliverable(destination, dropped, Error::SearchExhausted);

        if let Some(repair) = p.repair {
            let unreachable = alloc::vec![(destination, repair.dest_seq)];
            self.send_rerr_to(&repair.precursors, unreachable, false, now);
        }
    }

    /// Count dropped packets and tell the application.
    pub(crate) fn report_undeliverable(&mut self, destination: Addr, dropped: usize, reason: Error) {
        self.counters.record_data_undeliverable(dropped);
        self.push_event(Event::Undeliverable {
            destination,
            dropped,
            reason,
        });
    }

    /// A valid route to `destination` may now exist: finish its search and
    /// release buffered packets in arrival order.
    pub(crate) fn on_route_available(&mut self, destination: Addr, now: Timestamp) {
        let Some(route) = self.table.lookup_valid(destination, now) else {
            return;
        };
        let hop_count = route.hop_count;

        if let Some(p) = self.pending.remove(&destination) {
            self.timers.cancel(TimerKey::RreqRetry(destination));
            info!(node = %self.address, dst = %destination, hops = hop_count, "route found");
            if let Some(repair) = p.repair {
                for precursor in repair.precursors {
                    self.table.add_precursor(destination, precursor);
                }
            }
            self.push_event(Event::RouteFound {
                destination,
                hop_count,
            });
        }

        for payload in self.queue.take_for(destination) {
            self.forward_originated(destination, payload, now);
        }
    }

    /// Handle a received RREQ.
    pub(crate) fn handle_rreq(&mut self, from: Addr, iface: IfaceId, rreq: Rreq, now: Timestamp) {
        self.counters.record_rreq_received();

        if self.is_blacklisted(from, now) {
            debug!(node = %self.address, from = %from, "RREQ from blacklisted neighbor ignored");
            return;
        }
        if rreq.originator == self.address {
            return;
        }
        let window = self.config.path_discovery_time();
        if !self
            .seen
            .check_and_record(rreq.originator, rreq.request_id, now, window)
        {
            debug!(node = %self.address, orig = %rreq.originator, id = rreq.request_id, "duplicate RREQ dropped");
            return;
        }

        let hop_count = rreq.hop_count.saturating_add(1);
        let (verdict, trusted) = self.assess(from, rreq.position, rreq.orig_seq, hop_count);
        if verdict == Verdict::Reject {
            self.counters.record_trust_rejection();
            debug!(node = %self.address, from = %from, "RREQ rejected by distance policy");
            return;
        }

        // Reverse route toward the originator.
        self.touch_neighbor(from, iface, now, trusted);
        let reverse = RouteEntry::new(
            rreq.originator,
            from,
            hop_count,
            rreq.orig_seq,
            now + self.config.active_route_timeout,
        )
        .with_iface(iface)
        .with_trust(trusted);
        if !self.install_route(reverse) {
            self.table
                .extend_lifetime(rreq.originator, now + self.config.active_route_timeout);
        }
        self.on_route_available(rreq.originator, now);

        if rreq.destination == self.address {
            self.reply_as_destination(from, &rreq, now);
            return;
        }
        if self.reply_as_intermediate(from, &rreq, hop_count, now) {
            return;
        }
        if self.is_malicious() && self.config.forge_replies {
            self.reply_forged(from, &rreq, now);
            return;
        }
        self.rebroadcast_rreq(rreq, hop_count, now);
    }

    /// We are the destination: answer with a fresh sequence number.
    fn reply_as_destination(&mut self, from: Addr, rreq: &Rreq, now: Timestamp) {
        if !rreq.unknown_seq {
            self.seq.observe(rreq.dest_seq);
        }
        let dest_seq = self.seq.bump();
        let rrep = Rrep {
            ack_required: false,
            prefix_size: 0,
            hop_count: 0,
            destination: self.address,
            dest_seq,
            originator: rreq.originator,
            lifetime: self.config.my_route_timeout(),
            position: self.locator.position(),
        };
        if self
            .send_message(NextHop::Unicast(from), &Message::Rrep(rrep), now)
            .is_ok()
        {
            self.counters.record_rrep_sent();
        }
        debug!(node = %self.address, orig = %rreq.originator, seq = %dest_seq, "RREP sent as destination");
    }

    /// Answer from our own route if it is fresh enough. Returns true if a
    /// reply was sent.
    fn reply_as_intermediate(
        &mut self,
        from: Addr,
        rreq: &Rreq,
        hop_count: u8,
        now: Timestamp,
    ) -> bool {
        if rreq.destination_only {
            return false;
        }
        let Some(route) = self.table.lookup_valid(rreq.destination, now) else {
            return false;
        };
        let usable = route.valid_seq
            && (route.trusted || self.policy.is_adversarial())
            && route.next_hop != from
            && (rreq.unknown_seq || !rreq.dest_seq.is_newer_than(route.dest_seq));
        if !usable {
            return false;
        }
        let (next_hop, route_hops, route_seq, remaining) = (
            route.next_hop,
            route.hop_count,
            route.dest_seq,
            now.until(route.lifetime),
        );

        self.table.add_precursor(rreq.destination, from);
        self.table.add_precursor(rreq.originator, next_hop);

        let rrep = Rrep {
            ack_required: false,
            prefix_size: 0,
            hop_count: route_hops,
            destination: rreq.destination,
            dest_seq: route_seq,
            originator: rreq.originator,
            lifetime: remaining,
            position: self.locator.position(),
        };
        if self
            .send_message(NextHop::Unicast(from), &Message::Rrep(rrep), now)
            .is_ok()
        {
            self.counters.record_rrep_sent();
        }

        if rreq.gratuitous {
            let toward_originator = Rrep {
                ack_required: false,
                prefix_size: 0,
                hop_count,
                destination: rreq.originator,
                dest_seq: rreq.orig_seq,
                originator: rreq.destination,
                lifetime: self.config.active_route_timeout,
                position: self.locator.position(),
            };
            if self
                .send_message(NextHop::Unicast(next_hop), &Message::Rrep(toward_originator), now)
                .is_ok()
            {
                self.counters.record_rrep_sent();
            }
        }
        debug!(node = %self.address, dst = %rreq.destination, "RREP sent from cached route");
        true
    }

    /// Blackhole extension: claim a one-hop route fresher than requested.
    fn reply_forged(&mut self, from: Addr, rreq: &Rreq, now: Timestamp) {
        let rrep = Rrep {
            ack_required: false,
            prefix_size: 0,
            hop_count: 0,
            destination: rreq.destination,
            dest_seq: rreq.dest_seq.next(),
            originator: rreq.originator,
            lifetime: self.config.my_route_timeout(),
            position: self.locator.position(),
        };
        if self
            .send_message(NextHop::Unicast(from), &Message::Rrep(rrep), now)
            .is_ok()
        {
            self.counters.record_rrep_sent();
        }
        debug!(node = %self.address, dst = %rreq.destination, "forged RREP sent");
    }

    /// Re-flood a request we cannot answer.
    fn rebroadcast_rreq(&mut self, rreq: Rreq, hop_count: u8, now: Timestamp) {
        if rreq.ttl <= 1 {
            debug!(node = %self.address, id = rreq.request_id, "RREQ TTL exhausted");
            return;
        }
        if !self.rebroadcasts.try_record(
            rreq.originator,
            rreq.destination,
            now,
            self.config.path_discovery_time(),
            self.config.rreq_bound,
        ) {
            debug!(node = %self.address, orig = %rreq.originator, dst = %rreq.destination, "rebroadcast bound reached");
            return;
        }

        let mut forwarded = rreq;
        forwarded.ttl -= 1;
        forwarded.hop_count = hop_count;
        forwarded.position = self.locator.position();
        if let Some(known) = self.table.lookup(forwarded.destination) {
            if known.valid_seq
                && (forwarded.unknown_seq || known.dest_seq.is_newer_than(forwarded.dest_seq))
            {
                forwarded.dest_seq = known.dest_seq;
                forwarded.unknown_seq = false;
            }
        }
        let id = forwarded.request_id;
        if self
            .send_message(NextHop::Broadcast, &Message::Rreq(forwarded), now)
            .is_ok()
        {
            self.counters.record_rreq_sent();
        }
        debug!(node = %self.address, id, "RREQ rebroadcast");
    }

    /// Handle a received RREP. Hellos are diverted to maintenance.
    pub(crate) fn handle_rrep(&mut self, from: Addr, iface: IfaceId, rrep: Rrep, now: Timestamp) {
        if rrep.is_hello() {
            if rrep.destination == from {
                self.process_hello(from, iface, &rrep, now);
            }
            return;
        }
        if rrep.ack_required {
            let _ = self.send_message(NextHop::Unicast(from), &Message::RrepAck(RrepAck), now);
        }

        let hop_count = rrep.hop_count.saturating_add(1);
        let (verdict, trusted) = self.assess(from, rrep.position, rrep.dest_seq, hop_count);
        if verdict == Verdict::Reject {
            self.counters.record_trust_rejection();
            debug!(node = %self.address, from = %from, dst = %rrep.destination, "RREP rejected by distance policy");
            return;
        }

        self.touch_neighbor(from, iface, now, trusted);
        let forward = RouteEntry::new(
            rrep.destination,
            from,
            hop_count,
            rrep.dest_seq,
            now + rrep.lifetime,
        )
        .with_iface(iface)
        .with_trust(trusted);
        let installed = self.install_route(forward);

        if rrep.originator == self.address {
            self.on_route_available(rrep.destination, now);
            return;
        }
        if !installed {
            return;
        }
        self.on_route_available(rrep.destination, now);
        self.forward_rrep(from, rrep, hop_count, now);
    }

    /// Pass an RREP one hop further along the reverse route.
    fn forward_rrep(&mut self, from: Addr, rrep: Rrep, hop_count: u8, now: Timestamp) {
        let Some(reverse) = self.table.lookup_valid(rrep.originator, now) else {
            debug!(node = %self.address, orig = %rrep.originator, "no reverse route for RREP");
            return;
        };
        let next_hop = reverse.next_hop;

        self.table.add_precursor(rrep.destination, next_hop);
        self.table.add_precursor(rrep.originator, from);
        self.table
            .extend_lifetime(rrep.originator, now + self.config.active_route_timeout);

        let mut forwarded = rrep;
        forwarded.hop_count = hop_count;
        forwarded.ack_required = self.config.rrep_ack_required;
        forwarded.position = self.locator.position();
        let ack_required = forwarded.ack_required;
        if self
            .send_message(NextHop::Unicast(next_hop), &Message::Rrep(forwarded), now)
            .is_ok()
        {
            self.counters.record_rrep_sent();
            if ack_required {
                self.timers.arm(
                    TimerKey::RrepAckWait(next_hop),
                    now + self.config.next_hop_wait(),
                );
            }
        }
    }

    /// Send an RERR listing `unreachable` to each of `precursors`.
    pub(crate) fn send_rerr_to(
        &mut self,
        precursors: &[Addr],
        unreachable: Vec<(Addr, SeqNo)>,
        no_delete: bool,
        now: Timestamp,
    ) {
        if unreachable.is_empty() {
            return;
        }
        for precursor in precursors {
            if !self.rerr_limiter.try_acquire(now) {
                debug!(node = %self.address, "RERR rate limit reached");
                return;
            }
            let rerr = Rerr {
                no_delete,
                unreachable: unreachable.clone(),
            };
            if self
                .send_message(NextHop::Unicast(*precursor), &Message::Rerr(rerr), now)
                .is_ok()
            {
                self.counters.record_rerr_sent();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DefaultConfig, ProtocolConfig};
    use crate::node::SearchState;
    use crate::time::Duration;
    use crate::seqno::SequenceCounter;
    use crate::traits::test_impls::{MockClock, MockLocator, MockRandom, MockTransport};
    use crate::types::{Frame, Position, PRIMARY_IFACE};
    use crate::wire::{Decode, Encode};
    use alloc::vec;
    use core::net::Ipv4Addr;

    type TestNode = Node<MockTransport, MockRandom, MockClock, MockLocator>;

    const A: Addr = Ipv4Addr::new(10, 0, 0, 1);
    const B: Addr = Ipv4Addr::new(10, 0, 0, 2);
    const C: Addr = Ipv4Addr::new(10, 0, 0, 3);
    const D: Addr = Ipv4Addr::new(10, 0, 0, 4);

    fn make_node(addr: Addr, config: ProtocolConfig) -> TestNode {
        Node::<_, _, _, _, DefaultConfig>::new(
            addr,
            config,
            MockTransport::new(),
            MockRandom::new(),
            MockClock::new(),
            MockLocator::new(),
        )
        .unwrap()
    }

    fn decode(frame: &Frame) -> Message {
        Message::decode_from_slice(&frame.data).unwrap()
    }

    fn rreq_from(originator: Addr, id: u32, destination: Addr, dest_seq: u32) -> Rreq {
        Rreq {
            gratuitous: false,
            destination_only: false,
            unknown_seq: dest_seq == 0,
            ttl: 10,
            hop_count: 0,
            request_id: id,
            destination,
            dest_seq: SeqNo(dest_seq),
            originator,
            orig_seq: SeqNo(1),
            position: None,
        }
    }

    fn deliver(node: &mut TestNode, from: Addr, msg: Message, now: Timestamp) {
        node.handle_frame(from, PRIMARY_IFACE, &msg.encode_to_vec(), now)
            .unwrap();
    }

    #[test]
    fn test_exhaustion_timing() {
        let mut node = make_node(A, ProtocolConfig::default().with_rreq_bound(2));
        let t0 = Timestamp::from_secs(2);
        node.send(D, vec![1, 2, 3], t0).unwrap();

        let sent = node.transport().take_sent();
        assert_eq!(sent.len(), 1);
        match decode(&sent[0]) {
            Message::Rreq(r) => {
                assert_eq!(r.request_id, 1);
                assert_eq!(r.destination, D);
                assert!(r.unknown_seq);
            }
            other => panic!("expected RREQ, got {:?}", other),
        }
        assert_eq!(
            node.search_state(D),
            SearchState::Searching {
                retries: 1,
                request_id: 1
            }
        );

        node.handle_timer(Timestamp::from_millis(2999));
        assert!(node.transport().take_sent().is_empty());

        node.handle_timer(Timestamp::from_secs(3));
        let sent = node.transport().take_sent();
        assert_eq!(sent.len(), 1);
        match decode(&sent[0]) {
            Message::Rreq(r) => assert_eq!(r.request_id, 2),
            other => panic!("expected RREQ, got {:?}", other),
        }

        node.handle_timer(Timestamp::from_millis(4999));
        assert!(matches!(node.search_state(D), SearchState::Searching { retries: 2, .. }));

        node.handle_timer(Timestamp::from_secs(5));
        assert_eq!(node.search_state(D), SearchState::Idle);
        assert!(node.transport().take_sent().is_empty());
        assert_eq!(node.counters().rreq_sent(), 2);
        assert_eq!(node.counters().data_undeliverable(), 1);
        assert_eq!(
            node.events().try_receive().ok(),
            Some(Event::Undeliverable {
                destination: D,
                dropped: 1,
                reason: Error::SearchExhausted
            })
        );
        assert!(node.events().try_receive().is_err());

        // Later timers do nothing more.
        node.handle_timer(Timestamp::from_secs(20));
        assert!(node.events().try_receive().is_err());
        assert_eq!(node.counters().data_undeliverable(), 1);
    }

    #[test]
    fn test_destination_replies_with_incremented_seq() {
        let mut node = make_node(B, ProtocolConfig::default());
        node.seq = SequenceCounter::starting_at(SeqNo(4));
        let now = Timestamp::from_secs(1);

        deliver(&mut node, A, Message::Rreq(rreq_from(A, 1, B, 5)), now);

        let sent = node.transport().take_sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].next_hop, NextHop::Unicast(A));
        match decode(&sent[0]) {
            Message::Rrep(r) => {
                assert_eq!(r.destination, B);
                assert_eq!(r.originator, A);
                assert_eq!(r.dest_seq, SeqNo(6));
                assert_eq!(r.hop_count, 0);
            }
            other => panic!("expected RREP, got {:?}", other),
        }
        assert_eq!(node.own_seq(), SeqNo(6));
        assert_eq!(node.counters().rreq_sent(), 0);
        assert_eq!(node.counters().rrep_sent(), 1);

        let reverse = node.routing_table().lookup(A).unwrap();
        assert_eq!(reverse.next_hop, A);
        assert_eq!(reverse.hop_count, 1);
    }

    #[test]
    fn test_duplicate_rreq_not_rebroadcast() {
        let mut node = make_node(C, ProtocolConfig::default());
        let now = Timestamp::from_secs(1);
        let rreq = rreq_from(A, 7, D, 0);

        deliver(&mut node, A, Message::Rreq(rreq.clone()), now);
        let first = node.transport().take_sent();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].next_hop, NextHop::Broadcast);
        match decode(&first[0]) {
            Message::Rreq(r) => {
                assert_eq!(r.ttl, 9);
                assert_eq!(r.hop_count, 1);
            }
            other => panic!("expected RREQ, got {:?}", other),
        }

        deliver(&mut node, B, Message::Rreq(rreq), now + Duration::from_millis(5));
        assert!(node.transport().take_sent().is_empty());
        assert_eq!(node.counters().rreq_received(), 2);
        assert_eq!(node.counters().rreq_sent(), 1);
    }

    #[test]
    fn test_rebroadcast_bounded_per_search() {
        let mut node = make_node(C, ProtocolConfig::default().with_rreq_bound(2));
        let now = Timestamp::from_secs(1);
        for id in 1..=4 {
            deliver(&mut node, A, Message::Rreq(rreq_from(A, id, D, 0)), now);
        }
        assert_eq!(node.counters().rreq_sent(), 2);
    }

    #[test]
    fn test_ttl_one_not_rebroadcast() {
        let mut node = make_node(C, ProtocolConfig::default());
        let mut rreq = rreq_from(A, 1, D, 0);
        rreq.ttl = 1;
        deliver(&mut node, A, Message::Rreq(rreq), Timestamp::from_secs(1));
        assert!(node.transport().take_sent().is_empty());
        // The reverse route is still learned.
        assert!(node.routing_table().lookup(A).is_some());
    }

    #[test]
    fn test_far_rreq_rejected() {
        let mut node = make_node(C, ProtocolConfig::default().with_distance_threshold(Some(100.0)));
        node.locator().set_distance(A, 150.0);
        deliver(&mut node, A, Message::Rreq(rreq_from(A, 1, D, 0)), Timestamp::from_secs(1));
        assert!(node.transport().take_sent().is_empty());
        assert!(node.routing_table().lookup(A).is_none());
        assert_eq!(node.counters().trust_rejections(), 1);
    }

    #[test]
    fn test_intermediate_reply_with_gratuitous() {
        let mut node = make_node(C, ProtocolConfig::default());
        let now = Timestamp::from_secs(1);
        node.table
            .insert_or_update(RouteEntry::new(D, D, 1, SeqNo(9), now + Duration::from_secs(3)))
            .unwrap();

        let mut rreq = rreq_from(A, 1, D, 8);
        rreq.gratuitous = true;
        deliver(&mut node, B, Message::Rreq(rreq), now);

        let sent = node.transport().take_sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].next_hop, NextHop::Unicast(B));
        match decode(&sent[0]) {
            Message::Rrep(r) => {
                assert_eq!(r.destination, D);
                assert_eq!(r.dest_seq, SeqNo(9));
                assert_eq!(r.hop_count, 1);
            }
            other => panic!("expected RREP, got {:?}", other),
        }
        assert_eq!(sent[1].next_hop, NextHop::Unicast(D));
        match decode(&sent[1]) {
            Message::Rrep(r) => {
                assert_eq!(r.destination, A);
                assert_eq!(r.originator, D);
                assert_eq!(r.hop_count, 1);
            }
            other => panic!("expected gratuitous RREP, got {:?}", other),
        }
        assert_eq!(node.routing_table().lookup(D).unwrap().precursors, vec![B]);
    }

    #[test]
    fn test_destination_only_forces_flood() {
        let mut node = make_node(C, ProtocolConfig::default());
        let now = Timestamp::from_secs(1);
        node.table
            .insert_or_update(RouteEntry::new(D, D, 1, SeqNo(9), now + Duration::from_secs(3)))
            .unwrap();
        let mut rreq = rreq_from(A, 1, D, 0);
        rreq.destination_only = true;
        deliver(&mut node, A, Message::Rreq(rreq), now);
        let sent = node.transport().take_sent();
        assert_eq!(sent.len(), 1);
        assert!(matches!(decode(&sent[0]), Message::Rreq(_)));
    }

    #[test]
    fn test_rrep_completes_search_and_releases_queue() {
        let mut node = make_node(A, ProtocolConfig::default());
        let t0 = Timestamp::from_secs(2);
        node.send(D, vec![1], t0).unwrap();
        node.send(D, vec![2], t0).unwrap();
        node.transport().take_sent();

        let rrep = Rrep {
            ack_required: false,
            prefix_size: 0,
            hop_count: 2,
            destination: D,
            dest_seq: SeqNo(3),
            originator: A,
            lifetime: Duration::from_secs(10),
            position: None,
        };
        deliver(&mut node, B, Message::Rrep(rrep), t0 + Duration::from_millis(200));

        assert_eq!(node.search_state(D), SearchState::Idle);
        assert!(!node.timers.is_armed(TimerKey::RreqRetry(D)));
        assert_eq!(
            node.events().try_receive().ok(),
            Some(Event::RouteFound {
                destination: D,
                hop_count: 3
            })
        );

        let sent = node.transport().take_sent();
        let payloads: Vec<_> = sent
            .iter()
            .map(|f| {
                assert_eq!(f.next_hop, NextHop::Unicast(B));
                match decode(f) {
                    Message::Data(d) => d.payload,
                    other => panic!("expected DATA, got {:?}", other),
                }
            })
            .collect();
        assert_eq!(payloads, vec![vec![1], vec![2]]);
        assert_eq!(node.queued_packets(), 0);
    }

    #[test]
    fn test_far_rrep_not_installed() {
        let mut node = make_node(A, ProtocolConfig::default().with_distance_threshold(Some(100.0)));
        node.locator().set_distance(B, 150.0);
        node.send(D, vec![1], Timestamp::from_secs(2)).unwrap();
        let rrep = Rrep {
            ack_required: false,
            prefix_size: 0,
            hop_count: 0,
            destination: D,
            dest_seq: SeqNo(1),
            originator: A,
            lifetime: Duration::from_secs(10),
            position: Some(Position::new(150.0, 0.0)),
        };
        deliver(&mut node, B, Message::Rrep(rrep), Timestamp::from_secs(2));
        assert!(node.routing_table().lookup_valid(D, Timestamp::from_secs(2)).is_none());
        assert_eq!(node.counters().trust_rejections(), 1);
        assert!(matches!(node.search_state(D), SearchState::Searching { .. }));
    }

    #[test]
    fn test_adversarial_accepts_far_rrep() {
        let mut node = make_node(
            A,
            ProtocolConfig::default()
                .with_distance_threshold(Some(100.0))
                .with_malicious(true),
        );
        node.locator().set_distance(B, 150.0);
        let rrep = Rrep {
            ack_required: false,
            prefix_size: 0,
            hop_count: 0,
            destination: D,
            dest_seq: SeqNo(1),
            originator: A,
            lifetime: Duration::from_secs(10),
            position: None,
        };
        deliver(&mut node, B, Message::Rrep(rrep), Timestamp::from_secs(2));
        let route = node
            .routing_table()
            .lookup_valid(D, Timestamp::from_secs(2))
            .unwrap();
        assert!(!route.trusted);
        assert_eq!(node.counters().trust_rejections(), 0);
    }

    #[test]
    fn test_rrep_forwarded_along_reverse_route() {
        let mut node = make_node(C, ProtocolConfig::default());
        let now = Timestamp::from_secs(1);
        deliver(&mut node, B, Message::Rreq(rreq_from(A, 1, D, 0)), now);
        node.transport().take_sent();

        let rrep = Rrep {
            ack_required: false,
            prefix_size: 0,
            hop_count: 0,
            destination: D,
            dest_seq: SeqNo(4),
            originator: A,
            lifetime: Duration::from_secs(10),
            position: None,
        };
        deliver(&mut node, D, Message::Rrep(rrep), now + Duration::from_millis(50));

        let sent = node.transport().take_sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].next_hop, NextHop::Unicast(B));
        match decode(&sent[0]) {
            Message::Rrep(r) => assert_eq!(r.hop_count, 1),
            other => panic!("expected RREP, got {:?}", other),
        }
        assert_eq!(node.routing_table().lookup(D).unwrap().precursors, vec![B]);
        assert_eq!(node.routing_table().lookup(A).unwrap().precursors, vec![D]);
    }

    #[test]
    fn test_forged_reply_opt_in() {
        let mut node = make_node(
            C,
            ProtocolConfig::default()
                .with_malicious(true)
                .with_forged_replies(true),
        );
        deliver(&mut node, A, Message::Rreq(rreq_from(A, 1, D, 5)), Timestamp::from_secs(1));
        let sent = node.transport().take_sent();
        assert_eq!(sent.len(), 1);
        match decode(&sent[0]) {
            Message::Rrep(r) => {
                assert_eq!(r.destination, D);
                assert_eq!(r.dest_seq, SeqNo(6));
                assert_eq!(r.hop_count, 0);
            }
            other => panic!("expected forged RREP, got {:?}", other),
        }
    }

    #[test]
    fn test_expanding_ring_not_counted() {
        let mut node = make_node(
            A,
            ProtocolConfig::default()
                .with_expanding_ring(true)
                .with_rreq_bound(1),
        );
        let mut now = Timestamp::from_secs(1);
        node.send(D, vec![1], now).unwrap();

        let mut ttls = Vec::new();
        loop {
            for frame in node.transport().take_sent() {
                if let Message::Rreq(r) = decode(&frame) {
                    ttls.push(r.ttl);
                }
            }
            match node.next_deadline() {
                Some(deadline) if node.search_state(D) != SearchState::Idle => {
                    now = deadline;
                    node.handle_timer(now);
                }
                _ => break,
            }
        }
        assert_eq!(ttls, vec![1, 3, 5, 7, 35]);
    }
}
