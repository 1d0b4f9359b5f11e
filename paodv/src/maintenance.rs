//! Route maintenance: hellos, neighbor liveness, link breaks and RERRs.
//!
//! A next hop is declared broken when it misses `allowed_hello_loss`
//! consecutive hellos or when the link layer reports a failed unicast.
//! Every route through it is invalidated and each precursor of those routes
//! gets one RERR listing what it lost. RERRs are never broadcast: a node
//! receiving one only propagates it to its own precursors of the affected
//! routes, so the notification walks back along the recorded chains.

use alloc::vec::Vec;
use tracing::{debug, info};

use crate::config::NodeConfig;
use crate::node::{LocalRepair, Node};
use crate::policy::Verdict;
use crate::seqno::SeqNo;
use crate::table::{BrokenLinkEvent, InvalidationReason};
use crate::time::{Duration, Timestamp};
use crate::timer::TimerKey;
use crate::traits::{Clock, Locator, Random, Transport};
use crate::types::{Addr, Error, Event, IfaceId, NextHop, Rerr, Rrep};
use crate::wire::{Message, MAX_RERR_DESTINATIONS};

/// Upper bound on the random advance of each hello.
const HELLO_JITTER_MS: u64 = 50;

/// Hops added to the broken route's length for a local repair flood.
const LOCAL_ADD_TTL: u8 = 2;

/// Pending RERR contents, one list per precursor.
type RerrBatch = Vec<(Addr, Vec<(Addr, SeqNo)>)>;

impl<T, R, Clk, L, Cfg> Node<T, R, Clk, L, Cfg>
where
    T: Transport,
    R: Random,
    Clk: Clock,
    L: Locator,
    Cfg: NodeConfig,
{
    pub(crate) fn on_hello_timer(&mut self, now: Timestamp) {
        if !self.config.enable_hello {
            return;
        }
        let interval = self.config.hello_interval;
        // Each tick fires up to `max_jitter` early, so a full interval of
        // silence is never observed. Anything within that slack counts as quiet.
        let max_jitter = (interval.as_millis() / 10).min(HELLO_JITTER_MS);
        let slack = interval - Duration::from_millis(max_jitter);
        let jitter = Duration::from_millis(self.random.gen_range(0, max_jitter));

        let base = match self.last_broadcast {
            Some(at) if now.saturating_sub(at) < slack => at,
            _ => {
                let hello = Rrep::hello(
                    self.address,
                    self.seq.current(),
                    self.config.hello_lifetime(),
                    self.locator.position(),
                );
                if self
                    .send_message(NextHop::Broadcast, &Message::Rrep(hello), now)
                    .is_ok()
                {
                    self.counters.record_hello_sent();
                }
                now
            }
        };
        self.timers.arm(TimerKey::Hello, base + (interval - jitter));
    }

    /// A neighbor advertised itself.
    pub(crate) fn process_hello(&mut self, from: Addr, iface: IfaceId, hello: &Rrep, now: Timestamp) {
        let (verdict, trusted) = self.assess(from, hello.position, hello.dest_seq, 1);
        if verdict == Verdict::Reject {
            self.counters.record_trust_rejection();
            debug!(node = %self.address, from = %from, "hello rejected by distance policy");
            return;
        }

        let until = now + hello.lifetime;
        if let Err(e) = self.table.refresh_neighbor(from, iface, until, trusted) {
            debug!(node = %self.address, neighbor = %from, error = %e, "hello not recorded");
            return;
        }
        if let Some(entry) = self.table.lookup_mut(from) {
            if !entry.valid_seq || hello.dest_seq.is_newer_than(entry.dest_seq) {
                entry.dest_seq = hello.dest_seq;
                entry.valid_seq = true;
            }
        }

        if !self.neighbors.contains_key(&from) {
            if self.neighbors.len() >= Cfg::MAX_NEIGHBORS {
                debug!(node = %self.address, neighbor = %from, "neighbor set full");
                self.on_route_available(from, now);
                return;
            }
            debug!(node = %self.address, neighbor = %from, "new neighbor");
        }
        self.note_neighbor_alive(from, until);
        self.on_route_available(from, now);
    }

    /// Push the liveness deadline of `neighbor` out to `until`.
    pub(crate) fn note_neighbor_alive(&mut self, neighbor: Addr, until: Timestamp) {
        let deadline = self.neighbors.entry(neighbor).or_insert(until);
        if *deadline < until {
            *deadline = until;
        }
        let deadline = *deadline;
        self.timers.arm(TimerKey::NeighborLoss(neighbor), deadline);
    }

    pub(crate) fn on_neighbor_loss(&mut self, neighbor: Addr, now: Timestamp) {
        match self.neighbors.get(&neighbor) {
            Some(deadline) if *deadline <= now => {
                debug!(node = %self.address, neighbor = %neighbor, "hellos missed");
                self.handle_link_failure(neighbor, now);
            }
            _ => {}
        }
    }

    /// `neighbor` is unreachable: invalidate or repair every route through it
    /// and tell the precursors.
    pub(crate) fn handle_link_failure(&mut self, neighbor: Addr, now: Timestamp) {
        self.counters.record_broken_link();
        info!(node = %self.address, neighbor = %neighbor, "link broken");
        self.timers.cancel(TimerKey::NeighborLoss(neighbor));
        self.neighbors.remove(&neighbor);

        let delete_period = self.config.delete_period();
        let mut batch = RerrBatch::new();
        for destination in self.table.routes_via(neighbor) {
            let hop_count = self
                .table
                .lookup(destination)
                .map_or(u8::MAX, |e| e.hop_count);
            let Some(broken) = self.table.invalidate(
                destination,
                InvalidationReason::LinkBreak,
                now,
                delete_period,
            ) else {
                continue;
            };

            let repairable = self.config.local_repair
                && destination != neighbor
                && hop_count <= self.config.max_repair_ttl
                && self.pending.len() < Cfg::MAX_PENDING_REQUESTS;
            if repairable {
                debug!(node = %self.address, dst = %destination, "starting local repair");
                let repair = LocalRepair {
                    ttl: hop_count
                        .saturating_add(LOCAL_ADD_TTL)
                        .min(self.config.net_diameter),
                    precursors: broken
                        .precursors
                        .into_iter()
                        .filter(|p| *p != neighbor)
                        .collect(),
                    dest_seq: broken.dest_seq,
                };
                self.start_discovery(destination, now, Some(repair));
                continue;
            }

            self.schedule_route_delete(destination, now);
            self.push_event(Event::RouteLost { destination });
            collect_unreachable(&mut batch, &broken, neighbor);
        }
        self.table.forget_precursor(neighbor);
        self.flush_rerrs(batch, now);
    }

    /// Handle an RERR from a neighbor.
    pub(crate) fn handle_rerr(&mut self, from: Addr, rerr: Rerr, now: Timestamp) {
        if rerr.no_delete {
            debug!(node = %self.address, from = %from, "RERR with no-delete flag ignored");
            return;
        }
        let delete_period = self.config.delete_period();
        let mut batch = RerrBatch::new();
        for (destination, dest_seq) in rerr.unreachable {
            let via_sender = self
                .table
                .lookup(destination)
                .is_some_and(|e| e.is_valid() && e.next_hop == from);
            if !via_sender {
                continue;
            }
            let Some(broken) = self.table.invalidate(
                destination,
                InvalidationReason::RouteError(dest_seq),
                now,
                delete_period,
            ) else {
                continue;
            };
            debug!(node = %self.address, dst = %destination, from = %from, "route invalidated by RERR");
            self.schedule_route_delete(destination, now);
            self.push_event(Event::RouteLost { destination });
            collect_unreachable(&mut batch, &broken, from);
        }
        self.flush_rerrs(batch, now);
    }

    /// Unicast the collected RERRs, splitting lists that do not fit into one
    /// message.
    fn flush_rerrs(&mut self, batch: RerrBatch, now: Timestamp) {
        for (precursor, unreachable) in batch {
            for chunk in unreachable.chunks(MAX_RERR_DESTINATIONS) {
                self.send_rerr_to(&[precursor], chunk.to_vec(), false, now);
            }
        }
    }

    pub(crate) fn handle_rrep_ack(&mut self, from: Addr) {
        if self.timers.cancel(TimerKey::RrepAckWait(from)) {
            debug!(node = %self.address, from = %from, "RREP acknowledged");
        }
    }

    /// A neighbor did not acknowledge a forwarded RREP: the link is probably
    /// unidirectional. Ignore its requests for a while.
    pub(crate) fn on_rrep_ack_timeout(&mut self, neighbor: Addr, now: Timestamp) {
        if !self.blacklist.contains_key(&neighbor) && self.blacklist.len() >= Cfg::MAX_BLACKLIST {
            if let Some(oldest) = self
                .blacklist
                .iter()
                .min_by_key(|(_, until)| **until)
                .map(|(addr, _)| *addr)
            {
                self.blacklist.remove(&oldest);
            }
        }
        self.blacklist
            .insert(neighbor, now + self.config.blacklist_timeout());
        info!(node = %self.address, neighbor = %neighbor, "neighbor blacklisted");
    }

    /// Periodic sweep of everything that expires.
    pub(crate) fn on_purge_timer(&mut self, now: Timestamp) {
        for destination in self
            .table
            .purge_expired(now, self.config.delete_period())
        {
            debug!(node = %self.address, dst = %destination, "route expired");
        }
        self.seen.purge(now);
        self.rebroadcasts.purge(now);
        self.blacklist.retain(|_, until| *until > now);

        for (destination, dropped) in self.queue.purge(now, self.config.max_queue_time) {
            info!(node = %self.address, dst = %destination, dropped, "queued packets timed out");
            self.report_undeliverable(destination, dropped, Error::NoRoute);
        }

        self.timers
            .arm(TimerKey::Purge, now + self.config.purge_interval);
    }
}

/// Add the destination of `broken` to the RERR of each of its precursors.
fn collect_unreachable(batch: &mut RerrBatch, broken: &BrokenLinkEvent, skip: Addr) {
    for precursor in broken.precursors.iter().filter(|p| **p != skip) {
        let entry = (broken.destination, broken.dest_seq);
        match batch.iter_mut().find(|(p, _)| p == precursor) {
            Some((_, list)) => list.push(entry),
            None => batch.push((*precursor, alloc::vec![entry])),
        }
    }
}
