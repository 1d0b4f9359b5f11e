//! Per-destination routing table.
//!
//! One entry per known destination. Updates go through
//! [`RoutingTable::insert_or_update`], which only accepts information that
//! is fresher than what is installed: a newer destination sequence number,
//! or the same number with a hop count that is no worse. Anything else is a
//! [`Error::StaleUpdate`] and leaves the entry untouched.
//!
//! Entry lifecycle:
//!
//! ```text
//!            insert (InSearch placeholder)
//!                      |
//!   fresher RREP/RREQ  v          expiry / link break / RERR
//!   ----------------> Valid -----------------------------> Invalid
//!                       ^                                     |
//!                       +------- fresher update --------------+
//!                                                             |
//!                                      delete period elapsed  v
//!                                                          removed
//! ```

use alloc::vec::Vec;
use core::cmp::Ordering;
use core::marker::PhantomData;

use alloc::collections::BTreeMap;

use crate::config::NodeConfig;
use crate::seqno::SeqNo;
use crate::time::{Duration, Timestamp};
use crate::types::{Addr, Error, IfaceId, PRIMARY_IFACE};

/// Validity of a route entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteState {
    /// Usable for forwarding until `lifetime`.
    Valid,
    /// Known broken or expired. Kept until the delete period ends so its
    /// sequence number is not forgotten.
    Invalid,
    /// Placeholder while a route search is running.
    InSearch,
}

/// A route to one destination.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteEntry {
    pub destination: Addr,
    pub dest_seq: SeqNo,
    /// False if `dest_seq` is not known (neighbor routes, placeholders).
    pub valid_seq: bool,
    pub hop_count: u8,
    pub next_hop: Addr,
    pub iface: IfaceId,
    pub state: RouteState,
    /// Absolute expiry. For invalid entries, the time of deletion.
    pub lifetime: Timestamp,
    /// Neighbors that forward through us toward `destination`.
    pub precursors: Vec<Addr>,
    /// Outcome of the trust/distance check when the route was learned.
    pub trusted: bool,
}

impl RouteEntry {
    /// A valid route with a known sequence number.
    pub fn new(
        destination: Addr,
        next_hop: Addr,
        hop_count: u8,
        dest_seq: SeqNo,
        lifetime: Timestamp,
    ) -> Self {
        Self {
            destination,
            dest_seq,
            valid_seq: true,
            hop_count,
            next_hop,
            iface: PRIMARY_IFACE,
            state: RouteState::Valid,
            lifetime,
            precursors: Vec::new(),
            trusted: true,
        }
    }

    /// Placeholder created when a search for `destination` starts.
    pub fn in_search(destination: Addr, lifetime: Timestamp) -> Self {
        Self {
            destination,
            dest_seq: SeqNo::ZERO,
            valid_seq: false,
            hop_count: u8::MAX,
            next_hop: destination,
            iface: PRIMARY_IFACE,
            state: RouteState::InSearch,
            lifetime,
            precursors: Vec::new(),
            trusted: false,
        }
    }

    pub fn with_iface(mut self, iface: IfaceId) -> Self {
        self.iface = iface;
        self
    }

    pub fn with_trust(mut self, trusted: bool) -> Self {
        self.trusted = trusted;
        self
    }

    pub fn is_valid(&self) -> bool {
        self.state == RouteState::Valid
    }

    /// True if `self` may replace `existing`.
    ///
    /// An unknown installed sequence number never blocks an update. Otherwise
    /// the incoming number must be strictly newer, or equal with a hop count
    /// that is smaller or the same.
    pub fn supersedes(&self, existing: &RouteEntry) -> bool {
        if !existing.valid_seq {
            return true;
        }
        if !self.valid_seq {
            return false;
        }
        match self.dest_seq.compare(existing.dest_seq) {
            Ordering::Greater => true,
            Ordering::Equal => self.hop_count <= existing.hop_count,
            Ordering::Less => false,
        }
    }
}

/// Why a route is being invalidated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidationReason {
    /// The next hop stopped answering. The sequence number is incremented
    /// so that only fresher information can revive the route.
    LinkBreak,
    /// A neighbor reported the destination unreachable with this number.
    RouteError(SeqNo),
    /// The lifetime ran out without use.
    Expired,
}

/// Produced when a valid route is invalidated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokenLinkEvent {
    pub destination: Addr,
    /// Sequence number to advertise in the RERR.
    pub dest_seq: SeqNo,
    /// Neighbors that were using the route. Drained from the entry.
    pub precursors: Vec<Addr>,
}

impl BrokenLinkEvent {
    /// True if anyone upstream needs to be told.
    pub fn has_precursors(&self) -> bool {
        !self.precursors.is_empty()
    }
}

/// Result of a successful update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Inserted,
    Replaced,
}

/// Routes learned by one node, bounded by `Cfg::MAX_ROUTES`.
pub struct RoutingTable<Cfg: NodeConfig> {
    own: Addr,
    routes: BTreeMap<Addr, RouteEntry>,
    _config: PhantomData<Cfg>,
}

impl<Cfg: NodeConfig> RoutingTable<Cfg> {
    pub fn new(own: Addr) -> Self {
        Self {
            own,
            routes: BTreeMap::new(),
            _config: PhantomData,
        }
    }

    pub fn lookup(&self, destination: Addr) -> Option<&RouteEntry> {
        self.routes.get(&destination)
    }

    pub(crate) fn lookup_mut(&mut self, destination: Addr) -> Option<&mut RouteEntry> {
        self.routes.get_mut(&destination)
    }

    /// The route to `destination` if it is usable right now.
    pub fn lookup_valid(&self, destination: Addr, now: Timestamp) -> Option<&RouteEntry> {
        self.routes
            .get(&destination)
            .filter(|e| e.is_valid() && e.lifetime > now)
    }

    /// Install `entry` if it is fresher than the current one.
    ///
    /// Precursors of a replaced valid entry are carried over.
    pub fn insert_or_update(&mut self, mut entry: RouteEntry) -> Result<UpdateOutcome, Error> {
        if entry.hop_count == 0 && entry.destination != self.own {
            return Err(Error::InvalidRoute);
        }

        if let Some(existing) = self.routes.get_mut(&entry.destination) {
            if !entry.supersedes(existing) {
                return Err(Error::StaleUpdate);
            }
            if existing.is_valid() && entry.is_valid() {
                entry.precursors = core::mem::take(&mut existing.precursors);
            } else {
                entry.precursors.clear();
            }
            *existing = entry;
            return Ok(UpdateOutcome::Replaced);
        }

        self.make_room()?;
        if !entry.is_valid() {
            entry.precursors.clear();
        }
        self.routes.insert(entry.destination, entry);
        Ok(UpdateOutcome::Inserted)
    }

    /// Create or refresh the one-hop route to `neighbor`.
    ///
    /// Sequence numbers are not involved: hearing from a neighbor is proof
    /// the link works now. A known sequence number is kept.
    pub fn refresh_neighbor(
        &mut self,
        neighbor: Addr,
        iface: IfaceId,
        lifetime: Timestamp,
        trusted: bool,
    ) -> Result<(), Error> {
        if neighbor == self.own {
            return Err(Error::InvalidRoute);
        }
        if let Some(entry) = self.routes.get_mut(&neighbor) {
            let was_direct = entry.is_valid() && entry.hop_count == 1 && entry.next_hop == neighbor;
            if !entry.is_valid() {
                entry.precursors.clear();
            }
            entry.hop_count = 1;
            entry.next_hop = neighbor;
            entry.iface = iface;
            entry.state = RouteState::Valid;
            entry.trusted = trusted;
            entry.lifetime = if was_direct {
                entry.lifetime.max(lifetime)
            } else {
                lifetime
            };
            return Ok(());
        }

        self.make_room()?;
        let mut entry = RouteEntry::new(neighbor, neighbor, 1, SeqNo::ZERO, lifetime)
            .with_iface(iface)
            .with_trust(trusted);
        entry.valid_seq = false;
        self.routes.insert(neighbor, entry);
        Ok(())
    }

    /// Mark `destination` invalid.
    ///
    /// Returns `None` if there was no valid entry. Otherwise the entry is
    /// scheduled for deletion after `delete_period` and its precursors are
    /// moved into the returned event.
    pub fn invalidate(
        &mut self,
        destination: Addr,
        reason: InvalidationReason,
        now: Timestamp,
        delete_period: Duration,
    ) -> Option<BrokenLinkEvent> {
        let entry = self.routes.get_mut(&destination)?;
        if !entry.is_valid() {
            return None;
        }
        match reason {
            InvalidationReason::LinkBreak if entry.valid_seq => {
                entry.dest_seq = entry.dest_seq.next();
            }
            InvalidationReason::RouteError(seq) => {
                entry.dest_seq = entry.dest_seq.freshest(seq);
                entry.valid_seq = true;
            }
            _ => {}
        }
        entry.state = RouteState::Invalid;
        entry.lifetime = now + delete_period;
        Some(BrokenLinkEvent {
            destination,
            dest_seq: entry.dest_seq,
            precursors: core::mem::take(&mut entry.precursors),
        })
    }

    /// Expire valid routes whose lifetime has passed and delete invalid
    /// routes whose delete period has passed. Search placeholders are left
    /// to the search that owns them.
    ///
    /// Returns the destinations that expired in this sweep.
    pub fn purge_expired(&mut self, now: Timestamp, delete_period: Duration) -> Vec<Addr> {
        self.routes
            .retain(|_, e| !(e.state == RouteState::Invalid && e.lifetime <= now));

        let mut expired = Vec::new();
        for entry in self.routes.values_mut() {
            if entry.is_valid() && entry.lifetime <= now {
                entry.state = RouteState::Invalid;
                entry.lifetime = now + delete_period;
                entry.precursors.clear();
                expired.push(entry.destination);
            }
        }
        expired
    }

    /// Record that `node` forwards through us toward `destination`.
    ///
    /// Returns false if the route is not valid or the list is full.
    pub fn add_precursor(&mut self, destination: Addr, node: Addr) -> bool {
        let Some(entry) = self.routes.get_mut(&destination) else {
            return false;
        };
        if !entry.is_valid() {
            return false;
        }
        if entry.precursors.contains(&node) {
            return true;
        }
        if entry.precursors.len() >= Cfg::MAX_PRECURSORS {
            return false;
        }
        entry.precursors.push(node);
        true
    }

    pub fn remove_precursor(&mut self, destination: Addr, node: Addr) -> bool {
        let Some(entry) = self.routes.get_mut(&destination) else {
            return false;
        };
        let before = entry.precursors.len();
        entry.precursors.retain(|p| *p != node);
        entry.precursors.len() != before
    }

    /// Remove `node` from every precursor list.
    pub fn forget_precursor(&mut self, node: Addr) {
        for entry in self.routes.values_mut() {
            entry.precursors.retain(|p| *p != node);
        }
    }

    /// Valid destinations currently reached through `next_hop`, in address
    /// order.
    pub fn routes_via(&self, next_hop: Addr) -> Vec<Addr> {
        self.routes
            .values()
            .filter(|e| e.is_valid() && e.next_hop == next_hop)
            .map(|e| e.destination)
            .collect()
    }

    /// Push the expiry of a valid route out to at least `until`.
    pub fn extend_lifetime(&mut self, destination: Addr, until: Timestamp) {
        if let Some(entry) = self.routes.get_mut(&destination) {
            if entry.is_valid() && entry.lifetime < until {
                entry.lifetime = until;
            }
        }
    }

    pub fn remove(&mut self, destination: Addr) -> Option<RouteEntry> {
        self.routes.remove(&destination)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RouteEntry> {
        self.routes.values()
    }

    /// Free a slot for a new destination, evicting the invalid entry
    /// closest to deletion if the table is full.
    fn make_room(&mut self) -> Result<(), Error> {
        if self.routes.len() < Cfg::MAX_ROUTES {
            return Ok(());
        }
        let victim = self
            .routes
            .values()
            .filter(|e| e.state == RouteState::Invalid)
            // Ties go to the lowest address: the first minimum in key order.
            .min_by_key(|e| e.lifetime)
            .map(|e| e.destination)
            .ok_or(Error::TableFull)?;
        self.routes.remove(&victim);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DefaultConfig, SmallConfig};
    use core::net::Ipv4Addr;
    use proptest::prelude::*;

    const OWN: Addr = Ipv4Addr::new(10, 0, 0, 1);
    const B: Addr = Ipv4Addr::new(10, 0, 0, 2);
    const C: Addr = Ipv4Addr::new(10, 0, 0, 3);
    const D: Addr = Ipv4Addr::new(10, 0, 0, 4);

    fn t(secs: u64) -> Timestamp {
        Timestamp::from_secs(secs)
    }

    fn route(dest: Addr, via: Addr, hops: u8, seq: u32) -> RouteEntry {
        RouteEntry::new(dest, via, hops, SeqNo(seq), t(10))
    }

    #[test]
    fn test_fresher_seq_replaces() {
        let mut table = RoutingTable::<DefaultConfig>::new(OWN);
        assert_eq!(
            table.insert_or_update(route(D, B, 3, 5)),
            Ok(UpdateOutcome::Inserted)
        );
        assert_eq!(
            table.insert_or_update(route(D, C, 6, 6)),
            Ok(UpdateOutcome::Replaced)
        );
        let e = table.lookup(D).unwrap();
        assert_eq!(e.next_hop, C);
        assert_eq!(e.hop_count, 6);
    }

    #[test]
    fn test_equal_seq_tie_break_on_hops() {
        let mut table = RoutingTable::<DefaultConfig>::new(OWN);
        table.insert_or_update(route(D, B, 3, 5)).unwrap();

        assert_eq!(
            table.insert_or_update(route(D, C, 4, 5)),
            Err(Error::StaleUpdate)
        );
        assert_eq!(table.lookup(D).unwrap().next_hop, B);

        assert_eq!(
            table.insert_or_update(route(D, C, 3, 5)),
            Ok(UpdateOutcome::Replaced)
        );
        assert_eq!(table.lookup(D).unwrap().next_hop, C);
    }

    #[test]
    fn test_older_seq_is_stale() {
        let mut table = RoutingTable::<DefaultConfig>::new(OWN);
        table.insert_or_update(route(D, B, 3, 5)).unwrap();
        assert_eq!(
            table.insert_or_update(route(D, C, 1, 4)),
            Err(Error::StaleUpdate)
        );
    }

    #[test]
    fn test_placeholder_is_always_superseded() {
        let mut table = RoutingTable::<DefaultConfig>::new(OWN);
        table
            .insert_or_update(RouteEntry::in_search(D, t(3)))
            .unwrap();
        assert!(table.lookup_valid(D, t(0)).is_none());
        table.insert_or_update(route(D, B, 2, 1)).unwrap();
        assert!(table.lookup_valid(D, t(0)).is_some());
    }

    #[test]
    fn test_zero_hops_only_for_self() {
        let mut table = RoutingTable::<DefaultConfig>::new(OWN);
        assert_eq!(
            table.insert_or_update(route(D, D, 0, 1)),
            Err(Error::InvalidRoute)
        );
    }

    #[test]
    fn test_invalidate_drains_precursors_and_bumps_seq() {
        let mut table = RoutingTable::<DefaultConfig>::new(OWN);
        table.insert_or_update(route(D, B, 2, 7)).unwrap();
        assert!(table.add_precursor(D, C));
        assert!(table.add_precursor(D, C));
        assert_eq!(table.lookup(D).unwrap().precursors.len(), 1);

        let ev = table
            .invalidate(D, InvalidationReason::LinkBreak, t(1), Duration::from_secs(15))
            .unwrap();
        assert_eq!(ev.dest_seq, SeqNo(8));
        assert_eq!(ev.precursors, alloc::vec![C]);

        let e = table.lookup(D).unwrap();
        assert_eq!(e.state, RouteState::Invalid);
        assert!(e.precursors.is_empty());
        assert_eq!(e.lifetime, t(16));

        // Already invalid.
        assert!(table
            .invalidate(D, InvalidationReason::LinkBreak, t(1), Duration::from_secs(15))
            .is_none());
        // Precursors only attach to valid routes.
        assert!(!table.add_precursor(D, C));
    }

    #[test]
    fn test_invalidated_route_needs_fresher_info() {
        let mut table = RoutingTable::<DefaultConfig>::new(OWN);
        table.insert_or_update(route(D, B, 2, 7)).unwrap();
        table.invalidate(D, InvalidationReason::LinkBreak, t(1), Duration::from_secs(15));

        assert_eq!(
            table.insert_or_update(route(D, C, 1, 7)),
            Err(Error::StaleUpdate)
        );
        assert!(table.insert_or_update(route(D, C, 3, 8)).is_ok());
    }

    #[test]
    fn test_refresh_neighbor_keeps_seq() {
        let mut table = RoutingTable::<DefaultConfig>::new(OWN);
        table.insert_or_update(route(B, C, 2, 9)).unwrap();
        table.refresh_neighbor(B, PRIMARY_IFACE, t(4), true).unwrap();
        let e = table.lookup(B).unwrap();
        assert_eq!(e.hop_count, 1);
        assert_eq!(e.next_hop, B);
        assert_eq!(e.dest_seq, SeqNo(9));
        assert!(e.valid_seq);

        table.refresh_neighbor(D, PRIMARY_IFACE, t(4), true).unwrap();
        assert!(!table.lookup(D).unwrap().valid_seq);
    }

    #[test]
    fn test_purge_expires_then_deletes() {
        let mut table = RoutingTable::<DefaultConfig>::new(OWN);
        table
            .insert_or_update(RouteEntry::new(D, B, 2, SeqNo(1), t(2)))
            .unwrap();
        table.add_precursor(D, C);

        assert!(table.purge_expired(t(1), Duration::from_secs(5)).is_empty());
        assert_eq!(table.purge_expired(t(2), Duration::from_secs(5)), alloc::vec![D]);
        let e = table.lookup(D).unwrap();
        assert_eq!(e.state, RouteState::Invalid);
        assert!(e.precursors.is_empty());

        table.purge_expired(t(7), Duration::from_secs(5));
        assert!(table.lookup(D).is_none());
    }

    #[test]
    fn test_routes_via() {
        let mut table = RoutingTable::<DefaultConfig>::new(OWN);
        table.insert_or_update(route(D, B, 3, 1)).unwrap();
        table.refresh_neighbor(B, PRIMARY_IFACE, t(4), true).unwrap();
        table.insert_or_update(route(C, B, 2, 1)).unwrap();
        // Address order, whatever the insertion order.
        assert_eq!(table.routes_via(B), alloc::vec![B, C, D]);
    }

    #[test]
    fn test_full_table_evicts_invalid_first() {
        let mut table = RoutingTable::<SmallConfig>::new(OWN);
        for i in 0..SmallConfig::MAX_ROUTES {
            let dest = Ipv4Addr::new(10, 1, 0, i as u8 + 1);
            table.insert_or_update(route(dest, B, 2, 1)).unwrap();
        }
        let extra = Ipv4Addr::new(10, 2, 0, 1);
        assert_eq!(
            table.insert_or_update(route(extra, B, 2, 1)),
            Err(Error::TableFull)
        );

        let victim = Ipv4Addr::new(10, 1, 0, 5);
        table.invalidate(victim, InvalidationReason::Expired, t(1), Duration::from_secs(1));
        assert_eq!(
            table.insert_or_update(route(extra, B, 2, 1)),
            Ok(UpdateOutcome::Inserted)
        );
        assert!(table.lookup(victim).is_none());
    }

    #[test]
    fn test_eviction_tie_takes_lowest_address() {
        let mut table = RoutingTable::<SmallConfig>::new(OWN);
        for i in 0..SmallConfig::MAX_ROUTES {
            let dest = Ipv4Addr::new(10, 1, 0, i as u8 + 1);
            table.insert_or_update(route(dest, B, 2, 1)).unwrap();
        }
        let low = Ipv4Addr::new(10, 1, 0, 3);
        let high = Ipv4Addr::new(10, 1, 0, 9);
        for dest in [high, low] {
            table.invalidate(dest, InvalidationReason::Expired, t(1), Duration::from_secs(1));
        }
        let extra = Ipv4Addr::new(10, 2, 0, 1);
        table.insert_or_update(route(extra, B, 2, 1)).unwrap();
        assert!(table.lookup(low).is_none());
        assert!(table.lookup(high).is_some());
    }

    proptest! {
        #[test]
        fn prop_freshness_never_regresses(
            updates in proptest::collection::vec((0u32..20, 1u8..10), 1..40)
        ) {
            let mut table = RoutingTable::<DefaultConfig>::new(OWN);
            let mut best: Option<(SeqNo, u8)> = None;
            for (seq, hops) in updates {
                let _ = table.insert_or_update(route(D, B, hops, seq));
                let e = table.lookup(D).unwrap();
                let now = (e.dest_seq, e.hop_count);
                if let Some((bseq, bhops)) = best {
                    prop_assert!(!bseq.is_newer_than(now.0));
                    if bseq == now.0 {
                        prop_assert!(now.1 <= bhops);
                    }
                }
                best = Some(now);
            }
        }
    }
}
