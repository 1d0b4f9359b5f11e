//! Flood suppression and rate limits.
//!
//! - [`SeenRequests`]: (originator, request id) pairs already processed
//! - [`RebroadcastLedger`]: how often this node re-flooded a search for a
//!   given (originator, destination) pair
//! - [`RateLimiter`]: per-second budget for originated RREQs and sent RERRs

use core::marker::PhantomData;

use hashbrown::HashMap;

use crate::config::NodeConfig;
use crate::time::{Duration, Timestamp};
use crate::types::Addr;

/// Recently processed route requests, keyed by (originator, request id).
pub struct SeenRequests<Cfg: NodeConfig> {
    entries: HashMap<(Addr, u32), Timestamp>,
    _config: PhantomData<Cfg>,
}

impl<Cfg: NodeConfig> Default for SeenRequests<Cfg> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Cfg: NodeConfig> SeenRequests<Cfg> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            _config: PhantomData,
        }
    }

    /// True if the pair was recorded and its window has not ended.
    pub fn contains(&self, originator: Addr, request_id: u32, now: Timestamp) -> bool {
        self.entries
            .get(&(originator, request_id))
            .is_some_and(|expiry| *expiry > now)
    }

    /// Record the pair for `window`. Returns false if it was already seen.
    ///
    /// At capacity the record closest to expiry is evicted, lowest key first
    /// among equals.
    pub fn check_and_record(
        &mut self,
        originator: Addr,
        request_id: u32,
        now: Timestamp,
        window: Duration,
    ) -> bool {
        if self.contains(originator, request_id, now) {
            return false;
        }
        if self.entries.len() >= Cfg::MAX_SEEN_REQUESTS {
            self.purge(now);
        }
        if self.entries.len() >= Cfg::MAX_SEEN_REQUESTS {
            if let Some(oldest) = self
                .entries
                .iter()
                .min_by_key(|(key, expiry)| (**expiry, **key))
                .map(|(k, _)| *k)
            {
                self.entries.remove(&oldest);
            }
        }
        self.entries.insert((originator, request_id), now + window);
        true
    }

    pub fn purge(&mut self, now: Timestamp) {
        self.entries.retain(|_, expiry| *expiry > now);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Bounds how many times this node re-floods requests of one search.
///
/// Every retry of a search carries a new request id, so the seen cache alone
/// would let an intermediate node forward each of them. The ledger caps that
/// at the same bound the originator uses for its own attempts.
pub struct RebroadcastLedger<Cfg: NodeConfig> {
    entries: HashMap<(Addr, Addr), (Timestamp, u8)>,
    _config: PhantomData<Cfg>,
}

impl<Cfg: NodeConfig> Default for RebroadcastLedger<Cfg> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Cfg: NodeConfig> RebroadcastLedger<Cfg> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            _config: PhantomData,
        }
    }

    /// Count one rebroadcast for (originator, destination) if the bound
    /// allows it. The count resets once `window` has passed since the first.
    pub fn try_record(
        &mut self,
        originator: Addr,
        destination: Addr,
        now: Timestamp,
        window: Duration,
        bound: u8,
    ) -> bool {
        let key = (originator, destination);
        if let Some((expiry, count)) = self.entries.get_mut(&key) {
            if *expiry > now {
                if *count >= bound {
                    return false;
                }
                *count += 1;
                return true;
            }
        }
        if self.entries.len() >= Cfg::MAX_SEEN_REQUESTS {
            self.purge(now);
        }
        if self.entries.len() >= Cfg::MAX_SEEN_REQUESTS {
            if let Some(oldest) = self
                .entries
                .iter()
                .min_by_key(|(key, (expiry, _))| (*expiry, **key))
                .map(|(k, _)| *k)
            {
                self.entries.remove(&oldest);
            }
        }
        self.entries.insert(key, (now + window, 1));
        true
    }

    pub fn purge(&mut self, now: Timestamp) {
        self.entries.retain(|_, (expiry, _)| *expiry > now);
    }
}

/// Fixed one-second window counter.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    limit: u16,
    window_start: Timestamp,
    used: u16,
}

impl RateLimiter {
    pub fn new(limit: u16) -> Self {
        Self {
            limit,
            window_start: Timestamp::ZERO,
            used: 0,
        }
    }

    /// Take one unit of budget. Returns false if the current second is spent.
    pub fn try_acquire(&mut self, now: Timestamp) -> bool {
        if now.saturating_sub(self.window_start) >= Duration::from_secs(1) {
            self.window_start = now;
            self.used = 0;
        }
        if self.used >= self.limit {
            return false;
        }
        self.used += 1;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DefaultConfig, SmallConfig};
    use core::net::Ipv4Addr;

    const A: Addr = Ipv4Addr::new(10, 0, 0, 1);
    const D: Addr = Ipv4Addr::new(10, 0, 0, 4);

    #[test]
    fn test_duplicate_detected_within_window() {
        let mut seen = SeenRequests::<DefaultConfig>::new();
        let window = Duration::from_millis(5600);
        assert!(seen.check_and_record(A, 1, Timestamp::ZERO, window));
        assert!(!seen.check_and_record(A, 1, Timestamp::from_secs(1), window));
        assert!(seen.check_and_record(A, 2, Timestamp::from_secs(1), window));
        // Window over: the id may be reused.
        assert!(seen.check_and_record(A, 1, Timestamp::from_secs(6), window));
    }

    #[test]
    fn test_seen_bounded() {
        let mut seen = SeenRequests::<SmallConfig>::new();
        let window = Duration::from_secs(10);
        for id in 0..(SmallConfig::MAX_SEEN_REQUESTS as u32 + 5) {
            seen.check_and_record(A, id, Timestamp::from_millis(id as u64), window);
        }
        assert_eq!(seen.len(), SmallConfig::MAX_SEEN_REQUESTS);
        // Oldest ids were evicted, newest kept.
        assert!(!seen.contains(A, 0, Timestamp::from_secs(1)));
        assert!(seen.contains(
            A,
            SmallConfig::MAX_SEEN_REQUESTS as u32 + 4,
            Timestamp::from_secs(1)
        ));
    }

    #[test]
    fn test_seen_eviction_tie_is_lowest_key() {
        let mut seen = SeenRequests::<SmallConfig>::new();
        let window = Duration::from_secs(10);
        let now = Timestamp::ZERO;
        let cap = SmallConfig::MAX_SEEN_REQUESTS as u32;
        for id in (0..cap).rev() {
            seen.check_and_record(A, id, now, window);
        }
        seen.check_and_record(A, cap, now, window);
        assert!(!seen.contains(A, 0, now));
        for id in 1..=cap {
            assert!(seen.contains(A, id, now));
        }
    }

    #[test]
    fn test_rebroadcast_bound() {
        let mut ledger = RebroadcastLedger::<DefaultConfig>::new();
        let window = Duration::from_secs(5);
        let now = Timestamp::ZERO;
        assert!(ledger.try_record(A, D, now, window, 2));
        assert!(ledger.try_record(A, D, now, window, 2));
        assert!(!ledger.try_record(A, D, now, window, 2));
        assert!(ledger.try_record(A, D, Timestamp::from_secs(5), window, 2));
    }

    #[test]
    fn test_rate_limiter_window() {
        let mut rl = RateLimiter::new(2);
        let t0 = Timestamp::from_millis(100);
        assert!(rl.try_acquire(t0));
        assert!(rl.try_acquire(t0));
        assert!(!rl.try_acquire(Timestamp::from_millis(900)));
        assert!(rl.try_acquire(Timestamp::from_millis(1100)));
    }
}
