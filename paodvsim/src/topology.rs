//! Node placement and radio connectivity.
//!
//! Connectivity is geometric: two nodes hear each other when they are within
//! the radio range and the link between them has not been disabled. Positions
//! are shared with every node's [`SimLocator`](crate::node::SimLocator), so a
//! scheduled move is immediately visible to the trust policy.

use std::cell::RefCell;
use std::rc::Rc;

use hashbrown::{HashMap, HashSet};
use paodv::{Addr, Duration};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Positions shared between the topology and the nodes' locators.
pub type SharedPositions = Rc<RefCell<HashMap<Addr, (f64, f64)>>>;

/// Default radio range in metres.
pub const DEFAULT_RANGE: f64 = 100.0;

/// Properties applied to every link.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkProfile {
    /// Frame loss rate (0.0 to 1.0).
    pub loss_rate: f64,
    /// Propagation delay.
    pub delay: Duration,
}

impl Default for LinkProfile {
    fn default() -> Self {
        Self {
            loss_rate: 0.0,
            delay: Duration::from_millis(1),
        }
    }
}

impl LinkProfile {
    pub fn with_loss_rate(mut self, rate: f64) -> Self {
        self.loss_rate = rate.clamp(0.0, 1.0);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// Network topology defining connectivity between nodes.
#[derive(Debug, Clone)]
pub struct Topology {
    positions: SharedPositions,
    range: f64,
    /// Links blocked regardless of distance, stored as canonical pairs.
    disabled: HashSet<(Addr, Addr)>,
    link: LinkProfile,
}

impl Default for Topology {
    fn default() -> Self {
        Self::new(DEFAULT_RANGE)
    }
}

impl Topology {
    /// Create an empty topology with the given radio range.
    pub fn new(range: f64) -> Self {
        Self {
            positions: Rc::new(RefCell::new(HashMap::new())),
            range,
            disabled: HashSet::new(),
            link: LinkProfile::default(),
        }
    }

    pub fn with_link_profile(mut self, link: LinkProfile) -> Self {
        self.link = link;
        self
    }

    pub fn range(&self) -> f64 {
        self.range
    }

    pub fn link_profile(&self) -> &LinkProfile {
        &self.link
    }

    /// Handle for locators that read positions.
    pub fn shared_positions(&self) -> SharedPositions {
        Rc::clone(&self.positions)
    }

    /// Place or move a node.
    pub fn place(&mut self, node: Addr, x: f64, y: f64) {
        self.positions.borrow_mut().insert(node, (x, y));
    }

    pub fn position(&self, node: Addr) -> Option<(f64, f64)> {
        self.positions.borrow().get(&node).copied()
    }

    /// Euclidean distance between two placed nodes.
    pub fn distance(&self, a: Addr, b: Addr) -> Option<f64> {
        let positions = self.positions.borrow();
        let (ax, ay) = *positions.get(&a)?;
        let (bx, by) = *positions.get(&b)?;
        Some(((ax - bx).powi(2) + (ay - by).powi(2)).sqrt())
    }

    /// Block the link between `a` and `b`.
    pub fn disable_link(&mut self, a: Addr, b: Addr) {
        self.disabled.insert(Self::canonical_pair(a, b));
    }

    /// Unblock the link between `a` and `b`.
    pub fn enable_link(&mut self, a: Addr, b: Addr) {
        self.disabled.remove(&Self::canonical_pair(a, b));
    }

    /// Check if two distinct nodes can currently hear each other.
    pub fn is_connected(&self, a: Addr, b: Addr) -> bool {
        if a == b || self.disabled.contains(&Self::canonical_pair(a, b)) {
            return false;
        }
        self.distance(a, b).is_some_and(|d| d <= self.range)
    }

    /// All nodes `node` can currently reach, in address order.
    pub fn neighbors(&self, node: Addr) -> Vec<Addr> {
        let mut result: Vec<Addr> = self
            .positions
            .borrow()
            .keys()
            .copied()
            .filter(|&other| self.is_connected(node, other))
            .collect();
        result.sort_unstable();
        result
    }

    /// Canonical pair ordering for consistent link storage.
    fn canonical_pair(a: Addr, b: Addr) -> (Addr, Addr) {
        if a < b {
            (a, b)
        } else {
            (b, a)
        }
    }
}

/// Positions of a straight line of `count` nodes, `spacing` metres apart.
pub fn chain_positions(count: usize, spacing: f64) -> Vec<(f64, f64)> {
    (0..count).map(|i| (i as f64 * spacing, 0.0)).collect()
}

/// Positions of a grid filled row by row, `columns` wide.
pub fn grid_positions(count: usize, columns: usize, spacing: f64) -> Vec<(f64, f64)> {
    let columns = columns.max(1);
    (0..count)
        .map(|i| ((i % columns) as f64 * spacing, (i / columns) as f64 * spacing))
        .collect()
}

/// Deterministic uniform positions in a `width` × `height` area.
pub fn random_positions(count: usize, width: f64, height: f64, seed: u64) -> Vec<(f64, f64)> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|_| (rng.gen::<f64>() * width, rng.gen::<f64>() * height))
        .collect()
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;

    const A: Addr = Ipv4Addr::new(10, 0, 0, 1);
    const B: Addr = Ipv4Addr::new(10, 0, 0, 2);
    const C: Addr = Ipv4Addr::new(10, 0, 0, 3);

    fn chain() -> Topology {
        let mut topo = Topology::new(100.0);
        for (addr, (x, y)) in [A, B, C].into_iter().zip(chain_positions(3, 80.0)) {
            topo.place(addr, x, y);
        }
        topo
    }

    #[test]
    fn test_chain_neighbors() {
        let topo = chain();
        assert_eq!(topo.neighbors(A), vec![B]);
        assert_eq!(topo.neighbors(B), vec![A, C]);
        assert!(!topo.is_connected(A, C));
        assert_eq!(topo.distance(A, C), Some(160.0));
    }

    #[test]
    fn test_disable_and_enable_link() {
        let mut topo = chain();
        topo.disable_link(B, A);
        assert!(!topo.is_connected(A, B));
        assert_eq!(topo.neighbors(B), vec![C]);

        topo.enable_link(A, B);
        assert!(topo.is_connected(A, B));
    }

    #[test]
    fn test_move_out_of_range() {
        let mut topo = chain();
        topo.place(C, 500.0, 0.0);
        assert!(!topo.is_connected(B, C));
        assert_eq!(topo.position(C), Some((500.0, 0.0)));
    }

    #[test]
    fn test_self_is_not_a_neighbor() {
        let topo = chain();
        assert!(!topo.is_connected(A, A));
        assert!(!topo.neighbors(A).contains(&A));
    }

    #[test]
    fn test_position_helpers() {
        assert_eq!(grid_positions(3, 2, 10.0), vec![(0.0, 0.0), (10.0, 0.0), (0.0, 10.0)]);
        let a = random_positions(5, 300.0, 300.0, 7);
        assert_eq!(a, random_positions(5, 300.0, 300.0, 7));
        assert!(a.iter().all(|&(x, y)| (0.0..300.0).contains(&x) && (0.0..300.0).contains(&y)));
    }
}
