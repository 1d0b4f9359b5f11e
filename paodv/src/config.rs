//! Node configuration.
//!
//! Two layers, mirroring how the node is deployed:
//!
//! - [`NodeConfig`] fixes memory bounds at compile time. Use
//!   `DefaultConfig` for simulation and larger hosts, `SmallConfig` for
//!   constrained MCUs.
//! - [`ProtocolConfig`] holds the runtime protocol options (hello timing,
//!   RREQ bound, trust threshold, adversarial mode, ...). It is validated
//!   once, when the node is constructed.
//!
//! # Example
//!
//! ```
//! use paodv::{Duration, ProtocolConfig};
//!
//! let config = ProtocolConfig::default()
//!     .with_hello(true)
//!     .with_hello_interval(Duration::from_secs(1))
//!     .with_allowed_hello_loss(2)
//!     .with_rreq_bound(2)
//!     .with_distance_threshold(Some(100.0));
//! assert!(config.validate().is_ok());
//! assert_eq!(config.net_traversal_time(), Duration::from_millis(2800));
//! ```

use crate::time::Duration;

/// Configuration trait for compile-time memory tuning.
///
/// All bounds must be non-zero.
pub trait NodeConfig {
    /// Maximum routing table entries.
    const MAX_ROUTES: usize;

    /// Maximum destinations with a search in flight.
    const MAX_PENDING_REQUESTS: usize;

    /// Maximum remembered (originator, request id) pairs.
    const MAX_SEEN_REQUESTS: usize;

    /// Maximum data packets buffered while waiting for routes.
    const MAX_QUEUED_PACKETS: usize;

    /// Maximum precursors tracked per route.
    const MAX_PRECURSORS: usize;

    /// Maximum neighbors tracked for hello liveness.
    const MAX_NEIGHBORS: usize;

    /// Maximum blacklisted neighbors.
    const MAX_BLACKLIST: usize;
}

/// Default configuration for simulation and hosts with plenty of RAM.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultConfig;

impl NodeConfig for DefaultConfig {
    const MAX_ROUTES: usize = 256;
    const MAX_PENDING_REQUESTS: usize = 32;
    const MAX_SEEN_REQUESTS: usize = 512;
    const MAX_QUEUED_PACKETS: usize = 64;
    const MAX_PRECURSORS: usize = 16;
    const MAX_NEIGHBORS: usize = 64;
    const MAX_BLACKLIST: usize = 16;
}

/// Small configuration for constrained devices.
#[derive(Debug, Clone, Copy, Default)]
pub struct SmallConfig;

impl NodeConfig for SmallConfig {
    const MAX_ROUTES: usize = 32;
    const MAX_PENDING_REQUESTS: usize = 4;
    const MAX_SEEN_REQUESTS: usize = 64;
    const MAX_QUEUED_PACKETS: usize = 8;
    const MAX_PRECURSORS: usize = 4;
    const MAX_NEIGHBORS: usize = 16;
    const MAX_BLACKLIST: usize = 4;
}

/// Rejected protocol option.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("rreq_bound must be at least 1")]
    ZeroRreqBound,
    #[error("hello_interval must be non-zero when hellos are enabled")]
    ZeroHelloInterval,
    #[error("allowed_hello_loss must be at least 1 when hellos are enabled")]
    ZeroHelloLoss,
    #[error("distance_threshold must be finite and non-negative")]
    InvalidDistanceThreshold,
    #[error("net_diameter must be at least 1")]
    ZeroNetDiameter,
    #[error("request_timeout must be non-zero")]
    ZeroRequestTimeout,
    #[error("purge_interval must be non-zero")]
    ZeroPurgeInterval,
}

/// Runtime protocol options.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ProtocolConfig {
    /// Send periodic hellos and track neighbor liveness from them.
    pub enable_hello: bool,
    pub hello_interval: Duration,
    /// Consecutive missed hellos before a neighbor is declared lost.
    pub allowed_hello_loss: u8,
    /// Maximum RREQ attempts per search.
    pub rreq_bound: u8,
    /// Backoff before the first retry. Doubled on each later retry.
    pub request_timeout: Duration,
    /// Trust/distance cutoff. `None` disables the policy.
    pub distance_threshold: Option<f64>,
    /// Blackhole mode: honest control plane, transit data dropped.
    pub is_malicious: bool,
    /// In blackhole mode, also answer RREQs with forged one-hop replies.
    pub forge_replies: bool,
    pub active_route_timeout: Duration,
    pub net_diameter: u8,
    pub node_traversal_time: Duration,
    /// Set the gratuitous flag on originated RREQs.
    pub gratuitous_reply: bool,
    /// Set the destination-only flag on originated RREQs.
    pub destination_only: bool,
    /// Use expanding-ring TTLs before flooding.
    pub expanding_ring: bool,
    pub ttl_start: u8,
    pub ttl_increment: u8,
    pub ttl_threshold: u8,
    pub timeout_buffer: u8,
    /// Buffered data older than this is dropped.
    pub max_queue_time: Duration,
    /// Originated RREQs per second.
    pub rreq_rate_limit: u16,
    /// RERRs sent per second.
    pub rerr_rate_limit: u16,
    /// Request RREP-ACKs on forwarded replies.
    pub rrep_ack_required: bool,
    /// Try to repair short routes before reporting them broken.
    pub local_repair: bool,
    pub max_repair_ttl: u8,
    /// Period of the expiry sweep.
    pub purge_interval: Duration,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            enable_hello: true,
            hello_interval: Duration::from_secs(1),
            allowed_hello_loss: 2,
            rreq_bound: 2,
            request_timeout: Duration::from_secs(1),
            distance_threshold: Some(100.0),
            is_malicious: false,
            forge_replies: false,
            active_route_timeout: Duration::from_secs(3),
            net_diameter: 35,
            node_traversal_time: Duration::from_millis(40),
            gratuitous_reply: true,
            destination_only: false,
            expanding_ring: false,
            ttl_start: 1,
            ttl_increment: 2,
            ttl_threshold: 7,
            timeout_buffer: 2,
            max_queue_time: Duration::from_secs(30),
            rreq_rate_limit: 10,
            rerr_rate_limit: 10,
            rrep_ack_required: false,
            local_repair: false,
            max_repair_ttl: 6,
            purge_interval: Duration::from_millis(500),
        }
    }
}

impl ProtocolConfig {
    pub fn with_hello(mut self, enable: bool) -> Self {
        self.enable_hello = enable;
        self
    }

    pub fn with_hello_interval(mut self, interval: Duration) -> Self {
        self.hello_interval = interval;
        self
    }

    pub fn with_allowed_hello_loss(mut self, loss: u8) -> Self {
        self.allowed_hello_loss = loss;
        self
    }

    pub fn with_rreq_bound(mut self, bound: u8) -> Self {
        self.rreq_bound = bound;
        self
    }

    pub fn with_distance_threshold(mut self, threshold: Option<f64>) -> Self {
        self.distance_threshold = threshold;
        self
    }

    pub fn with_malicious(mut self, malicious: bool) -> Self {
        self.is_malicious = malicious;
        self
    }

    pub fn with_forged_replies(mut self, forge: bool) -> Self {
        self.forge_replies = forge;
        self
    }

    pub fn with_expanding_ring(mut self, enable: bool) -> Self {
        self.expanding_ring = enable;
        self
    }

    pub fn with_rrep_ack(mut self, required: bool) -> Self {
        self.rrep_ack_required = required;
        self
    }

    pub fn with_local_repair(mut self, enable: bool) -> Self {
        self.local_repair = enable;
        self
    }

    /// Check option ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rreq_bound == 0 {
            return Err(ConfigError::ZeroRreqBound);
        }
        if self.net_diameter == 0 {
            return Err(ConfigError::ZeroNetDiameter);
        }
        if self.request_timeout == Duration::ZERO {
            return Err(ConfigError::ZeroRequestTimeout);
        }
        if self.purge_interval == Duration::ZERO {
            return Err(ConfigError::ZeroPurgeInterval);
        }
        if self.enable_hello {
            if self.hello_interval == Duration::ZERO {
                return Err(ConfigError::ZeroHelloInterval);
            }
            if self.allowed_hello_loss == 0 {
                return Err(ConfigError::ZeroHelloLoss);
            }
        }
        if let Some(t) = self.distance_threshold {
            if !t.is_finite() || t < 0.0 {
                return Err(ConfigError::InvalidDistanceThreshold);
            }
        }
        Ok(())
    }

    /// Upper bound on a round trip across the network.
    pub fn net_traversal_time(&self) -> Duration {
        self.node_traversal_time * 2 * self.net_diameter as u64
    }

    /// How long an (originator, request id) pair is remembered.
    pub fn path_discovery_time(&self) -> Duration {
        self.net_traversal_time() * 2
    }

    /// Lifetime this node advertises in replies about itself.
    pub fn my_route_timeout(&self) -> Duration {
        self.path_discovery_time().max(self.active_route_timeout) * 2
    }

    /// How long an invalid route is kept before deletion.
    pub fn delete_period(&self) -> Duration {
        let base = if self.enable_hello {
            self.active_route_timeout.max(self.hello_interval)
        } else {
            self.active_route_timeout
        };
        base * 5
    }

    /// Wait for an RREP-ACK from the next hop.
    pub fn next_hop_wait(&self) -> Duration {
        self.node_traversal_time + Duration::from_millis(10)
    }

    /// How long an unacknowledging neighbor stays blacklisted.
    pub fn blacklist_timeout(&self) -> Duration {
        self.net_traversal_time() * self.rreq_bound as u64
    }

    /// Lifetime advertised in hellos and granted to neighbor routes.
    pub fn hello_lifetime(&self) -> Duration {
        self.hello_interval * self.allowed_hello_loss as u64
    }

    /// Wait for a reply to a ring search of radius `ttl`.
    pub fn ring_traversal_time(&self, ttl: u8) -> Duration {
        self.node_traversal_time * 2 * (ttl as u64 + self.timeout_buffer as u64)
    }
}
