//! Trust/distance policy for route acceptance.
//!
//! Proximity is used as a heuristic trust signal: a neighbor further away
//! than the configured threshold is not allowed to create or advertise
//! routes through this node. The policy is a pure function of its inputs.
//!
//! ```
//! use paodv::policy::{Candidate, TrustPolicy, Verdict};
//! use paodv::SeqNo;
//!
//! let policy = TrustPolicy::cooperative(Some(100.0));
//! let far = Candidate { dest_seq: SeqNo(3), hop_count: 1, distance: Some(150.0) };
//! assert_eq!(policy.evaluate(&far), Verdict::Reject);
//!
//! let adversarial = TrustPolicy::adversarial();
//! assert_eq!(adversarial.evaluate(&far), Verdict::Accept);
//! ```

use crate::config::ProtocolConfig;
use crate::seqno::SeqNo;

/// Outcome of a policy evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    Reject,
}

/// What is known about a candidate route at the time it is offered.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    /// Freshness the candidate claims.
    pub dest_seq: SeqNo,
    pub hop_count: u8,
    /// Distance to the neighbor offering the route, if it could be
    /// determined.
    pub distance: Option<f64>,
}

/// Distance-threshold gate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrustPolicy {
    threshold: Option<f64>,
    adversarial: bool,
}

impl TrustPolicy {
    /// Reject candidates further away than `threshold`. `None` accepts all.
    pub const fn cooperative(threshold: Option<f64>) -> Self {
        Self {
            threshold,
            adversarial: false,
        }
    }

    /// Blackhole mode: every candidate is accepted so the node stays
    /// attractive. Data-plane behavior is handled by the forwarder.
    pub const fn adversarial() -> Self {
        Self {
            threshold: None,
            adversarial: true,
        }
    }

    pub fn from_config(config: &ProtocolConfig) -> Self {
        if config.is_malicious {
            Self::adversarial()
        } else {
            Self::cooperative(config.distance_threshold)
        }
    }

    pub fn is_adversarial(&self) -> bool {
        self.adversarial
    }

    pub fn threshold(&self) -> Option<f64> {
        self.threshold
    }

    /// Judge a candidate.
    ///
    /// Freshness and hop count do not affect the verdict here; they are
    /// settled by the routing table once a candidate is accepted. An unknown
    /// distance is accepted.
    pub fn evaluate(&self, candidate: &Candidate) -> Verdict {
        if self.adversarial {
            return Verdict::Accept;
        }
        match (self.threshold, candidate.distance) {
            (Some(limit), Some(distance)) if distance.is_nan() || distance > limit => Verdict::Reject,
            _ => Verdict::Accept,
        }
    }
}
