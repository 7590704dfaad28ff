//! Routing types and configuration

use crate::model::{DeviceId, MessageId, MessageRoute, MessageStatus, Urgency};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Hop ceilings per urgency; more urgent messages may travel further
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HopLimits {
    pub low: u32,
    pub medium: u32,
    pub high: u32,
    pub critical: u32,
}

impl Default for HopLimits {
    fn default() -> Self {
        Self {
            low: 4,
            medium: 6,
            high: 8,
            critical: 12,
        }
    }
}

impl HopLimits {
    pub fn for_urgency(&self, urgency: Urgency) -> u32 {
        match urgency {
            Urgency::Low => self.low,
            Urgency::Medium => self.medium,
            Urgency::High => self.high,
            Urgency::Critical => self.critical,
        }
    }

    /// Same ceiling for every urgency
    pub fn uniform(max_hops: u32) -> Self {
        Self {
            low: max_hops,
            medium: max_hops,
            high: max_hops,
            critical: max_hops,
        }
    }
}

/// Weights of the integer priority score used to rank relay targets
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreWeights {
    /// Points per urgency rank (LOW = 1 .. CRITICAL = 4)
    pub urgency: i64,

    /// Penalty per message waiting in the target's outbound queue
    pub queue: i64,

    /// Bonus for a peer heard from just now, decaying to zero at the horizon
    pub recency: i64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            urgency: 1000,
            queue: 100,
            recency: 100,
        }
    }
}

fn default_max_concurrent_relays() -> usize {
    num_cpus::get().max(1) * 2
}

/// Configuration for the routing engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Targets per relay decision: 1 is point-to-point, more is epidemic
    pub fanout: usize,

    pub hop_limits: HopLimits,

    pub weights: ScoreWeights,

    /// Age at which a peer's recency bonus reaches zero
    pub recency_horizon_secs: u64,

    /// Upper bound for one hand-off attempt
    pub handoff_timeout_ms: u64,

    /// Relay decisions allowed to run at once
    #[serde(default = "default_max_concurrent_relays")]
    pub max_concurrent_relays: usize,

    /// Relay from the origin as soon as a message is created
    pub forward_immediately: bool,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            fanout: 2,
            hop_limits: HopLimits::default(),
            weights: ScoreWeights::default(),
            recency_horizon_secs: 5 * 60,
            handoff_timeout_ms: 5_000,
            max_concurrent_relays: default_max_concurrent_relays(),
            forward_immediately: true,
        }
    }
}

impl RoutingConfig {
    pub fn handoff_timeout(&self) -> Duration {
        Duration::from_millis(self.handoff_timeout_ms)
    }

    pub fn recency_horizon(&self) -> Duration {
        Duration::from_secs(self.recency_horizon_secs)
    }

    pub fn max_hops_for(&self, urgency: Urgency) -> u32 {
        self.hop_limits.for_urgency(urgency)
    }
}

/// Why a relay decision stopped without forwarding
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RelayHalt {
    #[error("message is {0}")]
    Terminal(MessageStatus),

    #[error("hop limit exceeded ({relay_count}/{max_hops})")]
    HopLimitExceeded { relay_count: u32, max_hops: u32 },

    #[error("message expired")]
    ExpiredMessage,
}

impl RelayHalt {
    pub fn label(&self) -> &'static str {
        match self {
            RelayHalt::Terminal(_) => "terminal",
            RelayHalt::HopLimitExceeded { .. } => "hop_limit",
            RelayHalt::ExpiredMessage => "expired",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    /// Hand-offs confirmed, one route each
    Forwarded(Vec<MessageRoute>),

    /// No target could take the message; it stays stored until the
    /// registry reports a new neighbor
    Held,

    Halted(RelayHalt),
}

impl RelayOutcome {
    pub fn routes(&self) -> &[MessageRoute] {
        match self {
            RelayOutcome::Forwarded(routes) => routes,
            _ => &[],
        }
    }

    pub fn is_forwarded(&self) -> bool {
        matches!(self, RelayOutcome::Forwarded(_))
    }
}

/// Why an adjacent device was not used as a target
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Reported as a peer but never registered
    UnknownDevice,
    /// Outbound queue at the configured maximum
    Congested,
    /// Went offline before the hand-off was confirmed
    WentOffline,
    TimedOut,
    Unreachable(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::UnknownDevice => write!(f, "unknown device"),
            SkipReason::Congested => write!(f, "congested"),
            SkipReason::WentOffline => write!(f, "went offline"),
            SkipReason::TimedOut => write!(f, "timed out"),
            SkipReason::Unreachable(reason) => write!(f, "unreachable: {reason}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedTarget {
    pub device_id: DeviceId,
    pub reason: SkipReason,
}

/// Everything one relay decision did
#[derive(Debug, Clone)]
pub struct RelayReport {
    pub message_id: MessageId,
    pub holder: DeviceId,
    pub outcome: RelayOutcome,
    pub skipped: Vec<SkippedTarget>,
}

/// A (message, holder) pair waiting for a relay decision
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayJob {
    pub message_id: MessageId,
    pub holder: DeviceId,
    pub urgency: Urgency,
    pub created_at: DateTime<Utc>,
}

/// Counters kept by the routing engine
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingStats {
    pub decisions: u64,
    pub handoffs: u64,
    pub handoffs_failed: u64,
    pub held: u64,
    pub halted: u64,
}

impl fmt::Display for RoutingStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Routing: {} decisions, {} hand-offs ({} failed), {} held, {} halted",
            self.decisions, self.handoffs, self.handoffs_failed, self.held, self.halted
        )
    }
}
