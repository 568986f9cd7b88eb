//! Probe targets, outcomes and the prober capability
//!
//! The aggregator only sees the `Prober` trait; real network access lives in
//! `sickbay::net`, tests use a scripted fake.

use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// A single reachability target
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", content = "target", rename_all = "snake_case")]
pub enum ProbeTarget {
    /// Host name or IP literal, probed with one ICMP echo
    Host(String),
    /// http(s) URL, probed with a GET request
    Http(String),
}

impl ProbeTarget {
    /// Parse a configured target string
    pub fn parse(s: &str) -> Self {
        let s = s.trim();
        let lower = s.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            ProbeTarget::Http(s.to_string())
        } else {
            ProbeTarget::Host(s.to_string())
        }
    }

    /// The configured identifier
    pub fn as_str(&self) -> &str {
        match self {
            ProbeTarget::Host(h) => h,
            ProbeTarget::Http(u) => u,
        }
    }
}

impl fmt::Display for ProbeTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse reason a probe failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// No answer within the timeout
    Timeout,
    /// Explicit rejection (unreachable, refused, socket error)
    Refused,
    /// The name could not be resolved
    ResolutionFailed,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Timeout => write!(f, "timeout"),
            FailureReason::Refused => write!(f, "refused"),
            FailureReason::ResolutionFailed => write!(f, "resolution failed"),
        }
    }
}

/// Result of one probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ProbeOutcome {
    Reachable {
        #[serde(rename = "latency_ms", serialize_with = "as_millis")]
        latency: Duration,
    },
    Failed {
        reason: FailureReason,
    },
}

fn as_millis<S: serde::Serializer>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

impl ProbeOutcome {
    /// Shorthand for a failed outcome
    pub fn failed(reason: FailureReason) -> Self {
        ProbeOutcome::Failed { reason }
    }

    pub fn is_reachable(&self) -> bool {
        matches!(self, ProbeOutcome::Reachable { .. })
    }

    pub fn failure(&self) -> Option<FailureReason> {
        match self {
            ProbeOutcome::Reachable { .. } => None,
            ProbeOutcome::Failed { reason } => Some(*reason),
        }
    }
}

impl fmt::Display for ProbeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeOutcome::Reachable { latency } => {
                write!(f, "reachable ({} ms)", latency.as_millis())
            }
            ProbeOutcome::Failed { reason } => write!(f, "failed: {}", reason),
        }
    }
}

/// Network probing capability
///
/// Implementations should honour `timeout` themselves; the aggregator also
/// wraps every call in a timeout and maps expiry to `FailureReason::Timeout`.
#[async_trait]
pub trait Prober: Send + Sync {
    /// Probe one reachability target
    async fn probe(&self, target: &ProbeTarget, timeout: Duration) -> ProbeOutcome;

    /// Resolve `name` through the system resolver
    async fn resolve(&self, name: &str, timeout: Duration) -> ProbeOutcome;
}
