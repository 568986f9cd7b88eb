//! Connectivity health and remediation policy
//!
//! Provides:
//! - Probe targets, outcomes and the `Prober` capability
//! - Verdict aggregation (30% quorum or DNS)
//! - Consecutive failure counting with edge-triggered threshold
//! - Reboot guard (attempt limit + cooldown) and reboot actions

pub mod checker;
pub mod counter;
pub mod net;
pub mod probe;
pub mod recovery;

pub use checker::{HealthVerdict, ProbeAggregator};
pub use counter::FailureCounter;
pub use recovery::{GuardDecision, RebootAction, RebootGuard};
