//! Warden event stream
//!
//! Every verdict, phase transition and guard decision becomes a `WatchEvent`.
//! Events are logged through tracing and, when a sink is attached, forwarded
//! to it (the CLI prints them as JSON lines).

use crate::sickbay::{GuardDecision, HealthVerdict};
use crate::warden::state::Phase;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WatchEvent {
    Started {
        variant: String,
        reboot_count: u32,
        consecutive_failures: u32,
        threshold: u32,
    },
    SessionDetected {
        sessions: Vec<String>,
    },
    Transition {
        from: Phase,
        to: Phase,
    },
    Verdict {
        verdict: HealthVerdict,
        consecutive_failures: u32,
        crossed: bool,
    },
    Recovered {
        after_failures: u32,
    },
    Guard {
        #[serde(flatten)]
        decision: GuardDecision,
        reboot_count: u32,
        max_reboots: u32,
    },
    RebootIssued {
        attempt: u32,
        action: String,
    },
    RebootFailed {
        attempt: u32,
        error: String,
    },
    PersistFailed {
        error: String,
    },
    Reset,
    Stopped,
}

impl WatchEvent {
    /// Emit the event as a tracing record
    pub fn log(&self) {
        match self {
            WatchEvent::Started {
                variant,
                reboot_count,
                consecutive_failures,
                threshold,
            } => info!(
                variant = %variant,
                reboot_count,
                consecutive_failures,
                threshold,
                "network watchdog started"
            ),
            WatchEvent::SessionDetected { sessions } => {
                info!(sessions = %sessions.join(", "), "remote session detected")
            }
            WatchEvent::Transition { from, to } => info!(%from, %to, "phase changed"),
            WatchEvent::Verdict {
                verdict,
                consecutive_failures,
                crossed,
            } => {
                if verdict.health.is_healthy() {
                    debug!(consecutive_failures, "{}", verdict.summary());
                } else {
                    warn!(consecutive_failures, crossed, "{}", verdict.summary());
                    warn!("failure analysis: {}", verdict.analysis());
                }
            }
            WatchEvent::Recovered { after_failures } => {
                info!(after_failures, "connectivity restored")
            }
            WatchEvent::Guard {
                decision,
                reboot_count,
                max_reboots,
            } => match decision {
                GuardDecision::Authorized => {
                    info!(reboot_count, max_reboots, "reboot {}", decision)
                }
                GuardDecision::DeniedMaxAttempts => {
                    error!(
                        reboot_count,
                        max_reboots, "reboot {}; reset the counter to re-arm", decision
                    )
                }
                GuardDecision::DeniedCooldown { .. } => {
                    warn!(reboot_count, max_reboots, "reboot {}", decision)
                }
            },
            WatchEvent::RebootIssued { attempt, action } => {
                warn!(attempt, action = %action, "rebooting host")
            }
            WatchEvent::RebootFailed { attempt, error } => error!(
                attempt,
                error = %error,
                "reboot command failed, the attempt stays counted; check permissions"
            ),
            WatchEvent::PersistFailed { error } => {
                warn!(error = %error, "could not persist state, will retry next cycle")
            }
            WatchEvent::Reset => info!("reboot counters reset"),
            WatchEvent::Stopped => info!("network watchdog stopped"),
        }
    }
}

/// Event with its timestamp
#[derive(Debug, Clone, Serialize)]
pub struct StampedEvent {
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: WatchEvent,
}
