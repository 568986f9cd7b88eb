//! Warden phase machine
//!
//! Type-safe state machine for the monitoring lifecycle using state-machines crate.
//! Uses dynamic dispatch mode since transitions are driven by runtime verdicts.

use serde::Serialize;
use state_machines::state_machine;

state_machine! {
    name: WatchMachine,
    dynamic: true,
    initial: Idle,
    states: [Idle, Monitoring, Authorizing, Cooling, Exhausted],
    events {
        activate {
            transition: { from: Idle, to: Monitoring }
        }
        resume {
            transition: { from: Idle, to: Cooling }
        }
        cross {
            transition: { from: [Monitoring, Cooling, Exhausted], to: Authorizing }
        }
        reboot {
            transition: { from: Authorizing, to: Monitoring }
        }
        defer {
            transition: { from: Authorizing, to: Cooling }
        }
        exhaust {
            transition: { from: Authorizing, to: Exhausted }
        }
        recover {
            transition: { from: Cooling, to: Monitoring }
        }
        suspend {
            transition: { from: [Monitoring, Authorizing, Cooling, Exhausted], to: Idle }
        }
    }
}

/// Monitoring phase, as reported to the outside
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// No remote session, probes suspended
    Idle,
    /// Remote session active, accumulating verdicts
    Monitoring,
    /// Outage confirmed, consulting the reboot guard
    Authorizing,
    /// Reboot deferred by cooldown, guard re-checked every failing cycle
    Cooling,
    /// Reboot budget spent; no reboot until an operator reset
    Exhausted,
}

impl Phase {
    /// Parse phase from its state name
    pub fn from_name(s: &str) -> Self {
        match s {
            "Monitoring" => Phase::Monitoring,
            "Authorizing" => Phase::Authorizing,
            "Cooling" => Phase::Cooling,
            "Exhausted" => Phase::Exhausted,
            _ => Phase::Idle,
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Idle => write!(f, "idle"),
            Phase::Monitoring => write!(f, "monitoring"),
            Phase::Authorizing => write!(f, "authorizing"),
            Phase::Cooling => write!(f, "cooling"),
            Phase::Exhausted => write!(f, "exhausted"),
        }
    }
}

/// Wraps the dynamic machine
pub struct PhaseTracker {
    machine: DynamicWatchMachine<()>,
}

impl PhaseTracker {
    pub fn new() -> Self {
        Self {
            machine: WatchMachine::new(()).into_dynamic(),
        }
    }

    pub fn current(&self) -> Phase {
        Phase::from_name(self.machine.current_state())
    }

    pub fn handle(&mut self, event: WatchMachineEvent) -> Result<(), state_machines::DynamicError> {
        self.machine.handle(event)
    }
}

impl Default for PhaseTracker {
    fn default() -> Self {
        Self::new()
    }
}
