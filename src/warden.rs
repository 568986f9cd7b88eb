//! The Warden - network watchdog loop
//!
//! Ticks at a fixed cadence while a remote session is active:
//! - Probes connectivity and classifies the cycle
//! - Counts consecutive failures up to the threshold
//! - Consults the reboot guard and reboots the host when authorized
//!
//! The Warden is the only writer of the persisted `MonitorState`.

pub mod events;
pub mod state;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::logbook::{MonitorState, StateStore, load_or_fresh};
use crate::lookout::{ProcessGate, ProcessLister};
use crate::manifest::WatchConfig;
use crate::sickbay::probe::Prober;
use crate::sickbay::{
    FailureCounter, GuardDecision, HealthVerdict, ProbeAggregator, RebootAction, RebootGuard,
};
use events::{StampedEvent, WatchEvent};
use state::{Phase, PhaseTracker, WatchMachineEvent};

/// Source of wall-clock time for cooldown arithmetic
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Commands the Warden accepts from outside the loop
#[derive(Debug)]
pub enum WardenCommand {
    /// Operator reset of reboot and failure counters
    ResetCounters,
}

/// What one tick did
#[derive(Debug, Clone)]
pub struct TickReport {
    pub phase: Phase,
    /// `None` when the gate was closed and nothing was probed
    pub verdict: Option<HealthVerdict>,
    pub decision: Option<GuardDecision>,
    /// A reboot was attempted (it may still have failed)
    pub reboot_issued: bool,
}

/// The network watchdog
pub struct Warden {
    variant: String,
    interval: Duration,
    gate: ProcessGate,
    aggregator: ProbeAggregator,
    counter: FailureCounter,
    guard: RebootGuard,
    reboot: Arc<dyn RebootAction>,
    store: Box<dyn StateStore>,
    clock: Arc<dyn Clock>,
    state: MonitorState,
    /// In-memory state differs from what was last persisted
    dirty: bool,
    phase: PhaseTracker,
    /// Channel to receive commands
    rx: mpsc::Receiver<WardenCommand>,
    /// Sender for commanding the Warden (cloneable)
    tx: mpsc::Sender<WardenCommand>,
    events: Option<mpsc::Sender<StampedEvent>>,
}

impl Warden {
    /// Create a Warden, restoring persisted counters from `store`
    pub fn new(
        config: &WatchConfig,
        lister: Box<dyn ProcessLister>,
        prober: Arc<dyn Prober>,
        reboot: Arc<dyn RebootAction>,
        store: Box<dyn StateStore>,
    ) -> Self {
        let mut state = load_or_fresh(store.as_ref());
        let counter = FailureCounter::new(config.connection_failures_threshold)
            .restore(state.consecutive_failures);
        let dirty = state.consecutive_failures != counter.consecutive();
        state.consecutive_failures = counter.consecutive();

        let (tx, rx) = mpsc::channel(16);

        Self {
            variant: config.variant.clone(),
            interval: config.check_interval_duration(),
            gate: ProcessGate::new(lister, &config.watched_processes),
            aggregator: ProbeAggregator::new(
                prober,
                config.probe_targets(),
                config.dns_probe_name.clone(),
                config.ping_timeout_duration(),
            ),
            counter,
            guard: RebootGuard::new(config.max_reboots, config.cooldown_duration()),
            reboot,
            store,
            clock: Arc::new(SystemClock),
            state,
            dirty,
            phase: PhaseTracker::new(),
            rx,
            tx,
            events: None,
        }
    }

    /// Replace the wall clock
    #[allow(dead_code)]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Forward every event to `sink` in addition to logging it
    pub fn with_event_sink(mut self, sink: mpsc::Sender<StampedEvent>) -> Self {
        self.events = Some(sink);
        self
    }

    /// Get a handle for commanding the running Warden
    pub fn handle(&self) -> WardenHandle {
        WardenHandle {
            sender: self.tx.clone(),
        }
    }

    #[allow(dead_code)]
    pub fn state(&self) -> &MonitorState {
        &self.state
    }

    pub fn phase(&self) -> Phase {
        self.phase.current()
    }

    /// Run ticks every `check_interval` until `cancel` fires
    ///
    /// Cancellation is observed between ticks; a tick in flight completes.
    pub async fn run(&mut self, cancel: CancellationToken) {
        self.emit(WatchEvent::Started {
            variant: self.variant.clone(),
            reboot_count: self.state.reboot_count,
            consecutive_failures: self.state.consecutive_failures,
            threshold: self.counter.threshold(),
        });

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let report = self.tick().await;
                    debug!(
                        phase = %report.phase,
                        probed = report.verdict.is_some(),
                        decision = ?report.decision,
                        reboot_issued = report.reboot_issued,
                        "cycle finished"
                    );
                }
            }
        }

        self.persist_if_dirty();
        self.emit(WatchEvent::Stopped);
    }

    /// One monitoring cycle
    pub async fn tick(&mut self) -> TickReport {
        self.drain_commands();

        let sessions = self.gate.active_sessions();
        if sessions.is_empty() {
            if self.phase() != Phase::Idle {
                self.fire(WatchMachineEvent::Suspend);
            }
            self.persist_if_dirty();
            return self.report(None, None, false);
        }

        if self.phase() == Phase::Idle {
            self.emit(WatchEvent::SessionDetected { sessions });
            if self.counter.is_saturated() {
                self.fire(WatchMachineEvent::Resume);
            } else {
                self.fire(WatchMachineEvent::Activate);
            }
        }

        let verdict = self.aggregator.evaluate().await;
        let previous = self.counter.consecutive();
        let step = self.counter.record(verdict.health);
        self.sync_failures();

        self.emit(WatchEvent::Verdict {
            verdict: verdict.clone(),
            consecutive_failures: step.consecutive_failures,
            crossed: step.crossed,
        });

        let mut decision = None;
        let mut reboot_issued = false;

        if verdict.health.is_healthy() {
            if previous > 0 {
                self.emit(WatchEvent::Recovered {
                    after_failures: previous,
                });
            }
            if self.phase() == Phase::Cooling {
                self.fire(WatchMachineEvent::Recover);
            }
        } else {
            // Cooling re-checks the cooldown while the outage lasts
            let reconsider = self.phase() == Phase::Cooling && self.counter.is_saturated();
            if step.crossed || reconsider {
                self.fire(WatchMachineEvent::Cross);
                let (d, issued) = self.authorize().await;
                decision = Some(d);
                reboot_issued = issued;
            }
        }

        self.persist_if_dirty();
        self.report(Some(verdict), decision, reboot_issued)
    }

    /// Consult the guard from Authorizing and act on the decision
    async fn authorize(&mut self) -> (GuardDecision, bool) {
        let now = self.clock.now();
        let decision = self.guard.authorize(&self.state, now);
        self.emit(WatchEvent::Guard {
            decision,
            reboot_count: self.state.reboot_count,
            max_reboots: self.guard.max_reboots(),
        });

        match decision {
            GuardDecision::Authorized => {
                let snapshot = self.state.clone();
                self.guard.record_attempt(&mut self.state, now);
                self.state.consecutive_failures = 0;

                // The attempt must be on disk before the host goes down
                if let Err(e) = self.store.save(&self.state) {
                    self.state = snapshot;
                    self.emit(WatchEvent::PersistFailed {
                        error: e.to_string(),
                    });
                    self.fire(WatchMachineEvent::Defer);
                    return (decision, false);
                }
                self.dirty = false;
                self.counter.reset();

                let attempt = self.state.reboot_count;
                self.emit(WatchEvent::RebootIssued {
                    attempt,
                    action: self.reboot.describe(),
                });
                if let Err(e) = self.reboot.reboot().await {
                    self.emit(WatchEvent::RebootFailed {
                        attempt,
                        error: e.to_string(),
                    });
                }
                self.fire(WatchMachineEvent::Reboot);
                (decision, true)
            }
            GuardDecision::DeniedCooldown { .. } => {
                self.fire(WatchMachineEvent::Defer);
                (decision, false)
            }
            GuardDecision::DeniedMaxAttempts => {
                self.fire(WatchMachineEvent::Exhaust);
                (decision, false)
            }
        }
    }

    fn drain_commands(&mut self) {
        while let Ok(command) = self.rx.try_recv() {
            match command {
                WardenCommand::ResetCounters => {
                    self.state = MonitorState::default();
                    self.counter.reset();
                    self.dirty = true;
                    self.emit(WatchEvent::Reset);
                }
            }
        }
    }

    fn sync_failures(&mut self) {
        let consecutive = self.counter.consecutive();
        if self.state.consecutive_failures != consecutive {
            self.state.consecutive_failures = consecutive;
            self.dirty = true;
        }
    }

    /// Persist if needed; on failure memory stays authoritative and we retry next tick
    fn persist_if_dirty(&mut self) {
        if !self.dirty {
            return;
        }
        match self.store.save(&self.state) {
            Ok(()) => self.dirty = false,
            Err(e) => self.emit(WatchEvent::PersistFailed {
                error: e.to_string(),
            }),
        }
    }

    fn fire(&mut self, event: WatchMachineEvent) {
        let from = self.phase.current();
        if self.phase.handle(event).is_err() {
            warn!(phase = %from, "phase machine rejected transition");
            return;
        }
        let to = self.phase.current();
        if from != to {
            self.emit(WatchEvent::Transition { from, to });
        }
    }

    fn emit(&self, event: WatchEvent) {
        event.log();
        if let Some(sink) = &self.events {
            let stamped = StampedEvent {
                at: self.clock.now(),
                event,
            };
            if sink.try_send(stamped).is_err() {
                debug!("event sink full or closed, event dropped");
            }
        }
    }

    fn report(
        &self,
        verdict: Option<HealthVerdict>,
        decision: Option<GuardDecision>,
        reboot_issued: bool,
    ) -> TickReport {
        TickReport {
            phase: self.phase(),
            verdict,
            decision,
            reboot_issued,
        }
    }
}

/// Handle for commanding the Warden from signal handlers and other tasks
#[derive(Clone)]
pub struct WardenHandle {
    sender: mpsc::Sender<WardenCommand>,
}

impl WardenHandle {
    /// Request a counter reset; applied at the start of the next tick
    pub fn reset(&self) -> Result<()> {
        self.sender
            .try_send(WardenCommand::ResetCounters)
            .map_err(|_| Error::Io(std::io::Error::other("Warden channel closed or full")))
    }
}
