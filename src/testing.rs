//! Scripted capabilities shared by unit tests

use crate::error::{Error, Result};
use crate::logbook::{MonitorState, StateStore};
use crate::lookout::ProcessLister;
use crate::sickbay::probe::{FailureReason, ProbeOutcome, ProbeTarget, Prober};
use crate::sickbay::RebootAction;
use crate::warden::Clock;
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Process list that tests can change between ticks
#[derive(Clone, Default)]
pub struct FakeLister {
    names: Arc<Mutex<Option<Vec<String>>>>,
}

impl FakeLister {
    pub fn running(names: &[&str]) -> Self {
        let lister = Self::default();
        lister.set_running(names);
        lister
    }

    /// Enumeration always fails
    pub fn broken() -> Self {
        Self::default()
    }

    pub fn set_running(&self, names: &[&str]) {
        *self.names.lock().unwrap() = Some(names.iter().map(|s| s.to_string()).collect());
    }
}

impl ProcessLister for FakeLister {
    fn running_names(&self) -> Result<Vec<String>> {
        self.names
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| Error::ProcessEnumeration("scripted failure".to_string()))
    }
}

#[derive(Clone, Copy)]
enum Scripted {
    Outcome(ProbeOutcome),
    Hang,
}

struct ProberScript {
    targets: HashMap<String, Scripted>,
    dns: Scripted,
    network_up: bool,
    probe_calls: usize,
    resolve_calls: usize,
}

/// Prober with scripted outcomes; unscripted probes succeed while the network is up
#[derive(Clone)]
pub struct FakeProber {
    script: Arc<Mutex<ProberScript>>,
}

impl FakeProber {
    pub fn new() -> Self {
        Self {
            script: Arc::new(Mutex::new(ProberScript {
                targets: HashMap::new(),
                dns: Scripted::Outcome(reachable()),
                network_up: true,
                probe_calls: 0,
                resolve_calls: 0,
            })),
        }
    }

    pub fn with_target(self, target: &str, outcome: ProbeOutcome) -> Self {
        self.script
            .lock()
            .unwrap()
            .targets
            .insert(target.to_string(), Scripted::Outcome(outcome));
        self
    }

    pub fn with_hang(self, target: &str) -> Self {
        self.script
            .lock()
            .unwrap()
            .targets
            .insert(target.to_string(), Scripted::Hang);
        self
    }

    pub fn with_dns(self, outcome: ProbeOutcome) -> Self {
        self.script.lock().unwrap().dns = Scripted::Outcome(outcome);
        self
    }

    /// Down: every probe times out regardless of the script
    pub fn set_network(&self, up: bool) {
        self.script.lock().unwrap().network_up = up;
    }

    pub fn probe_calls(&self) -> usize {
        self.script.lock().unwrap().probe_calls
    }

    pub fn resolve_calls(&self) -> usize {
        self.script.lock().unwrap().resolve_calls
    }

    async fn play(scripted: Scripted) -> ProbeOutcome {
        match scripted {
            Scripted::Outcome(outcome) => outcome,
            Scripted::Hang => std::future::pending().await,
        }
    }
}

fn reachable() -> ProbeOutcome {
    ProbeOutcome::Reachable {
        latency: Duration::from_millis(5),
    }
}

#[async_trait]
impl Prober for FakeProber {
    async fn probe(&self, target: &ProbeTarget, _timeout: Duration) -> ProbeOutcome {
        let scripted = {
            let mut script = self.script.lock().unwrap();
            script.probe_calls += 1;
            if !script.network_up {
                Scripted::Outcome(ProbeOutcome::failed(FailureReason::Timeout))
            } else {
                script
                    .targets
                    .get(target.as_str())
                    .copied()
                    .unwrap_or(Scripted::Outcome(reachable()))
            }
        };
        Self::play(scripted).await
    }

    async fn resolve(&self, _name: &str, _timeout: Duration) -> ProbeOutcome {
        let scripted = {
            let mut script = self.script.lock().unwrap();
            script.resolve_calls += 1;
            if !script.network_up {
                Scripted::Outcome(ProbeOutcome::failed(FailureReason::ResolutionFailed))
            } else {
                script.dns
            }
        };
        Self::play(scripted).await
    }
}

#[derive(Default)]
struct StoreInner {
    record: Option<MonitorState>,
    fail_writes: bool,
    saves: usize,
}

/// In-memory state store with injectable write failures
#[derive(Clone, Default)]
pub struct MemoryStateStore {
    inner: Arc<Mutex<StoreInner>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: MonitorState) -> Self {
        let store = Self::default();
        store.inner.lock().unwrap().record = Some(state);
        store
    }

    pub fn fail_writes(&self, fail: bool) {
        self.inner.lock().unwrap().fail_writes = fail;
    }

    pub fn stored(&self) -> Option<MonitorState> {
        self.inner.lock().unwrap().record.clone()
    }

    pub fn saves(&self) -> usize {
        self.inner.lock().unwrap().saves
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self) -> Result<Option<MonitorState>> {
        Ok(self.inner.lock().unwrap().record.clone())
    }

    fn save(&self, state: &MonitorState) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_writes {
            return Err(Error::StateWrite {
                path: PathBuf::from("memory"),
                message: "scripted write failure".to_string(),
            });
        }
        inner.record = Some(state.clone());
        inner.saves += 1;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.inner.lock().unwrap().record = None;
        Ok(())
    }
}

#[derive(Default)]
struct RebootLog {
    calls: u32,
    persisted_counts: Vec<Option<u32>>,
}

/// Records reboot calls and what the store held at that moment
#[derive(Clone, Default)]
pub struct RecordingReboot {
    log: Arc<Mutex<RebootLog>>,
    store: Option<MemoryStateStore>,
    fail: bool,
}

impl RecordingReboot {
    pub fn watching(store: MemoryStateStore) -> Self {
        Self {
            store: Some(store),
            ..Default::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn calls(&self) -> u32 {
        self.log.lock().unwrap().calls
    }

    /// Persisted `reboot_count` observed at each call
    pub fn persisted_counts(&self) -> Vec<Option<u32>> {
        self.log.lock().unwrap().persisted_counts.clone()
    }
}

#[async_trait]
impl RebootAction for RecordingReboot {
    async fn reboot(&self) -> Result<()> {
        let persisted = self
            .store
            .as_ref()
            .and_then(|s| s.stored())
            .map(|s| s.reboot_count);
        {
            let mut log = self.log.lock().unwrap();
            log.calls += 1;
            log.persisted_counts.push(persisted);
        }

        if self.fail {
            return Err(Error::RebootFailed {
                command: "fake-reboot".to_string(),
                message: "permission denied".to_string(),
            });
        }
        Ok(())
    }

    fn describe(&self) -> String {
        "fake-reboot".to_string()
    }
}

/// Clock that only moves when told to
#[derive(Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(at: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(at)),
        }
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock().unwrap() = at;
    }

    pub fn advance(&self, secs: i64) {
        *self.now.lock().unwrap() += TimeDelta::seconds(secs);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}
