//! Remote session detection
//!
//! Monitoring only matters while someone depends on remote access, so the
//! warden checks for a running remote-desktop process before every cycle.

use crate::error::{Error, Result};
use sysinfo::{ProcessesToUpdate, System};
use tracing::warn;

/// Lists the names of running executables
pub trait ProcessLister: Send + Sync {
    fn running_names(&self) -> Result<Vec<String>>;
}

/// Process enumeration through sysinfo
#[derive(Debug, Default)]
pub struct SysinfoLister;

impl ProcessLister for SysinfoLister {
    fn running_names(&self) -> Result<Vec<String>> {
        if !sysinfo::IS_SUPPORTED_SYSTEM {
            return Err(Error::ProcessEnumeration(
                "process listing is not supported on this platform".to_string(),
            ));
        }

        let mut sys = System::new();
        sys.refresh_processes(ProcessesToUpdate::All, true);

        let names: Vec<String> = sys
            .processes()
            .values()
            .map(|p| p.name().to_string_lossy().into_owned())
            .collect();

        // A live system always has at least ourselves
        if names.is_empty() {
            return Err(Error::ProcessEnumeration("no processes visible".to_string()));
        }

        Ok(names)
    }
}

/// Gate that opens while a watched remote-access process runs
pub struct ProcessGate {
    lister: Box<dyn ProcessLister>,
    /// Lowercased watched names
    watched: Vec<String>,
}

impl ProcessGate {
    pub fn new(lister: Box<dyn ProcessLister>, watched: &[String]) -> Self {
        Self {
            lister,
            watched: watched
                .iter()
                .map(|w| w.trim().to_lowercase())
                .filter(|w| !w.is_empty())
                .collect(),
        }
    }

    /// Watched names currently running
    ///
    /// Enumeration failure is logged and reported as nothing running.
    pub fn active_sessions(&self) -> Vec<String> {
        let running = match self.lister.running_names() {
            Ok(names) => names,
            Err(e) => {
                warn!(error = %e, "cannot enumerate processes, treating remote session as inactive");
                return Vec::new();
            }
        };

        let running: Vec<String> = running.iter().map(|n| n.to_lowercase()).collect();

        self.watched
            .iter()
            .filter(|w| running.iter().any(|name| matches_watched(name, w)))
            .cloned()
            .collect()
    }

    /// True iff at least one watched process is running
    #[allow(dead_code)]
    pub fn is_remote_session_active(&self) -> bool {
        !self.active_sessions().is_empty()
    }
}

/// Substring match; `foo.exe` also matches a bare `foo` binary
fn matches_watched(running: &str, watched: &str) -> bool {
    if running.contains(watched) {
        return true;
    }
    match watched.strip_suffix(".exe") {
        Some(stem) if !stem.is_empty() => running.contains(stem),
        _ => false,
    }
}
