//! Persisted reboot counters
//!
//! One JSON file holds a record per monitor variant, so several front-ends
//! can share a file without clobbering each other's counters. Writes go
//! through a temp file and rename; a crash never leaves a torn file behind.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Counters that survive restarts (including the reboots we cause)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorState {
    /// Reboots issued since the last operator reset
    pub reboot_count: u32,
    /// When the last reboot was issued
    pub last_reboot_timestamp: Option<DateTime<Utc>>,
    /// Consecutive non-healthy cycles
    pub consecutive_failures: u32,
}

/// Key-value storage for `MonitorState`
pub trait StateStore: Send {
    /// Load the record; `None` means fresh state
    fn load(&self) -> Result<Option<MonitorState>>;

    /// Persist the record
    fn save(&self, state: &MonitorState) -> Result<()>;

    /// Drop the record (operator reset)
    fn clear(&self) -> Result<()>;
}

/// Load state, treating any failure as fresh state
pub fn load_or_fresh(store: &dyn StateStore) -> MonitorState {
    match store.load() {
        Ok(Some(state)) => state,
        Ok(None) => MonitorState::default(),
        Err(e) => {
            warn!(error = %e, "could not load persisted state, starting fresh");
            MonitorState::default()
        }
    }
}

/// JSON file store keyed by variant
#[derive(Debug, Clone)]
pub struct JsonStateStore {
    path: PathBuf,
    variant: String,
}

impl JsonStateStore {
    pub fn new(path: impl Into<PathBuf>, variant: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            variant: variant.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Raw records; other variants stay undecoded so a bad entry never touches ours
    fn read_all(&self) -> Result<BTreeMap<String, Value>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }

        let content = fs::read_to_string(&self.path).map_err(|e| Error::StateRead {
            path: self.path.clone(),
            source: e,
        })?;

        if content.trim().is_empty() {
            return Ok(BTreeMap::new());
        }

        serde_json::from_str(&content).map_err(|e| Error::StateParse {
            path: self.path.clone(),
            source: e,
        })
    }

    /// Existing records for a rewrite
    ///
    /// A file that is not a JSON object at all is moved aside to
    /// `<file>.corrupt` so nothing in it is lost.
    fn read_all_for_update(&self) -> BTreeMap<String, Value> {
        match self.read_all() {
            Ok(records) => records,
            Err(e) => {
                let aside = self.corrupt_path();
                match fs::rename(&self.path, &aside) {
                    Ok(()) => warn!(error = %e, moved_to = %aside.display(), "state file unreadable, moved aside"),
                    Err(mv) => warn!(error = %e, rename_error = %mv, "state file unreadable, rewriting it"),
                }
                BTreeMap::new()
            }
        }
    }

    fn corrupt_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_os_string();
        name.push(".corrupt");
        PathBuf::from(name)
    }

    fn write_all(&self, records: &BTreeMap<String, Value>) -> Result<()> {
        let write_err = |message: String| Error::StateWrite {
            path: self.path.clone(),
            message,
        };

        let json = serde_json::to_string_pretty(records).map_err(|e| write_err(e.to_string()))?;

        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(|e| write_err(e.to_string()))?;
        tmp.write_all(json.as_bytes())
            .and_then(|_| tmp.as_file().sync_all())
            .map_err(|e| write_err(e.to_string()))?;
        tmp.persist(&self.path)
            .map_err(|e| write_err(e.error.to_string()))?;

        Ok(())
    }
}

impl StateStore for JsonStateStore {
    fn load(&self) -> Result<Option<MonitorState>> {
        match self.read_all()?.remove(&self.variant) {
            Some(raw) => serde_json::from_value(raw)
                .map(Some)
                .map_err(|e| Error::StateParse {
                    path: self.path.clone(),
                    source: e,
                }),
            None => Ok(None),
        }
    }

    fn save(&self, state: &MonitorState) -> Result<()> {
        let mut records = self.read_all_for_update();
        let raw = serde_json::to_value(state).map_err(|e| Error::StateWrite {
            path: self.path.clone(),
            message: e.to_string(),
        })?;
        records.insert(self.variant.clone(), raw);
        self.write_all(&records)
    }

    fn clear(&self) -> Result<()> {
        let mut records = self.read_all_for_update();
        if records.remove(&self.variant).is_some() {
            self.write_all(&records)?;
        }
        Ok(())
    }
}
