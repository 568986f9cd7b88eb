//! Configuration file parsing for netwarden
//!
//! Parses `netwarden.toml` configuration files using serde. A missing file is
//! not an error: defaults are synthesized and written out for the operator.

use crate::error::{Error, Result};
use crate::sickbay::probe::ProbeTarget;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Load and validate configuration from a file
pub fn load(path: &Path) -> Result<WatchConfig> {
    let content = fs::read_to_string(path).map_err(|e| Error::ConfigRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    let config: WatchConfig = toml::from_str(&content)?;
    config.validate()?;

    Ok(config)
}

/// Load configuration, falling back to defaults on any problem
///
/// A missing file gets the defaults written to it. Unreadable or invalid files
/// are reported and replaced by defaults for this run only.
pub fn load_or_default(path: &Path) -> WatchConfig {
    if !path.exists() {
        info!(path = %path.display(), "config file not found, using defaults");
        if let Err(e) = write_default(path, false) {
            warn!(path = %path.display(), error = %e, "could not write default config");
        }
        return WatchConfig::default();
    }

    match load(path) {
        Ok(config) => config,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "config unusable, falling back to defaults");
            WatchConfig::default()
        }
    }
}

/// Write the default configuration to `path`
///
/// Refuses to overwrite an existing file unless `force` is set.
pub fn write_default(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        return Err(Error::ConfigValidation(format!(
            "{} already exists",
            path.display()
        )));
    }

    let content = toml::to_string_pretty(&WatchConfig::default())?;
    fs::write(path, content)?;
    Ok(())
}

/// Root configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Monitor variant, keys the persisted counters so front-ends don't clobber each other
    pub variant: String,

    /// Seconds between monitoring cycles
    pub check_interval: u64,

    /// Maximum reboots before giving up until an operator reset
    pub max_reboots: u32,

    /// Minimum seconds between two reboots
    pub reboot_cooldown: u64,

    /// Per-probe timeout in seconds
    pub ping_timeout: u64,

    /// Consecutive failed cycles that count as an outage
    pub connection_failures_threshold: u32,

    /// Reachability targets: hosts, IPs or http(s) URLs
    #[serde(alias = "test_hosts")]
    pub targets: Vec<String>,

    /// Name resolved by the DNS probe
    pub dns_probe_name: String,

    /// Remote access process names (case-insensitive substring match)
    #[serde(alias = "remote_software_processes")]
    pub watched_processes: Vec<String>,

    /// Where the reboot counters are persisted
    pub state_file: PathBuf,

    /// Optional log file in addition to stderr
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,

    /// Command issued to reboot the host (program followed by arguments)
    pub reboot_command: Vec<String>,
}

fn default_variant() -> String {
    "daemon".to_string()
}

fn default_targets() -> Vec<String> {
    ["8.8.8.8", "1.1.1.1", "google.com"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_watched_processes() -> Vec<String> {
    [
        "teamviewer.exe",
        "anydesk.exe",
        "parsec.exe",
        "parsecd.exe",
        "chrome_remote_desktop.exe",
        "mstsc.exe",
        "rdpclip.exe",
        "vnc",
        "radmin",
        "rustdesk.exe",
        "nomachine",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_reboot_command() -> Vec<String> {
    let argv: &[&str] = if cfg!(windows) {
        &["shutdown", "/r", "/t", "10", "/c", "netwarden automatic reboot"]
    } else {
        &["shutdown", "-r", "now"]
    };
    argv.iter().map(|s| s.to_string()).collect()
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            variant: default_variant(),
            check_interval: 30,
            max_reboots: 2,
            reboot_cooldown: 3600,
            ping_timeout: 5,
            connection_failures_threshold: 3,
            targets: default_targets(),
            dns_probe_name: "google.com".to_string(),
            watched_processes: default_watched_processes(),
            state_file: PathBuf::from("netwarden-state.json"),
            log_file: None,
            reboot_command: default_reboot_command(),
        }
    }
}

impl WatchConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.variant.trim().is_empty() {
            return Err(Error::ConfigValidation("variant must not be empty".into()));
        }

        if self.check_interval == 0 {
            return Err(Error::ConfigValidation(
                "check_interval must be greater than 0".into(),
            ));
        }

        if self.ping_timeout == 0 {
            return Err(Error::ConfigValidation(
                "ping_timeout must be greater than 0".into(),
            ));
        }

        if self.connection_failures_threshold == 0 {
            return Err(Error::ConfigValidation(
                "connection_failures_threshold must be at least 1".into(),
            ));
        }

        if self.targets.iter().all(|t| t.trim().is_empty()) {
            return Err(Error::ConfigValidation(
                "at least one probe target is required".into(),
            ));
        }

        if self.reboot_command.is_empty() {
            return Err(Error::ConfigValidation(
                "reboot_command must name a program".into(),
            ));
        }

        Ok(())
    }

    /// Override the variant (CLI flag wins over the file)
    pub fn with_variant(mut self, variant: Option<String>) -> Self {
        if let Some(v) = variant {
            self.variant = v;
        }
        self
    }

    /// Get check interval as Duration
    pub fn check_interval_duration(&self) -> Duration {
        Duration::from_secs(self.check_interval)
    }

    /// Get probe timeout as Duration
    pub fn ping_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.ping_timeout)
    }

    /// Get reboot cooldown as Duration
    pub fn cooldown_duration(&self) -> Duration {
        Duration::from_secs(self.reboot_cooldown)
    }

    /// Parsed probe targets, blank entries skipped
    pub fn probe_targets(&self) -> Vec<ProbeTarget> {
        self.targets
            .iter()
            .filter(|t| !t.trim().is_empty())
            .map(|t| ProbeTarget::parse(t))
            .collect()
    }
}
