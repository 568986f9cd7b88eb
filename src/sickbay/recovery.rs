//! Reboot authorization and the reboot action
//!
//! `RebootGuard` decides whether a reboot may be issued (attempt limit, then
//! cooldown). `RebootAction` carries it out.

use crate::error::{Error, Result};
use crate::logbook::MonitorState;
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use std::process::Command;
use std::time::Duration;
use tracing::{info, warn};

/// Outcome of consulting the guard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum GuardDecision {
    /// Reboot may proceed
    Authorized,
    /// `max_reboots` reached; permanent until an operator reset
    DeniedMaxAttempts,
    /// Last reboot too recent; re-checked every cycle
    DeniedCooldown {
        #[serde(rename = "remaining_secs", serialize_with = "as_secs")]
        remaining: Duration,
    },
}

fn as_secs<S: serde::Serializer>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_secs())
}

impl std::fmt::Display for GuardDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GuardDecision::Authorized => write!(f, "authorized"),
            GuardDecision::DeniedMaxAttempts => write!(f, "denied: max reboots reached"),
            GuardDecision::DeniedCooldown { remaining } => {
                write!(f, "denied: cooling down ({}s remaining)", remaining.as_secs())
            }
        }
    }
}

/// Attempt limit and cooldown policy
#[derive(Debug, Clone)]
pub struct RebootGuard {
    max_reboots: u32,
    cooldown: Duration,
}

impl RebootGuard {
    pub fn new(max_reboots: u32, cooldown: Duration) -> Self {
        Self {
            max_reboots,
            cooldown,
        }
    }

    pub fn max_reboots(&self) -> u32 {
        self.max_reboots
    }

    /// Decide whether a reboot may be issued at `now`
    pub fn authorize(&self, state: &MonitorState, now: DateTime<Utc>) -> GuardDecision {
        if state.reboot_count >= self.max_reboots {
            return GuardDecision::DeniedMaxAttempts;
        }

        if let Some(last) = state.last_reboot_timestamp {
            let cooldown = TimeDelta::from_std(self.cooldown).unwrap_or(TimeDelta::MAX);
            let elapsed = now.signed_duration_since(last);
            if elapsed < cooldown {
                // A timestamp in the future counts as a full cooldown ahead
                let remaining = (cooldown - elapsed.max(TimeDelta::zero()))
                    .to_std()
                    .unwrap_or(self.cooldown);
                return GuardDecision::DeniedCooldown { remaining };
            }
        }

        GuardDecision::Authorized
    }

    /// Consume an attempt; call after `Authorized` and persist before rebooting
    pub fn record_attempt(&self, state: &mut MonitorState, now: DateTime<Utc>) {
        state.reboot_count = state.reboot_count.saturating_add(1);
        state.last_reboot_timestamp = Some(now);
    }
}

/// Something that reboots the host
#[async_trait]
pub trait RebootAction: Send + Sync {
    /// Issue the reboot; may never return if it takes effect immediately
    async fn reboot(&self) -> Result<()>;

    /// Short description for logs
    fn describe(&self) -> String;
}

/// Runs the configured reboot command
#[derive(Debug, Clone)]
pub struct CommandReboot {
    argv: Vec<String>,
    timeout: Duration,
}

impl CommandReboot {
    pub fn new(argv: Vec<String>, timeout: Duration) -> Self {
        Self { argv, timeout }
    }

    fn command_line(&self) -> String {
        self.argv.join(" ")
    }

    fn run_blocking(argv: Vec<String>) -> Result<()> {
        let command = argv.join(" ");
        let (program, args) = argv.split_first().ok_or_else(|| Error::RebootFailed {
            command: command.clone(),
            message: "empty reboot command".to_string(),
        })?;

        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|e| Error::RebootFailed {
                command: command.clone(),
                message: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(Error::RebootFailed {
                command,
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(())
    }
}

#[async_trait]
impl RebootAction for CommandReboot {
    async fn reboot(&self) -> Result<()> {
        #[cfg(unix)]
        {
            if !nix::unistd::Uid::effective().is_root() {
                warn!(command = %self.command_line(), "not running as root, reboot may be refused");
            }
        }

        let argv = self.argv.clone();
        let task = tokio::task::spawn_blocking(move || Self::run_blocking(argv));

        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join)) => Err(Error::RebootFailed {
                command: self.command_line(),
                message: join.to_string(),
            }),
            Err(_) => Err(Error::RebootTimeout(self.timeout.as_secs())),
        }
    }

    fn describe(&self) -> String {
        self.command_line()
    }
}

/// Logs instead of rebooting
#[derive(Debug, Clone, Default)]
pub struct DryRunReboot;

#[async_trait]
impl RebootAction for DryRunReboot {
    async fn reboot(&self) -> Result<()> {
        info!("dry run: reboot suppressed");
        Ok(())
    }

    fn describe(&self) -> String {
        "dry-run".to_string()
    }
}
