//! Command-line interface for netwarden
//!
//! Uses clap with derive for type-safe CLI parsing

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

/// netwarden - reboot the host when remote access loses the network
#[derive(Parser)]
#[command(name = "netwarden")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true, default_value = "netwarden.toml")]
    pub config: PathBuf,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Monitor variant (selects the persisted state record)
    #[arg(long, global = true)]
    pub variant: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand)]
pub enum Commands {
    /// Run the watchdog until interrupted
    Run {
        /// Log reboot decisions but never reboot
        #[arg(long)]
        dry_run: bool,

        /// Print every event as a JSON line on stdout
        #[arg(long)]
        json: bool,
    },

    /// Show persisted counters, remote sessions and a fresh verdict
    Status {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Run one connectivity evaluation
    Probe {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Clear the persisted reboot counters for this variant
    Reset,

    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(short = 'y', long)]
        force: bool,
    },

    /// Validate configuration
    Check,

    /// Generate shell completions
    Completion {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Generate shell completion scripts
    pub fn generate_completion(shell: Shell) {
        let mut cmd = Self::command();
        clap_complete::generate(shell, &mut cmd, "netwarden", &mut std::io::stdout());
    }
}
