//! netwarden - network watchdog for remote-access hosts
//!
//! While a remote-desktop session is running, probes connectivity on a fixed
//! cadence and reboots the host after a sustained outage, bounded by an
//! attempt limit and a cooldown that survive restarts.

mod cli;
mod error;
mod logbook;
mod lookout;
mod manifest;
mod sickbay;
mod warden;

#[cfg(test)]
mod testing;

use cli::{Cli, Commands};
use error::Result;
use logbook::{JsonStateStore, StateStore};
use lookout::{ProcessGate, SysinfoLister};
use manifest::WatchConfig;
use sickbay::net::NetProber;
use sickbay::recovery::{CommandReboot, DryRunReboot};
use sickbay::{ProbeAggregator, RebootAction, RebootGuard};
use warden::Warden;

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse_args();

    // Commands that don't need a usable config
    match &cli.command {
        Commands::Completion { shell } => {
            Cli::generate_completion(*shell);
            return Ok(());
        }
        Commands::Init { force } => {
            manifest::write_default(&cli.config, *force)?;
            println!("Wrote default configuration to {}", cli.config.display());
            return Ok(());
        }
        Commands::Check => {
            let config = manifest::load(&cli.config)?.with_variant(cli.variant.clone());
            println!("Configuration is valid.");
            println!("  Variant: {}", config.variant);
            println!("  Targets: {}", config.targets.join(", "));
            println!(
                "  Reboot after {} failed checks, at most {} times, {}s apart",
                config.connection_failures_threshold, config.max_reboots, config.reboot_cooldown
            );
            return Ok(());
        }
        _ => {}
    }

    // Config problems are logged to the console before the real subscriber exists
    let bootstrap = fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(console_filter(cli.verbose))
        .finish();
    let config = tracing::subscriber::with_default(bootstrap, || {
        manifest::load_or_default(&cli.config)
    })
    .with_variant(cli.variant.clone());

    init_logging(cli.verbose, config.log_file.as_deref());

    let store = JsonStateStore::new(&config.state_file, &config.variant);
    let rt = tokio::runtime::Runtime::new()?;

    match cli.command {
        Commands::Run { dry_run, json } => {
            rt.block_on(watch(config, store, dry_run, json));
        }
        Commands::Status { json } => {
            rt.block_on(status(&config, &store, json))?;
        }
        Commands::Probe { json } => {
            rt.block_on(probe(&config, json))?;
        }
        Commands::Reset => {
            store.clear()?;
            info!(variant = %config.variant, "reboot counters reset");
            println!(
                "Reboot counters for '{}' cleared in {}",
                config.variant,
                store.path().display()
            );
        }
        // Already handled above
        Commands::Completion { .. } | Commands::Init { .. } | Commands::Check => unreachable!(),
    }

    Ok(())
}

fn console_filter(verbose: bool) -> EnvFilter {
    let default = if verbose { "debug" } else { "info" };
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

/// Console on stderr, plus a plain-text file when configured
fn init_logging(verbose: bool, log_file: Option<&Path>) {
    let file_layer = log_file.and_then(|path| {
        match OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => Some(fmt::layer().with_ansi(false).with_writer(Mutex::new(file))),
            Err(e) => {
                eprintln!("Warning: cannot open log file {}: {}", path.display(), e);
                None
            }
        }
    });

    tracing_subscriber::registry()
        .with(console_filter(verbose))
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();
}

fn reboot_action(config: &WatchConfig, dry_run: bool) -> Arc<dyn RebootAction> {
    if dry_run {
        Arc::new(DryRunReboot)
    } else {
        Arc::new(CommandReboot::new(
            config.reboot_command.clone(),
            config.ping_timeout_duration(),
        ))
    }
}

async fn watch(config: WatchConfig, store: JsonStateStore, dry_run: bool, json: bool) {
    let mut warden = Warden::new(
        &config,
        Box::new(SysinfoLister),
        Arc::new(NetProber::new()),
        reboot_action(&config, dry_run),
        Box::new(store),
    );

    let printer = if json {
        let (tx, mut rx) = mpsc::channel(64);
        warden = warden.with_event_sink(tx);
        Some(tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match serde_json::to_string(&event) {
                    Ok(line) => println!("{}", line),
                    Err(e) => warn!(error = %e, "could not encode event"),
                }
            }
        }))
    } else {
        None
    };

    let cancel = CancellationToken::new();
    let stopper = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown requested, finishing current cycle");
        stopper.cancel();
    });

    #[cfg(unix)]
    spawn_reset_listener(warden.handle());

    if dry_run {
        info!("dry run: reboots will be logged, not executed");
    }

    warden.run(cancel).await;

    // Closing the sink ends the printer
    drop(warden);
    if let Some(printer) = printer {
        let _ = printer.await;
    }
}

/// Resolves on Ctrl+C, or SIGTERM on unix
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "cannot listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

/// SIGUSR1 resets the counters of the running warden
#[cfg(unix)]
fn spawn_reset_listener(handle: warden::WardenHandle) {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::user_defined1()) {
        Ok(mut usr1) => {
            tokio::spawn(async move {
                while usr1.recv().await.is_some() {
                    info!("SIGUSR1 received, resetting reboot counters");
                    if let Err(e) = handle.reset() {
                        warn!(error = %e, "could not queue counter reset");
                    }
                }
            });
        }
        Err(e) => warn!(error = %e, "cannot listen for SIGUSR1, in-process reset disabled"),
    }
}

fn aggregator(config: &WatchConfig) -> ProbeAggregator {
    ProbeAggregator::new(
        Arc::new(NetProber::new()),
        config.probe_targets(),
        config.dns_probe_name.clone(),
        config.ping_timeout_duration(),
    )
}

async fn status(config: &WatchConfig, store: &JsonStateStore, json: bool) -> Result<()> {
    let state = store.load()?.unwrap_or_default();
    let guard = RebootGuard::new(config.max_reboots, config.cooldown_duration());
    let decision = guard.authorize(&state, chrono::Utc::now());
    let sessions =
        ProcessGate::new(Box::new(SysinfoLister), &config.watched_processes).active_sessions();
    let verdict = aggregator(config).evaluate().await;

    if json {
        let report = serde_json::json!({
            "variant": config.variant,
            "state_file": store.path().display().to_string(),
            "reboot_count": state.reboot_count,
            "max_reboots": config.max_reboots,
            "last_reboot_timestamp": state.last_reboot_timestamp,
            "consecutive_failures": state.consecutive_failures,
            "threshold": config.connection_failures_threshold,
            "remote_sessions": sessions,
            "guard": decision,
            "verdict": verdict,
        });
        println!("{}", serde_json::to_string_pretty(&report).unwrap_or_default());
        return Ok(());
    }

    let last = state
        .last_reboot_timestamp
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| "never".to_string());
    let sessions = if sessions.is_empty() {
        "none".to_string()
    } else {
        sessions.join(", ")
    };

    println!("{:<22} {}", "Variant:", config.variant);
    println!("{:<22} {}", "State file:", store.path().display());
    println!("{:<22} {}/{}", "Reboots:", state.reboot_count, config.max_reboots);
    println!("{:<22} {}", "Last reboot:", last);
    println!(
        "{:<22} {}/{}",
        "Consecutive failures:", state.consecutive_failures, config.connection_failures_threshold
    );
    println!("{:<22} {}", "Remote sessions:", sessions);
    println!("{:<22} {}", "Next reboot:", decision);
    println!("{:<22} {}", "Connectivity:", verdict.summary());
    if !verdict.health.is_healthy() {
        println!("{:<22} {}", "Analysis:", verdict.analysis());
    }

    Ok(())
}

async fn probe(config: &WatchConfig, json: bool) -> Result<()> {
    let verdict = aggregator(config).evaluate().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&verdict).unwrap_or_default());
        return Ok(());
    }

    println!("{:<32} {}", "TARGET", "RESULT");
    println!("{}", "-".repeat(56));
    for r in &verdict.results {
        println!("{:<32} {}", r.target.as_str(), r.outcome);
    }
    println!("{:<32} {}", format!("dns:{}", config.dns_probe_name), verdict.dns);
    println!();
    println!("{}", verdict.summary());
    println!("{}", verdict.analysis());

    Ok(())
}
