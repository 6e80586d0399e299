use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use colored::Colorize;

use tripwire::cli::ModeArg;
use tripwire::config::{Config, FetchMode};
use tripwire::db::Database;
use tripwire::error::{Result, TripwireError};
use tripwire::fetch::fetcher_for;
use tripwire::notify::{NotifierFactory, TelegramNotifier};
use tripwire::registry::Registry;
use tripwire::scheduler::{Scheduler, SchedulerStatus};
use tripwire::sweep::{SweepReport, Sweeper, TargetOutcome};

use crate::utils::format_interval;

/// Wire the registry, fetcher and Telegram factory into a scheduler
fn build_scheduler(config: &Config, mode: Option<ModeArg>) -> Result<Scheduler> {
    let mut engine = config.engine.clone();
    if let Some(mode) = mode {
        engine.fetch_mode = FetchMode::from(mode);
    }

    let registry: Arc<dyn Registry> = Arc::new(Database::open()?);
    let fetcher = fetcher_for(
        engine.fetch_mode,
        engine.request_timeout(),
        &config.stealth,
        Config::data_dir()?,
    );
    let notifiers: Arc<dyn NotifierFactory> = Arc::new(TelegramNotifier::boxed);

    Ok(Scheduler::new(Sweeper::new(registry, fetcher, notifiers, engine)))
}

fn print_report(report: &SweepReport) {
    if report.outcomes.is_empty() {
        println!("No enabled targets. Add one with `tripwire target add <url>`.");
        return;
    }

    println!();
    for target in &report.outcomes {
        let line = match &target.outcome {
            TargetOutcome::NoRules => format!("{} {}", "·".dimmed(), "no rules configured".dimmed()),
            TargetOutcome::FetchFailed { reason } => format!("{} fetch failed: {}", "✗".red(), reason),
            TargetOutcome::Failed { error } => format!("{} error: {}", "✗".red(), error),
            TargetOutcome::Checked { matched, notified, .. } if !matched.is_empty() => format!(
                "{} matched {} ({} sent)",
                "✓".green(),
                matched.join(", ").cyan(),
                notified
            ),
            TargetOutcome::Checked { .. } => format!("{} keyword not found", "·".dimmed()),
        };
        println!("  {:<24} {}", target.target_name.bold(), line);
    }

    let elapsed = (report.finished_at - report.started_at).num_milliseconds() as f64 / 1000.0;
    println!(
        "\n{} target(s), {} match(es), {} sent, {} fetch failure(s) in {:.1}s\n",
        report.outcomes.len(),
        report.matches(),
        report.notifications_sent,
        report.fetch_failures,
        elapsed
    );
}

/// Run one sweep in the foreground
pub fn cmd_run(mode: Option<ModeArg>, json: bool) -> Result<()> {
    let config = Config::load()?;
    let scheduler = build_scheduler(&config, mode)?;

    let report = match scheduler.run_blocking() {
        Some(result) => result?,
        None => return Err(TripwireError::SweepInProgress),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(())
}

fn print_status(status: &SchedulerStatus) {
    let health = if status.healthy { "healthy".green() } else { "unhealthy".red() };
    let last = status
        .last_sweep_at
        .map(|t| t.with_timezone(&chrono::Local).format("%H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string());
    let next = status
        .next_tick
        .map(|t| t.with_timezone(&chrono::Local).format("%H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string());

    match status.last_error {
        Some(ref e) => println!("[{}] sweep aborted: {} ({}), next at {}", last, e, health, next),
        None => println!(
            "[{}] sweep done, {} fetch failure(s) ({}), next at {}",
            last, status.last_fetch_failures, health, next
        ),
    }
}

/// Sweep on a fixed tick until Ctrl+C
pub fn cmd_daemon(mode: Option<ModeArg>) -> Result<()> {
    let config = Config::load()?;
    let scheduler = build_scheduler(&config, mode)?;

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        println!("\n\nShutting down...");
        r.store(false, Ordering::SeqCst);
    })
    .map_err(|e| TripwireError::ConfigError(format!("Failed to set Ctrl+C handler: {}", e)))?;

    let mode = mode.map(FetchMode::from).unwrap_or(config.engine.fetch_mode);
    println!("\ntripwire daemon starting...\n");
    println!("  Fetch mode: {:?}", mode);
    println!("  Tick:       every {}", format_interval(config.engine.tick_secs.max(1)));
    println!("\nPress Ctrl+C to stop.\n");

    scheduler.start();

    let mut last_seen = None;
    while running.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(500));
        let status = scheduler.status();
        if status.last_sweep_at != last_seen {
            last_seen = status.last_sweep_at;
            print_status(&status);
        }
    }

    scheduler.stop();
    Ok(())
}
