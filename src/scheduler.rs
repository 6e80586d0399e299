//! Fixed-tick sweep scheduler.
//!
//! At most one sweep runs at a time, whether it was started by the tick
//! thread, `run_now` or `run_blocking`. Inside the process that is the
//! `sweeping` flag; across processes sharing a registry it is the registry's
//! sweep lease. A trigger that arrives while a sweep is in flight is dropped,
//! not queued.

use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::sweep::{SweepReport, Sweeper};

/// Result of asking for an immediate sweep
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepTrigger {
    Started,
    AlreadyRunning,
    /// The sweep could not be claimed or its thread could not be spawned
    Failed,
}

/// Mutable engine state, guarded by the scheduler's mutex
#[derive(Debug, Default)]
pub struct EngineState {
    pub running: bool,
    pub sweeping: bool,
    pub next_tick: Option<DateTime<Utc>>,
    pub last_sweep_at: Option<DateTime<Utc>>,
    /// Set when the last sweep aborted
    pub last_error: Option<String>,
    pub last_fetch_failures: usize,
}

/// Snapshot for callers
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub sweeping: bool,
    pub next_tick: Option<DateTime<Utc>>,
    pub last_sweep_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub last_fetch_failures: usize,
    pub healthy: bool,
}

struct Shared {
    sweeper: Sweeper,
    state: Mutex<EngineState>,
    /// Signalled on stop and whenever a sweep finishes
    changed: Condvar,
}

impl Shared {
    fn lock_state(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Claim the right to sweep. None if a sweep is already in flight here or
    /// in another process, or if `scheduled` is set and the scheduler has been
    /// stopped. An error means the lease could not be read.
    fn claim(self: &Arc<Self>, scheduled: bool) -> Result<Option<SweepClaim>> {
        {
            let mut state = self.lock_state();
            if state.sweeping || (scheduled && !state.running) {
                return Ok(None);
            }
            state.sweeping = true;
        }

        // Dropping the unleased claim clears the flag on every early return
        let mut claim = SweepClaim {
            shared: Arc::clone(self),
            leased: false,
        };
        if !self.sweeper.acquire_lease()? {
            info!("another process is sweeping");
            return Ok(None);
        }
        claim.leased = true;
        Ok(Some(claim))
    }

    /// Block until no sweep is in flight or the deadline passes. Returns true when idle.
    fn wait_idle_until(&self, deadline: Instant) -> bool {
        let mut state = self.lock_state();
        while state.sweeping {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            state = match self.changed.wait_timeout(state, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        true
    }
}

/// Exclusive right to run one sweep; released on drop, even on panic
struct SweepClaim {
    shared: Arc<Shared>,
    leased: bool,
}

impl SweepClaim {
    fn run(self) -> Result<SweepReport> {
        let result = self.shared.sweeper.run_leased();

        let mut state = self.shared.lock_state();
        state.last_sweep_at = Some(Utc::now());
        match &result {
            Ok(report) => {
                state.last_error = None;
                state.last_fetch_failures = report.fetch_failures;
            }
            Err(e) => {
                state.last_error = Some(e.to_string());
            }
        }
        drop(state);

        result
    }
}

impl Drop for SweepClaim {
    fn drop(&mut self) {
        if self.leased {
            self.shared.sweeper.release_lease();
        }
        self.shared.lock_state().sweeping = false;
        self.shared.changed.notify_all();
    }
}

/// Owns the engine state and the tick thread
pub struct Scheduler {
    shared: Arc<Shared>,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(sweeper: Sweeper) -> Self {
        Self {
            shared: Arc::new(Shared {
                sweeper,
                state: Mutex::new(EngineState::default()),
                changed: Condvar::new(),
            }),
            ticker: Mutex::new(None),
        }
    }

    /// Start the tick thread. The first sweep runs immediately. No-op if running.
    pub fn start(&self) {
        {
            let mut state = self.shared.lock_state();
            if state.running {
                debug!("scheduler already running");
                return;
            }
            state.running = true;
            state.next_tick = Some(Utc::now());
        }

        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name("tripwire-ticker".to_string())
            .spawn(move || tick_loop(shared));

        match handle {
            Ok(handle) => {
                *self.ticker.lock().unwrap_or_else(|p| p.into_inner()) = Some(handle);
                info!(tick_secs = self.shared.sweeper.config().tick_secs, "scheduler started");
            }
            Err(e) => {
                error!(error = %e, "could not spawn tick thread");
                let mut state = self.shared.lock_state();
                state.running = false;
                state.next_tick = None;
            }
        }
    }

    /// Stop ticking and wait up to the grace period for an in-flight sweep.
    /// Past the grace period the fetcher is force-closed.
    pub fn stop(&self) {
        {
            let mut state = self.shared.lock_state();
            state.running = false;
            state.next_tick = None;
        }
        self.shared.changed.notify_all();

        let grace = self.shared.sweeper.config().shutdown_grace();
        let idle = self.shared.wait_idle_until(Instant::now() + grace);
        if !idle {
            warn!(grace_secs = grace.as_secs(), "sweep still running after grace period, force-closing fetcher");
            self.shared.sweeper.fetcher().end_sweep();
        }

        let handle = self.ticker.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(handle) = handle {
            if idle {
                if handle.join().is_err() {
                    error!("tick thread panicked");
                }
            } else {
                // Leave the stuck thread detached; it exits once its sweep returns
                debug!("detaching tick thread");
            }
        }
        info!("scheduler stopped");
    }

    /// Start a sweep on a background thread unless one is in flight
    pub fn run_now(&self) -> SweepTrigger {
        let claim = match self.shared.claim(false) {
            Ok(Some(claim)) => claim,
            Ok(None) => {
                info!("sweep already running, trigger dropped");
                return SweepTrigger::AlreadyRunning;
            }
            Err(e) => {
                error!(error = %e, "could not claim sweep");
                return SweepTrigger::Failed;
            }
        };

        let spawned = thread::Builder::new()
            .name("tripwire-sweep".to_string())
            .spawn(move || {
                if let Err(e) = claim.run() {
                    error!(error = %e, "manual sweep failed");
                }
            });

        match spawned {
            Ok(_) => SweepTrigger::Started,
            Err(e) => {
                // The claim was moved into the failed closure and dropped with it
                error!(error = %e, "could not spawn sweep thread");
                SweepTrigger::Failed
            }
        }
    }

    /// Run a sweep on the caller's thread. None if one is already in flight,
    /// here or in another process.
    pub fn run_blocking(&self) -> Option<Result<SweepReport>> {
        match self.shared.claim(false) {
            Ok(Some(claim)) => Some(claim.run()),
            Ok(None) => None,
            Err(e) => Some(Err(e)),
        }
    }

    /// Wait for an in-flight sweep to finish. Returns false on timeout.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        self.shared.wait_idle_until(Instant::now() + timeout)
    }

    pub fn status(&self) -> SchedulerStatus {
        let threshold = self.shared.sweeper.config().unhealthy_failure_threshold;
        let state = self.shared.lock_state();
        SchedulerStatus {
            running: state.running,
            sweeping: state.sweeping,
            next_tick: state.next_tick,
            last_sweep_at: state.last_sweep_at,
            last_error: state.last_error.clone(),
            last_fetch_failures: state.last_fetch_failures,
            healthy: state.last_error.is_none() && state.last_fetch_failures < threshold.max(1),
        }
    }
}

/// First tick boundary strictly after `now`, counting from `tick_started`.
/// Boundaries a long sweep ran past are skipped, not made up.
fn next_deadline(tick_started: Instant, tick: Duration, now: Instant) -> Instant {
    let mut deadline = tick_started + tick;
    while deadline <= now {
        deadline += tick;
    }
    deadline
}

/// Sweep on every tick boundary until stopped. Sweep errors never end the loop.
fn tick_loop(shared: Arc<Shared>) {
    let tick = shared.sweeper.config().tick();

    loop {
        if !shared.lock_state().running {
            break;
        }

        let tick_started = Instant::now();
        match shared.claim(true) {
            Ok(Some(claim)) => {
                if let Err(e) = claim.run() {
                    error!(error = %e, "scheduled sweep failed");
                }
            }
            Ok(None) => info!("sweep already running or scheduler stopping, tick skipped"),
            Err(e) => error!(error = %e, "could not claim sweep, tick skipped"),
        }

        let deadline = next_deadline(tick_started, tick, Instant::now());
        let mut state = shared.lock_state();
        if !state.running {
            break;
        }
        state.next_tick = chrono::Duration::from_std(deadline.saturating_duration_since(Instant::now()))
            .ok()
            .map(|d| Utc::now() + d);
        while state.running {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            state = match shared.changed.wait_timeout(state, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        if !state.running {
            break;
        }
    }
    debug!("tick thread exiting");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_deadline_counts_from_tick_start() {
        let start = Instant::now();
        let tick = Duration::from_secs(10);

        // a 3s sweep does not push the next tick out to 13s
        assert_eq!(next_deadline(start, tick, start + Duration::from_secs(3)), start + tick);
        assert_eq!(next_deadline(start, tick, start), start + tick);
    }

    #[test]
    fn test_next_deadline_skips_missed_ticks() {
        let start = Instant::now();
        let tick = Duration::from_secs(10);

        assert_eq!(
            next_deadline(start, tick, start + Duration::from_secs(25)),
            start + Duration::from_secs(30)
        );
        assert_eq!(
            next_deadline(start, tick, start + Duration::from_secs(10)),
            start + Duration::from_secs(20)
        );
    }
}
