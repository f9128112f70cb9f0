//! Implementation of the `queue-lock simulate` command.
//!
//! Spawns one thread per worker, each with its own session on a shared
//! in-process coordination service, and has every worker acquire the lock
//! `rounds` times. A shared counter tracks how many workers are inside the
//! critical section; the report records every grant in the order it happened.
//!
//! With `--crash-first-holder`, the first worker to get the lock has its
//! session expired halfway through its hold. The service reaps its candidate
//! node and the next worker in line takes over while the stalled holder is
//! still sleeping out the rest of its hold.

mod report;

#[cfg(test)]
mod tests;

pub use report::{CrashRecord, GrantRecord, SimulationReport};

use crate::cli::SimulateArgs;
use chrono::Utc;
use queue_lock::coordination::memory::{MemoryService, SessionId};
use queue_lock::coordination::path;
use queue_lock::{LockConfig, LockError, QueueLock, Result};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Resolved simulation settings.
#[derive(Debug, Clone)]
pub struct SimulationParams {
    pub workers: usize,
    pub rounds: usize,
    pub hold: Duration,
    pub timeout: Option<Duration>,
    pub crash_first_holder: bool,
}

impl SimulationParams {
    /// Combine command-line arguments with the lock configuration.
    ///
    /// `--timeout-ms` wins over `acquire_timeout_ms`.
    pub fn from_args(args: &SimulateArgs, config: &LockConfig) -> Result<Self> {
        if args.workers == 0 {
            return Err(LockError::InvalidArgument(
                "--workers must be at least 1".to_string(),
            ));
        }
        if args.rounds == 0 {
            return Err(LockError::InvalidArgument(
                "--rounds must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            workers: args.workers,
            rounds: args.rounds,
            hold: Duration::from_millis(args.hold_ms),
            timeout: args
                .timeout_ms
                .map(Duration::from_millis)
                .or_else(|| config.acquire_timeout()),
            crash_first_holder: args.crash_first_holder,
        })
    }
}

/// Execute the `queue-lock simulate` command.
pub fn cmd_simulate(args: SimulateArgs) -> Result<()> {
    let config = match &args.config {
        Some(file) => LockConfig::load(file)?,
        None => LockConfig::default(),
    };
    let params = SimulationParams::from_args(&args, &config)?;

    let report = run_simulation(&params, &config)?;

    if args.json {
        println!("{}", report.to_json()?);
    } else {
        print!("{}", report.render_text());
    }

    report.verify()
}

/// Shared view of the critical section.
struct Floor {
    inside: AtomicUsize,
    max_inside: AtomicUsize,
    crash_pending: AtomicBool,
    /// Also orders entries against a crashing holder's exit.
    grants: Mutex<Vec<GrantRecord>>,
}

impl Floor {
    fn new(crash_first_holder: bool) -> Self {
        Self {
            inside: AtomicUsize::new(0),
            max_inside: AtomicUsize::new(0),
            crash_pending: AtomicBool::new(crash_first_holder),
            grants: Mutex::new(Vec::new()),
        }
    }

    fn enter(&self, grant: GrantRecord) {
        let mut grants = self.grants.lock().unwrap_or_else(PoisonError::into_inner);
        let now = self.inside.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_inside.fetch_max(now, Ordering::SeqCst);
        grants.push(grant);
    }

    fn leave(&self) {
        self.inside.fetch_sub(1, Ordering::SeqCst);
    }

    /// Run `expire` and leave as one step: a successor woken by the expiry
    /// cannot enter before the expired holder is counted out.
    fn expire_and_leave(&self, expire: impl FnOnce()) {
        let _grants = self.grants.lock().unwrap_or_else(PoisonError::into_inner);
        expire();
        self.leave();
    }

    /// True for exactly one caller when a crash was requested.
    fn take_crash(&self) -> bool {
        self.crash_pending.swap(false, Ordering::SeqCst)
    }
}

#[derive(Debug, Default)]
struct WorkerOutcome {
    timeouts: usize,
    crash: Option<CrashRecord>,
}

/// Run the workers to completion and collect the report.
pub fn run_simulation(params: &SimulationParams, config: &LockConfig) -> Result<SimulationReport> {
    config.validate()?;

    let service = MemoryService::new();
    let floor = Floor::new(params.crash_first_holder);
    let started_at = Utc::now();

    let outcomes: Vec<Result<WorkerOutcome>> = thread::scope(|scope| {
        let handles: Vec<_> = (0..params.workers)
            .map(|worker| {
                let service = &service;
                let floor = &floor;
                scope.spawn(move || run_worker(worker, service, config, params, floor))
            })
            .collect();

        handles
            .into_iter()
            .enumerate()
            .map(|(worker, handle)| {
                handle.join().unwrap_or_else(|_| {
                    Err(LockError::ProtocolViolation(format!(
                        "worker {} panicked",
                        worker
                    )))
                })
            })
            .collect()
    });

    let mut timeouts = 0;
    let mut crash = None;
    for outcome in outcomes {
        let outcome = outcome?;
        timeouts += outcome.timeouts;
        crash = crash.or(outcome.crash);
    }

    let grants = floor
        .grants
        .into_inner()
        .unwrap_or_else(PoisonError::into_inner);

    Ok(SimulationReport {
        base_path: config.base_path.clone(),
        workers: params.workers,
        rounds: params.rounds,
        started_at,
        finished_at: Utc::now(),
        grants,
        timeouts,
        crash,
        max_concurrent_holders: floor.max_inside.load(Ordering::SeqCst),
        leftover_candidates: service.children(&config.base_path).len(),
    })
}

fn run_worker(
    worker: usize,
    service: &MemoryService,
    config: &LockConfig,
    params: &SimulationParams,
    floor: &Floor,
) -> Result<WorkerOutcome> {
    let client = service.connect();
    let session = client.session_id();
    let lock = QueueLock::from_config(Arc::new(client), config)?;
    let mut outcome = WorkerOutcome::default();

    for round in 1..=params.rounds {
        let acquired = match params.timeout {
            Some(timeout) => lock.try_lock(timeout)?,
            None => {
                lock.lock()?;
                true
            }
        };
        if !acquired {
            debug!(worker, round, "gave up waiting for the lock");
            outcome.timeouts += 1;
            continue;
        }

        let candidate = lock.candidate_id().unwrap_or_default();
        let sequence = path::sequence_of(&candidate).ok_or_else(|| {
            LockError::ProtocolViolation(format!(
                "granted candidate has no sequence number: '{}'",
                candidate
            ))
        })?;
        info!(worker, round, candidate = %candidate, "holding lock");
        floor.enter(GrantRecord {
            worker,
            round,
            candidate,
            sequence,
            granted_at: Utc::now(),
        });

        if floor.take_crash() {
            outcome.crash = Some(crash_mid_hold(worker, session, service, &lock, params, floor)?);
            return Ok(outcome);
        }

        thread::sleep(params.hold);
        floor.leave();
        lock.unlock()?;
    }

    Ok(outcome)
}

/// Expire the holder's session halfway through its hold, then sleep out the
/// rest of the hold the way a stalled process would.
fn crash_mid_hold(
    worker: usize,
    session: SessionId,
    service: &MemoryService,
    lock: &QueueLock,
    params: &SimulationParams,
    floor: &Floor,
) -> Result<CrashRecord> {
    let first_half = params.hold / 2;
    thread::sleep(first_half);

    warn!(worker, session, "expiring the holder's session mid-hold");
    let expired_at = Utc::now();
    floor.expire_and_leave(|| service.expire_session(session));
    if lock.is_held() {
        return Err(LockError::ProtocolViolation(format!(
            "worker {} still reports HELD after its session expired",
            worker
        )));
    }

    thread::sleep(params.hold - first_half);
    let hold_ended_at = Utc::now();

    match lock.unlock() {
        Err(LockError::SessionExpired) => debug!(worker, "acknowledged lost hold"),
        Ok(()) => {
            return Err(LockError::ProtocolViolation(format!(
                "worker {} released a lock its expired session could not hold",
                worker
            )));
        }
        Err(e) => return Err(e),
    }

    Ok(CrashRecord {
        worker,
        expired_at,
        hold_ended_at,
    })
}
