//! Tests for the simulate command.

use super::*;
use std::path::PathBuf;

fn args() -> SimulateArgs {
    SimulateArgs {
        workers: 3,
        rounds: 2,
        hold_ms: 1,
        timeout_ms: None,
        crash_first_holder: false,
        config: None,
        json: false,
    }
}

fn params(workers: usize, rounds: usize) -> SimulationParams {
    SimulationParams {
        workers,
        rounds,
        hold: Duration::from_millis(1),
        timeout: None,
        crash_first_holder: false,
    }
}

#[test]
fn test_params_reject_zero_workers_or_rounds() {
    let config = LockConfig::default();

    let mut zero_workers = args();
    zero_workers.workers = 0;
    assert!(matches!(
        SimulationParams::from_args(&zero_workers, &config),
        Err(LockError::InvalidArgument(_))
    ));

    let mut zero_rounds = args();
    zero_rounds.rounds = 0;
    assert!(matches!(
        SimulationParams::from_args(&zero_rounds, &config),
        Err(LockError::InvalidArgument(_))
    ));
}

#[test]
fn test_params_timeout_precedence() {
    let config = LockConfig {
        acquire_timeout_ms: Some(500),
        ..LockConfig::default()
    };

    let from_config = SimulationParams::from_args(&args(), &config).unwrap();
    assert_eq!(from_config.timeout, Some(Duration::from_millis(500)));

    let mut explicit = args();
    explicit.timeout_ms = Some(20);
    let from_flag = SimulationParams::from_args(&explicit, &config).unwrap();
    assert_eq!(from_flag.timeout, Some(Duration::from_millis(20)));

    let none = SimulationParams::from_args(&args(), &LockConfig::default()).unwrap();
    assert_eq!(none.timeout, None);
}

#[test]
fn test_simulation_grants_every_round_exclusively() {
    let config = LockConfig::default();
    let report = run_simulation(&params(4, 3), &config).unwrap();

    assert_eq!(report.grants.len(), 12);
    assert_eq!(report.max_concurrent_holders, 1);
    assert_eq!(report.timeouts, 0);
    assert!(report.crash.is_none());
    assert_eq!(report.leftover_candidates, 0);
    assert!(report.fifo());
    assert!(report.verify().is_ok());
    for worker in 0..4 {
        assert_eq!(report.grants.iter().filter(|g| g.worker == worker).count(), 3);
    }
}

#[test]
fn test_simulation_survives_holder_crash() {
    let config = LockConfig::default();
    let mut crash = params(3, 2);
    crash.crash_first_holder = true;

    let report = run_simulation(&crash, &config).unwrap();

    let crashed = report.crash.as_ref().unwrap().worker;
    assert_eq!(report.grants[0].worker, crashed);
    // The crashed worker stops after its first grant; everyone else finishes.
    assert_eq!(report.grants.len(), 1 + 2 * 2);
    assert_eq!(report.max_concurrent_holders, 1);
    assert_eq!(report.leftover_candidates, 0);
    assert!(report.verify().is_ok());
}

#[test]
fn test_crashed_holder_is_replaced_before_its_hold_ends() {
    let config = LockConfig::default();
    let stalled = SimulationParams {
        workers: 2,
        rounds: 1,
        hold: Duration::from_millis(300),
        timeout: None,
        crash_first_holder: true,
    };

    let report = run_simulation(&stalled, &config).unwrap();

    let crash = report.crash.clone().unwrap();
    assert!(crash.expired_at < crash.hold_ended_at);
    let takeover = report.takeover().unwrap();
    assert_ne!(takeover.worker, crash.worker);
    assert!(takeover.granted_at >= crash.expired_at);
    assert!(report.takeover_during_hold());
    assert_eq!(report.max_concurrent_holders, 1);
    assert_eq!(report.leftover_candidates, 0);
    assert!(report.verify().is_ok());
    assert!(report.render_text().contains("(during the stalled hold)"));
}

#[test]
fn test_simulation_uses_configured_base_path() {
    let config = LockConfig::from_yaml("base_path: /jobs/nightly\nnode_prefix: job-\n").unwrap();
    let report = run_simulation(&params(2, 1), &config).unwrap();

    assert_eq!(report.base_path, "/jobs/nightly");
    assert!(report.grants.iter().all(|g| g.candidate.starts_with("job-")));
}

#[test]
fn test_simulation_counts_timeouts() {
    let config = LockConfig::default();
    let slow = SimulationParams {
        workers: 2,
        rounds: 1,
        hold: Duration::from_millis(200),
        timeout: Some(Duration::ZERO),
        crash_first_holder: false,
    };

    let report = run_simulation(&slow, &config).unwrap();

    // A zero timeout only succeeds for whoever finds the queue empty.
    assert_eq!(report.grants.len() + report.timeouts, 2);
    assert!(!report.grants.is_empty());
    assert_eq!(report.leftover_candidates, 0);
}

#[test]
fn test_cmd_simulate_reports_missing_config() {
    let mut missing = args();
    missing.config = Some(PathBuf::from("/nonexistent/queue-lock.yaml"));

    let err = cmd_simulate(missing).unwrap_err();
    assert!(matches!(err, LockError::Config(_)));
}
