//! Simulation results and their rendering.

use chrono::{DateTime, Utc};
use queue_lock::{LockError, Result};
use serde::Serialize;
use std::fmt::Write;

/// One successful acquisition.
#[derive(Debug, Clone, Serialize)]
pub struct GrantRecord {
    pub worker: usize,
    pub round: usize,
    pub candidate: String,
    pub sequence: u64,
    pub granted_at: DateTime<Utc>,
}

/// A holder whose session was expired partway through its hold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CrashRecord {
    pub worker: usize,
    pub expired_at: DateTime<Utc>,

    /// When the stalled holder's planned hold would have ended.
    pub hold_ended_at: DateTime<Utc>,
}

/// Outcome of a whole simulation run.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub base_path: String,
    pub workers: usize,
    pub rounds: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,

    /// Grants in the order they happened.
    pub grants: Vec<GrantRecord>,

    /// `try_lock` calls that gave up.
    pub timeouts: usize,

    /// The holder whose session was expired mid-hold, if any.
    pub crash: Option<CrashRecord>,

    /// Highest number of workers ever inside the critical section at once.
    pub max_concurrent_holders: usize,

    /// Candidate nodes still present under the base path after every worker finished.
    pub leftover_candidates: usize,
}

impl SimulationReport {
    /// Whether grants followed candidate creation order.
    pub fn fifo(&self) -> bool {
        self.grants
            .windows(2)
            .all(|pair| pair[0].sequence < pair[1].sequence)
    }

    /// First grant made after the crashed holder's session expired.
    pub fn takeover(&self) -> Option<&GrantRecord> {
        let crash = self.crash.as_ref()?;
        self.grants
            .iter()
            .find(|grant| grant.worker != crash.worker && grant.granted_at >= crash.expired_at)
    }

    /// Whether the successor got the lock before the crashed holder's hold ran out.
    pub fn takeover_during_hold(&self) -> bool {
        match (&self.crash, self.takeover()) {
            (Some(crash), Some(grant)) => grant.granted_at < crash.hold_ended_at,
            _ => false,
        }
    }

    /// Fail if the run broke mutual exclusion or grant order.
    pub fn verify(&self) -> Result<()> {
        if self.max_concurrent_holders > 1 {
            return Err(LockError::ProtocolViolation(format!(
                "{} workers held the lock at the same time",
                self.max_concurrent_holders
            )));
        }
        if !self.fifo() {
            return Err(LockError::ProtocolViolation(
                "lock was granted out of creation order".to_string(),
            ));
        }
        Ok(())
    }

    /// Serialize the report to a JSON string.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| {
            LockError::InvalidArgument(format!("failed to serialize simulation report: {}", e))
        })
    }

    /// Human-readable rendering.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "Simulated {} worker(s) x {} round(s) on {}",
            self.workers, self.rounds, self.base_path
        );
        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "  {:>3}  {:>6}  {:>5}  {:<24}  GRANTED AT",
            "#", "WORKER", "ROUND", "CANDIDATE"
        );
        for (idx, grant) in self.grants.iter().enumerate() {
            // Only the first holder is ever crashed.
            let crashed = if idx == 0 && self.crash.is_some() {
                "  [crashed]"
            } else {
                ""
            };
            let _ = writeln!(
                out,
                "  {:>3}  {:>6}  {:>5}  {:<24}  {}{}",
                idx + 1,
                grant.worker,
                grant.round,
                grant.candidate,
                grant.granted_at.format("%H:%M:%S%.3f"),
                crashed
            );
        }
        let _ = writeln!(out);

        let elapsed = self.finished_at - self.started_at;
        let _ = writeln!(
            out,
            "Grants: {}, timeouts: {}, elapsed: {}ms",
            self.grants.len(),
            self.timeouts,
            elapsed.num_milliseconds()
        );
        let _ = writeln!(
            out,
            "Max concurrent holders: {}",
            self.max_concurrent_holders
        );
        let _ = writeln!(
            out,
            "Grant order follows creation order: {}",
            if self.fifo() { "yes" } else { "no" }
        );
        let _ = writeln!(out, "Leftover candidates: {}", self.leftover_candidates);

        if let Some(crash) = &self.crash {
            let _ = writeln!(
                out,
                "Worker {} lost its session at {}; its hold would have ended at {}",
                crash.worker,
                crash.expired_at.format("%H:%M:%S%.3f"),
                crash.hold_ended_at.format("%H:%M:%S%.3f")
            );
            match self.takeover() {
                Some(grant) => {
                    let _ = writeln!(
                        out,
                        "Worker {} took over at {}{}",
                        grant.worker,
                        grant.granted_at.format("%H:%M:%S%.3f"),
                        if self.takeover_during_hold() {
                            " (during the stalled hold)"
                        } else {
                            ""
                        }
                    );
                }
                None => {
                    let _ = writeln!(out, "No other worker took over");
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn grant(worker: usize, round: usize, sequence: u64) -> GrantRecord {
        GrantRecord {
            worker,
            round,
            candidate: format!("lock-{:010}", sequence),
            sequence,
            granted_at: Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap(),
        }
    }

    fn report(grants: Vec<GrantRecord>) -> SimulationReport {
        let at = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        SimulationReport {
            base_path: "/queue-lock".to_string(),
            workers: 2,
            rounds: 1,
            started_at: at,
            finished_at: at,
            grants,
            timeouts: 0,
            crash: None,
            max_concurrent_holders: 1,
            leftover_candidates: 0,
        }
    }

    #[test]
    fn fifo_detects_out_of_order_grants() {
        assert!(report(vec![grant(0, 1, 0), grant(1, 1, 1)]).fifo());
        assert!(!report(vec![grant(1, 1, 1), grant(0, 1, 0)]).fifo());
        assert!(report(Vec::new()).fifo());
    }

    #[test]
    fn text_lists_every_grant() {
        let text = report(vec![grant(0, 1, 0), grant(1, 1, 1)]).render_text();
        assert!(text.contains("Simulated 2 worker(s) x 1 round(s) on /queue-lock"));
        assert!(text.contains("lock-0000000000"));
        assert!(text.contains("lock-0000000001"));
        assert!(text.contains("03:04:05.000"));
        assert!(text.contains("Grant order follows creation order: yes"));
    }

    #[test]
    fn verify_rejects_overlapping_holders() {
        let mut bad = report(vec![grant(0, 1, 0)]);
        bad.max_concurrent_holders = 2;
        assert!(matches!(bad.verify(), Err(LockError::ProtocolViolation(_))));
        assert!(report(vec![grant(0, 1, 0)]).verify().is_ok());
    }

    #[test]
    fn json_uses_field_names() {
        let text = report(vec![grant(0, 1, 7)]).to_json().unwrap();
        let json: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(json["base_path"], "/queue-lock");
        assert_eq!(json["grants"][0]["candidate"], "lock-0000000007");
        assert_eq!(json["grants"][0]["sequence"], 7);
        assert!(json["crash"].is_null());
    }

    #[test]
    fn takeover_is_the_first_grant_after_expiry() {
        let expired_at = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        let mut successor = grant(1, 1, 1);
        successor.granted_at = expired_at + chrono::Duration::milliseconds(20);
        let mut late = grant(2, 1, 2);
        late.granted_at = expired_at + chrono::Duration::milliseconds(500);

        let mut crashed = report(vec![grant(0, 1, 0), successor, late]);
        crashed.crash = Some(CrashRecord {
            worker: 0,
            expired_at,
            hold_ended_at: expired_at + chrono::Duration::milliseconds(100),
        });

        assert_eq!(crashed.takeover().unwrap().worker, 1);
        assert!(crashed.takeover_during_hold());
        let text = crashed.render_text();
        assert!(text.contains("[crashed]"));
        assert!(text.contains("Worker 1 took over at 03:04:05.020 (during the stalled hold)"));
    }
}
