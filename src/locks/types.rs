//! Lock state and event definitions.

use crate::coordination::WatchedEvent;
use serde::Serialize;
use std::fmt;

/// Lifecycle state of a lock session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LockState {
    /// No attempt in progress; no node registered.
    #[default]
    Idle,
    /// Base path being ensured and candidate node being created.
    Registering,
    /// Candidate registered with rank > 0, watching its predecessor.
    Waiting,
    /// Candidate has rank 0.
    Held,
    /// Candidate node being deleted after `unlock()`.
    Releasing,
    /// Attempt cancelled, or the session expired while holding; cleanup pending.
    Aborted,
}

impl LockState {
    /// Get the display name for this state.
    pub fn as_str(&self) -> &'static str {
        match self {
            LockState::Idle => "IDLE",
            LockState::Registering => "REGISTERING",
            LockState::Waiting => "WAITING",
            LockState::Held => "HELD",
            LockState::Releasing => "RELEASING",
            LockState::Aborted => "ABORTED",
        }
    }
}

impl fmt::Display for LockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Messages consumed by the acquisition loop.
///
/// Watch callbacks, session listeners, interrupters and `unlock()` push one
/// of these onto the session's channel; the thread running the loop applies
/// it. Signals tagged with an older attempt are discarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum LockEvent {
    /// Forwarded from the coordination service.
    Notification(WatchedEvent),
    /// The caller blocked in attempt `attempt` was interrupted.
    Interrupted { attempt: u64 },
    /// `unlock()` was called while attempt `attempt` was still pending.
    Abort { attempt: u64 },
    /// The session expired while attempt `attempt` was registering or waiting.
    SessionExpired { attempt: u64 },
}

/// Point-in-time view of a lock session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LockSnapshot {
    /// Shared namespace path all competitors register under.
    pub base_path: String,

    /// Current lifecycle state.
    pub state: LockState,

    /// Name of this session's candidate node, if registered.
    pub candidate_id: Option<String>,

    /// Name of the predecessor being watched, if waiting.
    pub watched_sibling_id: Option<String>,

    /// Generation of the current (or last) attempt.
    pub attempt: u64,
}

impl fmt::Display for LockSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}] candidate: {}, watching: {}",
            self.base_path,
            self.state,
            self.candidate_id.as_deref().unwrap_or("-"),
            self.watched_sibling_id.as_deref().unwrap_or("-")
        )
    }
}
