//! Error types for queue-lock.
//!
//! Uses thiserror for derive macros. Usage errors are detected before any
//! remote call; everything the coordination service reports is wrapped so the
//! caller can tell a lost session from a transient failure.

use crate::coordination::CoordinationError;
use crate::exit_codes;
use crate::locks::LockState;
use thiserror::Error;

/// Main error type for lock operations.
#[derive(Error, Debug)]
pub enum LockError {
    /// `lock`/`try_lock` called while an attempt is in progress or the lock is held.
    #[error("lock attempt already in progress or held (state: {0})")]
    AlreadyHeld(LockState),

    /// `unlock` called on an idle session.
    #[error("lock is not held")]
    NotLocked,

    /// Caller supplied an unusable argument (e.g. a relative namespace path).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Configuration could not be read, parsed, or validated.
    #[error("{0}")]
    Config(String),

    /// The blocked attempt was interrupted through its `Interrupter`.
    #[error("lock attempt interrupted")]
    Interrupted,

    /// `unlock` was called while the attempt was still waiting.
    #[error("lock attempt aborted before it was granted")]
    Aborted,

    /// The coordination session expired; the candidate registration is lost.
    #[error("coordination session expired during lock attempt")]
    SessionExpired,

    /// The coordination service rejected or failed an operation.
    #[error("coordination service failure: {0}")]
    CoordinationServiceFailure(CoordinationError),

    /// The coordination service and this engine disagree about the namespace.
    #[error("lock protocol invariant violated: {0}")]
    ProtocolViolation(String),
}

impl LockError {
    /// Returns the appropriate exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            LockError::AlreadyHeld(_)
            | LockError::NotLocked
            | LockError::InvalidArgument(_)
            | LockError::Config(_) => exit_codes::USER_ERROR,
            LockError::Interrupted | LockError::Aborted | LockError::SessionExpired => {
                exit_codes::LOCK_FAILURE
            }
            LockError::CoordinationServiceFailure(_) => exit_codes::COORDINATION_FAILURE,
            LockError::ProtocolViolation(_) => exit_codes::PROTOCOL_VIOLATION,
        }
    }
}

impl From<CoordinationError> for LockError {
    fn from(err: CoordinationError) -> Self {
        match err {
            CoordinationError::SessionExpired => LockError::SessionExpired,
            other => LockError::CoordinationServiceFailure(other),
        }
    }
}

/// Result type alias for lock operations.
pub type Result<T> = std::result::Result<T, LockError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_errors_have_user_exit_code() {
        assert_eq!(
            LockError::AlreadyHeld(LockState::Held).exit_code(),
            exit_codes::USER_ERROR
        );
        assert_eq!(LockError::NotLocked.exit_code(), exit_codes::USER_ERROR);
        assert_eq!(
            LockError::InvalidArgument("relative".to_string()).exit_code(),
            exit_codes::USER_ERROR
        );
    }

    #[test]
    fn attempt_failures_have_lock_exit_code() {
        assert_eq!(LockError::Interrupted.exit_code(), exit_codes::LOCK_FAILURE);
        assert_eq!(LockError::Aborted.exit_code(), exit_codes::LOCK_FAILURE);
        assert_eq!(LockError::SessionExpired.exit_code(), exit_codes::LOCK_FAILURE);
    }

    #[test]
    fn session_expiry_is_not_a_transient_failure() {
        let err: LockError = CoordinationError::SessionExpired.into();
        assert!(matches!(err, LockError::SessionExpired));

        let err: LockError = CoordinationError::ConnectionLoss.into();
        assert!(matches!(
            err,
            LockError::CoordinationServiceFailure(CoordinationError::ConnectionLoss)
        ));
        assert_eq!(err.exit_code(), exit_codes::COORDINATION_FAILURE);
    }

    #[test]
    fn error_messages_are_descriptive() {
        let err = LockError::AlreadyHeld(LockState::Waiting);
        assert_eq!(
            err.to_string(),
            "lock attempt already in progress or held (state: WAITING)"
        );

        let err = LockError::ProtocolViolation("no children".to_string());
        assert_eq!(
            err.to_string(),
            "lock protocol invariant violated: no children"
        );
    }
}
