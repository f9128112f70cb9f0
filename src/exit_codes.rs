//! Exit code constants for the queue-lock CLI.
//!
//! - 0: Success
//! - 1: User error (bad args, invalid config, lock misuse)
//! - 4: Lock attempt failed (interrupted, aborted, session expired)
//! - 5: Coordination service failure
//! - 6: Protocol invariant violation

/// Successful execution.
pub const SUCCESS: i32 = 0;

/// User error: bad arguments, invalid configuration, or lock misuse.
pub const USER_ERROR: i32 = 1;

/// Lock attempt failed: interrupted, aborted, or lost with its session.
pub const LOCK_FAILURE: i32 = 4;

/// The coordination service rejected or failed an operation.
pub const COORDINATION_FAILURE: i32 = 5;

/// The coordination service and the lock engine disagree about reality.
pub const PROTOCOL_VIOLATION: i32 = 6;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_are_distinct() {
        let codes = [
            SUCCESS,
            USER_ERROR,
            LOCK_FAILURE,
            COORDINATION_FAILURE,
            PROTOCOL_VIOLATION,
        ];
        for (i, &a) in codes.iter().enumerate() {
            for (j, &b) in codes.iter().enumerate() {
                if i != j {
                    assert_ne!(a, b, "Exit codes must be distinct");
                }
            }
        }
    }

    #[test]
    fn success_is_zero() {
        assert_eq!(SUCCESS, 0);
    }
}
