//! RAII lock guard implementation.

use super::session::QueueLock;
use crate::error::Result;
use tracing::warn;

/// RAII guard for a held [`QueueLock`].
///
/// When dropped, the lock is released.
/// If the release fails, a warning is logged but no panic occurs.
#[derive(Debug)]
pub struct LockGuard<'a> {
    /// The lock being held.
    lock: &'a QueueLock,

    /// Whether the lock has been released manually.
    released: bool,
}

impl<'a> LockGuard<'a> {
    /// Create a new guard for a lock that is already held.
    pub(super) fn new(lock: &'a QueueLock) -> Self {
        Self {
            lock,
            released: false,
        }
    }

    /// The lock this guard holds.
    pub fn lock(&self) -> &QueueLock {
        self.lock
    }

    /// Name of the candidate node holding the lock.
    pub fn candidate_id(&self) -> Option<String> {
        self.lock.candidate_id()
    }

    /// Manually release the lock.
    ///
    /// This is useful when you want to release the lock before the guard
    /// goes out of scope, and want to handle errors explicitly.
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        self.lock.unlock()
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        if !self.released
            && let Err(e) = self.lock.unlock()
        {
            warn!(
                base_path = %self.lock.base_path(),
                error = %e,
                "failed to release lock"
            );
        }
    }
}
