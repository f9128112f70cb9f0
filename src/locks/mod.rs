//! Locking subsystem for queue-lock.
//!
//! This module implements mutual exclusion across processes that share
//! nothing but a coordination service:
//! - Namespace bootstrap (`ensure_path`)
//! - The queue lock engine (`QueueLock`)
//! - RAII guards (`LockGuard`)
//!
//! # Candidate Nodes
//!
//! Every attempt registers an ephemeral, sequential node under the lock's base
//! path (`/base/lock-0000000007`). The node with the smallest sequence number
//! holds the lock; every other candidate watches only the node immediately
//! before it. A crashed holder's node disappears with its session, which
//! wakes its successor without any message from the holder.
//!
//! # RAII Guards
//!
//! `QueueLock::lock_guard` returns a guard that unlocks when dropped. If the
//! release fails during drop, a warning is logged but the program does not
//! crash.

mod bootstrap;
mod guard;
mod session;
mod types;


// Re-export public API
pub use bootstrap::ensure_path;
pub use guard::LockGuard;
pub use session::{DEFAULT_NODE_PREFIX, Interrupter, QueueLock};
pub use types::{LockSnapshot, LockState};
