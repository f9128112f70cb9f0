//! queue-lock: a distributed mutual-exclusion lock over a ZooKeeper-style
//! coordination service.
//!
//! Competing sessions register ephemeral, sequentially numbered candidates
//! under a shared base path. The lowest sequence number holds the lock; every
//! other candidate watches only its immediate predecessor. See [`locks`] for
//! the engine and [`coordination`] for the service interface and the
//! in-process [`coordination::memory::MemoryService`].

pub mod config;
pub mod coordination;
pub mod error;
pub mod exit_codes;
pub mod locks;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::LockConfig;
pub use coordination::{AclEntry, Coordinator, Permissions};
pub use error::{LockError, Result};
pub use locks::{Interrupter, LockGuard, LockSnapshot, LockState, QueueLock};
