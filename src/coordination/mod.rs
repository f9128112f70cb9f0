//! Coordination-service abstraction for queue-lock.
//!
//! The lock engine never talks to a concrete client. It consumes the
//! [`Coordinator`] trait, which models the small slice of a ZooKeeper-style
//! service the protocol needs:
//!
//! - persistent nodes (the lock's base path and its ancestors)
//! - ephemeral, sequential nodes (one candidate per lock attempt)
//! - one-shot deletion watches
//! - session lifecycle notifications (`reconnected`, `expired`)
//!
//! Nodes carry no payload; identity and existence are the only information.
//!
//! [`memory::MemoryService`] is a complete in-process implementation used by
//! the test suite and the `simulate` command.

pub mod memory;
pub mod path;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Errors reported by a coordination service.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoordinationError {
    /// Creation target already exists.
    #[error("node already exists: {0}")]
    NodeExists(String),

    /// Operation target does not exist.
    #[error("no such node: {0}")]
    NoNode(String),

    /// Deletion target still has children.
    #[error("node has children: {0}")]
    NotEmpty(String),

    /// Ephemeral nodes cannot have children.
    #[error("ephemeral node cannot have children: {0}")]
    NoChildrenForEphemerals(String),

    /// The session's identity lacks the required permission.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The request itself was malformed.
    #[error("bad arguments: {0}")]
    BadArguments(String),

    /// The connection dropped while the request was in flight.
    #[error("connection to coordination service lost")]
    ConnectionLoss,

    /// The session is gone, along with every ephemeral node it created.
    #[error("coordination session expired")]
    SessionExpired,
}

/// Result type alias for coordination-service calls.
pub type CoordResult<T> = std::result::Result<T, CoordinationError>;

/// Permission bits of an ACL entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Permissions(u8);

impl Permissions {
    pub const READ: Permissions = Permissions(1);
    pub const WRITE: Permissions = Permissions(1 << 1);
    pub const CREATE: Permissions = Permissions(1 << 2);
    pub const DELETE: Permissions = Permissions(1 << 3);
    pub const ADMIN: Permissions = Permissions(1 << 4);
    pub const ALL: Permissions = Permissions(0b1_1111);
    pub const NONE: Permissions = Permissions(0);

    /// Whether every bit in `other` is granted.
    pub fn contains(self, other: Permissions) -> bool {
        self.0 & other.0 == other.0
    }

    /// Union of two permission sets.
    pub fn with(self, other: Permissions) -> Permissions {
        Permissions(self.0 | other.0)
    }
}

const PERMISSION_LETTERS: [(char, Permissions); 5] = [
    ('c', Permissions::CREATE),
    ('d', Permissions::DELETE),
    ('r', Permissions::READ),
    ('w', Permissions::WRITE),
    ('a', Permissions::ADMIN),
];

impl fmt::Display for Permissions {
    /// Renders in the conventional `cdrwa` letter form.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (letter, perm) in PERMISSION_LETTERS {
            if self.contains(perm) {
                write!(f, "{}", letter)?;
            }
        }
        Ok(())
    }
}

impl TryFrom<String> for Permissions {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.chars().try_fold(Permissions::NONE, |acc, c| {
            PERMISSION_LETTERS
                .iter()
                .find(|(letter, _)| *letter == c.to_ascii_lowercase())
                .map(|(_, perm)| acc.with(*perm))
                .ok_or_else(|| format!("unknown permission letter '{}' in '{}'", c, value))
        })
    }
}

impl From<Permissions> for String {
    fn from(value: Permissions) -> Self {
        value.to_string()
    }
}

/// One entry of an access-control list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclEntry {
    /// Granted permissions.
    pub perms: Permissions,
    /// Authentication scheme (`world`, `digest`, `ip`, ...).
    pub scheme: String,
    /// Identity within the scheme (`anyone` for `world`).
    pub id: String,
}

impl AclEntry {
    pub fn new(perms: Permissions, scheme: &str, id: &str) -> Self {
        Self {
            perms,
            scheme: scheme.to_string(),
            id: id.to_string(),
        }
    }

    /// Everyone may do everything.
    pub fn open_unsafe() -> Vec<AclEntry> {
        vec![AclEntry::new(Permissions::ALL, "world", "anyone")]
    }

    /// Everyone may read, nobody may modify.
    pub fn read_only() -> Vec<AclEntry> {
        vec![AclEntry::new(Permissions::READ, "world", "anyone")]
    }

    /// Whether this entry applies to a session authenticated as `auth`.
    pub fn matches(&self, auth: &[(String, String)]) -> bool {
        (self.scheme == "world" && self.id == "anyone")
            || auth
                .iter()
                .any(|(scheme, id)| *scheme == self.scheme && *id == self.id)
    }
}

/// A notification delivered by the coordination service.
///
/// Node watches and session listeners receive the same type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchedEvent {
    /// The watched node was removed.
    NodeDeleted { path: String },
    /// The session re-established its connection; nothing was lost.
    SessionReconnected,
    /// The session expired; its ephemeral nodes are gone.
    SessionExpired,
}

/// One-shot handler for a deletion watch.
pub type NodeWatcher = Box<dyn FnOnce(WatchedEvent) + Send>;

/// Handler for session lifecycle events.
pub type SessionListener = Arc<dyn Fn(WatchedEvent) + Send + Sync>;

/// Registration handle returned by [`Coordinator::add_session_listener`].
pub type ListenerId = u64;

/// Client of a ZooKeeper-style coordination service.
///
/// Implementations must be shareable across threads: the lock engine calls
/// them from the caller's thread while notifications arrive on another.
pub trait Coordinator: Send + Sync {
    /// Creates an ephemeral node under `parent` named `name_prefix` plus a
    /// service-assigned, strictly increasing sequence suffix. Returns the
    /// assigned name segment (not the full path).
    fn create_sequential_ephemeral(
        &self,
        parent: &str,
        name_prefix: &str,
        acl: &[AclEntry],
    ) -> CoordResult<String>;

    /// Creates a permanent node. Fails with `NodeExists` if it is already there.
    fn create_persistent(&self, path: &str, acl: &[AclEntry]) -> CoordResult<()>;

    /// Whether a node exists at `path`.
    fn exists(&self, path: &str) -> CoordResult<bool>;

    /// Deletes the node regardless of version. Fails with `NoNode` if absent.
    fn delete(&self, path: &str) -> CoordResult<()>;

    /// Names of the direct children of `parent`, in no particular order.
    fn list_children(&self, parent: &str) -> CoordResult<Vec<String>>;

    /// Arms a one-shot deletion watch on `path`.
    ///
    /// Returns `Ok(false)` without arming anything if the node is already
    /// absent, so the caller never waits for a notification that cannot come.
    fn watch_deletion(&self, path: &str, watcher: NodeWatcher) -> CoordResult<bool>;

    /// Registers a listener for this session's lifecycle events.
    fn add_session_listener(&self, listener: SessionListener) -> ListenerId;

    /// Unregisters a listener. Unknown ids are ignored.
    fn remove_session_listener(&self, id: ListenerId);
}
