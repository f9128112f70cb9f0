//! Configuration defaults for queue-lock.
//!
//! This module defines the default value functions used by the LockConfig struct.

use crate::coordination::AclEntry;
use crate::locks::DEFAULT_NODE_PREFIX;

/// Default base path for lock candidates.
pub const DEFAULT_BASE_PATH: &str = "/queue-lock";

pub(crate) fn default_base_path() -> String {
    DEFAULT_BASE_PATH.to_string()
}

pub(crate) fn default_node_prefix() -> String {
    DEFAULT_NODE_PREFIX.to_string()
}

pub(crate) fn default_acl() -> Vec<AclEntry> {
    AclEntry::open_unsafe()
}
