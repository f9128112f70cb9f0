//! LockConfig struct definition and default implementation.

use super::types::*;
use crate::coordination::AclEntry;
use serde::{Deserialize, Serialize};

/// Configuration for a queue lock.
///
/// Unknown fields in the YAML are ignored for forward compatibility.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    // =========================================================================
    // Namespace settings
    // =========================================================================
    /// Shared path all competitors register under (default: "/queue-lock").
    #[serde(default = "default_base_path")]
    pub base_path: String,

    /// Name prefix of candidate nodes; the service appends the sequence number.
    #[serde(default = "default_node_prefix")]
    pub node_prefix: String,

    /// ACL applied to the base path, its ancestors and every candidate node.
    #[serde(default = "default_acl")]
    pub acl: Vec<AclEntry>,

    // =========================================================================
    // Acquisition settings
    // =========================================================================
    /// Bound on how long `try_lock` waits, in milliseconds. Unset means block.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acquire_timeout_ms: Option<u64>,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            base_path: default_base_path(),
            node_prefix: default_node_prefix(),
            acl: default_acl(),
            acquire_timeout_ms: None,
        }
    }
}
