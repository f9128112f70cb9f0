//! Namespace bootstrapping.
//!
//! Makes sure a lock's base path exists before any candidate registers under
//! it. Missing ancestors are created as permanent nodes, outermost first.

use crate::coordination::{AclEntry, CoordinationError, Coordinator, path};
use crate::error::{LockError, Result};
use tracing::debug;

/// Ensure every node on `node_path` exists as a permanent node.
///
/// Idempotent. A `NodeExists` reply while creating an ancestor means another
/// process created it between our existence check and our create call; that
/// counts as success.
///
/// # Errors
///
/// * `LockError::InvalidArgument` - `node_path` is empty or not absolute (no remote call is made)
/// * `LockError::CoordinationServiceFailure` - any other remote failure
pub fn ensure_path(client: &dyn Coordinator, node_path: &str, acl: &[AclEntry]) -> Result<()> {
    path::validate(node_path).map_err(|e| LockError::InvalidArgument(e.to_string()))?;

    if client.exists(node_path)? {
        return Ok(());
    }

    for ancestor in path::ancestors(node_path) {
        if client.exists(ancestor)? {
            continue;
        }
        match client.create_persistent(ancestor, acl) {
            Ok(()) => debug!(path = ancestor, "created namespace node"),
            Err(CoordinationError::NodeExists(_)) => {
                debug!(path = ancestor, "namespace node created concurrently");
            }
            Err(e) => return Err(e.into()),
        }
    }

    Ok(())
}
