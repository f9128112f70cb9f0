//! Implementation of the `queue-lock config` command.
//!
//! Loads a configuration file (or the defaults), validates it, and prints the
//! effective settings as YAML with every default filled in.

use crate::cli::ConfigArgs;
use queue_lock::{LockConfig, Result};
use std::path::Path;

/// Execute the `queue-lock config` command.
pub fn cmd_config(args: ConfigArgs) -> Result<()> {
    print!("{}", effective_config(args.file.as_deref())?);
    Ok(())
}

/// The effective configuration for `file`, rendered as YAML.
pub fn effective_config(file: Option<&Path>) -> Result<String> {
    let config = match file {
        Some(file) => LockConfig::load(file)?,
        None => LockConfig::default(),
    };
    config.to_yaml()
}

#[cfg(test)]
mod tests {
    use super::*;
    use queue_lock::LockError;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn defaults_without_file() {
        let yaml = effective_config(None).unwrap();
        assert!(yaml.contains("base_path: /queue-lock"));
        assert!(yaml.contains("node_prefix: lock-"));
        assert!(yaml.contains("scheme: world"));
    }

    #[test]
    fn fills_in_missing_fields() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("lock.yaml");
        fs::write(&file, "base_path: /jobs/nightly\nacquire_timeout_ms: 1500\n").unwrap();

        let yaml = effective_config(Some(&file)).unwrap();

        assert!(yaml.contains("base_path: /jobs/nightly"));
        assert!(yaml.contains("node_prefix: lock-"));
        assert!(yaml.contains("acquire_timeout_ms: 1500"));
    }

    #[test]
    fn rejects_invalid_file() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("lock.yaml");
        fs::write(&file, "base_path: relative/path\n").unwrap();

        let err = effective_config(Some(&file)).unwrap_err();

        assert!(matches!(err, LockError::Config(_)));
        assert_eq!(err.exit_code(), queue_lock::exit_codes::USER_ERROR);
    }
}
