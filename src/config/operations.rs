//! Config loading, validation, and utility operations.

use super::model::LockConfig;
use crate::coordination::path;
use crate::error::{LockError, Result};
use std::path::Path;
use std::time::Duration;

impl LockConfig {
    /// Load config from a YAML file.
    ///
    /// Unknown fields in the YAML are silently ignored for forward compatibility.
    ///
    /// # Returns
    ///
    /// * `Ok(LockConfig)` - Successfully loaded and validated config
    /// * `Err(LockError::Config)` - Read error, parse error or validation failure
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path).map_err(|e| {
            LockError::Config(format!(
                "failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;

        Self::from_yaml(&content)
    }

    /// Parse config from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        // An empty document deserializes as null rather than an empty mapping.
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }

        let config: LockConfig = serde_yaml::from_str(yaml)
            .map_err(|e| LockError::Config(format!("failed to parse config YAML: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Serialize config to YAML string.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self)
            .map_err(|e| LockError::Config(format!("failed to serialize config to YAML: {}", e)))
    }

    /// Validate config values and return error on invalid values.
    ///
    /// Validation rules:
    /// - `base_path` must be a well-formed absolute path other than the root
    /// - `node_prefix` must be non-empty and contain no separator
    /// - `acl` must have at least one entry
    pub fn validate(&self) -> Result<()> {
        path::validate(&self.base_path).map_err(|e| {
            LockError::Config(format!("config validation failed: base_path: {}", e))
        })?;
        if self.base_path == path::ROOT {
            return Err(LockError::Config(
                "config validation failed: base_path must not be the namespace root".to_string(),
            ));
        }

        if self.node_prefix.is_empty() || self.node_prefix.contains(path::SEPARATOR) {
            return Err(LockError::Config(format!(
                "config validation failed: node_prefix must be non-empty and must not contain '{}' (found '{}')",
                path::SEPARATOR,
                self.node_prefix
            )));
        }

        if self.acl.is_empty() {
            return Err(LockError::Config(
                "config validation failed: acl must have at least one entry".to_string(),
            ));
        }

        Ok(())
    }

    /// The configured acquisition bound, if any.
    pub fn acquire_timeout(&self) -> Option<Duration> {
        self.acquire_timeout_ms.map(Duration::from_millis)
    }
}
