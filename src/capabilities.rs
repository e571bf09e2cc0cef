//! Server-advertised capabilities.
//!
//! The review server publishes a nested mapping such as
//! `{"scmtools": {"perforce": {"moved_files": true}}}`. Backends query it by
//! key path to decide whether optional diff features may be used.

use std::path::Path;

use serde_json::Value;

use crate::config::ConfigError;

/// Capability path enabling move headers in Perforce diffs.
pub const PERFORCE_MOVED_FILES: &[&str] = &["scmtools", "perforce", "moved_files"];

/// Capability path enabling empty-file headers in Perforce diffs.
pub const PERFORCE_EMPTY_FILES: &[&str] = &["scmtools", "perforce", "empty_files"];

/// A capability mapping. Missing keys read as disabled.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Capabilities(Value);

impl Capabilities {
    /// Wrap an already-parsed mapping.
    #[must_use]
    pub const fn new(value: Value) -> Self {
        Self(value)
    }

    /// Read a capability mapping from a JSON file.
    ///
    /// # Errors
    /// Returns a [`ConfigError`] naming the file if it cannot be read, or the
    /// line and column if it is not valid JSON.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let error = |message: String| ConfigError {
            path: Some(path.to_owned()),
            message,
        };
        let contents = std::fs::read_to_string(path)
            .map_err(|e| error(format!("could not read file: {e}")))?;
        let value = serde_json::from_str(&contents).map_err(|e| {
            error(format!(
                "line {} column {}: invalid capabilities JSON: {e}",
                e.line(),
                e.column()
            ))
        })?;
        Ok(Self(value))
    }

    /// `true` only if the value at `path` exists and is boolean `true`.
    #[must_use]
    pub fn has_capability(&self, path: &[&str]) -> bool {
        path.iter()
            .try_fold(&self.0, |node, key| node.get(key))
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}
