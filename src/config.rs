//! rbscm configuration (`.rbscm.toml`).
//!
//! Defines the typed configuration for client selection, the Perforce and git
//! executables, and the patch program.

use std::fmt;
use std::path::Path;

use serde::Deserialize;

/// Config file name looked up at the repository root.
pub const CONFIG_FILE: &str = ".rbscm.toml";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level configuration.
///
/// Missing fields use defaults. Missing file → all defaults (no error).
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RbscmConfig {
    /// Client selection.
    #[serde(default)]
    pub client: ClientConfig,

    /// Perforce connection settings.
    #[serde(default)]
    pub perforce: PerforceConfig,

    /// Git settings.
    #[serde(default)]
    pub git: GitConfig,

    /// Patch application settings.
    #[serde(default)]
    pub patch: PatchConfig,
}

// ---------------------------------------------------------------------------
// ClientConfig
// ---------------------------------------------------------------------------

/// Which backend to use.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    /// Backend kind (default: auto-detect).
    #[serde(default)]
    pub kind: ClientKind,
}

/// A revision-control backend.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClientKind {
    /// Pick whichever backend claims the current directory.
    #[default]
    Auto,
    /// Perforce via the `p4` client.
    Perforce,
    /// Git via the `git` executable.
    Git,
}

impl fmt::Display for ClientKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Perforce => write!(f, "perforce"),
            Self::Git => write!(f, "git"),
        }
    }
}

impl std::str::FromStr for ClientKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(Self::Auto),
            "perforce" | "p4" => Ok(Self::Perforce),
            "git" => Ok(Self::Git),
            other => Err(format!(
                "unknown repository type '{other}' (expected auto, perforce or git)"
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// PerforceConfig
// ---------------------------------------------------------------------------

/// Perforce client settings. Unset connection fields fall back to the `p4`
/// environment (`P4PORT`, `P4USER`, `P4CLIENT`, `P4CONFIG`).
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PerforceConfig {
    /// The `p4` executable (default: `"p4"`).
    #[serde(default = "default_p4")]
    pub executable: String,

    /// Server address passed as `-p`.
    #[serde(default)]
    pub port: Option<String>,

    /// User passed as `-u`.
    #[serde(default)]
    pub user: Option<String>,

    /// Client workspace passed as `-c`.
    #[serde(default)]
    pub client: Option<String>,
}

impl Default for PerforceConfig {
    fn default() -> Self {
        Self {
            executable: default_p4(),
            port: None,
            user: None,
            client: None,
        }
    }
}

fn default_p4() -> String {
    "p4".to_owned()
}

// ---------------------------------------------------------------------------
// GitConfig
// ---------------------------------------------------------------------------

/// Git client settings.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GitConfig {
    /// The `git` executable (default: `"git"`).
    #[serde(default = "default_git")]
    pub executable: String,

    /// When set, review diffs are taken against this branch and a parent
    /// diff covers the changes between the original base and it.
    #[serde(default)]
    pub parent_branch: Option<String>,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            executable: default_git(),
            parent_branch: None,
        }
    }
}

fn default_git() -> String {
    "git".to_owned()
}

// ---------------------------------------------------------------------------
// PatchConfig
// ---------------------------------------------------------------------------

/// Patch application settings.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PatchConfig {
    /// The patch program (default: `"patch"`).
    #[serde(default = "default_patch")]
    pub program: String,
}

impl Default for PatchConfig {
    fn default() -> Self {
        Self {
            program: default_patch(),
        }
    }
}

fn default_patch() -> String {
    "patch".to_owned()
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Error loading or parsing configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError {
    /// The path that was being loaded (if available).
    pub path: Option<std::path::PathBuf>,
    /// Human-readable message with line-level detail when possible.
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(p) = &self.path {
            write!(f, "{}: {}", p.display(), self.message)
        } else {
            write!(f, "config error: {}", self.message)
        }
    }
}

impl std::error::Error for ConfigError {}

impl RbscmConfig {
    /// Load configuration from a TOML file.
    ///
    /// - If the file does not exist, returns all defaults (not an error).
    /// - If the file exists but contains invalid TOML or unknown fields,
    ///   returns a [`ConfigError`] with line-level detail.
    ///
    /// # Errors
    /// Returns `ConfigError` on I/O errors (other than not-found) or parse errors.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(ConfigError {
                    path: Some(path.to_owned()),
                    message: format!("could not read file: {e}"),
                });
            }
        };
        Self::parse(&contents).map_err(|mut e| {
            e.path = Some(path.to_owned());
            e
        })
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    /// Returns `ConfigError` on invalid TOML or unknown fields.
    pub fn parse(toml_str: &str) -> Result<Self, ConfigError> {
        toml::from_str(toml_str).map_err(|e| {
            let mut message = e.message().to_owned();
            if let Some(span) = e.span() {
                let line = toml_str[..span.start]
                    .chars()
                    .filter(|&c| c == '\n')
                    .count()
                    + 1;
                message = format!("line {line}: {message}");
            }
            ConfigError {
                path: None,
                message,
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
