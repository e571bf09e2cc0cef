//! Error types for rbscm.
//!
//! Defines [`ScmError`], the error type returned by every client, resolver,
//! synthesizer and patch operation. Messages say what went wrong and, where a
//! user can do something about it, how to fix it.

use std::fmt;

use rbscm_p4::P4Error;

use crate::config::ConfigError;

// ---------------------------------------------------------------------------
// ScmError
// ---------------------------------------------------------------------------

/// Unified error type for revision-control operations.
#[derive(Debug)]
pub enum ScmError {
    /// Revision tokens could not be resolved into a range.
    InvalidRevisionSpec {
        /// Why the tokens were rejected.
        message: String,
    },

    /// More revision tokens were given than the backend accepts.
    TooManyRevisions,

    /// The patch program reported a fatal error.
    Patch {
        /// The command line that was run.
        command: String,
        /// The process exit code.
        exit_code: i32,
        /// Combined stdout and stderr.
        output: String,
    },

    /// A backend's external tool is missing.
    Dependency {
        /// Client name, e.g. `"Perforce"`.
        client: &'static str,
        /// What is missing.
        detail: String,
    },

    /// The backend does not provide this operation.
    NotImplemented {
        /// Client name.
        client: &'static str,
        /// Operation name.
        operation: &'static str,
    },

    /// An operational method was called before a successful `setup()`.
    NotSetUp {
        /// Client name.
        client: &'static str,
    },

    /// No backend recognized the directory as a working copy.
    NoRepository {
        /// The directory that was searched from.
        path: std::path::PathBuf,
    },

    /// A backend command failed.
    Command {
        /// The command line that was run.
        command: String,
        /// Captured output.
        output: String,
    },

    /// A Perforce operation failed.
    P4(P4Error),

    /// Configuration could not be loaded.
    Config(ConfigError),

    /// An I/O error occurred.
    Io(std::io::Error),
}

// ---------------------------------------------------------------------------
// Display
// ---------------------------------------------------------------------------

impl fmt::Display for ScmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidRevisionSpec { message } => {
                write!(f, "invalid revision specification: {message}")
            }
            Self::TooManyRevisions => {
                write!(
                    f,
                    "too many revisions specified.\n  To fix: pass at most two revisions (a base and a tip)."
                )
            }
            Self::Patch {
                command,
                exit_code,
                output,
            } => {
                write!(f, "patch failed (exit code {exit_code}): {command}")?;
                if !output.is_empty() {
                    write!(f, "\n  output: {}", output.trim_end())?;
                }
                Ok(())
            }
            Self::Dependency { client, detail } => {
                write!(
                    f,
                    "{client} is not available: {detail}\n  To fix: install the {client} command-line tools and make sure they are on PATH."
                )
            }
            Self::NotImplemented { client, operation } => {
                write!(f, "{operation} is not supported by the {client} client")
            }
            Self::NotSetUp { client } => {
                write!(
                    f,
                    "the {client} client was used before setup() completed"
                )
            }
            Self::NoRepository { path } => {
                write!(
                    f,
                    "no supported repository found at '{}'.\n  To fix: run from inside a Perforce client workspace or git working tree, or pass --repository-type.",
                    path.display()
                )
            }
            Self::Command { command, output } => {
                write!(f, "command failed: {command}")?;
                if !output.is_empty() {
                    write!(f, "\n  output: {}", output.trim_end())?;
                }
                Ok(())
            }
            Self::P4(err) => write!(f, "perforce error: {err}"),
            Self::Config(err) => {
                write!(
                    f,
                    "configuration error: {err}\n  To fix: edit the config file and correct the issue."
                )
            }
            Self::Io(err) => write!(f, "I/O error: {err}"),
        }
    }
}

// ---------------------------------------------------------------------------
// std::error::Error
// ---------------------------------------------------------------------------

impl std::error::Error for ScmError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::P4(err) => Some(err),
            Self::Config(err) => Some(err),
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// From impls
// ---------------------------------------------------------------------------

impl From<std::io::Error> for ScmError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<P4Error> for ScmError {
    fn from(err: P4Error) -> Self {
        Self::P4(err)
    }
}

impl From<ConfigError> for ScmError {
    fn from(err: ConfigError) -> Self {
        Self::Config(err)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
