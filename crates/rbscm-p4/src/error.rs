//! Error types for Perforce operations.
//!
//! [`P4Error`] is the single error type returned by all
//! [`P4Repo`](crate::P4Repo) trait methods.

use thiserror::Error;

/// Errors returned by [`P4Repo`](crate::P4Repo) operations.
#[derive(Debug, Error)]
pub enum P4Error {
    /// A requested changelist, file or revision was not found.
    #[error("not found: {message}")]
    NotFound {
        /// Human-readable description of what was missing.
        message: String,
    },

    /// The `p4` executable could not be started.
    #[error("`{program}` could not be run: {source}")]
    NotInstalled {
        /// The program that was invoked.
        program: String,
        /// The spawn failure.
        #[source]
        source: std::io::Error,
    },

    /// A `p4` command exited unsuccessfully.
    #[error("`{command}` failed (exit code {}): {stderr}", exit_code.map_or_else(|| "none".to_owned(), |c| c.to_string()))]
    CommandFailed {
        /// The command line that was run.
        command: String,
        /// Process exit code, if the process exited normally.
        exit_code: Option<i32>,
        /// Captured stderr.
        stderr: String,
    },

    /// Command output could not be interpreted.
    #[error("could not parse p4 output: {message}")]
    Parse {
        /// What was wrong with the output.
        message: String,
    },

    /// An I/O error occurred (scratch files, working copy files).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
