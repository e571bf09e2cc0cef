//! Applying unified diffs to a working tree.
//!
//! A diff is generated relative to some directory of the repository (its
//! base path) but may be applied from a different directory. The applier
//! derives how many leading path components `patch` must strip, runs the
//! patch program, and classifies its output.
//!
//! Output classification:
//! - an exit code other than 0 or 2 is fatal;
//! - a `patch: **** ` preamble is fatal, except the exact "only garbage"
//!   message, which is what `patch` prints for a diff made only of empty-file
//!   headers;
//! - for backends that write empty-file headers, an only-garbage result with
//!   no empty files applied is fatal;
//! - anything else returns a [`PatchOutcome`], with `applied` set when the
//!   patch program exited 0.
//!
//! Appliers can run `patch` with `-E` so files whose content is fully removed
//! are deleted. Backends that carry empty files as separate headers use it.

pub mod empty_files;

use std::io::Write as _;
use std::path::PathBuf;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use tracing::{debug, error, instrument};

use crate::error::ScmError;
use crate::process::{ProcessRunner, command_line};

/// The one fatal-looking message that is not fatal on its own.
pub const ONLY_GARBAGE: &str = "patch: **** Only garbage was found in the patch input.\n";

const FATAL_PREFIX: &str = "patch: **** ";

/// Exit code `patch` uses for trouble, including an only-garbage input.
const EXIT_TROUBLE: i32 = 2;

static SEPARATOR_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^/]*/+").expect("separator pattern is valid"));

static REJECT_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)FAILED -- saving rejects to file (.+)\.rej$")
        .expect("reject pattern is valid")
});

// ---------------------------------------------------------------------------
// Strip-count helpers
// ---------------------------------------------------------------------------

/// Number of leading components to strip so a diff generated relative to
/// `base_path` applies from `base_dir`.
///
/// `None` means no `-p` argument: `base_path` is empty, or `base_dir` is not
/// beneath it.
#[must_use]
pub fn p_number(base_path: &str, base_dir: &str) -> Option<usize> {
    if !base_path.is_empty() && base_dir.starts_with(base_path) {
        Some(base_path.matches('/').count() + 1)
    } else {
        None
    }
}

/// Remove `count` leading components from `path` the way `patch -p<count>`
/// does, treating any run of slashes as one separator.
///
/// With fewer separators than `count`, only the last component remains.
#[must_use]
pub fn strip_p_num_slashes(path: &str, count: usize) -> String {
    if count == 0 {
        return path.to_owned();
    }
    SEPARATOR_RUN.replacen(path, count, "").into_owned()
}

// ---------------------------------------------------------------------------
// Request / outcome
// ---------------------------------------------------------------------------

/// One patch to apply.
#[derive(Clone, Copy, Debug)]
pub struct PatchRequest<'a> {
    /// Unified diff bytes.
    pub diff: &'a [u8],
    /// Directory the diff was generated relative to.
    pub base_path: &'a str,
    /// Directory the patch is being applied from.
    pub base_dir: &'a str,
    /// Explicit strip count; overrides derivation, including `Some(0)`.
    pub strip_count: Option<usize>,
    /// Apply in reverse.
    pub revert: bool,
}

impl<'a> PatchRequest<'a> {
    /// A forward patch with a derived strip count and no base path.
    #[must_use]
    pub const fn new(diff: &'a [u8]) -> Self {
        Self {
            diff,
            base_path: "",
            base_dir: "",
            strip_count: None,
            revert: false,
        }
    }

    /// The strip count that will be passed to `patch`.
    #[must_use]
    pub fn effective_strip_count(&self) -> Option<usize> {
        self.strip_count
            .or_else(|| p_number(self.base_path, self.base_dir))
    }
}

/// Result of applying a patch.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PatchOutcome {
    /// Whether the whole patch applied.
    pub applied: bool,
    /// Output of the patch program.
    pub output: String,
    /// Files for which `patch` wrote `.rej` files.
    pub rejected_files: Vec<String>,
}

/// Backend hook applying the empty-file headers `patch` skips.
pub trait EmptyFilePatcher {
    /// Apply every empty-file header in `patch`; `true` if any were applied.
    ///
    /// # Errors
    /// Returns an error if the backend failed to add or delete a file.
    fn apply_empty_files(
        &self,
        patch: &[u8],
        strip_count: Option<usize>,
        revert: bool,
    ) -> Result<bool, ScmError>;
}

// ---------------------------------------------------------------------------
// PatchApplier
// ---------------------------------------------------------------------------

/// Runs the patch program in a working directory.
pub struct PatchApplier<'a> {
    runner: &'a dyn ProcessRunner,
    program: String,
    working_dir: PathBuf,
    remove_empty_files: bool,
}

impl<'a> PatchApplier<'a> {
    /// Create an applier running `program` from `working_dir`.
    #[must_use]
    pub fn new(
        runner: &'a dyn ProcessRunner,
        program: impl Into<String>,
        working_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            runner,
            program: program.into(),
            working_dir: working_dir.into(),
            remove_empty_files: false,
        }
    }

    /// Pass `-E` so files left empty by the patch are removed.
    #[must_use]
    pub const fn with_remove_empty_files(mut self, remove: bool) -> Self {
        self.remove_empty_files = remove;
        self
    }

    /// Apply `request`. Pass `empty_files` when the backend supports
    /// empty-file headers.
    ///
    /// # Errors
    /// [`ScmError::Patch`] for an exit code other than 0 or 2, fatal patch
    /// output, or an only-garbage patch with no empty files; [`ScmError::Command`] if the patch program could
    /// not be started; I/O errors writing the temporary diff file.
    #[instrument(skip_all, fields(revert = request.revert))]
    pub fn apply(
        &self,
        request: &PatchRequest<'_>,
        empty_files: Option<&dyn EmptyFilePatcher>,
    ) -> Result<PatchOutcome, ScmError> {
        let strip_count = request.effective_strip_count();

        let mut file = tempfile::Builder::new()
            .prefix("rbscm-patch.")
            .suffix(".diff")
            .tempfile()?;
        file.write_all(request.diff)?;
        file.flush()?;

        let mut args = Vec::new();
        if request.revert {
            args.push("-R".to_owned());
        }
        if self.remove_empty_files {
            args.push("-E".to_owned());
        }
        if let Some(n) = strip_count {
            args.push(format!("-p{n}"));
        }
        args.push("-i".to_owned());
        args.push(file.path().display().to_string());
        let command = command_line(&self.program, &args);

        let out = self
            .runner
            .run(&self.program, &args, Some(&self.working_dir))
            .map_err(|e| ScmError::Command {
                command: command.clone(),
                output: e.to_string(),
            })?;
        debug!(exit_code = out.exit_code, "patch finished");

        let fatal = || ScmError::Patch {
            command: command.clone(),
            exit_code: out.exit_code,
            output: out.output.clone(),
        };
        if out.exit_code != 0 && out.exit_code != EXIT_TROUBLE {
            return Err(fatal());
        }
        let only_garbage = out.output == ONLY_GARBAGE;
        if out.output.starts_with(FATAL_PREFIX) && !only_garbage {
            return Err(fatal());
        }

        let mut applied = out.exit_code == 0;
        if let Some(patcher) = empty_files {
            let patch = match std::fs::read(file.path()) {
                Ok(patch) => patch,
                Err(e) => {
                    error!(path = %file.path().display(), error = %e, "unable to read patch file");
                    return Ok(outcome(false, out.output));
                }
            };
            let patched_empty = patcher.apply_empty_files(&patch, strip_count, request.revert)?;
            if only_garbage {
                if !patched_empty {
                    return Err(fatal());
                }
                applied = true;
            }
        }

        Ok(outcome(applied, out.output))
    }
}

fn outcome(applied: bool, output: String) -> PatchOutcome {
    let rejected_files = REJECT_LINE
        .captures_iter(&output)
        .map(|caps| caps[1].to_owned())
        .collect();
    PatchOutcome {
        applied,
        output,
        rejected_files,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
