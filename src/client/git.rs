//! Git backend.
//!
//! Git produces patch-compatible diffs itself, so [`GitClient`] only
//! resolves revisions and passes the caller's options through to
//! `git diff`.

use std::path::{Path, PathBuf};

use tracing::{debug, instrument};

use super::{ClientFeatures, RepositoryInfo, ScmClient, SetupState};
use crate::config::RbscmConfig;
use crate::diff::{DiffOptions, DiffResult};
use crate::error::ScmError;
use crate::patch::PatchApplier;
use crate::process::{ProcessOutput, ProcessRunner, SystemRunner, command_line};
use crate::revision::{RevisionId, RevisionRange};

const FEATURES: ClientFeatures = ClientFeatures {
    supports_changesets: false,
    supports_commit_history: true,
    supports_diff_extra_args: true,
    supports_diff_exclude_patterns: true,
    supports_no_renames: true,
    supports_parent_diffs: true,
    supports_patch_revert: true,
    can_amend_commit: false,
    can_merge: false,
    can_push_upstream: false,
    can_delete_branch: false,
    can_branch: false,
    can_bookmark: false,
    can_squash_merges: false,
};

/// Client for a git working tree.
pub struct GitClient {
    executable: String,
    cwd: PathBuf,
    parent_branch: Option<String>,
    state: SetupState,
    runner: Box<dyn ProcessRunner>,
    patch_program: String,
}

impl GitClient {
    /// Client running `git` from `cwd`.
    pub fn new(cwd: impl Into<PathBuf>) -> Self {
        Self {
            executable: "git".to_owned(),
            cwd: cwd.into(),
            parent_branch: None,
            state: SetupState::default(),
            runner: Box::new(SystemRunner),
            patch_program: "patch".to_owned(),
        }
    }

    /// Client using the configured executables.
    #[must_use]
    pub fn from_config(config: &RbscmConfig, cwd: &Path) -> Self {
        let mut client = Self::new(cwd).with_patch_program(&config.patch.program);
        client.executable.clone_from(&config.git.executable);
        client.parent_branch.clone_from(&config.git.parent_branch);
        client
    }

    /// Take review diffs against `branch`, with a parent diff up to it.
    #[must_use]
    pub fn with_parent_branch(mut self, branch: impl Into<String>) -> Self {
        self.parent_branch = Some(branch.into());
        self
    }

    /// Use `program` to apply patches.
    #[must_use]
    pub fn with_patch_program(mut self, program: impl Into<String>) -> Self {
        self.patch_program = program.into();
        self
    }

    fn run(&self, args: &[&str]) -> Result<ProcessOutput, ScmError> {
        let args: Vec<String> = args.iter().map(|a| (*a).to_owned()).collect();
        self.run_owned(&args)
    }

    fn run_owned(&self, args: &[String]) -> Result<ProcessOutput, ScmError> {
        self.runner
            .run(&self.executable, args, Some(&self.cwd))
            .map_err(|e| ScmError::Command {
                command: command_line(&self.executable, args),
                output: e.to_string(),
            })
    }

    /// Run and require success; returns trimmed stdout.
    fn stdout(&self, args: &[&str]) -> Result<String, ScmError> {
        let out = self.run(args)?;
        if !out.success() {
            let args: Vec<String> = args.iter().map(|a| (*a).to_owned()).collect();
            return Err(ScmError::Command {
                command: command_line(&self.executable, &args),
                output: out.output,
            });
        }
        Ok(String::from_utf8_lossy(&out.stdout).trim().to_owned())
    }

    /// Full SHA of `rev`, or `InvalidRevisionSpec`.
    fn rev_parse(&self, rev: &str) -> Result<String, ScmError> {
        let spec = format!("{rev}^{{commit}}");
        let out = self.run(&["rev-parse", "--verify", "--quiet", &spec])?;
        if !out.success() {
            return Err(ScmError::InvalidRevisionSpec {
                message: format!("'{rev}' is not a valid git revision"),
            });
        }
        Ok(String::from_utf8_lossy(&out.stdout).trim().to_owned())
    }

    fn resolve(&self, revisions: &[String]) -> Result<RevisionRange, ScmError> {
        match revisions {
            [] => Ok(RevisionRange::new(
                RevisionId::Concrete(self.rev_parse("HEAD")?),
                RevisionId::WorkingCopy,
            )),
            [single] => {
                if let Some((base, tip)) = single.split_once("..") {
                    let or_head = |rev: &str| if rev.is_empty() { "HEAD".to_owned() } else { rev.to_owned() };
                    return Ok(RevisionRange::new(
                        RevisionId::Concrete(self.rev_parse(&or_head(base))?),
                        RevisionId::Concrete(self.rev_parse(&or_head(tip))?),
                    ));
                }
                let tip = self.rev_parse(single)?;
                let base = self.rev_parse(&format!("{tip}^"))?;
                Ok(RevisionRange::new(RevisionId::Concrete(base), RevisionId::Concrete(tip.clone()))
                    .with_commit_id(tip))
            }
            [base, tip] => Ok(RevisionRange::new(
                RevisionId::Concrete(self.rev_parse(base)?),
                RevisionId::Concrete(self.rev_parse(tip)?),
            )),
            _ => Err(ScmError::TooManyRevisions),
        }
    }

    fn diff_between(
        &self,
        base: &str,
        tip: Option<&str>,
        options: &DiffOptions,
    ) -> Result<Vec<u8>, ScmError> {
        let mut args: Vec<String> = ["diff", "--no-color", "--no-ext-diff", "--full-index", "--ignore-submodules"]
            .iter()
            .map(|a| (*a).to_owned())
            .collect();
        args.push(if options.no_renames { "--no-renames" } else { "-M" }.to_owned());
        args.extend(options.extra_args.iter().cloned());
        args.push(base.to_owned());
        args.extend(tip.map(str::to_owned));
        args.push("--".to_owned());
        args.extend(options.include_files.iter().cloned());
        args.extend(
            options
                .exclude_patterns
                .iter()
                .map(|pattern| format!(":(exclude){pattern}")),
        );

        let out = self.run_owned(&args)?;
        if !out.success() {
            return Err(ScmError::Command {
                command: command_line(&self.executable, &args),
                output: out.output,
            });
        }
        Ok(out.stdout)
    }
}

/// Concrete id of a range end for git, `None` for the working tree.
fn git_rev(id: &RevisionId) -> Result<Option<&str>, ScmError> {
    match id {
        RevisionId::Concrete(sha) => Ok(Some(sha)),
        RevisionId::WorkingCopy => Ok(None),
        other => Err(ScmError::InvalidRevisionSpec {
            message: format!("{other} is not a git revision"),
        }),
    }
}

impl ScmClient for GitClient {
    fn scmclient_id(&self) -> &'static str {
        "git"
    }

    fn name(&self) -> &'static str {
        "Git"
    }

    fn features(&self) -> ClientFeatures {
        FEATURES
    }

    fn setup_state(&self) -> &SetupState {
        &self.state
    }

    fn check_dependencies(&self) -> Result<(), ScmError> {
        let dependency = |detail: String| ScmError::Dependency {
            client: "Git",
            detail,
        };
        let out = self
            .runner
            .run(&self.executable, &["--version".to_owned()], None)
            .map_err(|e| dependency(format!("could not run '{}': {e}", self.executable)))?;
        if out.success() {
            Ok(())
        } else {
            Err(dependency(out.output))
        }
    }

    fn patch_applier(&self) -> PatchApplier<'_> {
        PatchApplier::new(self.runner.as_ref(), self.patch_program.as_str(), self.cwd.as_path())
    }

    fn get_local_path(&self) -> Result<Option<PathBuf>, ScmError> {
        self.ensure_ready()?;
        let out = self.run(&["rev-parse", "--show-toplevel"])?;
        if !out.success() {
            return Ok(None);
        }
        let top = String::from_utf8_lossy(&out.stdout).trim().to_owned();
        Ok((!top.is_empty()).then(|| PathBuf::from(top)))
    }

    fn get_repository_info(&self) -> Result<Option<RepositoryInfo>, ScmError> {
        let Some(root) = self.get_local_path()? else {
            return Ok(None);
        };
        let remote = self.run(&["config", "--get", "remote.origin.url"])?;
        let url = String::from_utf8_lossy(&remote.stdout).trim().to_owned();
        let path = if remote.success() && !url.is_empty() {
            url
        } else {
            root.display().to_string()
        };
        let prefix = self.stdout(&["rev-parse", "--show-prefix"])?;
        Ok(Some(RepositoryInfo {
            path: vec![path],
            base_path: Some(format!("/{prefix}")),
            local_path: Some(root),
        }))
    }

    fn scan_for_server(&self) -> Result<Option<String>, ScmError> {
        self.ensure_ready()?;
        let out = self.run(&["config", "--get", "reviewboard.url"])?;
        let url = String::from_utf8_lossy(&out.stdout).trim().to_owned();
        Ok((out.success() && !url.is_empty()).then_some(url))
    }

    fn has_pending_changes(&self) -> Result<bool, ScmError> {
        self.ensure_ready()?;
        Ok(!self
            .stdout(&["status", "--porcelain", "--untracked-files=no"])?
            .is_empty())
    }

    fn parse_revision_spec(&self, revisions: &[String]) -> Result<RevisionRange, ScmError> {
        self.ensure_ready()?;
        let mut range = self.resolve(revisions)?;
        if let Some(parent) = &self.parent_branch {
            let parent = RevisionId::Concrete(self.rev_parse(parent)?);
            if parent != range.base {
                range.parent_base = Some(std::mem::replace(&mut range.base, parent));
            }
        }
        debug!(base = %range.base, tip = %range.tip, parent_base = ?range.parent_base, "resolved revisions");
        Ok(range)
    }

    #[instrument(skip_all, fields(base = %range.base, tip = %range.tip))]
    fn diff(&self, range: &RevisionRange, options: &DiffOptions) -> Result<DiffResult, ScmError> {
        self.ensure_ready()?;
        let base = git_rev(&range.base)?.ok_or_else(|| ScmError::InvalidRevisionSpec {
            message: "the working tree cannot be a diff base".to_owned(),
        })?;
        let tip = git_rev(&range.tip)?;
        let diff = self.diff_between(base, tip, options)?;
        let parent_diff = match range.parent_base.as_ref().map(git_rev).transpose()?.flatten() {
            Some(parent_base) => Some(self.diff_between(parent_base, Some(base), options)?),
            None => None,
        };
        Ok(DiffResult {
            diff,
            parent_diff,
            commit_id: range.commit_id.clone(),
            base_commit_id: Some(base.to_owned()),
            extra_data: None,
        })
    }

    fn get_raw_commit_message(&self, range: &RevisionRange) -> Result<String, ScmError> {
        self.ensure_ready()?;
        let (Some(base), Some(tip)) = (git_rev(&range.base)?, git_rev(&range.tip)?) else {
            return Ok(String::new());
        };
        let span = format!("{base}..{tip}");
        self.stdout(&["log", "--reverse", "--format=%B", &span])
    }
}
