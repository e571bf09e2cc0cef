//! Perforce backend.
//!
//! Perforce cannot produce a patch-compatible diff, so [`PerforceClient`]
//! lists the files a changelist touches and hands them to the
//! [`DiffSynthesizer`] together with a [`SnapshotStore`] that prints file
//! revisions from the server.

use std::path::{Path, PathBuf};

use rbscm_p4::{ChangeStatus, P4Cli, P4Repo, ServerVersion};
use tracing::{debug, error, instrument, warn};

use super::{ClientFeatures, RepositoryInfo, ScmClient, SetupState};
use crate::capabilities::{Capabilities, PERFORCE_EMPTY_FILES, PERFORCE_MOVED_FILES};
use crate::config::RbscmConfig;
use crate::diff::{
    ChangedFileRecord, DiffOptions, DiffResult, DiffSynthesizer, SnapshotRevision, SnapshotStore,
};
use crate::error::ScmError;
use crate::patch::empty_files::{self, EmptyFileOp};
use crate::patch::{PatchApplier, strip_p_num_slashes};
use crate::process::{ProcessRunner, SystemRunner};
use crate::revision::{DEFAULT_CHANGELIST, RevisionId, RevisionRange, RevisionResolver, parse_change};

/// Counter naming the repository on the review server.
const REPOSITORY_NAME_COUNTER: &str = "reviewboard.repository_name";

/// Counter holding the review server URL.
const SERVER_URL_COUNTER: &str = "reviewboard.url";

const FEATURES: ClientFeatures = ClientFeatures {
    supports_changesets: true,
    supports_commit_history: false,
    supports_diff_extra_args: false,
    supports_diff_exclude_patterns: true,
    supports_no_renames: true,
    supports_parent_diffs: false,
    supports_patch_revert: true,
    can_amend_commit: false,
    can_merge: false,
    can_push_upstream: false,
    can_delete_branch: false,
    can_branch: false,
    can_bookmark: false,
    can_squash_merges: false,
};

// ---------------------------------------------------------------------------
// PerforceClient
// ---------------------------------------------------------------------------

/// Client for a Perforce workspace.
pub struct PerforceClient<P: P4Repo = P4Cli> {
    p4: P,
    cwd: PathBuf,
    state: SetupState,
    capabilities: Option<Capabilities>,
    runner: Box<dyn ProcessRunner>,
    patch_program: String,
}

impl PerforceClient<P4Cli> {
    /// Client running the configured `p4` executable from `cwd`.
    #[must_use]
    pub fn from_config(config: &RbscmConfig, cwd: &Path) -> Self {
        let p4 = P4Cli::new(&config.perforce.executable)
            .with_cwd(cwd)
            .with_port(config.perforce.port.clone())
            .with_user(config.perforce.user.clone())
            .with_client(config.perforce.client.clone());
        Self::new(p4, cwd).with_patch_program(&config.patch.program)
    }
}

impl<P: P4Repo> PerforceClient<P> {
    /// Client over `p4` operating from `cwd`.
    pub fn new(p4: P, cwd: impl Into<PathBuf>) -> Self {
        Self {
            p4,
            cwd: cwd.into(),
            state: SetupState::default(),
            capabilities: None,
            runner: Box::new(SystemRunner),
            patch_program: "patch".to_owned(),
        }
    }

    /// Run the patch program through `runner`.
    #[must_use]
    pub fn with_runner(mut self, runner: impl ProcessRunner + 'static) -> Self {
        self.runner = Box::new(runner);
        self
    }

    /// Use `program` to apply patches.
    #[must_use]
    pub fn with_patch_program(mut self, program: impl Into<String>) -> Self {
        self.patch_program = program.into();
        self
    }

    /// The underlying Perforce access.
    pub const fn p4(&self) -> &P {
        &self.p4
    }

    /// Version of the server this client talks to, if it reports one.
    ///
    /// # Errors
    /// Returns an error if `p4 info` fails or the version banner is malformed.
    pub fn server_version(&self) -> Result<Option<ServerVersion>, ScmError> {
        let info = self.p4.info()?;
        info.server_version
            .as_deref()
            .map(ServerVersion::parse)
            .transpose()
            .map_err(|e| ScmError::Command {
                command: "p4 info".to_owned(),
                output: e.to_string(),
            })
    }

    fn has_capability(&self, path: &[&str]) -> bool {
        self.capabilities
            .as_ref()
            .is_some_and(|caps| caps.has_capability(path))
    }

    fn client_root(&self) -> Result<Option<PathBuf>, ScmError> {
        Ok(self.p4.info()?.client_root.map(PathBuf::from))
    }

    /// Files touched by `range` and whether the tip is a shelved changelist.
    fn changed_files(&self, range: &RevisionRange) -> Result<(Vec<ChangedFileRecord>, bool), ScmError> {
        match (&range.base, &range.tip) {
            (RevisionId::CurrentSync, RevisionId::Pending(change)) => {
                let shelved = change != DEFAULT_CHANGELIST
                    && self
                        .p4
                        .change(change)?
                        .is_some_and(|info| info.status == ChangeStatus::Shelved);
                let files = if shelved {
                    self.p4.describe_shelved(change)?
                } else {
                    self.p4.opened(change)?
                };
                Ok((files.into_iter().map(Into::into).collect(), shelved))
            }
            (RevisionId::Concrete(base), RevisionId::Concrete(tip)) => {
                let changes = if range.commit_id.as_deref() == Some(tip.as_str()) {
                    vec![tip.clone()]
                } else {
                    self.p4
                        .submitted_changes(parse_change(base)?, parse_change(tip)?)?
                };
                let mut records = Vec::new();
                for change in changes {
                    records.extend(self.p4.describe(&change)?.into_iter().map(Into::into));
                }
                Ok((records, false))
            }
            (base, tip) => Err(ScmError::InvalidRevisionSpec {
                message: format!("cannot diff from {base} to {tip} in Perforce"),
            }),
        }
    }

    /// Rewrite exclude patterns so they compare against depot or absolute
    /// local paths: depot patterns are kept, `/x` is relative to the client
    /// root, anything else is relative to the current directory.
    ///
    /// # Errors
    /// Returns an error if the client root is needed and `p4 info` fails.
    pub fn normalize_exclude_patterns(&self, patterns: &[String]) -> Result<Vec<String>, ScmError> {
        let root_relative = |p: &String| p.starts_with('/') && !p.starts_with("//");
        let root = if patterns.iter().any(root_relative) {
            self.client_root()?.unwrap_or_else(|| PathBuf::from("/"))
        } else {
            PathBuf::from("/")
        };
        let mut normalized = Vec::with_capacity(patterns.len());
        for pattern in patterns {
            if pattern.starts_with("//") {
                normalized.push(pattern.clone());
            } else if let Some(rest) = pattern.strip_prefix('/') {
                normalized.push(root.join(rest).display().to_string());
            } else {
                normalized.push(self.cwd.join(pattern).display().to_string());
            }
        }
        Ok(normalized)
    }

    /// Apply include and exclude filters.
    fn filter(
        &self,
        records: Vec<ChangedFileRecord>,
        options: &DiffOptions,
    ) -> Result<Vec<ChangedFileRecord>, ScmError> {
        if options.include_files.is_empty() && options.exclude_patterns.is_empty() {
            return Ok(records);
        }
        let includes: Vec<String> = options
            .include_files
            .iter()
            .map(|path| {
                if path.starts_with("//") {
                    path.clone()
                } else {
                    self.cwd.join(path).display().to_string()
                }
            })
            .collect();
        let excludes: Vec<glob::Pattern> = self
            .normalize_exclude_patterns(&options.exclude_patterns)?
            .iter()
            .map(|p| {
                glob::Pattern::new(p).unwrap_or_else(|e| {
                    warn!(pattern = %p, error = %e, "invalid exclude pattern, matching it literally");
                    glob::Pattern::new(&glob::Pattern::escape(p))
                        .expect("escaped pattern is valid")
                })
            })
            .collect();

        let mut kept = Vec::with_capacity(records.len());
        for record in records {
            let local = self
                .p4
                .where_local(&record.depot_path)?
                .map(|p| p.display().to_string());
            let names: Vec<&str> = std::iter::once(record.depot_path.as_str())
                .chain(local.as_deref())
                .collect();
            if !includes.is_empty() && !names.iter().any(|n| includes.iter().any(|i| i == n)) {
                continue;
            }
            if names.iter().any(|n| excludes.iter().any(|p| p.matches(n))) {
                debug!(path = %record.depot_path, "excluded from diff");
                continue;
            }
            kept.push(record);
        }
        Ok(kept)
    }
}

// ---------------------------------------------------------------------------
// ScmClient
// ---------------------------------------------------------------------------

impl<P: P4Repo> ScmClient for PerforceClient<P> {
    fn scmclient_id(&self) -> &'static str {
        "perforce"
    }

    fn name(&self) -> &'static str {
        "Perforce"
    }

    fn features(&self) -> ClientFeatures {
        FEATURES
    }

    fn setup_state(&self) -> &SetupState {
        &self.state
    }

    fn check_dependencies(&self) -> Result<(), ScmError> {
        self.p4.check_installed().map_err(|e| ScmError::Dependency {
            client: "Perforce",
            detail: e.to_string(),
        })
    }

    /// Synthesized deletes keep a timestamp on the new side, so `patch` only
    /// removes the emptied file with `-E`. Empty files travel as headers.
    fn patch_applier(&self) -> PatchApplier<'_> {
        PatchApplier::new(self.runner.as_ref(), self.patch_program.as_str(), self.cwd.as_path())
            .with_remove_empty_files(true)
    }

    fn set_capabilities(&mut self, capabilities: Capabilities) {
        self.capabilities = Some(capabilities);
    }

    fn get_local_path(&self) -> Result<Option<PathBuf>, ScmError> {
        self.ensure_ready()?;
        Ok(self
            .client_root()?
            .filter(|root| self.cwd.starts_with(root)))
    }

    fn get_repository_info(&self) -> Result<Option<RepositoryInfo>, ScmError> {
        self.ensure_ready()?;
        let info = self.p4.info()?;
        let Some(root) = info.client_root.as_deref().map(PathBuf::from) else {
            return Ok(None);
        };
        if !self.cwd.starts_with(&root) {
            debug!(cwd = %self.cwd.display(), root = %root.display(), "outside the client root");
            return Ok(None);
        }
        let Some((address, encrypted)) = info.connection() else {
            return Ok(None);
        };
        let path = if encrypted {
            vec![format!("ssl:{address}"), address.to_owned()]
        } else {
            vec![address.to_owned()]
        };
        Ok(Some(RepositoryInfo {
            path,
            base_path: None,
            local_path: Some(root),
        }))
    }

    fn get_repository_name(&self) -> Result<Option<String>, ScmError> {
        self.ensure_ready()?;
        Ok(self.p4.counters()?.remove(REPOSITORY_NAME_COUNTER))
    }

    fn scan_for_server(&self) -> Result<Option<String>, ScmError> {
        self.ensure_ready()?;
        let counters = self.p4.counters()?;
        if let Some(url) = counters.get(SERVER_URL_COUNTER) {
            return Ok(Some(url.clone()));
        }
        // Counter names cannot hold '/', so the URL may be encoded in the
        // name itself with '|' standing in.
        let prefix = format!("{SERVER_URL_COUNTER}.");
        Ok(counters
            .keys()
            .find_map(|key| key.strip_prefix(&prefix))
            .map(|encoded| encoded.replace('|', "/")))
    }

    fn parse_revision_spec(&self, revisions: &[String]) -> Result<RevisionRange, ScmError> {
        self.ensure_ready()?;
        RevisionResolver::new(&self.p4).resolve(revisions)
    }

    fn get_changenum(&self, range: &RevisionRange) -> Option<String> {
        match &range.tip {
            RevisionId::Pending(change) if change != DEFAULT_CHANGELIST => Some(change.clone()),
            _ => None,
        }
    }

    #[instrument(skip_all, fields(base = %range.base, tip = %range.tip))]
    fn diff(&self, range: &RevisionRange, options: &DiffOptions) -> Result<DiffResult, ScmError> {
        self.ensure_ready()?;
        let (records, shelved) = self.changed_files(range)?;
        let records = self.filter(records, options)?;
        let move_detection = !options.no_renames && self.has_capability(PERFORCE_MOVED_FILES);
        debug!(files = records.len(), shelved, move_detection, "diffing changelist");

        let store = P4SnapshotStore {
            p4: &self.p4,
            shelved,
        };
        DiffSynthesizer::new(&store).synthesize(range, &records, move_detection)
    }

    fn get_raw_commit_message(&self, range: &RevisionRange) -> Result<String, ScmError> {
        self.ensure_ready()?;
        let change = match &range.tip {
            RevisionId::Pending(change) if change != DEFAULT_CHANGELIST => change,
            RevisionId::Concrete(change) => change,
            _ => return Ok(String::new()),
        };
        Ok(self
            .p4
            .change(change)?
            .map(|info| info.description)
            .unwrap_or_default())
    }

    fn supports_empty_files(&self) -> bool {
        self.has_capability(PERFORCE_EMPTY_FILES)
    }

    fn apply_patch_for_empty_files(
        &self,
        patch: &[u8],
        strip_count: Option<usize>,
        revert: bool,
    ) -> Result<bool, ScmError> {
        self.ensure_ready()?;
        let strip = strip_count.unwrap_or(0);
        let mut added = Vec::new();
        let mut deleted = Vec::new();
        for header in empty_files::parse(patch) {
            let local = self.cwd.join(strip_p_num_slashes(&header.local_path, strip));
            let op = if revert { header.op.reversed() } else { header.op };
            match op {
                EmptyFileOp::Added => added.push(local),
                EmptyFileOp::Deleted => deleted.push(local),
            }
        }

        let mut patched = false;
        if !added.is_empty() {
            for path in &added {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::File::create(path)?;
            }
            match self.p4.add(&added) {
                Ok(()) => patched = true,
                Err(e) => error!(files = ?added, error = %e, "unable to open empty files for add"),
            }
        }
        if !deleted.is_empty() {
            match self.p4.delete(&deleted) {
                Ok(()) => patched = true,
                Err(e) => error!(files = ?deleted, error = %e, "unable to open empty files for delete"),
            }
        }
        Ok(patched)
    }
}

// ---------------------------------------------------------------------------
// Snapshots
// ---------------------------------------------------------------------------

/// Fetches revisions with `p4 print` and pending content from the workspace
/// or the shelf.
struct P4SnapshotStore<'a, P: P4Repo> {
    p4: &'a P,
    shelved: bool,
}

impl<P: P4Repo> SnapshotStore for P4SnapshotStore<'_, P> {
    fn materialize(
        &self,
        depot_path: &str,
        revision: &SnapshotRevision,
        dest: &Path,
    ) -> Result<(), ScmError> {
        match revision {
            SnapshotRevision::Number(n) => {
                self.p4.print_to(&format!("{depot_path}#{n}"), dest)?;
            }
            SnapshotRevision::Pending(change) if self.shelved => {
                self.p4.print_to(&format!("{depot_path}@={change}"), dest)?;
            }
            SnapshotRevision::Pending(_) => {
                let local = self.p4.where_local(depot_path)?.ok_or_else(|| ScmError::Command {
                    command: format!("p4 where {depot_path}"),
                    output: "file is not mapped in this client".to_owned(),
                })?;
                std::fs::copy(&local, dest)?;
            }
        }
        Ok(())
    }

    fn local_path(&self, depot_path: &str) -> Result<Option<PathBuf>, ScmError> {
        Ok(self.p4.where_local(depot_path)?)
    }

    fn move_target(&self, depot_path: &str) -> Result<Option<String>, ScmError> {
        Ok(self.p4.fstat(depot_path)?.moved_file)
    }
}
