//! The client contract every revision-control backend implements.
//!
//! [`ScmClient`] is the interface between the CLI layer and a backend.
//! Backends declare what they support through static [`ClientFeatures`], go
//! through a one-time [`setup`](ScmClient::setup) that probes for their
//! external tools, and then serve revision parsing, diffing and patching.
//!
//! Operations a backend does not override return
//! [`ScmError::NotImplemented`], except the few with a neutral answer
//! (no repository name, no changelist number, no empty-file support).

pub mod git;
pub mod perforce;

use std::cell::{Cell, OnceCell};
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, warn};

use crate::capabilities::Capabilities;
use crate::config::{ClientKind, RbscmConfig};
use crate::diff::{DiffOptions, DiffResult};
use crate::error::ScmError;
use crate::patch::{EmptyFilePatcher, PatchApplier, PatchOutcome, PatchRequest};
use crate::revision::RevisionRange;

pub use git::GitClient;
pub use perforce::PerforceClient;

// ---------------------------------------------------------------------------
// ClientFeatures
// ---------------------------------------------------------------------------

/// What a backend supports, fixed per backend type.
#[allow(clippy::struct_excessive_bools)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ClientFeatures {
    /// Changes are grouped into server-side changesets.
    pub supports_changesets: bool,
    /// Individual commits can be listed.
    pub supports_commit_history: bool,
    /// Extra arguments are passed through to the native diff tool.
    pub supports_diff_extra_args: bool,
    /// Exclude patterns are honored.
    pub supports_diff_exclude_patterns: bool,
    /// Rename detection can be turned off.
    pub supports_no_renames: bool,
    /// Parent diffs can be produced.
    pub supports_parent_diffs: bool,
    /// Patches can be applied in reverse.
    pub supports_patch_revert: bool,
    /// The last commit can be amended.
    pub can_amend_commit: bool,
    /// Branches can be merged.
    pub can_merge: bool,
    /// Changes can be pushed upstream.
    pub can_push_upstream: bool,
    /// Branches can be deleted.
    pub can_delete_branch: bool,
    /// Branches can be created.
    pub can_branch: bool,
    /// Bookmarks can be created.
    pub can_bookmark: bool,
    /// Merges can be squashed.
    pub can_squash_merges: bool,
}

// ---------------------------------------------------------------------------
// Setup lifecycle
// ---------------------------------------------------------------------------

/// Where a client is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClientStatus {
    /// `setup()` has not succeeded yet and dependencies were not probed, or
    /// were probed successfully by `has_dependencies()` alone.
    Uninitialized,
    /// Dependencies are present and operations may be called.
    Ready,
    /// The dependency probe failed; the failure is cached.
    Failed,
}

/// Per-client lifecycle state. The dependency probe runs at most once.
#[derive(Debug, Default)]
pub struct SetupState {
    missing: OnceCell<Option<String>>,
    ready: Cell<bool>,
}

impl SetupState {
    /// Current status.
    #[must_use]
    pub fn status(&self) -> ClientStatus {
        if self.ready.get() {
            ClientStatus::Ready
        } else if matches!(self.missing.get(), Some(Some(_))) {
            ClientStatus::Failed
        } else {
            ClientStatus::Uninitialized
        }
    }

    /// Run `probe` the first time; later calls return the cached result.
    /// `None` means everything is present.
    fn dependencies(&self, probe: impl FnOnce() -> Result<(), ScmError>) -> Option<&str> {
        self.missing
            .get_or_init(|| match probe() {
                Ok(()) => None,
                Err(ScmError::Dependency { detail, .. }) => Some(detail),
                Err(e) => Some(e.to_string()),
            })
            .as_deref()
    }
}

// ---------------------------------------------------------------------------
// Repository metadata
// ---------------------------------------------------------------------------

/// Where a working copy lives and how the review server should name it.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RepositoryInfo {
    /// Server paths for the repository, most specific first.
    pub path: Vec<String>,
    /// Path within the repository that diffs are relative to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_path: Option<String>,
    /// Root of the local working copy.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_path: Option<PathBuf>,
}

/// A commit message split for a review request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CommitMessage {
    /// First line.
    pub summary: String,
    /// Remaining lines, trimmed.
    pub description: String,
}

impl CommitMessage {
    /// Split a raw message; `None` if it has no lines.
    #[must_use]
    pub fn from_raw(raw: &str) -> Option<Self> {
        let mut lines = raw.lines();
        let summary = lines.next()?.to_owned();
        let description = lines.collect::<Vec<_>>().join("\n").trim().to_owned();
        Some(Self {
            summary,
            description,
        })
    }
}

// ---------------------------------------------------------------------------
// ScmClient
// ---------------------------------------------------------------------------

/// A revision-control backend.
///
/// # Lifecycle
///
/// A new client is `Uninitialized`. [`setup`](Self::setup) probes the
/// backend's tools once: success makes the client `Ready`, failure makes it
/// `Failed` and returns [`ScmError::Dependency`], which later calls return
/// again without re-probing. Operational methods return
/// [`ScmError::NotSetUp`] until the client is `Ready`.
#[allow(clippy::missing_errors_doc)]
pub trait ScmClient {
    /// Stable identifier, e.g. `"perforce"`.
    fn scmclient_id(&self) -> &'static str;

    /// Display name, e.g. `"Perforce"`.
    fn name(&self) -> &'static str;

    /// Static feature flags.
    fn features(&self) -> ClientFeatures;

    /// Lifecycle state storage.
    fn setup_state(&self) -> &SetupState;

    /// Probe for the backend's external tools.
    fn check_dependencies(&self) -> Result<(), ScmError>;

    /// Patch applier configured for this client's working directory.
    fn patch_applier(&self) -> PatchApplier<'_>;

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Probe dependencies (once) and move to `Ready`.
    fn setup(&self) -> Result<(), ScmError> {
        let state = self.setup_state();
        if state.status() == ClientStatus::Ready {
            return Ok(());
        }
        match state.dependencies(|| self.check_dependencies()) {
            None => {
                state.ready.set(true);
                debug!(client = self.name(), "client ready");
                Ok(())
            }
            Some(detail) => Err(ScmError::Dependency {
                client: self.name(),
                detail: detail.to_owned(),
            }),
        }
    }

    /// Whether the backend's tools are present. Probes at most once.
    fn has_dependencies(&self) -> bool {
        self.setup_state()
            .dependencies(|| self.check_dependencies())
            .is_none()
    }

    /// Fail with [`ScmError::NotSetUp`] unless the client is `Ready`.
    fn ensure_ready(&self) -> Result<(), ScmError> {
        if self.setup_state().status() == ClientStatus::Ready {
            Ok(())
        } else {
            Err(ScmError::NotSetUp {
                client: self.name(),
            })
        }
    }

    /// Provide the review server's capability mapping.
    fn set_capabilities(&mut self, _capabilities: Capabilities) {}

    // -----------------------------------------------------------------------
    // Repository
    // -----------------------------------------------------------------------

    /// Root of the working copy containing the current directory.
    fn get_local_path(&self) -> Result<Option<PathBuf>, ScmError> {
        Err(self.not_implemented("get_local_path"))
    }

    /// Repository location, or `None` outside a working copy.
    fn get_repository_info(&self) -> Result<Option<RepositoryInfo>, ScmError> {
        Err(self.not_implemented("get_repository_info"))
    }

    /// Repository name configured on the server side, if any.
    fn get_repository_name(&self) -> Result<Option<String>, ScmError> {
        Ok(None)
    }

    /// Review server URL configured in the repository, if any.
    fn scan_for_server(&self) -> Result<Option<String>, ScmError> {
        Ok(None)
    }

    /// Whether the working copy has uncommitted changes.
    fn has_pending_changes(&self) -> Result<bool, ScmError> {
        Err(self.not_implemented("has_pending_changes"))
    }

    /// Whether the client works without a local working copy.
    fn is_remote_only(&self) -> bool {
        false
    }

    // -----------------------------------------------------------------------
    // Revisions and diffs
    // -----------------------------------------------------------------------

    /// Resolve user revision tokens into a range.
    fn parse_revision_spec(&self, _revisions: &[String]) -> Result<RevisionRange, ScmError> {
        Err(self.not_implemented("parse_revision_spec"))
    }

    /// Server-side change number for a range, if it maps to one.
    fn get_changenum(&self, _range: &RevisionRange) -> Option<String> {
        None
    }

    /// Produce the diff for `range`.
    fn diff(&self, _range: &RevisionRange, _options: &DiffOptions) -> Result<DiffResult, ScmError> {
        Err(self.not_implemented("diff"))
    }

    /// Raw message text for the commits in `range`.
    fn get_raw_commit_message(&self, _range: &RevisionRange) -> Result<String, ScmError> {
        Err(self.not_implemented("get_raw_commit_message"))
    }

    /// Summary and description for the commits in `range`.
    fn get_commit_message(&self, range: &RevisionRange) -> Result<Option<CommitMessage>, ScmError> {
        Ok(CommitMessage::from_raw(&self.get_raw_commit_message(range)?))
    }

    // -----------------------------------------------------------------------
    // Patching
    // -----------------------------------------------------------------------

    /// Whether diffs from this backend carry empty-file headers to apply.
    fn supports_empty_files(&self) -> bool {
        false
    }

    /// Apply the empty-file headers in `patch`; `true` if any were applied.
    fn apply_patch_for_empty_files(
        &self,
        _patch: &[u8],
        _strip_count: Option<usize>,
        _revert: bool,
    ) -> Result<bool, ScmError> {
        Err(self.not_implemented("apply_patch_for_empty_files"))
    }

    /// Apply a diff to the working copy.
    fn apply_patch(&self, request: &PatchRequest<'_>) -> Result<PatchOutcome, ScmError> {
        self.ensure_ready()?;
        if request.revert && !self.features().supports_patch_revert {
            return Err(self.not_implemented("apply_patch(revert)"));
        }
        let hook = EmptyFiles(self);
        let empty_files = self
            .supports_empty_files()
            .then_some(&hook as &dyn EmptyFilePatcher);
        self.patch_applier().apply(request, empty_files)
    }

    /// Error for an operation this backend does not provide.
    fn not_implemented(&self, operation: &'static str) -> ScmError {
        ScmError::NotImplemented {
            client: self.name(),
            operation,
        }
    }
}

/// Routes the applier's empty-file hook back to the client.
struct EmptyFiles<'c, C: ?Sized>(&'c C);

impl<C: ScmClient + ?Sized> EmptyFilePatcher for EmptyFiles<'_, C> {
    fn apply_empty_files(
        &self,
        patch: &[u8],
        strip_count: Option<usize>,
        revert: bool,
    ) -> Result<bool, ScmError> {
        self.0.apply_patch_for_empty_files(patch, strip_count, revert)
    }
}

// ---------------------------------------------------------------------------
// AnyClient — backend selected at runtime
// ---------------------------------------------------------------------------

/// A concrete client chosen from configuration or by detection.
pub enum AnyClient {
    /// Perforce client workspace.
    Perforce(PerforceClient),
    /// Git working tree.
    Git(GitClient),
}

impl AnyClient {
    /// Build the client for `kind`, detecting when it is `Auto`. The client
    /// is returned after a successful `setup()`.
    ///
    /// # Errors
    /// [`ScmError::Dependency`] if the chosen backend's tools are missing;
    /// [`ScmError::NoRepository`] if detection finds nothing.
    pub fn from_kind(kind: ClientKind, cwd: &Path, config: &RbscmConfig) -> Result<Self, ScmError> {
        let client = match kind {
            ClientKind::Auto => return Self::detect(cwd, config),
            ClientKind::Perforce => Self::Perforce(PerforceClient::from_config(config, cwd)),
            ClientKind::Git => Self::Git(GitClient::from_config(config, cwd)),
        };
        client.setup()?;
        Ok(client)
    }

    /// Ask every backend whether `cwd` is inside one of its working copies
    /// and pick the deepest match.
    ///
    /// # Errors
    /// [`ScmError::NoRepository`] if no backend claims `cwd`.
    pub fn detect(cwd: &Path, config: &RbscmConfig) -> Result<Self, ScmError> {
        let candidates = [
            Self::Perforce(PerforceClient::from_config(config, cwd)),
            Self::Git(GitClient::from_config(config, cwd)),
        ];
        let mut found: Vec<(PathBuf, Self)> = Vec::new();
        for client in candidates {
            if !client.has_dependencies() {
                debug!(client = client.name(), "skipping client with missing dependencies");
                continue;
            }
            client.setup()?;
            match client.get_local_path() {
                Ok(Some(path)) => found.push((path, client)),
                Ok(None) => {}
                Err(e) => debug!(client = client.name(), error = %e, "client did not match"),
            }
        }
        if found.len() > 1 {
            let names: Vec<&str> = found.iter().map(|(_, c)| c.name()).collect();
            warn!(clients = ?names, "several repository types match; using the deepest working copy");
        }
        found
            .into_iter()
            .max_by_key(|(path, _)| path.components().count())
            .map(|(_, client)| client)
            .ok_or_else(|| ScmError::NoRepository {
                path: cwd.to_owned(),
            })
    }

    fn inner(&self) -> &dyn ScmClient {
        match self {
            Self::Perforce(c) => c,
            Self::Git(c) => c,
        }
    }
}

impl ScmClient for AnyClient {
    fn scmclient_id(&self) -> &'static str {
        self.inner().scmclient_id()
    }

    fn name(&self) -> &'static str {
        self.inner().name()
    }

    fn features(&self) -> ClientFeatures {
        self.inner().features()
    }

    fn setup_state(&self) -> &SetupState {
        self.inner().setup_state()
    }

    fn check_dependencies(&self) -> Result<(), ScmError> {
        self.inner().check_dependencies()
    }

    fn patch_applier(&self) -> PatchApplier<'_> {
        self.inner().patch_applier()
    }

    fn set_capabilities(&mut self, capabilities: Capabilities) {
        match self {
            Self::Perforce(c) => c.set_capabilities(capabilities),
            Self::Git(c) => c.set_capabilities(capabilities),
        }
    }

    fn get_local_path(&self) -> Result<Option<PathBuf>, ScmError> {
        self.inner().get_local_path()
    }

    fn get_repository_info(&self) -> Result<Option<RepositoryInfo>, ScmError> {
        self.inner().get_repository_info()
    }

    fn get_repository_name(&self) -> Result<Option<String>, ScmError> {
        self.inner().get_repository_name()
    }

    fn scan_for_server(&self) -> Result<Option<String>, ScmError> {
        self.inner().scan_for_server()
    }

    fn has_pending_changes(&self) -> Result<bool, ScmError> {
        self.inner().has_pending_changes()
    }

    fn is_remote_only(&self) -> bool {
        self.inner().is_remote_only()
    }

    fn parse_revision_spec(&self, revisions: &[String]) -> Result<RevisionRange, ScmError> {
        self.inner().parse_revision_spec(revisions)
    }

    fn get_changenum(&self, range: &RevisionRange) -> Option<String> {
        self.inner().get_changenum(range)
    }

    fn diff(&self, range: &RevisionRange, options: &DiffOptions) -> Result<DiffResult, ScmError> {
        self.inner().diff(range, options)
    }

    fn get_raw_commit_message(&self, range: &RevisionRange) -> Result<String, ScmError> {
        self.inner().get_raw_commit_message(range)
    }

    fn get_commit_message(&self, range: &RevisionRange) -> Result<Option<CommitMessage>, ScmError> {
        self.inner().get_commit_message(range)
    }

    fn supports_empty_files(&self) -> bool {
        self.inner().supports_empty_files()
    }

    fn apply_patch_for_empty_files(
        &self,
        patch: &[u8],
        strip_count: Option<usize>,
        revert: bool,
    ) -> Result<bool, ScmError> {
        self.inner()
            .apply_patch_for_empty_files(patch, strip_count, revert)
    }

    fn apply_patch(&self, request: &PatchRequest<'_>) -> Result<PatchOutcome, ScmError> {
        self.inner().apply_patch(request)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
