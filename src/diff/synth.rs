//! Unified-diff synthesis from file snapshots.
//!
//! Used by backends whose tooling cannot emit a patch-compatible diff. The
//! synthesizer is given the list of changed files, fetches the old and new
//! content of each through a [`SnapshotStore`], and diffs them locally.
//!
//! Output rules:
//! - one fragment per file, in the order files first appear in the input;
//! - old side labelled `<path>#<rev>` (`#0` for adds), new side labelled with
//!   a single timestamp taken per invocation;
//! - empty adds and deletes get a `==A==`/`==D==` header since a hunk cannot
//!   describe them;
//! - with move detection on, a move is one fragment: a `==MV==` header when
//!   the content is unchanged, otherwise `Moved from:`/`Moved to:` lines
//!   followed by the diff between the two paths.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::{debug, instrument, warn};

use super::DiffResult;
use super::unified::{self, ADDED, DELETED, MOVED};
use crate::error::ScmError;
use crate::revision::{RevisionId, RevisionRange};

/// Format of the `+++` timestamp.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

// ---------------------------------------------------------------------------
// Input types
// ---------------------------------------------------------------------------

/// What a change did to a file.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum FileAction {
    /// File created (also branch and import).
    Add,
    /// Content changed (also integrate).
    Edit,
    /// File removed.
    Delete,
    /// Destination half of a move.
    MoveAdd,
    /// Source half of a move.
    MoveDelete,
    /// An action this crate does not know; diffed as an edit.
    Unknown(String),
}

impl FileAction {
    /// Map a Perforce action name.
    #[must_use]
    pub fn from_p4(action: &str) -> Self {
        match action {
            "add" | "branch" | "import" => Self::Add,
            "edit" | "integrate" => Self::Edit,
            "delete" => Self::Delete,
            "move/add" => Self::MoveAdd,
            "move/delete" => Self::MoveDelete,
            other => Self::Unknown(other.to_owned()),
        }
    }
}

/// One file touched by the range being diffed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChangedFileRecord {
    /// Server-side path.
    pub depot_path: String,
    /// Have revision for pending changes; created revision for submitted ones.
    pub revision: u64,
    /// What happened to the file.
    pub action: FileAction,
    /// Changelist the record came from.
    pub change_id: String,
}

impl From<rbscm_p4::FileRecord> for ChangedFileRecord {
    fn from(record: rbscm_p4::FileRecord) -> Self {
        Self {
            action: FileAction::from_p4(&record.action),
            depot_path: record.depot_path,
            revision: record.revision,
            change_id: record.change,
        }
    }
}

/// A move-delete paired with the move-add it produced.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MoveLink {
    /// Path the file moved away from.
    pub source_path: String,
    /// Path the file moved to.
    pub dest_path: String,
}

/// Which content of a file to fetch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SnapshotRevision {
    /// A revision stored on the server.
    Number(u64),
    /// The content pending in a changelist (working file or shelved copy).
    Pending(String),
}

/// Read access to file content and metadata for the synthesizer.
pub trait SnapshotStore {
    /// Write the content of `depot_path` at `revision` to `dest`.
    ///
    /// # Errors
    /// Returns an error if the content could not be fetched.
    fn materialize(
        &self,
        depot_path: &str,
        revision: &SnapshotRevision,
        dest: &Path,
    ) -> Result<(), ScmError>;

    /// Working-copy path of `depot_path`, if mapped.
    ///
    /// # Errors
    /// Returns an error if the mapping could not be queried.
    fn local_path(&self, depot_path: &str) -> Result<Option<PathBuf>, ScmError>;

    /// For the source of a move, the path it was moved to.
    ///
    /// # Errors
    /// Returns an error if file metadata could not be queried.
    fn move_target(&self, depot_path: &str) -> Result<Option<String>, ScmError>;
}

// ---------------------------------------------------------------------------
// Grouping
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Kind {
    Add,
    Edit,
    Delete,
    MoveAdd,
    MoveDelete,
}

impl Kind {
    fn from_record(record: &ChangedFileRecord) -> Self {
        match &record.action {
            FileAction::Add => Self::Add,
            FileAction::Edit => Self::Edit,
            FileAction::Delete => Self::Delete,
            FileAction::MoveAdd => Self::MoveAdd,
            FileAction::MoveDelete => Self::MoveDelete,
            FileAction::Unknown(action) => {
                warn!(
                    path = %record.depot_path,
                    action = %action,
                    "unrecognized file action, diffing as an edit"
                );
                Self::Edit
            }
        }
    }

    const fn creates(self) -> bool {
        matches!(self, Self::Add | Self::MoveAdd)
    }

    const fn removes(self) -> bool {
        matches!(self, Self::Delete | Self::MoveDelete)
    }

    /// The plain action when a move half is diffed on its own.
    const fn unpaired(self) -> Self {
        match self {
            Self::MoveAdd => Self::Add,
            Self::MoveDelete => Self::Delete,
            other => other,
        }
    }
}

/// All records for one path, collapsed.
#[derive(Debug)]
struct FileChange {
    depot_path: String,
    kind: Kind,
    last_kind: Kind,
    merged: bool,
    old: Option<u64>,
    new: Option<SnapshotRevision>,
    revision: u64,
}

impl FileChange {
    fn new(record: &ChangedFileRecord, pending: bool) -> Self {
        let kind = Kind::from_record(record);
        let (old, new) = sides(record, kind, pending);
        Self {
            depot_path: record.depot_path.clone(),
            kind,
            last_kind: kind,
            merged: false,
            old,
            new,
            revision: record.revision,
        }
    }

    /// Fold a later record for the same path: keep the old side, take the new.
    fn absorb(&mut self, record: &ChangedFileRecord, pending: bool) {
        let kind = Kind::from_record(record);
        self.new = sides(record, kind, pending).1;
        self.last_kind = kind;
        self.revision = record.revision;
        self.merged = true;
    }

    /// Settle the overall action. `None` when the file was created and
    /// removed within the range.
    fn finish(mut self) -> Option<Self> {
        if self.merged {
            self.kind = match (self.kind.creates(), self.last_kind.removes()) {
                (true, true) => return None,
                (true, false) => Kind::Add,
                (false, true) => Kind::Delete,
                (false, false) => Kind::Edit,
            };
        }
        Some(self)
    }
}

/// Old and new snapshots for one record.
fn sides(
    record: &ChangedFileRecord,
    kind: Kind,
    pending: bool,
) -> (Option<u64>, Option<SnapshotRevision>) {
    let old_rev = if pending {
        record.revision
    } else {
        record.revision.saturating_sub(1)
    };
    let old = (old_rev > 0 && !kind.creates()).then_some(old_rev);
    let new = (!kind.removes()).then(|| {
        if pending {
            SnapshotRevision::Pending(record.change_id.clone())
        } else {
            SnapshotRevision::Number(record.revision)
        }
    });
    (old, new)
}

fn group(records: &[ChangedFileRecord], pending: bool) -> Vec<FileChange> {
    let mut changes: Vec<FileChange> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();
    for record in records {
        if let Some(&i) = index.get(record.depot_path.as_str()) {
            changes[i].absorb(record, pending);
        } else {
            index.insert(&record.depot_path, changes.len());
            changes.push(FileChange::new(record, pending));
        }
    }
    changes.into_iter().filter_map(FileChange::finish).collect()
}

/// What to emit, in output order.
enum Fragment {
    File(usize),
    Move { source: usize, dest: usize },
}

// ---------------------------------------------------------------------------
// Scratch space
// ---------------------------------------------------------------------------

/// Per-invocation temporary directory; removed when dropped.
struct Scratch {
    dir: TempDir,
    next: usize,
}

impl Scratch {
    fn new() -> Result<Self, ScmError> {
        let dir = tempfile::Builder::new().prefix("rbscm-diff.").tempdir()?;
        Ok(Self { dir, next: 0 })
    }

    /// Fetch one snapshot. Failures are logged and read as empty content.
    fn read(
        &mut self,
        store: &dyn SnapshotStore,
        depot_path: &str,
        revision: Option<&SnapshotRevision>,
    ) -> Vec<u8> {
        let Some(revision) = revision else {
            return Vec::new();
        };
        self.next += 1;
        let dest = self.dir.path().join(format!("snapshot-{}", self.next));
        if let Err(e) = store.materialize(depot_path, revision, &dest) {
            warn!(path = %depot_path, ?revision, error = %e, "could not fetch file content, treating as empty");
            return Vec::new();
        }
        match std::fs::read(&dest) {
            Ok(content) => content,
            Err(e) => {
                warn!(path = %depot_path, ?revision, error = %e, "could not read file content, treating as empty");
                Vec::new()
            }
        }
    }
}

// ---------------------------------------------------------------------------
// DiffSynthesizer
// ---------------------------------------------------------------------------

/// Builds unified diffs from snapshots.
pub struct DiffSynthesizer<'a> {
    store: &'a dyn SnapshotStore,
    timestamp: String,
}

impl<'a> DiffSynthesizer<'a> {
    /// Create a synthesizer stamping new-side headers with the current local
    /// time.
    #[must_use]
    pub fn new(store: &'a dyn SnapshotStore) -> Self {
        Self {
            store,
            timestamp: chrono::Local::now().format(TIMESTAMP_FORMAT).to_string(),
        }
    }

    /// Override the new-side timestamp.
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: impl Into<String>) -> Self {
        self.timestamp = timestamp.into();
        self
    }

    /// Diff every file in `changed_files` across `range`.
    ///
    /// A `Pending` tip means the records describe opened files (old side is
    /// the have revision, new side is the pending content); any other tip
    /// means submitted revisions (old side is the previous revision).
    ///
    /// # Errors
    /// Returns an error only if the scratch directory cannot be created.
    /// Individual snapshot failures are logged and read as empty files.
    #[instrument(skip_all, fields(tip = %range.tip, files = changed_files.len()))]
    pub fn synthesize(
        &self,
        range: &RevisionRange,
        changed_files: &[ChangedFileRecord],
        move_detection_enabled: bool,
    ) -> Result<DiffResult, ScmError> {
        let pending = matches!(range.tip, RevisionId::Pending(_));
        let changes = group(changed_files, pending);
        let fragments = self.plan(&changes, move_detection_enabled);

        let mut scratch = Scratch::new()?;
        let mut diff = Vec::new();
        for fragment in fragments {
            let mut bytes = match fragment {
                Fragment::File(i) => self.file_fragment(&mut scratch, &changes[i]),
                Fragment::Move { source, dest } => {
                    self.move_fragment(&mut scratch, &changes[source], &changes[dest])
                }
            };
            diff.append(&mut bytes);
        }

        Ok(DiffResult {
            diff,
            commit_id: range.commit_id.clone(),
            ..DiffResult::default()
        })
    }

    /// Pair move halves and order fragments by first appearance.
    fn plan(&self, changes: &[FileChange], move_detection: bool) -> Vec<Fragment> {
        let mut partner: HashMap<usize, usize> = HashMap::new();
        if move_detection {
            let position: HashMap<&str, usize> = changes
                .iter()
                .enumerate()
                .map(|(i, c)| (c.depot_path.as_str(), i))
                .collect();
            for link in self.find_moves(changes) {
                if let (Some(&s), Some(&d)) = (
                    position.get(link.source_path.as_str()),
                    position.get(link.dest_path.as_str()),
                ) && !partner.contains_key(&d)
                {
                    partner.insert(s, d);
                    partner.insert(d, s);
                }
            }
        }

        let mut done: HashSet<usize> = HashSet::new();
        let mut fragments = Vec::with_capacity(changes.len());
        for i in 0..changes.len() {
            if done.contains(&i) {
                continue;
            }
            match partner.get(&i) {
                Some(&j) => {
                    done.insert(j);
                    let (source, dest) = if changes[i].kind == Kind::MoveDelete {
                        (i, j)
                    } else {
                        (j, i)
                    };
                    fragments.push(Fragment::Move { source, dest });
                }
                None => fragments.push(Fragment::File(i)),
            }
        }
        fragments
    }

    /// Links from each move-delete to a move-add present in the same set.
    fn find_moves(&self, changes: &[FileChange]) -> Vec<MoveLink> {
        let adds: HashSet<&str> = changes
            .iter()
            .filter(|c| c.kind == Kind::MoveAdd)
            .map(|c| c.depot_path.as_str())
            .collect();
        let mut links = Vec::new();
        for change in changes.iter().filter(|c| c.kind == Kind::MoveDelete) {
            match self.store.move_target(&change.depot_path) {
                Ok(Some(dest)) if adds.contains(dest.as_str()) => {
                    debug!(source = %change.depot_path, dest = %dest, "detected move");
                    links.push(MoveLink {
                        source_path: change.depot_path.clone(),
                        dest_path: dest,
                    });
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(path = %change.depot_path, error = %e, "could not look up move target");
                }
            }
        }
        links
    }

    fn file_fragment(&self, scratch: &mut Scratch, change: &FileChange) -> Vec<u8> {
        let path = &change.depot_path;
        let old = scratch.read(self.store, path, change.old.map(SnapshotRevision::Number).as_ref());
        let new = scratch.read(self.store, path, change.new.as_ref());
        let old_rev = change.old.unwrap_or(0);
        let old_label = format!("{path}#{old_rev}");

        if old.is_empty() && new.is_empty() {
            let header = match change.kind.unpaired() {
                Kind::Add => {
                    unified::special_header(path, change.revision, ADDED, &self.local_name(path))
                }
                Kind::Delete => {
                    unified::special_header(path, old_rev, DELETED, &self.local_name(path))
                }
                _ => String::new(),
            };
            return header.into_bytes();
        }
        self.content_diff(path, &old_label, path, &old, &new)
            .unwrap_or_default()
    }

    fn move_fragment(&self, scratch: &mut Scratch, source: &FileChange, dest: &FileChange) -> Vec<u8> {
        let old = scratch.read(
            self.store,
            &source.depot_path,
            source.old.map(SnapshotRevision::Number).as_ref(),
        );
        let new = scratch.read(self.store, &dest.depot_path, dest.new.as_ref());
        let old_rev = source.old.unwrap_or(0);
        let old_label = format!("{}#{old_rev}", source.depot_path);

        match self.content_diff(&source.depot_path, &old_label, &dest.depot_path, &old, &new) {
            Some(mut body) => {
                let mut fragment =
                    unified::move_preamble(&source.depot_path, &dest.depot_path).into_bytes();
                fragment.append(&mut body);
                fragment
            }
            None => unified::special_header(&source.depot_path, old_rev, MOVED, &dest.depot_path)
                .into_bytes(),
        }
    }

    /// Headers plus hunks, a binary marker, or `None` for equal content.
    fn content_diff(
        &self,
        old_path: &str,
        old_label: &str,
        new_path: &str,
        old: &[u8],
        new: &[u8],
    ) -> Option<Vec<u8>> {
        if old == new {
            return None;
        }
        if unified::is_binary(old) || unified::is_binary(new) {
            return Some(unified::binary_marker(old_label, new_path).into_bytes());
        }
        if std::str::from_utf8(old).is_err() || std::str::from_utf8(new).is_err() {
            debug!(path = %new_path, "content is not valid UTF-8, diffing raw bytes");
        }
        unified::file_diff(
            old,
            new,
            &format!("{old_path}\t{old_label}"),
            &format!("{new_path}\t{}", self.timestamp),
        )
    }

    /// Local path for empty-file headers, falling back to the depot path.
    fn local_name(&self, depot_path: &str) -> String {
        match self.store.local_path(depot_path) {
            Ok(Some(path)) => path.display().to_string(),
            Ok(None) => depot_path.to_owned(),
            Err(e) => {
                warn!(path = %depot_path, error = %e, "could not find local path");
                depot_path.to_owned()
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
