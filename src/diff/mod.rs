//! Diff production.
//!
//! - [`synth`] — builds unified diffs for backends that cannot produce one
//!   natively, from per-revision file snapshots.
//! - [`unified`] — formatting of file headers, hunks and special markers.

pub mod synth;
pub mod unified;

use serde::Serialize;

pub use synth::{ChangedFileRecord, DiffSynthesizer, FileAction, MoveLink, SnapshotRevision, SnapshotStore};

/// The diff produced for one revision range.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DiffResult {
    /// Unified diff bytes; empty when nothing changed.
    #[serde(serialize_with = "serialize_lossy")]
    pub diff: Vec<u8>,
    /// Diff from the parent base to the base, when one was requested.
    #[serde(serialize_with = "serialize_lossy_opt", skip_serializing_if = "Option::is_none")]
    pub parent_diff: Option<Vec<u8>>,
    /// Identifier recorded on the uploaded diff.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit_id: Option<String>,
    /// Identifier of the base revision, for backends that report one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_commit_id: Option<String>,
    /// Backend-specific extras.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra_data: Option<serde_json::Map<String, serde_json::Value>>,
}

#[allow(clippy::ptr_arg)]
fn serialize_lossy<S: serde::Serializer>(bytes: &Vec<u8>, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&String::from_utf8_lossy(bytes))
}

#[allow(clippy::ref_option)]
fn serialize_lossy_opt<S: serde::Serializer>(
    bytes: &Option<Vec<u8>>,
    s: S,
) -> Result<S::Ok, S::Error> {
    match bytes {
        Some(b) => s.serialize_str(&String::from_utf8_lossy(b)),
        None => s.serialize_none(),
    }
}

/// Caller options for a diff.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DiffOptions {
    /// Restrict the diff to these paths (depot or local). Empty means all.
    pub include_files: Vec<String>,
    /// Glob patterns of paths to leave out.
    pub exclude_patterns: Vec<String>,
    /// Report moves as a delete plus an add.
    pub no_renames: bool,
    /// Extra arguments for native diff tools.
    pub extra_args: Vec<String>,
}
