//! Empty-file headers in synthesized diffs.
//!
//! `patch` cannot create or delete a zero-length file, so diffs from
//! snapshot-based backends carry `==== <depot>#<rev> ==A== <local> ====` and
//! `==D==` headers instead. This module finds them again when applying.

use std::sync::LazyLock;

use regex::bytes::Regex;

static EMPTY_FILE_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^==== (?P<depot>[^\n#]+)#(?P<rev>\d+) ==(?P<op>[AD])== (?P<local>[^\n]+) ====$")
        .expect("empty-file header pattern is valid")
});

/// Whether a header adds or deletes its file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EmptyFileOp {
    /// `==A==`
    Added,
    /// `==D==`
    Deleted,
}

impl EmptyFileOp {
    /// The opposite operation, used when reverting a patch.
    #[must_use]
    pub const fn reversed(self) -> Self {
        match self {
            Self::Added => Self::Deleted,
            Self::Deleted => Self::Added,
        }
    }
}

/// One empty-file header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EmptyFileHeader {
    /// Server-side path.
    pub depot_path: String,
    /// Revision named in the header.
    pub revision: u64,
    /// Add or delete.
    pub op: EmptyFileOp,
    /// Working-copy path as written in the diff.
    pub local_path: String,
}

/// All empty-file headers in `patch`, in order.
#[must_use]
pub fn parse(patch: &[u8]) -> Vec<EmptyFileHeader> {
    EMPTY_FILE_HEADER
        .captures_iter(patch)
        .filter_map(|caps| {
            let text = |name: &str| String::from_utf8_lossy(&caps[name]).into_owned();
            Some(EmptyFileHeader {
                depot_path: text("depot"),
                revision: text("rev").parse().ok()?,
                op: if &caps["op"] == b"A" {
                    EmptyFileOp::Added
                } else {
                    EmptyFileOp::Deleted
                },
                local_path: text("local"),
            })
        })
        .collect()
}
