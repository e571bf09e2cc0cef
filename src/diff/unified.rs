//! Unified-diff text for one file.
//!
//! Hunks come from `similar` with three lines of context and GNU-style ranges
//! (`@@ -1 +1 @@`, `@@ -0,0 +1,2 @@`), which is what `patch` expects. Content
//! is diffed as bytes so files in legacy encodings pass through unchanged.

use similar::TextDiff;

/// Lines of context around each change.
pub const CONTEXT_LINES: usize = 3;

/// Bytes inspected when deciding whether content is binary.
const BINARY_SNIFF_LEN: usize = 8000;

/// Marker for an empty file that was added.
pub const ADDED: &str = "A";
/// Marker for an empty file that was deleted.
pub const DELETED: &str = "D";
/// Marker for a move without content changes.
pub const MOVED: &str = "MV";

/// `---`/`+++` headers plus hunks, or `None` when the contents are equal.
#[must_use]
pub fn file_diff(old: &[u8], new: &[u8], old_label: &str, new_label: &str) -> Option<Vec<u8>> {
    let diff = TextDiff::from_lines(old, new);
    let mut unified = diff.unified_diff();
    unified.context_radius(CONTEXT_LINES);

    let mut hunks = Vec::new();
    for hunk in unified.iter_hunks() {
        hunk.to_writer(&mut hunks).expect("writing to a Vec cannot fail");
    }
    if hunks.is_empty() {
        return None;
    }
    let mut out = format!("--- {old_label}\n+++ {new_label}\n").into_bytes();
    out.append(&mut hunks);
    Some(out)
}

/// `==== <path>#<rev> ==<marker>== <target> ====` followed by a blank line.
///
/// Used for empty-file adds and deletes (target is the local path) and for
/// moves without content changes (target is the destination depot path).
#[must_use]
pub fn special_header(depot_path: &str, revision: u64, marker: &str, target: &str) -> String {
    format!("==== {depot_path}#{revision} =={marker}== {target} ====\n\n")
}

/// Preamble naming both ends of a move whose content also changed.
#[must_use]
pub fn move_preamble(source: &str, dest: &str) -> String {
    format!("Moved from: {source}\nMoved to: {dest}\n")
}

/// Line emitted instead of hunks when either side is binary.
#[must_use]
pub fn binary_marker(old_label: &str, new_path: &str) -> String {
    format!("Binary files {old_label} and {new_path} differ\n")
}

/// Whether `content` looks binary (a NUL byte near the start).
#[must_use]
pub fn is_binary(content: &[u8]) -> bool {
    content.iter().take(BINARY_SNIFF_LEN).any(|&b| b == 0)
}
