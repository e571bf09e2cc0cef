//! The [`P4Repo`] trait — the abstraction boundary between rbscm and Perforce.
//!
//! The trait is object-safe so callers can use `&dyn P4Repo`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::P4Error;
use crate::types::{ChangeInfo, FileRecord, FstatInfo, ServerInfo};

/// Perforce operations used by rbscm.
///
/// Implementations may shell out to `p4` ([`P4Cli`](crate::P4Cli)) or be
/// in-memory test doubles.
pub trait P4Repo {
    // -----------------------------------------------------------------------
    // Server
    // -----------------------------------------------------------------------

    /// Check that the client program is installed and runnable.
    ///
    /// Replaces: `p4 -V`.
    fn check_installed(&self) -> Result<(), P4Error>;

    /// Server and client workspace information.
    ///
    /// Replaces: `p4 info`.
    fn info(&self) -> Result<ServerInfo, P4Error>;

    /// All counters as a name → value map.
    ///
    /// Replaces: `p4 -ztag counters`.
    fn counters(&self) -> Result<BTreeMap<String, String>, P4Error>;

    // -----------------------------------------------------------------------
    // Changelists
    // -----------------------------------------------------------------------

    /// Look up a changelist, returning `None` if the server does not know it.
    ///
    /// Replaces: `p4 -ztag describe -s -S <change>`.
    fn change(&self, change: &str) -> Result<Option<ChangeInfo>, P4Error>;

    /// Files opened in a pending changelist (`"default"` included).
    ///
    /// Replaces: `p4 -ztag opened -c <change>`.
    fn opened(&self, change: &str) -> Result<Vec<FileRecord>, P4Error>;

    /// Files of a submitted changelist.
    ///
    /// Replaces: `p4 -ztag describe -s <change>`.
    fn describe(&self, change: &str) -> Result<Vec<FileRecord>, P4Error>;

    /// Files shelved in a pending changelist.
    ///
    /// Replaces: `p4 -ztag describe -s -S <change>`.
    fn describe_shelved(&self, change: &str) -> Result<Vec<FileRecord>, P4Error>;

    /// Submitted changelists in `(after, through]`, oldest first.
    ///
    /// Replaces: `p4 -ztag changes -s submitted //...@>after,@through`.
    fn submitted_changes(&self, after: u64, through: u64) -> Result<Vec<String>, P4Error>;

    // -----------------------------------------------------------------------
    // Files
    // -----------------------------------------------------------------------

    /// File metadata, including the move partner of an opened move.
    ///
    /// Replaces: `p4 -ztag fstat <path>`.
    fn fstat(&self, path: &str) -> Result<FstatInfo, P4Error>;

    /// Local working-copy path for a depot path, if it is mapped.
    ///
    /// Replaces: `p4 -ztag where <path>`.
    fn where_local(&self, depot_path: &str) -> Result<Option<PathBuf>, P4Error>;

    /// Write the content of `file_spec` (e.g. `//depot/x#3`, `//depot/x@=12`)
    /// to `dest`.
    ///
    /// Replaces: `p4 print -q -o <dest> <file_spec>`.
    fn print_to(&self, file_spec: &str, dest: &Path) -> Result<(), P4Error>;

    /// Open local files for add.
    ///
    /// Replaces: `p4 add <paths>`.
    fn add(&self, paths: &[PathBuf]) -> Result<(), P4Error>;

    /// Open local files for delete.
    ///
    /// Replaces: `p4 delete <paths>`.
    fn delete(&self, paths: &[PathBuf]) -> Result<(), P4Error>;
}
