//! Perforce abstraction layer for rbscm.
//!
//! This crate defines the [`P4Repo`] trait, the narrow interface through which
//! the rest of rbscm reads changelist metadata, file revisions and working
//! copy locations from a Perforce server. The default implementation,
//! [`P4Cli`], shells out to the `p4` executable and parses its tagged
//! (`-ztag`) output.
//!
//! # Crate layout
//!
//! - [`repo`] — the [`P4Repo`] trait definition.
//! - [`types`] — value types used in trait signatures ([`ChangeInfo`],
//!   [`FileRecord`], [`FstatInfo`], [`ServerInfo`], etc.).
//! - [`error`] — the [`P4Error`] enum returned by all trait methods.
//! - [`ztag`] — parser for `p4 -ztag` records.

pub mod error;
pub mod repo;
pub mod types;
pub mod ztag;

mod cli_repo;

pub use cli_repo::P4Cli;

pub use error::P4Error;
pub use repo::P4Repo;
pub use types::{
    ChangeInfo, ChangeStatus, FileRecord, FstatInfo, ServerInfo, ServerVersion, VersionParseError,
};
