//! rbscm library crate.
//!
//! Puts revision-control backends behind one client contract so a review
//! uploader can resolve revisions, produce unified diffs and apply patches
//! without knowing which backend it is talking to. The `rbscm` binary is a
//! thin CLI over these modules.

pub mod capabilities;
pub mod client;
pub mod config;
pub mod diff;
pub mod error;
pub mod patch;
pub mod process;
pub mod revision;
pub mod telemetry;

pub use client::{AnyClient, ScmClient};
pub use error::ScmError;
