//! Revision model and changelist resolution.
//!
//! User-supplied revision tokens (zero, one or two changelist numbers) are
//! resolved into a [`RevisionRange`]. Special states such as "whatever the
//! client last synced" or "the default pending changelist" are explicit
//! [`RevisionId`] variants rather than magic strings.

use std::fmt;

use rbscm_p4::{ChangeStatus, P4Repo};
use serde::Serialize;
use tracing::debug;

use crate::error::ScmError;

/// Name of Perforce's implicit pending changelist.
pub const DEFAULT_CHANGELIST: &str = "default";

// ---------------------------------------------------------------------------
// RevisionId / RevisionRange
// ---------------------------------------------------------------------------

/// One end of a revision range.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum RevisionId {
    /// A specific committed revision (changelist number, commit SHA).
    Concrete(String),
    /// The revision the client workspace was last synced to.
    CurrentSync,
    /// A pending (possibly shelved) changelist.
    Pending(String),
    /// Uncommitted working-tree changes.
    WorkingCopy,
}

impl RevisionId {
    /// The concrete identifier, if this is a committed revision.
    #[must_use]
    pub fn as_concrete(&self) -> Option<&str> {
        match self {
            Self::Concrete(id) => Some(id),
            _ => None,
        }
    }
}

impl fmt::Display for RevisionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Concrete(id) => write!(f, "{id}"),
            Self::CurrentSync => write!(f, "current-sync"),
            Self::Pending(id) => write!(f, "pending:{id}"),
            Self::WorkingCopy => write!(f, "working-copy"),
        }
    }
}

/// A resolved `(base, tip]` range.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RevisionRange {
    /// The state the diff is taken against.
    pub base: RevisionId,
    /// The state being reviewed.
    pub tip: RevisionId,
    /// Base of the parent diff, set only when one is needed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_base: Option<RevisionId>,
    /// Identifier recorded on the uploaded diff.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit_id: Option<String>,
}

impl RevisionRange {
    /// A range with no parent diff and no commit id.
    #[must_use]
    pub const fn new(base: RevisionId, tip: RevisionId) -> Self {
        Self {
            base,
            tip,
            parent_base: None,
            commit_id: None,
        }
    }

    /// Record `commit_id` on the range.
    #[must_use]
    pub fn with_commit_id(mut self, commit_id: impl Into<String>) -> Self {
        self.commit_id = Some(commit_id.into());
        self
    }
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// Read-only changelist status lookup.
pub trait ChangeLookup {
    /// Status of `change`, or `None` if the server does not know it.
    ///
    /// # Errors
    /// Returns an error if the server could not be queried.
    fn change_status(&self, change: &str) -> Result<Option<ChangeStatus>, ScmError>;
}

impl<P: P4Repo> ChangeLookup for P {
    fn change_status(&self, change: &str) -> Result<Option<ChangeStatus>, ScmError> {
        Ok(self.change(change)?.map(|info| info.status))
    }
}

/// Resolves changelist tokens into a [`RevisionRange`].
///
/// Holds nothing but the lookup; every call re-queries the server.
pub struct RevisionResolver<'a> {
    changes: &'a dyn ChangeLookup,
}

impl<'a> RevisionResolver<'a> {
    /// Create a resolver over `changes`.
    #[must_use]
    pub fn new(changes: &'a dyn ChangeLookup) -> Self {
        Self { changes }
    }

    /// Resolve zero, one or two changelist tokens.
    ///
    /// - none: the default pending changelist against the synced state;
    /// - one pending or shelved change: that change against the synced state;
    /// - one submitted change `N`: `N-1` to `N`;
    /// - two submitted changes `A <= B`: `A` to `B`.
    ///
    /// # Errors
    /// [`ScmError::TooManyRevisions`] for more than two tokens (checked before
    /// any lookup), [`ScmError::InvalidRevisionSpec`] for unknown changes,
    /// pending changes in a two-token range, or descending ranges.
    pub fn resolve(&self, tokens: &[String]) -> Result<RevisionRange, ScmError> {
        let range = match tokens {
            [] => RevisionRange::new(
                RevisionId::CurrentSync,
                RevisionId::Pending(DEFAULT_CHANGELIST.to_owned()),
            ),
            [change] => self.resolve_one(change)?,
            [first, second] => self.resolve_two(first, second)?,
            _ => return Err(ScmError::TooManyRevisions),
        };
        debug!(base = %range.base, tip = %range.tip, "resolved revisions");
        Ok(range)
    }

    fn status_of(&self, change: &str) -> Result<ChangeStatus, ScmError> {
        self.changes
            .change_status(change)?
            .ok_or_else(|| ScmError::InvalidRevisionSpec {
                message: format!("'{change}' does not appear to be a valid changelist"),
            })
    }

    fn resolve_one(&self, change: &str) -> Result<RevisionRange, ScmError> {
        if self.status_of(change)?.is_pending() {
            return Ok(RevisionRange::new(
                RevisionId::CurrentSync,
                RevisionId::Pending(change.to_owned()),
            )
            .with_commit_id(change));
        }
        let number = parse_change(change)?;
        let previous = number.checked_sub(1).ok_or_else(|| ScmError::InvalidRevisionSpec {
            message: format!("changelist {change} has no predecessor"),
        })?;
        Ok(RevisionRange::new(
            RevisionId::Concrete(previous.to_string()),
            RevisionId::Concrete(change.to_owned()),
        )
        .with_commit_id(change))
    }

    fn resolve_two(&self, first: &str, second: &str) -> Result<RevisionRange, ScmError> {
        for change in [first, second] {
            if self.status_of(change)?.is_pending() {
                return Err(ScmError::InvalidRevisionSpec {
                    message: format!(
                        "{change} is a pending changelist; only submitted changelists can be used in a range"
                    ),
                });
            }
        }
        if parse_change(first)? > parse_change(second)? {
            return Err(ScmError::InvalidRevisionSpec {
                message: format!("changelist {first} is newer than {second}"),
            });
        }
        Ok(RevisionRange::new(
            RevisionId::Concrete(first.to_owned()),
            RevisionId::Concrete(second.to_owned()),
        ))
    }
}

/// Parse a submitted changelist number.
///
/// # Errors
/// [`ScmError::InvalidRevisionSpec`] if `change` is not a number.
pub fn parse_change(change: &str) -> Result<u64, ScmError> {
    change.parse().map_err(|_| ScmError::InvalidRevisionSpec {
        message: format!("'{change}' is not a changelist number"),
    })
}
