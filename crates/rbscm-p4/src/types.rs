//! Value types used in [`P4Repo`](crate::P4Repo) signatures.

use std::fmt;

// ---------------------------------------------------------------------------
// ChangeStatus
// ---------------------------------------------------------------------------

/// Lifecycle state of a changelist as reported by the server.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChangeStatus {
    /// Opened files exist only in a client workspace.
    Pending,
    /// Pending, with file content shelved on the server.
    Shelved,
    /// Committed to the depot.
    Submitted,
}

impl ChangeStatus {
    /// Parse the `status` field of a change or describe record.
    #[must_use]
    pub fn from_p4(value: &str) -> Option<Self> {
        match value.trim() {
            "pending" => Some(Self::Pending),
            "shelved" => Some(Self::Shelved),
            "submitted" => Some(Self::Submitted),
            _ => None,
        }
    }

    /// `true` for changes that have not been submitted.
    #[must_use]
    pub const fn is_pending(self) -> bool {
        matches!(self, Self::Pending | Self::Shelved)
    }
}

impl fmt::Display for ChangeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Shelved => write!(f, "shelved"),
            Self::Submitted => write!(f, "submitted"),
        }
    }
}

// ---------------------------------------------------------------------------
// ChangeInfo
// ---------------------------------------------------------------------------

/// Metadata for one changelist.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChangeInfo {
    /// The changelist number.
    pub change: String,
    /// Current status.
    pub status: ChangeStatus,
    /// Owning user, if reported.
    pub user: Option<String>,
    /// Owning client workspace, if reported.
    pub client: Option<String>,
    /// Free-form description.
    pub description: String,
}

// ---------------------------------------------------------------------------
// FileRecord
// ---------------------------------------------------------------------------

/// One file touched by a changelist, as listed by `opened` or `describe`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileRecord {
    /// Depot path, e.g. `//depot/project/README`.
    pub depot_path: String,
    /// Revision number. For opened files this is the have revision; for
    /// submitted files it is the revision the change created.
    pub revision: u64,
    /// Raw action name (`add`, `edit`, `move/delete`, ...).
    pub action: String,
    /// Changelist the file belongs to.
    pub change: String,
}

// ---------------------------------------------------------------------------
// FstatInfo
// ---------------------------------------------------------------------------

/// Subset of `p4 fstat` fields.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FstatInfo {
    /// Depot path of the file.
    pub depot_path: String,
    /// Client-syntax or local path, if mapped.
    pub client_file: Option<String>,
    /// The other half of a move pair, if the file is opened for move.
    pub moved_file: Option<String>,
    /// Head revision in the depot.
    pub head_rev: Option<u64>,
    /// Revision synced to the client.
    pub have_rev: Option<u64>,
}

// ---------------------------------------------------------------------------
// ServerInfo
// ---------------------------------------------------------------------------

/// Fields of `p4 info` used to describe the repository.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ServerInfo {
    /// `Server address:` line.
    pub server_address: Option<String>,
    /// `Broker address:` line, present when connected through a broker.
    pub broker_address: Option<String>,
    /// `Broker encryption:` line.
    pub broker_encryption: Option<String>,
    /// `Server encryption:` line (`encrypted` or `unencrypted`).
    pub server_encryption: Option<String>,
    /// `Client root:` line.
    pub client_root: Option<String>,
    /// `Client name:` line.
    pub client_name: Option<String>,
    /// `Server version:` line.
    pub server_version: Option<String>,
}

impl ServerInfo {
    /// Build from `Key: value` pairs of plain `p4 info` output.
    #[must_use]
    pub fn from_lines(output: &str) -> Self {
        let mut info = Self::default();
        for line in output.lines() {
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let value = Some(value.trim().to_owned());
            match key.trim() {
                "Server address" => info.server_address = value,
                "Broker address" => info.broker_address = value,
                "Broker encryption" => info.broker_encryption = value,
                "Server encryption" => info.server_encryption = value,
                "Client root" => info.client_root = value,
                "Client name" => info.client_name = value,
                "Server version" => info.server_version = value,
                _ => {}
            }
        }
        info
    }

    /// The address clients connect to (the broker when there is one) and
    /// whether that connection is encrypted.
    #[must_use]
    pub fn connection(&self) -> Option<(&str, bool)> {
        let encrypted = |field: &Option<String>| field.as_deref() == Some("encrypted");
        match (&self.broker_address, &self.server_address) {
            (Some(broker), _) => Some((broker, encrypted(&self.broker_encryption))),
            (None, Some(server)) => Some((server, encrypted(&self.server_encryption))),
            (None, None) => None,
        }
    }
}

// ---------------------------------------------------------------------------
// ServerVersion
// ---------------------------------------------------------------------------

/// Release year and minor number of a `p4d` server, e.g. `2012.2`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct ServerVersion {
    /// Release year.
    pub year: u32,
    /// Release number within the year.
    pub minor: u32,
}

/// A server version string did not have the expected shape.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VersionParseError {
    /// The string that failed to parse.
    pub value: String,
}

impl fmt::Display for VersionParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unable to parse server version from '{}'", self.value)
    }
}

impl std::error::Error for VersionParseError {}

impl ServerVersion {
    /// Parse a version banner such as
    /// `P4D/FREEBSD60X86_64/2012.2/525804 (2012/09/18)`.
    ///
    /// # Errors
    /// Returns [`VersionParseError`] if no `YYYY.N` segment is found.
    pub fn parse(banner: &str) -> Result<Self, VersionParseError> {
        let fail = || VersionParseError {
            value: banner.to_owned(),
        };
        let segment = banner.split('/').nth(2).ok_or_else(fail)?;
        let (year, minor) = segment.split_once('.').ok_or_else(fail)?;
        let minor: String = minor.chars().take_while(char::is_ascii_digit).collect();
        Ok(Self {
            year: year.parse().map_err(|_| fail())?,
            minor: minor.parse().map_err(|_| fail())?,
        })
    }
}

impl fmt::Display for ServerVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.year, self.minor)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn change_status_parses_known_values() {
        assert_eq!(ChangeStatus::from_p4("pending"), Some(ChangeStatus::Pending));
        assert_eq!(ChangeStatus::from_p4("shelved"), Some(ChangeStatus::Shelved));
        assert_eq!(
            ChangeStatus::from_p4("submitted\n"),
            Some(ChangeStatus::Submitted)
        );
        assert_eq!(ChangeStatus::from_p4("new"), None);
        assert!(ChangeStatus::Shelved.is_pending());
        assert!(!ChangeStatus::Submitted.is_pending());
    }

    #[test]
    fn server_info_from_plain_output() {
        let info = ServerInfo::from_lines(
            "User name: joe\n\
             Client name: joe-ws\n\
             Client root: /home/joe/ws\n\
             Server address: perforce.example.com:1666\n\
             Server encryption: encrypted\n\
             Server version: P4D/LINUX26X86_64/2023.1/2442900 (2023/04/13)\n",
        );
        assert_eq!(info.client_root.as_deref(), Some("/home/joe/ws"));
        assert_eq!(
            info.server_address.as_deref(),
            Some("perforce.example.com:1666")
        );
        assert_eq!(info.connection(), Some(("perforce.example.com:1666", true)));
        assert_eq!(info.broker_address, None);
    }

    #[test]
    fn broker_takes_precedence() {
        let info = ServerInfo::from_lines(
            "Broker address: broker.example.com:1666\n\
             Server address: perforce.example.com:1666\n\
             Server encryption: encrypted\n",
        );
        assert_eq!(info.connection(), Some(("broker.example.com:1666", false)));
    }

    #[test]
    fn server_version_parses_banner() {
        let version = ServerVersion::parse("P4D/FREEBSD60X86_64/2012.2/525804 (2012/09/18)")
            .unwrap();
        assert_eq!(version, ServerVersion { year: 2012, minor: 2 });
        assert_eq!(version.to_string(), "2012.2");
    }

    #[test]
    fn server_version_rejects_garbage() {
        assert!(ServerVersion::parse("P4D/LINUX").is_err());
        assert!(ServerVersion::parse("a/b/c.d/e").is_err());
    }
}
