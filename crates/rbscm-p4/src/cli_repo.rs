//! [`P4Cli`] — [`P4Repo`] backed by the `p4` executable.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, instrument};

use crate::error::P4Error;
use crate::repo::P4Repo;
use crate::types::{ChangeInfo, ChangeStatus, FileRecord, FstatInfo, ServerInfo};
use crate::ztag::{self, Record};

/// Perforce client that runs `p4` for every operation.
///
/// Global connection options (`-p`, `-u`, `-c`) are prepended to every
/// command when set; otherwise `p4` falls back to its environment and
/// `P4CONFIG` files.
#[derive(Clone, Debug)]
pub struct P4Cli {
    program: String,
    cwd: Option<PathBuf>,
    port: Option<String>,
    user: Option<String>,
    client: Option<String>,
}

/// Captured output of one `p4` run.
struct Output {
    success: bool,
    exit_code: Option<i32>,
    stdout: String,
    stderr: String,
}

impl P4Cli {
    /// Create a client that runs `program` (usually `"p4"`).
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            cwd: None,
            port: None,
            user: None,
            client: None,
        }
    }

    /// Run commands from `dir` so that `P4CONFIG` lookup starts there.
    #[must_use]
    pub fn with_cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Set the server address (`-p`).
    #[must_use]
    pub fn with_port(mut self, port: Option<String>) -> Self {
        self.port = port;
        self
    }

    /// Set the user (`-u`).
    #[must_use]
    pub fn with_user(mut self, user: Option<String>) -> Self {
        self.user = user;
        self
    }

    /// Set the client workspace (`-c`).
    #[must_use]
    pub fn with_client(mut self, client: Option<String>) -> Self {
        self.client = client;
        self
    }

    fn command_line(&self, args: &[&str]) -> String {
        let mut parts = vec![self.program.clone()];
        parts.extend(args.iter().map(|a| (*a).to_owned()));
        parts.join(" ")
    }

    fn run(&self, args: &[&str]) -> Result<Output, P4Error> {
        let mut cmd = Command::new(&self.program);
        for (flag, value) in [("-p", &self.port), ("-u", &self.user), ("-c", &self.client)] {
            if let Some(value) = value {
                cmd.args([flag, value.as_str()]);
            }
        }
        cmd.args(args);
        if let Some(dir) = &self.cwd {
            cmd.current_dir(dir);
        }
        debug!(command = %self.command_line(args), "running p4");
        let out = cmd.output().map_err(|source| P4Error::NotInstalled {
            program: self.program.clone(),
            source,
        })?;
        Ok(Output {
            success: out.status.success(),
            exit_code: out.status.code(),
            stdout: String::from_utf8_lossy(&out.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&out.stderr).into_owned(),
        })
    }

    /// Run and fail on a non-zero exit.
    fn run_checked(&self, args: &[&str]) -> Result<String, P4Error> {
        let out = self.run(args)?;
        if out.success {
            Ok(out.stdout)
        } else {
            Err(P4Error::CommandFailed {
                command: self.command_line(args),
                exit_code: out.exit_code,
                stderr: out.stderr.trim().to_owned(),
            })
        }
    }

    fn run_ztag(&self, args: &[&str]) -> Result<Vec<Record>, P4Error> {
        let mut full = vec!["-ztag"];
        full.extend_from_slice(args);
        Ok(ztag::parse(&self.run_checked(&full)?))
    }
}

/// Files listed as indexed fields of a describe record.
fn described_files(record: &Record) -> Result<Vec<FileRecord>, P4Error> {
    let change = record.get("change").cloned().unwrap_or_default();
    let paths = ztag::indexed(record, "depotFile");
    let revs = ztag::indexed(record, "rev");
    let actions = ztag::indexed(record, "action");
    if revs.len() != paths.len() || actions.len() != paths.len() {
        return Err(P4Error::Parse {
            message: format!("describe of change {change} has mismatched file fields"),
        });
    }
    paths
        .iter()
        .zip(revs)
        .zip(actions)
        .map(|((path, rev), action)| {
            Ok(FileRecord {
                depot_path: (*path).to_owned(),
                revision: parse_rev(rev)?,
                action: action.to_owned(),
                change: change.clone(),
            })
        })
        .collect()
}

/// Parse a revision field; `none` (not yet in the depot) is revision 0.
fn parse_rev(value: &str) -> Result<u64, P4Error> {
    if value == "none" {
        return Ok(0);
    }
    value.parse().map_err(|_| P4Error::Parse {
        message: format!("invalid revision '{value}'"),
    })
}

fn is_unknown_change(stderr: &str) -> bool {
    stderr.contains("unknown") || stderr.contains("Invalid changelist")
}

impl P4Repo for P4Cli {
    fn check_installed(&self) -> Result<(), P4Error> {
        self.run_checked(&["-V"]).map(|_| ())
    }

    fn info(&self) -> Result<ServerInfo, P4Error> {
        Ok(ServerInfo::from_lines(&self.run_checked(&["info"])?))
    }

    fn counters(&self) -> Result<BTreeMap<String, String>, P4Error> {
        Ok(self
            .run_ztag(&["counters"])?
            .into_iter()
            .filter_map(|mut r| Some((r.remove("counter")?, r.remove("value")?)))
            .collect())
    }

    #[instrument(skip(self))]
    fn change(&self, change: &str) -> Result<Option<ChangeInfo>, P4Error> {
        let out = self.run(&["-ztag", "describe", "-s", "-S", change])?;
        if !out.success {
            if is_unknown_change(&out.stderr) {
                return Ok(None);
            }
            return Err(P4Error::CommandFailed {
                command: self.command_line(&["-ztag", "describe", "-s", "-S", change]),
                exit_code: out.exit_code,
                stderr: out.stderr.trim().to_owned(),
            });
        }
        let Some(mut record) = ztag::parse(&out.stdout).into_iter().next() else {
            return Ok(None);
        };
        let Some(mut status) = record.get("status").and_then(|s| ChangeStatus::from_p4(s))
        else {
            return Err(P4Error::Parse {
                message: format!("change {change} has no recognizable status"),
            });
        };
        if status == ChangeStatus::Pending && record.contains_key("shelved") {
            status = ChangeStatus::Shelved;
        }
        Ok(Some(ChangeInfo {
            change: record.remove("change").unwrap_or_else(|| change.to_owned()),
            status,
            user: record.remove("user"),
            client: record.remove("client"),
            description: record.remove("desc").unwrap_or_default(),
        }))
    }

    fn opened(&self, change: &str) -> Result<Vec<FileRecord>, P4Error> {
        self.run_ztag(&["opened", "-c", change])?
            .into_iter()
            .map(|r| {
                let rev = r
                    .get("haveRev")
                    .or_else(|| r.get("rev"))
                    .map_or(Ok(0), |v| parse_rev(v))?;
                Ok(FileRecord {
                    depot_path: r.get("depotFile").cloned().unwrap_or_default(),
                    revision: rev,
                    action: r.get("action").cloned().unwrap_or_default(),
                    change: r.get("change").cloned().unwrap_or_else(|| change.to_owned()),
                })
            })
            .collect()
    }

    fn describe(&self, change: &str) -> Result<Vec<FileRecord>, P4Error> {
        match self.run_ztag(&["describe", "-s", change])?.first() {
            Some(record) => described_files(record),
            None => Err(P4Error::NotFound {
                message: format!("change {change}"),
            }),
        }
    }

    fn describe_shelved(&self, change: &str) -> Result<Vec<FileRecord>, P4Error> {
        match self.run_ztag(&["describe", "-s", "-S", change])?.first() {
            Some(record) => described_files(record),
            None => Err(P4Error::NotFound {
                message: format!("shelved change {change}"),
            }),
        }
    }

    fn submitted_changes(&self, after: u64, through: u64) -> Result<Vec<String>, P4Error> {
        let range = format!("//...@>{after},@{through}");
        let mut changes: Vec<String> = self
            .run_ztag(&["changes", "-s", "submitted", &range])?
            .into_iter()
            .filter_map(|mut r| r.remove("change"))
            .collect();
        // p4 lists newest first.
        changes.reverse();
        Ok(changes)
    }

    fn fstat(&self, path: &str) -> Result<FstatInfo, P4Error> {
        let Some(mut r) = self.run_ztag(&["fstat", path])?.into_iter().next() else {
            return Err(P4Error::NotFound {
                message: format!("no such file: {path}"),
            });
        };
        Ok(FstatInfo {
            depot_path: r.remove("depotFile").unwrap_or_else(|| path.to_owned()),
            client_file: r.remove("clientFile"),
            moved_file: r.remove("movedFile"),
            head_rev: r.get("headRev").and_then(|v| v.parse().ok()),
            have_rev: r.get("haveRev").and_then(|v| v.parse().ok()),
        })
    }

    fn where_local(&self, depot_path: &str) -> Result<Option<PathBuf>, P4Error> {
        Ok(self
            .run_ztag(&["where", depot_path])?
            .into_iter()
            .find(|r| !r.contains_key("unmap"))
            .and_then(|mut r| r.remove("path"))
            .map(PathBuf::from))
    }

    fn print_to(&self, file_spec: &str, dest: &Path) -> Result<(), P4Error> {
        let dest = dest.to_string_lossy();
        self.run_checked(&["print", "-q", "-o", &dest, file_spec])
            .map(|_| ())
    }

    fn add(&self, paths: &[PathBuf]) -> Result<(), P4Error> {
        let paths: Vec<String> = paths.iter().map(|p| p.to_string_lossy().into_owned()).collect();
        let mut args = vec!["add"];
        args.extend(paths.iter().map(String::as_str));
        self.run_checked(&args).map(|_| ())
    }

    fn delete(&self, paths: &[PathBuf]) -> Result<(), P4Error> {
        let paths: Vec<String> = paths.iter().map(|p| p.to_string_lossy().into_owned()).collect();
        let mut args = vec!["delete"];
        args.extend(paths.iter().map(String::as_str));
        self.run_checked(&args).map(|_| ())
    }
}
