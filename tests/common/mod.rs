//! Shared test helpers for rbscm integration tests.
//!
//! [`FakeP4`] is an in-memory Perforce server and workspace; depot paths
//! `//depot/<rest>` map to `<root>/<rest>`. [`RecordingRunner`] stands in for
//! the patch program.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::rc::Rc;

use rbscm::process::{ProcessOutput, ProcessRunner};
use rbscm_p4::{ChangeInfo, ChangeStatus, FileRecord, FstatInfo, P4Error, P4Repo, ServerInfo};

// ---------------------------------------------------------------------------
// FakeP4
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeP4 {
    pub root: PathBuf,
    pub installed: bool,
    pub info: ServerInfo,
    pub counters: BTreeMap<String, String>,
    pub changes: BTreeMap<String, ChangeInfo>,
    pub opened: BTreeMap<String, Vec<FileRecord>>,
    pub described: BTreeMap<String, Vec<FileRecord>>,
    pub shelved: BTreeMap<String, Vec<FileRecord>>,
    /// Content keyed by file spec (`//depot/x#3`, `//depot/x@=12`).
    pub depot: BTreeMap<String, Vec<u8>>,
    pub moved: BTreeMap<String, String>,
    /// `add`/`delete` calls, as `"add <path>"`.
    pub log: Rc<RefCell<Vec<String>>>,
    /// Number of `info` calls.
    pub info_calls: Rc<RefCell<usize>>,
}

impl FakeP4 {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_owned(),
            installed: true,
            info: ServerInfo {
                server_address: Some("perforce.example.com:1666".to_owned()),
                client_root: Some(root.display().to_string()),
                client_name: Some("test-ws".to_owned()),
                server_version: Some("P4D/FREEBSD60X86_64/2012.2/525804 (2012/09/18)".to_owned()),
                ..ServerInfo::default()
            },
            ..Self::default()
        }
    }

    fn record(path: &str, revision: u64, action: &str, change: &str) -> FileRecord {
        FileRecord {
            depot_path: path.to_owned(),
            revision,
            action: action.to_owned(),
            change: change.to_owned(),
        }
    }

    fn add_change(&mut self, change: &str, status: ChangeStatus, description: &str) {
        self.changes.insert(
            change.to_owned(),
            ChangeInfo {
                change: change.to_owned(),
                status,
                user: Some("joe".to_owned()),
                client: Some("test-ws".to_owned()),
                description: description.to_owned(),
            },
        );
    }

    /// A submitted change touching `files` (`(path, rev, action)`).
    pub fn submitted(mut self, change: &str, files: &[(&str, u64, &str)]) -> Self {
        self.add_change(change, ChangeStatus::Submitted, &format!("Change {change}\n"));
        self.described.insert(
            change.to_owned(),
            files.iter().map(|(p, r, a)| Self::record(p, *r, a, change)).collect(),
        );
        self
    }

    /// A pending change with opened `files` (`(path, have rev, action)`).
    pub fn pending(mut self, change: &str, files: &[(&str, u64, &str)]) -> Self {
        if change != "default" {
            self.add_change(change, ChangeStatus::Pending, "Pending work\n\nMore detail.\n");
        }
        self.opened.insert(
            change.to_owned(),
            files.iter().map(|(p, r, a)| Self::record(p, *r, a, change)).collect(),
        );
        self
    }

    /// A shelved change with shelved `files`.
    pub fn shelved(mut self, change: &str, files: &[(&str, u64, &str)]) -> Self {
        self.add_change(change, ChangeStatus::Shelved, "Shelved work\n");
        self.shelved.insert(
            change.to_owned(),
            files.iter().map(|(p, r, a)| Self::record(p, *r, a, change)).collect(),
        );
        self
    }

    /// Server content for `spec`.
    pub fn file(mut self, spec: &str, content: &str) -> Self {
        self.depot.insert(spec.to_owned(), content.as_bytes().to_vec());
        self
    }

    /// Workspace content for `depot_path`.
    pub fn local(self, depot_path: &str, content: &str) -> Self {
        let path = self.local_of(depot_path);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
        self
    }

    pub fn moved(mut self, source: &str, dest: &str) -> Self {
        self.moved.insert(source.to_owned(), dest.to_owned());
        self
    }

    pub fn counter(mut self, name: &str, value: &str) -> Self {
        self.counters.insert(name.to_owned(), value.to_owned());
        self
    }

    pub fn local_of(&self, depot_path: &str) -> PathBuf {
        self.root.join(depot_path.trim_start_matches("//depot/"))
    }
}

impl P4Repo for FakeP4 {
    fn check_installed(&self) -> Result<(), P4Error> {
        if self.installed {
            Ok(())
        } else {
            Err(P4Error::NotInstalled {
                program: "p4".to_owned(),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            })
        }
    }

    fn info(&self) -> Result<ServerInfo, P4Error> {
        *self.info_calls.borrow_mut() += 1;
        Ok(self.info.clone())
    }

    fn counters(&self) -> Result<BTreeMap<String, String>, P4Error> {
        Ok(self.counters.clone())
    }

    fn change(&self, change: &str) -> Result<Option<ChangeInfo>, P4Error> {
        Ok(self.changes.get(change).cloned())
    }

    fn opened(&self, change: &str) -> Result<Vec<FileRecord>, P4Error> {
        Ok(self.opened.get(change).cloned().unwrap_or_default())
    }

    fn describe(&self, change: &str) -> Result<Vec<FileRecord>, P4Error> {
        Ok(self.described.get(change).cloned().unwrap_or_default())
    }

    fn describe_shelved(&self, change: &str) -> Result<Vec<FileRecord>, P4Error> {
        Ok(self.shelved.get(change).cloned().unwrap_or_default())
    }

    fn submitted_changes(&self, after: u64, through: u64) -> Result<Vec<String>, P4Error> {
        let mut numbers: Vec<u64> = self
            .changes
            .values()
            .filter(|c| c.status == ChangeStatus::Submitted)
            .filter_map(|c| c.change.parse().ok())
            .filter(|n| *n > after && *n <= through)
            .collect();
        numbers.sort_unstable();
        Ok(numbers.into_iter().map(|n| n.to_string()).collect())
    }

    fn fstat(&self, path: &str) -> Result<FstatInfo, P4Error> {
        Ok(FstatInfo {
            depot_path: path.to_owned(),
            moved_file: self.moved.get(path).cloned(),
            ..FstatInfo::default()
        })
    }

    fn where_local(&self, depot_path: &str) -> Result<Option<PathBuf>, P4Error> {
        Ok(depot_path
            .starts_with("//depot/")
            .then(|| self.local_of(depot_path)))
    }

    fn print_to(&self, file_spec: &str, dest: &Path) -> Result<(), P4Error> {
        let content = self.depot.get(file_spec).ok_or_else(|| P4Error::CommandFailed {
            command: format!("p4 print {file_spec}"),
            exit_code: Some(1),
            stderr: format!("{file_spec} - no such file(s).\n"),
        })?;
        std::fs::write(dest, content)?;
        Ok(())
    }

    fn add(&self, paths: &[PathBuf]) -> Result<(), P4Error> {
        self.log
            .borrow_mut()
            .extend(paths.iter().map(|p| format!("add {}", p.display())));
        Ok(())
    }

    fn delete(&self, paths: &[PathBuf]) -> Result<(), P4Error> {
        for path in paths {
            let _ = std::fs::remove_file(path);
        }
        self.log
            .borrow_mut()
            .extend(paths.iter().map(|p| format!("delete {}", p.display())));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// RecordingRunner
// ---------------------------------------------------------------------------

/// Returns a canned result and records every command line.
#[derive(Clone, Default)]
pub struct RecordingRunner {
    pub calls: Rc<RefCell<Vec<Vec<String>>>>,
    pub response: ProcessOutput,
}

impl RecordingRunner {
    pub fn responding(exit_code: i32, output: &str) -> Self {
        Self {
            calls: Rc::default(),
            response: ProcessOutput {
                exit_code,
                output: output.to_owned(),
                stdout: output.as_bytes().to_vec(),
            },
        }
    }
}

impl ProcessRunner for RecordingRunner {
    fn run(
        &self,
        program: &str,
        args: &[String],
        _cwd: Option<&Path>,
    ) -> std::io::Result<ProcessOutput> {
        let mut call = vec![program.to_owned()];
        call.extend(args.iter().cloned());
        self.calls.borrow_mut().push(call);
        Ok(self.response.clone())
    }
}

// ---------------------------------------------------------------------------
// Misc
// ---------------------------------------------------------------------------

/// Whether `program` can be run.
pub fn have(program: &str) -> bool {
    Command::new(program)
        .arg("--version")
        .output()
        .is_ok_and(|o| o.status.success())
}

/// Replace the `+++` timestamps with a fixed string.
pub fn normalize_timestamps(diff: &[u8]) -> String {
    let re = regex::Regex::new(r"(?m)^(\+\+\+ [^\t\n]+\t)\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2}$")
        .unwrap();
    re.replace_all(&String::from_utf8_lossy(diff), "${1}TIMESTAMP")
        .into_owned()
}

pub fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| (*v).to_owned()).collect()
}
