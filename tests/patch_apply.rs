//! Patch application: argument construction, output classification, empty
//! files, and round trips through the real `patch` program.

mod common;

use common::{FakeP4, RecordingRunner, have};
use rbscm::ScmClient;
use rbscm::ScmError;
use rbscm::capabilities::Capabilities;
use rbscm::client::PerforceClient;
use rbscm::diff::DiffOptions;
use rbscm::patch::{ONLY_GARBAGE, PatchApplier, PatchRequest};
use rbscm::process::SystemRunner;
use serde_json::json;
use tempfile::TempDir;

fn perforce(dir: &TempDir, runner: RecordingRunner, empty_files: bool) -> PerforceClient<FakeP4> {
    let mut client = PerforceClient::new(FakeP4::new(dir.path()), dir.path()).with_runner(runner);
    client.set_capabilities(Capabilities::new(json!({
        "scmtools": {"perforce": {"empty_files": empty_files}}
    })));
    client.setup().unwrap();
    client
}

/// Arguments of the single recorded call, without the temp file name.
fn recorded_args(runner: &RecordingRunner) -> Vec<String> {
    let calls = runner.calls.borrow();
    assert_eq!(calls.len(), 1);
    let call = &calls[0];
    call[..call.len() - 1].to_vec()
}

// ---------------------------------------------------------------------------
// Arguments
// ---------------------------------------------------------------------------

#[test]
fn strip_count_derived_from_base_path() {
    let dir = TempDir::new().unwrap();
    let runner = RecordingRunner::responding(0, "patching file c/x\n");
    let client = perforce(&dir, runner.clone(), false);
    let request = PatchRequest {
        base_path: "a/b",
        base_dir: "a/b/c",
        ..PatchRequest::new(b"--- x\n+++ x\n")
    };
    let outcome = client.apply_patch(&request).unwrap();
    assert!(outcome.applied);
    assert_eq!(recorded_args(&runner), ["patch", "-E", "-p2", "-i"]);
}

#[test]
fn no_strip_argument_without_base_path() {
    let dir = TempDir::new().unwrap();
    let runner = RecordingRunner::responding(0, "");
    let client = perforce(&dir, runner.clone(), false);
    client.apply_patch(&PatchRequest::new(b"")).unwrap();
    assert_eq!(recorded_args(&runner), ["patch", "-E", "-i"]);
}

#[test]
fn revert_and_explicit_strip() {
    let dir = TempDir::new().unwrap();
    let runner = RecordingRunner::responding(0, "");
    let client = perforce(&dir, runner.clone(), false);
    let request = PatchRequest {
        strip_count: Some(0),
        revert: true,
        base_path: "a",
        base_dir: "a/b",
        ..PatchRequest::new(b"")
    };
    client.apply_patch(&request).unwrap();
    assert_eq!(recorded_args(&runner), ["patch", "-R", "-E", "-p0", "-i"]);
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

#[test]
fn fatal_output_is_an_error() {
    let dir = TempDir::new().unwrap();
    let runner = RecordingRunner::responding(2, "patch: **** malformed patch at line 3: @@\n");
    let client = perforce(&dir, runner, false);
    let err = client.apply_patch(&PatchRequest::new(b"junk")).unwrap_err();
    match err {
        ScmError::Patch { exit_code, output, command } => {
            assert_eq!(exit_code, 2);
            assert!(output.contains("malformed patch"));
            assert!(command.starts_with("patch -E -i "));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn only_garbage_without_empty_file_support_is_not_applied() {
    let dir = TempDir::new().unwrap();
    let client = perforce(&dir, RecordingRunner::responding(2, ONLY_GARBAGE), false);
    let outcome = client.apply_patch(&PatchRequest::new(b"nothing useful")).unwrap();
    assert!(!outcome.applied);
    assert_eq!(outcome.output, ONLY_GARBAGE);
}

#[test]
fn only_garbage_with_no_empty_files_is_an_error() {
    let dir = TempDir::new().unwrap();
    let client = perforce(&dir, RecordingRunner::responding(2, ONLY_GARBAGE), true);
    assert!(matches!(
        client.apply_patch(&PatchRequest::new(b"nothing useful")),
        Err(ScmError::Patch { exit_code: 2, .. })
    ));
}

#[test]
fn only_garbage_with_trailing_text_is_fatal() {
    let dir = TempDir::new().unwrap();
    let output = format!("{ONLY_GARBAGE}extra\n");
    let client = perforce(&dir, RecordingRunner::responding(2, &output), true);
    assert!(matches!(
        client.apply_patch(&PatchRequest::new(b"==== //depot/a#1 ==A== a ====\n\n")),
        Err(ScmError::Patch { .. })
    ));
}

#[test]
fn failed_hunks_are_an_error() {
    let dir = TempDir::new().unwrap();
    let output = "patching file a.txt\n\
                  Hunk #1 FAILED at 1.\n\
                  1 out of 1 hunk FAILED -- saving rejects to file a.txt.rej\n";
    let client = perforce(&dir, RecordingRunner::responding(1, output), false);
    match client.apply_patch(&PatchRequest::new(b"diff")).unwrap_err() {
        ScmError::Patch { exit_code, output, .. } => {
            assert_eq!(exit_code, 1);
            assert!(output.contains("Hunk #1 FAILED"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn unexpected_exit_code_is_an_error() {
    let dir = TempDir::new().unwrap();
    let client = perforce(&dir, RecordingRunner::responding(3, ""), false);
    assert!(matches!(
        client.apply_patch(&PatchRequest::new(b"diff")),
        Err(ScmError::Patch { exit_code: 3, .. })
    ));
}

#[test]
fn trouble_exit_reports_rejected_files() {
    let dir = TempDir::new().unwrap();
    let output = "can't find file to patch at input line 3\n\
                  No file to patch.  Skipping patch.\n\
                  1 out of 1 hunk ignored\n\
                  patching file a.txt\n\
                  Hunk #1 FAILED at 1.\n\
                  1 out of 1 hunk FAILED -- saving rejects to file a.txt.rej\n";
    let client = perforce(&dir, RecordingRunner::responding(2, output), false);
    let outcome = client.apply_patch(&PatchRequest::new(b"diff")).unwrap();
    assert!(!outcome.applied);
    assert_eq!(outcome.rejected_files, ["a.txt"]);
}

// ---------------------------------------------------------------------------
// Empty files
// ---------------------------------------------------------------------------

#[test]
fn empty_files_are_added_and_deleted() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("old-empty"), "").unwrap();
    let client = perforce(&dir, RecordingRunner::responding(2, ONLY_GARBAGE), true);
    let patch = b"==== //depot/new/empty.txt#0 ==A== ws/new/empty.txt ====\n\n\
                  ==== //depot/old-empty#3 ==D== ws/old-empty ====\n\n";
    let request = PatchRequest {
        strip_count: Some(1),
        ..PatchRequest::new(patch)
    };
    let outcome = client.apply_patch(&request).unwrap();
    assert!(outcome.applied);

    let created = dir.path().join("new/empty.txt");
    assert_eq!(std::fs::read(&created).unwrap(), b"");
    assert!(!dir.path().join("old-empty").exists());
    assert_eq!(
        *client.p4().log.borrow(),
        vec![
            format!("add {}", created.display()),
            format!("delete {}", dir.path().join("old-empty").display()),
        ]
    );
}

#[test]
fn reverting_swaps_empty_file_operations() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("added"), "").unwrap();
    let client = perforce(&dir, RecordingRunner::responding(2, ONLY_GARBAGE), true);
    let request = PatchRequest {
        revert: true,
        ..PatchRequest::new(
            b"==== //depot/added#0 ==A== added ====\n\n==== //depot/removed#2 ==D== removed ====\n\n",
        )
    };
    assert!(client.apply_patch(&request).unwrap().applied);
    assert_eq!(
        *client.p4().log.borrow(),
        vec![
            format!("add {}", dir.path().join("removed").display()),
            format!("delete {}", dir.path().join("added").display()),
        ]
    );
    assert!(dir.path().join("removed").exists());
}

#[test]
fn empty_files_alongside_a_normal_patch() {
    let dir = TempDir::new().unwrap();
    let client = perforce(&dir, RecordingRunner::responding(0, "patching file a\n"), true);
    let outcome = client
        .apply_patch(&PatchRequest::new(b"==== //depot/e#0 ==A== e ====\n\n--- a\n+++ a\n"))
        .unwrap();
    assert!(outcome.applied);
    assert_eq!(client.p4().log.borrow().len(), 1);
}

// ---------------------------------------------------------------------------
// Real patch program
// ---------------------------------------------------------------------------

const EDIT: &[u8] = b"--- a/src/a.txt\n+++ b/src/a.txt\n@@ -1,2 +1,2 @@\n one\n-two\n+deux\n";

#[test]
fn round_trip_with_patch() {
    if !have("patch") {
        eprintln!("skipping: patch is not installed");
        return;
    }
    let dir = TempDir::new().unwrap();
    std::fs::create_dir(dir.path().join("src")).unwrap();
    let file = dir.path().join("src/a.txt");
    std::fs::write(&file, "one\ntwo\n").unwrap();

    let applier = PatchApplier::new(&SystemRunner, "patch", dir.path());
    let forward = PatchRequest {
        strip_count: Some(1),
        ..PatchRequest::new(EDIT)
    };
    let outcome = applier.apply(&forward, None).unwrap();
    assert!(outcome.applied, "{}", outcome.output);
    assert_eq!(std::fs::read_to_string(&file).unwrap(), "one\ndeux\n");

    let reverse = PatchRequest {
        revert: true,
        ..forward
    };
    assert!(applier.apply(&reverse, None).unwrap().applied);
    assert_eq!(std::fs::read_to_string(&file).unwrap(), "one\ntwo\n");
}

#[test]
fn conflicting_patch_is_an_error() {
    if !have("patch") {
        eprintln!("skipping: patch is not installed");
        return;
    }
    let dir = TempDir::new().unwrap();
    std::fs::create_dir(dir.path().join("src")).unwrap();
    std::fs::write(dir.path().join("src/a.txt"), "something\nelse\nentirely\n").unwrap();

    let applier = PatchApplier::new(&SystemRunner, "patch", dir.path());
    let request = PatchRequest {
        strip_count: Some(1),
        ..PatchRequest::new(EDIT)
    };
    match applier.apply(&request, None).unwrap_err() {
        ScmError::Patch { exit_code, .. } => assert_eq!(exit_code, 1),
        other => panic!("unexpected error: {other}"),
    }
    assert!(dir.path().join("src/a.txt.rej").exists());
}

#[test]
fn synthesized_changes_apply_to_pristine_tree() {
    if !have("patch") {
        eprintln!("skipping: patch is not installed");
        return;
    }
    let workspace = TempDir::new().unwrap();
    let p4 = FakeP4::new(workspace.path())
        .pending(
            "7",
            &[
                ("//depot/edit.txt", 1, "edit"),
                ("//depot/fresh.txt", 0, "add"),
                ("//depot/gone.txt", 1, "delete"),
            ],
        )
        .file("//depot/edit.txt#1", "one\ntwo\nthree\n")
        .file("//depot/gone.txt#1", "bye\n")
        .local("//depot/edit.txt", "one\nTWO\nthree\n")
        .local("//depot/fresh.txt", "fresh\n");
    let author = PerforceClient::new(p4, workspace.path());
    author.setup().unwrap();
    let range = author.parse_revision_spec(&["7".to_owned()]).unwrap();
    let diff = author.diff(&range, &DiffOptions::default()).unwrap().diff;

    let pristine = TempDir::new().unwrap();
    std::fs::write(pristine.path().join("edit.txt"), "one\ntwo\nthree\n").unwrap();
    std::fs::write(pristine.path().join("gone.txt"), "bye\n").unwrap();
    let reviewer = PerforceClient::new(FakeP4::new(pristine.path()), pristine.path());
    reviewer.setup().unwrap();

    let request = PatchRequest {
        strip_count: Some(2),
        ..PatchRequest::new(&diff)
    };
    let outcome = reviewer.apply_patch(&request).unwrap();
    assert!(outcome.applied, "{}", outcome.output);
    assert_eq!(
        std::fs::read_to_string(pristine.path().join("edit.txt")).unwrap(),
        "one\nTWO\nthree\n"
    );
    assert_eq!(
        std::fs::read_to_string(pristine.path().join("fresh.txt")).unwrap(),
        "fresh\n"
    );
    assert!(!pristine.path().join("gone.txt").exists());
}
