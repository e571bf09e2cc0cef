//! Git backend against a real repository. Skipped when git is not installed.

mod common;

use std::path::Path;
use std::process::Command;

use common::{have, strings};
use rbscm::ScmError;
use rbscm::client::{GitClient, ScmClient};
use rbscm::diff::DiffOptions;
use rbscm::patch::PatchRequest;
use rbscm::revision::RevisionId;
use tempfile::TempDir;

/// Run git in `root`. Panics on failure.
fn git(root: &Path, args: &[&str]) -> String {
    let out = Command::new("git")
        .args(args)
        .current_dir(root)
        .output()
        .unwrap_or_else(|e| panic!("failed to spawn git {}: {e}", args.join(" ")));
    assert!(
        out.status.success(),
        "git {} failed:\n{}",
        args.join(" "),
        String::from_utf8_lossy(&out.stderr)
    );
    String::from_utf8_lossy(&out.stdout).trim().to_owned()
}

/// Repo with two commits touching `a.txt`. Returns (dir, first, second).
fn setup_repo() -> Option<(TempDir, String, String)> {
    if !have("git") {
        eprintln!("skipping: git is not installed");
        return None;
    }
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    git(root, &["init", "-q"]);
    git(root, &["config", "user.name", "Test"]);
    git(root, &["config", "user.email", "test@example.com"]);
    git(root, &["config", "commit.gpgsign", "false"]);

    std::fs::write(root.join("a.txt"), "one\ntwo\n").unwrap();
    git(root, &["add", "a.txt"]);
    git(root, &["commit", "-q", "-m", "Initial"]);
    let first = git(root, &["rev-parse", "HEAD"]);

    std::fs::write(root.join("a.txt"), "one\ndeux\n").unwrap();
    std::fs::write(root.join("b.txt"), "bee\n").unwrap();
    git(root, &["add", "a.txt", "b.txt"]);
    git(root, &["commit", "-q", "-m", "Translate\n\nUse French for two."]);
    let second = git(root, &["rev-parse", "HEAD"]);
    Some((dir, first, second))
}

fn client(root: &Path) -> GitClient {
    let client = GitClient::new(root);
    client.setup().unwrap();
    client
}

#[test]
fn resolves_revisions() {
    let Some((dir, first, second)) = setup_repo() else {
        return;
    };
    let client = client(dir.path());

    let working = client.parse_revision_spec(&[]).unwrap();
    assert_eq!(working.base, RevisionId::Concrete(second.clone()));
    assert_eq!(working.tip, RevisionId::WorkingCopy);

    let single = client.parse_revision_spec(&strings(&["HEAD"])).unwrap();
    assert_eq!(single.base, RevisionId::Concrete(first.clone()));
    assert_eq!(single.tip, RevisionId::Concrete(second.clone()));
    assert_eq!(single.commit_id.as_deref(), Some(second.as_str()));

    let dotted = client.parse_revision_spec(&strings(&["HEAD~1..HEAD"])).unwrap();
    assert_eq!(dotted.base, RevisionId::Concrete(first.clone()));
    assert_eq!(dotted.tip, RevisionId::Concrete(second.clone()));

    let pair = client.parse_revision_spec(&strings(&[first.as_str(), second.as_str()])).unwrap();
    assert_eq!(pair.base, dotted.base);
    assert_eq!(pair.commit_id, None);

    assert!(matches!(
        client.parse_revision_spec(&strings(&["a", "b", "c"])),
        Err(ScmError::TooManyRevisions)
    ));
    assert!(matches!(
        client.parse_revision_spec(&strings(&["no-such-branch"])),
        Err(ScmError::InvalidRevisionSpec { .. })
    ));
}

#[test]
fn diff_of_commit_and_exclusions() {
    let Some((dir, first, _)) = setup_repo() else {
        return;
    };
    let client = client(dir.path());
    let range = client.parse_revision_spec(&strings(&["HEAD"])).unwrap();

    let result = client.diff(&range, &DiffOptions::default()).unwrap();
    let diff = String::from_utf8(result.diff).unwrap();
    assert!(diff.contains("+++ b/a.txt\n"), "{diff}");
    assert!(diff.contains("-two\n+deux\n"), "{diff}");
    assert!(diff.contains("+++ b/b.txt\n"), "{diff}");
    assert_eq!(result.base_commit_id.as_deref(), Some(first.as_str()));
    assert_eq!(result.parent_diff, None);

    let options = DiffOptions {
        exclude_patterns: strings(&["b.txt"]),
        ..DiffOptions::default()
    };
    let diff = String::from_utf8(client.diff(&range, &options).unwrap().diff).unwrap();
    assert!(diff.contains("a.txt"));
    assert!(!diff.contains("b.txt"), "{diff}");

    let options = DiffOptions {
        include_files: strings(&["b.txt"]),
        ..DiffOptions::default()
    };
    let diff = String::from_utf8(client.diff(&range, &options).unwrap().diff).unwrap();
    assert!(!diff.contains("a.txt"), "{diff}");
}

#[test]
fn working_copy_changes() {
    let Some((dir, _, _)) = setup_repo() else {
        return;
    };
    let client = client(dir.path());
    assert!(!client.has_pending_changes().unwrap());

    std::fs::write(dir.path().join("a.txt"), "one\ndeux\ntrois\n").unwrap();
    assert!(client.has_pending_changes().unwrap());
    let range = client.parse_revision_spec(&[]).unwrap();
    let diff = client.diff(&range, &DiffOptions::default()).unwrap().diff;
    assert!(String::from_utf8(diff).unwrap().contains("+trois\n"));
}

#[test]
fn parent_branch_produces_parent_diff() {
    let Some((dir, first, second)) = setup_repo() else {
        return;
    };
    git(dir.path(), &["branch", "base-work", &second]);
    std::fs::write(dir.path().join("a.txt"), "un\ndeux\n").unwrap();
    git(dir.path(), &["commit", "-q", "-a", "-m", "More French"]);
    let third = git(dir.path(), &["rev-parse", "HEAD"]);

    let client = GitClient::new(dir.path()).with_parent_branch("base-work");
    client.setup().unwrap();

    let range = client.parse_revision_spec(&strings(&[first.as_str(), third.as_str()])).unwrap();
    assert_eq!(range.parent_base, Some(RevisionId::Concrete(first)));
    assert_eq!(range.base, RevisionId::Concrete(second.clone()));
    assert_eq!(range.tip, RevisionId::Concrete(third));

    let result = client.diff(&range, &DiffOptions::default()).unwrap();
    let diff = String::from_utf8(result.diff).unwrap();
    assert!(diff.contains("-one\n+un\n"), "{diff}");
    assert!(!diff.contains("b.txt"), "{diff}");
    let parent = String::from_utf8(result.parent_diff.unwrap()).unwrap();
    assert!(parent.contains("-two\n+deux\n"), "{parent}");
    assert!(parent.contains("+++ b/b.txt\n"), "{parent}");
    assert_eq!(result.base_commit_id, Some(second));
}

#[test]
fn commit_message_of_single_commit() {
    let Some((dir, _, _)) = setup_repo() else {
        return;
    };
    let client = client(dir.path());
    let range = client.parse_revision_spec(&strings(&["HEAD"])).unwrap();
    let message = client.get_commit_message(&range).unwrap().unwrap();
    assert_eq!(message.summary, "Translate");
    assert_eq!(message.description, "Use French for two.");
}

#[test]
fn repository_info_and_server_url() {
    let Some((dir, _, _)) = setup_repo() else {
        return;
    };
    git(dir.path(), &["config", "reviewboard.url", "https://reviews.example.com/"]);
    let client = client(dir.path());
    let info = client.get_repository_info().unwrap().unwrap();
    assert_eq!(info.base_path.as_deref(), Some("/"));
    assert_eq!(
        client.scan_for_server().unwrap().as_deref(),
        Some("https://reviews.example.com/")
    );
}

#[test]
fn diff_round_trips_through_patch() {
    if !have("patch") {
        eprintln!("skipping: patch is not installed");
        return;
    }
    let Some((dir, first, _)) = setup_repo() else {
        return;
    };
    let client = client(dir.path());
    let range = client.parse_revision_spec(&strings(&["HEAD"])).unwrap();
    let diff = client.diff(&range, &DiffOptions::default()).unwrap().diff;

    git(dir.path(), &["checkout", "-q", &first]);
    assert!(!dir.path().join("b.txt").exists());

    let request = PatchRequest {
        strip_count: Some(1),
        ..PatchRequest::new(&diff)
    };
    let outcome = client.apply_patch(&request).unwrap();
    assert!(outcome.applied, "{}", outcome.output);
    assert_eq!(
        std::fs::read_to_string(dir.path().join("a.txt")).unwrap(),
        "one\ndeux\n"
    );
    assert_eq!(
        std::fs::read_to_string(dir.path().join("b.txt")).unwrap(),
        "bee\n"
    );
}
