// tests/git_cli.rs

mod common;
use crate::common::{init_tracing, TestResult};

use std::fs;
use std::path::Path;
use std::process::Command;
use std::sync::Arc;

use chrono::Utc;

use fleetci::errors::CiError;
use fleetci::events::EventBus;
use fleetci::repository::{GitCli, Repository, RepositoryScanner, ScanOutcome, Vcs};

fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .map(|out| out.status.success())
        .unwrap_or(false)
}

fn git(dir: &Path, args: &[&str]) {
    let status = Command::new("git")
        .args(["-c", "user.name=fleetci", "-c", "user.email=fleetci@localhost"])
        .args(args)
        .current_dir(dir)
        .status()
        .unwrap();
    assert!(status.success(), "git {args:?} failed");
}

fn commit(dir: &Path, file: &str, content: &str) {
    fs::write(dir.join(file), content).unwrap();
    git(dir, &["add", "."]);
    git(dir, &["commit", "-q", "-m", file]);
}

#[tokio::test]
async fn scans_a_local_git_repository() -> TestResult {
    init_tracing();
    if !git_available() {
        eprintln!("git not installed; skipping");
        return Ok(());
    }

    let upstream = tempfile::tempdir()?;
    git(upstream.path(), &["init", "-q"]);
    commit(upstream.path(), "README", "hello\n");

    let root = tempfile::tempdir()?;
    let scanner = RepositoryScanner::new(Arc::new(GitCli::default()), root.path());
    let url = upstream.path().to_string_lossy().into_owned();
    let repo = Repository::new("core", &url, "node-a")?;
    let mut events = EventBus::new();

    let (repo, outcome) = scanner.scan(&repo, &mut events, Utc::now()).await;
    let first = match outcome {
        ScanOutcome::Changed { revision } => revision,
        other => panic!("expected a clone, got {other:?}"),
    };
    assert!(scanner.working_copy("core").join("README").is_file());
    assert_eq!(events.len(), 1);

    let (repo, outcome) = scanner.scan(&repo, &mut events, Utc::now()).await;
    assert_eq!(outcome, ScanOutcome::Unchanged);

    commit(upstream.path(), "main.rs", "fn main() {}\n");
    let (repo, outcome) = scanner.scan(&repo, &mut events, Utc::now()).await;
    assert!(matches!(outcome, ScanOutcome::Changed { ref revision } if *revision != first));
    assert!(scanner.working_copy("core").join("main.rs").is_file());
    assert_eq!(repo.last_error, None);

    let log = fs::read_to_string(scanner.log_path("core"))?;
    assert!(log.contains("$ git clone"), "{log}");
    assert!(log.contains("$ git pull"), "{log}");
    assert!(log.contains("$ git rev-parse --short HEAD"), "{log}");
    Ok(())
}

#[tokio::test]
async fn missing_git_program_is_a_vcs_error() -> TestResult {
    let dir = tempfile::tempdir()?;
    let log = dir.path().join("core.log");
    let vcs = GitCli::new("/nonexistent/fleetci-git");

    let err = vcs.head_revision(dir.path(), &log).await.unwrap_err();
    assert!(matches!(err, CiError::Vcs(_)), "{err:?}");
    assert!(fs::read_to_string(&log)?.contains("rev-parse"));
    Ok(())
}
