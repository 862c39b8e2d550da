// tests/repository_scan.rs

mod common;
use crate::common::fake_vcs::FakeVcs;
use crate::common::{init_tracing, TestResult};

use std::fs;
use std::sync::Arc;

use chrono::{TimeDelta, Utc};

use fleetci::errors::CiError;
use fleetci::events::{Event, EventBus};
use fleetci::fs::{FileSystem, RealFileSystem};
use fleetci::repository::{Repository, RepositoryScanner, RepositoryStore, ScanOutcome};

fn scanner(vcs: &FakeVcs, dir: &std::path::Path) -> RepositoryScanner {
    RepositoryScanner::new(Arc::new(vcs.clone()), dir)
}

#[tokio::test]
async fn first_scan_clones_and_announces_the_revision() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let vcs = FakeVcs::new("abc123");
    let scanner = scanner(&vcs, dir.path());
    let repo = Repository::new("core", "https://git.example.com/core.git", "node-a")?;
    assert!(repo.is_empty());

    let mut events = EventBus::new();
    let now = Utc::now();
    let (scanned, outcome) = scanner.scan(&repo, &mut events, now).await;

    assert_eq!(
        outcome,
        ScanOutcome::Changed {
            revision: "abc123".to_string()
        }
    );
    assert_eq!(scanned.last_revision.as_deref(), Some("abc123"));
    assert_eq!(scanned.last_scan, Some(now));
    assert_eq!(scanned.last_error, None);
    assert_eq!(vcs.calls(), ["clone https://git.example.com/core.git", "rev-parse"]);
    assert!(scanner.working_copy("core").join("README").is_file());

    assert_eq!(
        events.drain(),
        [Event::RepositoryUpdated {
            repository: "core".to_string(),
            revision: "abc123".to_string(),
        }]
    );
    Ok(())
}

#[tokio::test]
async fn new_upstream_revision_is_announced_once() -> TestResult {
    let dir = tempfile::tempdir()?;
    let vcs = FakeVcs::new("abc123");
    let scanner = scanner(&vcs, dir.path());
    let mut events = EventBus::new();
    let now = Utc::now();

    let repo = Repository::new("core", "https://git.example.com/core.git", "node-a")?;
    let (repo, _) = scanner.scan(&repo, &mut events, now).await;
    events.drain();

    vcs.set_revision("def456");
    let later = now + TimeDelta::minutes(5);
    let (repo, outcome) = scanner.scan(&repo, &mut events, later).await;
    assert_eq!(
        outcome,
        ScanOutcome::Changed {
            revision: "def456".to_string()
        }
    );
    assert_eq!(repo.last_revision.as_deref(), Some("def456"));
    assert_eq!(repo.last_scan, Some(later));
    assert_eq!(events.len(), 1);
    assert!(vcs.calls().iter().filter(|c| c.starts_with("clone")).count() == 1);
    assert!(vcs.calls().contains(&"pull".to_string()));

    // Scanning again without upstream changes is quiet.
    events.drain();
    let (again, outcome) = scanner.scan(&repo, &mut events, later).await;
    assert_eq!(outcome, ScanOutcome::Unchanged);
    assert_eq!(again, repo);
    assert!(events.is_empty());
    Ok(())
}

#[tokio::test]
async fn failure_keeps_the_previous_revision() -> TestResult {
    let dir = tempfile::tempdir()?;
    let vcs = FakeVcs::new("abc123");
    let scanner = scanner(&vcs, dir.path());
    let mut events = EventBus::new();
    let now = Utc::now();

    let repo = Repository::new("core", "https://git.example.com/core.git", "node-a")?;
    let (repo, _) = scanner.scan(&repo, &mut events, now).await;
    events.drain();

    vcs.fail_with("connection refused");
    let (failed, outcome) = scanner.scan(&repo, &mut events, now + TimeDelta::minutes(1)).await;
    assert!(matches!(outcome, ScanOutcome::Failed { ref error } if error.contains("connection refused")));
    assert_eq!(failed.last_revision.as_deref(), Some("abc123"));
    assert_eq!(failed.last_scan, Some(now), "last successful scan is kept");
    assert!(failed.last_error.as_deref().is_some_and(|e| e.contains("connection refused")));
    assert!(events.is_empty());

    vcs.recover();
    vcs.set_revision("def456");
    let (recovered, _) = scanner.scan(&failed, &mut events, now + TimeDelta::minutes(2)).await;
    assert_eq!(recovered.last_error, None);
    assert_eq!(recovered.last_revision.as_deref(), Some("def456"));
    assert_eq!(events.len(), 1);
    Ok(())
}

#[tokio::test]
async fn failed_clone_leaves_the_repository_empty() -> TestResult {
    let dir = tempfile::tempdir()?;
    let vcs = FakeVcs::new("abc123");
    vcs.fail_with("repository not found");
    let scanner = scanner(&vcs, dir.path());
    let mut events = EventBus::new();

    let repo = Repository::new("ghost", "https://git.example.com/ghost.git", "node-a")?;
    let (failed, _) = scanner.scan(&repo, &mut events, Utc::now()).await;
    assert!(failed.is_empty());
    assert!(failed.last_scan.is_none());
    assert!(failed.last_error.is_some());
    assert!(events.is_empty());

    // The next scan retries the clone.
    vcs.recover();
    let (cloned, _) = scanner.scan(&failed, &mut events, Utc::now()).await;
    assert_eq!(cloned.last_revision.as_deref(), Some("abc123"));
    assert_eq!(vcs.calls().iter().filter(|c| c.starts_with("clone")).count(), 2);
    Ok(())
}

#[tokio::test]
async fn version_control_output_is_appended_to_the_repository_log() -> TestResult {
    let dir = tempfile::tempdir()?;
    let vcs = FakeVcs::new("abc123");
    let scanner = scanner(&vcs, dir.path());
    let mut events = EventBus::new();

    let repo = Repository::new("core", "https://git.example.com/core.git", "node-a")?;
    let (repo, _) = scanner.scan(&repo, &mut events, Utc::now()).await;
    scanner.scan(&repo, &mut events, Utc::now()).await;

    let log = fs::read_to_string(scanner.log_path("core"))?;
    let lines: Vec<&str> = log.lines().collect();
    assert_eq!(
        lines,
        ["clone https://git.example.com/core.git", "rev-parse", "pull", "rev-parse"]
    );
    Ok(())
}

#[test]
fn repository_names_and_urls_are_validated() {
    assert!(matches!(
        Repository::new("../core", "https://example.com", "node-a"),
        Err(CiError::InvalidCommand(_))
    ));
    assert!(matches!(Repository::new("core", "  ", "node-a"), Err(CiError::InvalidCommand(_))));
}

#[test]
fn store_persists_snapshots_as_json() -> TestResult {
    let dir = tempfile::tempdir()?;
    let real: Arc<dyn FileSystem> = Arc::new(RealFileSystem);
    let store = RepositoryStore::new(real, dir.path());

    assert_eq!(store.get("core")?, None);
    assert!(store.load_all()?.is_empty());

    let core = Repository::new("core", "https://git.example.com/core.git", "node-a")?
        .scanned(Utc::now(), "abc123".to_string());
    let docs = Repository::new("docs", "https://git.example.com/docs.git", "node-b")?;
    store.save(&docs)?;
    store.save(&core)?;

    assert_eq!(store.get("core")?, Some(core.clone()));
    assert_eq!(store.load_all()?, [core.clone(), docs]);

    let failed = core.failed("timeout");
    store.save(&failed)?;
    assert_eq!(store.get("core")?, Some(failed));

    let json = fs::read_to_string(dir.path().join("core.json"))?;
    assert!(json.contains("\"kind\": \"git\""), "{json}");
    Ok(())
}

#[test]
fn store_skips_logs_working_copies_and_corrupt_snapshots() -> TestResult {
    let dir = tempfile::tempdir()?;
    let real: Arc<dyn FileSystem> = Arc::new(RealFileSystem);
    let store = RepositoryStore::new(real, dir.path());

    let core = Repository::new("core", "https://git.example.com/core.git", "node-a")?;
    store.save(&core)?;
    fs::create_dir_all(dir.path().join("core"))?;
    fs::write(dir.path().join("core.log"), "clone\n")?;
    fs::write(dir.path().join("broken.json"), "{ not json")?;
    fs::write(dir.path().join(".half.json.tmp"), "{}")?;

    assert_eq!(store.load_all()?, [core]);
    assert!(store.get("broken").is_err());
    Ok(())
}
