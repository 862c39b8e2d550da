// tests/job_intake.rs

mod common;
use crate::common::builders::TaskDefinitionBuilder;
use crate::common::{init_tracing, TestResult};

use std::path::Path;

use chrono::Utc;

use fleetci::cluster::{Cluster, MemoryCluster};
use fleetci::fs::mock::MockFileSystem;
use fleetci::fs::FileSystem;
use fleetci::jobs::ingest_jobs;

fn cluster() -> Cluster {
    Cluster::new(MemoryCluster::new().join("node-a").unwrap())
}

#[test]
fn script_without_matching_task_becomes_untagged_job() -> TestResult {
    init_tracing();
    let fs = MockFileSystem::new();
    fs.add_file("/ci/jobs/build.sh", "echo hi\n");
    let cluster = cluster();

    let jobs = ingest_jobs(&fs, Path::new("/ci/jobs"), ".sh", &cluster);

    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].name, "build");
    assert_eq!(jobs[0].script, "echo hi\n");
    assert_eq!(jobs[0].task_id, None);
    assert!(!fs.exists(Path::new("/ci/jobs/build.sh")));

    let queued = cluster.jobs().snapshot()?;
    assert_eq!(queued, jobs);
    Ok(())
}

#[test]
fn script_named_after_a_task_is_tagged() -> TestResult {
    let fs = MockFileSystem::new();
    fs.add_file("/ci/jobs/nightly.sh", "make");
    let cluster = cluster();
    let task = TaskDefinitionBuilder::schedule("1h").task("nightly", Utc::now());
    cluster.tasks().insert_if_absent(&task)?;

    let jobs = ingest_jobs(&fs, Path::new("/ci/jobs"), ".sh", &cluster);

    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].task_id.as_deref(), Some("nightly"));
    Ok(())
}

#[test]
fn tagged_submissions_keep_their_task() -> TestResult {
    let fs = MockFileSystem::new();
    fs.add_file("/ci/jobs/nightly.sh", "make first");
    fs.add_file("/ci/jobs/nightly@1f3a9c2e.sh", "make second");
    let cluster = cluster();
    let task = TaskDefinitionBuilder::schedule("1h").task("nightly", Utc::now());
    cluster.tasks().insert_if_absent(&task)?;

    let jobs = ingest_jobs(&fs, Path::new("/ci/jobs"), ".sh", &cluster);

    let scripts: Vec<_> = jobs.iter().map(|j| j.script.as_str()).collect();
    assert_eq!(scripts, ["make first", "make second"]);
    for job in &jobs {
        assert_eq!(job.name, "nightly");
        assert_eq!(job.task_id.as_deref(), Some("nightly"));
    }
    assert!(!fs.exists(Path::new("/ci/jobs/nightly@1f3a9c2e.sh")));
    Ok(())
}

#[test]
fn only_suffix_files_are_ingested_in_name_order() -> TestResult {
    let fs = MockFileSystem::new();
    fs.add_file("/ci/jobs/b.sh", "echo b");
    fs.add_file("/ci/jobs/a.sh", "echo a");
    fs.add_file("/ci/jobs/notes.txt", "not a job");
    fs.add_file("/ci/jobs/.hidden.sh.tmp", "half written");
    fs.add_dir("/ci/jobs/dir.sh");
    let cluster = cluster();

    let jobs = ingest_jobs(&fs, Path::new("/ci/jobs"), ".sh", &cluster);

    let names: Vec<_> = jobs.iter().map(|j| j.name.as_str()).collect();
    assert_eq!(names, ["a", "b"]);
    assert!(fs.exists(Path::new("/ci/jobs/notes.txt")));
    assert!(fs.exists(Path::new("/ci/jobs/.hidden.sh.tmp")));

    assert_eq!(cluster.jobs().pop()?.map(|j| j.name), Some("a".to_string()));
    assert_eq!(cluster.jobs().pop()?.map(|j| j.name), Some("b".to_string()));
    assert!(cluster.jobs().is_empty()?);
    Ok(())
}

#[test]
fn unreadable_script_is_deleted_and_dropped() -> TestResult {
    let fs = MockFileSystem::new();
    fs.add_file("/ci/jobs/broken.sh", "echo nope");
    fs.fail_reads("/ci/jobs/broken.sh");
    fs.add_file("/ci/jobs/ok.sh", "echo ok");
    let cluster = cluster();

    let jobs = ingest_jobs(&fs, Path::new("/ci/jobs"), ".sh", &cluster);

    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].name, "ok");
    assert!(!fs.exists(Path::new("/ci/jobs/broken.sh")));
    assert_eq!(cluster.jobs().len()?, 1);
    Ok(())
}

#[test]
fn missing_directory_is_not_fatal() {
    let fs = MockFileSystem::new();
    let jobs = ingest_jobs(&fs, Path::new("/ci/jobs"), ".sh", &cluster());
    assert!(jobs.is_empty());
}

#[test]
fn every_job_gets_a_distinct_id() {
    let fs = MockFileSystem::new();
    fs.add_file("/ci/jobs/x.sh", "true");
    fs.add_file("/ci/jobs/y.sh", "true");
    let jobs = ingest_jobs(&fs, Path::new("/ci/jobs"), ".sh", &cluster());
    assert_ne!(jobs[0].id, jobs[1].id);
}
