// tests/task_engine.rs

mod common;
use crate::common::builders::{fast_config, CiFixture, TaskDefinitionBuilder};
use crate::common::{init_tracing, TestResult};

use std::collections::BTreeMap;
use std::fs;
use std::sync::{Arc, Barrier};

use chrono::{TimeDelta, Utc};

use fleetci::cluster::{task_lock_key, Cluster, MemoryCluster};
use fleetci::errors::CiError;
use fleetci::events::{Event, EventBus};
use fleetci::fs::{FileSystem, RealFileSystem};
use fleetci::jobs::ingest_jobs;
use fleetci::tasks::{ExecutionAttempt, ExecutionOutcome, TaskEngine, TaskPhase};

fn engine(fixture: &CiFixture, cluster: Cluster) -> TaskEngine {
    let fs: Arc<dyn FileSystem> = Arc::new(RealFileSystem);
    TaskEngine::new(cluster, fs, &fixture.layout, &fast_config().daemon)
}

fn node(cluster: &MemoryCluster, id: &str) -> Cluster {
    Cluster::new(cluster.join(id).unwrap())
}

#[test]
fn scan_publishes_new_definitions_once() -> TestResult {
    init_tracing();
    let fixture = CiFixture::new();
    fixture.write_task("nightly", &TaskDefinitionBuilder::schedule("1h").build());
    fixture.write_task("on-push", &TaskDefinitionBuilder::repository("core").build());
    fixture.write_task("temp-half-written", &TaskDefinitionBuilder::schedule("1h").build());
    fixture.write_task(".hidden", &TaskDefinitionBuilder::schedule("1h").build());
    fixture.write_task("broken", "this is not toml");

    let cluster = node(&MemoryCluster::new(), "node-a");
    let engine = engine(&fixture, cluster.clone());

    let added = engine.scan_tasks(Utc::now());
    assert_eq!(added, ["nightly", "on-push"]);
    assert_eq!(cluster.tasks().ids()?, ["nightly", "on-push"]);

    assert!(engine.scan_tasks(Utc::now()).is_empty(), "known tasks are not re-published");

    // A definition fixed later is picked up by a later scan.
    fixture.write_task("broken", &TaskDefinitionBuilder::schedule("5m").build());
    assert_eq!(engine.scan_tasks(Utc::now()), ["broken"]);
    Ok(())
}

#[test]
fn execution_submits_the_task_script_as_a_job() -> TestResult {
    let fixture = CiFixture::new();
    let cluster = node(&MemoryCluster::new(), "node-a");
    let engine = engine(&fixture, cluster.clone());
    let now = Utc::now();
    let task = TaskDefinitionBuilder::schedule("1h").immediate().script("make test\n").task("nightly", now);
    cluster.tasks().insert_if_absent(&task)?;

    let (id, attempt) = engine.execute_next_ready(now).expect("one eligible task");
    assert_eq!(id, "nightly");
    assert_eq!(attempt, ExecutionAttempt::Executed(ExecutionOutcome::Success));

    let script = fs::read_to_string(fixture.layout.jobs.join("nightly.sh"))?;
    assert_eq!(script, "make test\n");
    assert_eq!(fixture.job_files().len(), 1, "no temporary file left behind");

    let stored = cluster.tasks().get("nightly")?.unwrap();
    assert_eq!(stored.executions, 1);
    assert_eq!(stored.phase(now), TaskPhase::Executed(ExecutionOutcome::Success));
    assert!(engine.execute_next_ready(now).is_none(), "nothing else is eligible");
    Ok(())
}

#[test]
fn only_one_task_is_attempted_per_call() -> TestResult {
    let fixture = CiFixture::new();
    let cluster = node(&MemoryCluster::new(), "node-a");
    let engine = engine(&fixture, cluster.clone());
    let now = Utc::now();
    for id in ["a", "b"] {
        cluster
            .tasks()
            .insert_if_absent(&TaskDefinitionBuilder::schedule("1h").immediate().task(id, now))?;
    }

    assert_eq!(engine.execute_next_ready(now).map(|(id, _)| id).as_deref(), Some("a"));
    assert_eq!(fixture.job_files().len(), 1);
    assert_eq!(engine.execute_next_ready(now).map(|(id, _)| id).as_deref(), Some("b"));
    assert_eq!(fixture.job_files().len(), 2);
    Ok(())
}

#[test]
fn failed_side_effect_is_recorded_as_error() -> TestResult {
    let fixture = CiFixture::new();
    let cluster = node(&MemoryCluster::new(), "node-a");
    let engine = engine(&fixture, cluster.clone());
    let now = Utc::now();
    cluster
        .tasks()
        .insert_if_absent(&TaskDefinitionBuilder::schedule("1h").immediate().task("nightly", now))?;
    // A plain file where the jobs directory should be makes the write fail.
    fs::remove_dir_all(&fixture.layout.jobs)?;
    fs::write(&fixture.layout.jobs, "")?;

    let (_, attempt) = engine.execute_next_ready(now).expect("one eligible task");
    assert!(matches!(attempt, ExecutionAttempt::Executed(ExecutionOutcome::Error { .. })));
    let stored = cluster.tasks().get("nightly")?.unwrap();
    assert!(matches!(stored.phase(now), TaskPhase::Executed(ExecutionOutcome::Error { .. })));
    Ok(())
}

#[test]
fn pending_submission_is_not_overwritten() -> TestResult {
    let fixture = CiFixture::new();
    let cluster = node(&MemoryCluster::new(), "node-a");
    let engine = engine(&fixture, cluster.clone());
    let now = Utc::now();
    let task = TaskDefinitionBuilder::schedule("1h").immediate().script("make\n").task("nightly", now);
    cluster.tasks().insert_if_absent(&task)?;
    fixture.write_job("nightly.sh", "make earlier\n");

    let (_, attempt) = engine.execute_next_ready(now).expect("one eligible task");
    assert_eq!(attempt, ExecutionAttempt::Executed(ExecutionOutcome::Success));

    let files = fixture.job_files();
    assert_eq!(files.len(), 2, "{files:?}");
    assert_eq!(fs::read_to_string(fixture.layout.jobs.join("nightly.sh"))?, "make earlier\n");
    let tagged = files
        .iter()
        .find(|p| p.file_name().is_some_and(|n| n.to_string_lossy().starts_with("nightly@")))
        .expect("tagged submission");
    assert_eq!(fs::read_to_string(tagged)?, "make\n");

    let jobs = ingest_jobs(&RealFileSystem, &fixture.layout.jobs, ".sh", &cluster);
    assert_eq!(jobs.len(), 2);
    assert!(jobs.iter().all(|j| j.task_id.as_deref() == Some("nightly")));
    assert!(fixture.job_files().is_empty());
    Ok(())
}

#[test]
fn busy_lock_leaves_the_task_expired() -> TestResult {
    let fixture = CiFixture::new();
    let cluster = MemoryCluster::new();
    let (a, b) = (node(&cluster, "node-a"), node(&cluster, "node-b"));
    let now = Utc::now();
    a.tasks()
        .insert_if_absent(&TaskDefinitionBuilder::schedule("1h").immediate().task("nightly", now))?;

    let held = b.try_lock(&task_lock_key("nightly")).expect("free lock");
    let attempt = engine(&fixture, a.clone()).try_execute_task("nightly", now)?;
    assert_eq!(attempt, ExecutionAttempt::LockBusy);
    assert_eq!(a.tasks().get("nightly")?.unwrap().phase(now), TaskPhase::Expired);
    assert!(fixture.job_files().is_empty());

    // Once the holder executed it, the loser finds nothing left to do.
    drop(held);
    let winner = engine(&fixture, b.clone()).try_execute_task("nightly", now)?;
    assert!(matches!(winner, ExecutionAttempt::Executed(_)));
    let late = engine(&fixture, a.clone()).try_execute_task("nightly", now)?;
    assert_eq!(late, ExecutionAttempt::NotEligible);
    assert_eq!(a.tasks().get("nightly")?.unwrap().executions, 1);
    Ok(())
}

#[test]
fn racing_nodes_execute_a_task_exactly_once() -> TestResult {
    for _ in 0..20 {
        let fixture = CiFixture::new();
        let cluster = MemoryCluster::new();
        let nodes = [node(&cluster, "node-a"), node(&cluster, "node-b")];
        let now = Utc::now();
        nodes[0]
            .tasks()
            .insert_if_absent(&TaskDefinitionBuilder::schedule("1h").immediate().task("nightly", now))?;

        let barrier = Barrier::new(2);
        let attempts: Vec<ExecutionAttempt> = std::thread::scope(|scope| {
            let handles: Vec<_> = nodes
                .iter()
                .map(|cluster| {
                    let engine = engine(&fixture, cluster.clone());
                    let barrier = &barrier;
                    scope.spawn(move || {
                        barrier.wait();
                        engine.try_execute_task("nightly", now).unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let executed = attempts
            .iter()
            .filter(|a| matches!(a, ExecutionAttempt::Executed(_)))
            .count();
        assert_eq!(executed, 1, "{attempts:?}");
        assert_eq!(nodes[1].tasks().get("nightly")?.unwrap().executions, 1);
    }
    Ok(())
}

#[tokio::test]
async fn events_reach_interested_tasks() -> TestResult {
    let fixture = CiFixture::new();
    let cluster = node(&MemoryCluster::new(), "node-a");
    let engine = engine(&fixture, cluster.clone());
    let now = Utc::now();
    cluster
        .tasks()
        .insert_if_absent(&TaskDefinitionBuilder::repository("core").task("on-core", now))?;
    cluster
        .tasks()
        .insert_if_absent(&TaskDefinitionBuilder::repository("docs").task("on-docs", now))?;
    cluster
        .tasks()
        .insert_if_absent(&TaskDefinitionBuilder::schedule("1h").task("nightly", now))?;

    let event = Event::RepositoryUpdated {
        repository: "core".to_string(),
        revision: "def456".to_string(),
    };
    assert_eq!(engine.deliver_event(&event, now).await, 1);

    assert_eq!(cluster.tasks().get("on-core")?.unwrap().phase(now), TaskPhase::Expired);
    assert_eq!(cluster.tasks().get("on-docs")?.unwrap().phase(now), TaskPhase::Scanned);
    assert_eq!(cluster.tasks().get("nightly")?.unwrap().phase(now), TaskPhase::Scanned);
    Ok(())
}

#[tokio::test]
async fn event_is_dropped_for_a_task_locked_elsewhere() -> TestResult {
    let fixture = CiFixture::new();
    let cluster = MemoryCluster::new();
    let (a, b) = (node(&cluster, "node-a"), node(&cluster, "node-b"));
    let now = Utc::now();
    a.tasks()
        .insert_if_absent(&TaskDefinitionBuilder::repository("core").task("on-core", now))?;

    let _held = b.try_lock(&task_lock_key("on-core")).expect("free lock");
    let event = Event::RepositoryUpdated {
        repository: "core".to_string(),
        revision: "abc123".to_string(),
    };
    assert_eq!(engine(&fixture, a.clone()).deliver_event(&event, now).await, 0);
    assert!(!a.tasks().get("on-core")?.unwrap().is_ready(now));
    Ok(())
}

#[tokio::test]
async fn stop_is_idempotent_and_keeps_properties() -> TestResult {
    let fixture = CiFixture::new();
    let cluster = node(&MemoryCluster::new(), "node-a");
    let engine = engine(&fixture, cluster.clone());
    let now = Utc::now();
    cluster
        .tasks()
        .insert_if_absent(&TaskDefinitionBuilder::schedule("1h").immediate().task("nightly", now))?;

    let mut properties = BTreeMap::new();
    properties.insert("reason".to_string(), "release freeze".to_string());
    assert!(engine.stop_task("nightly", Some(properties.clone())).await?);
    let once = cluster.tasks().get("nightly")?;

    assert!(!engine.stop_task("nightly", None).await?);
    assert_eq!(cluster.tasks().get("nightly")?, once);

    let stored = once.unwrap();
    assert_eq!(stored.stop_properties, properties);
    assert!(engine.execute_next_ready(now + TimeDelta::hours(2)).is_none());

    assert!(matches!(engine.stop_task("ghost", None).await, Err(CiError::TaskNotFound(_))));
    Ok(())
}

#[tokio::test]
async fn stop_reports_a_task_locked_elsewhere_as_busy() -> TestResult {
    let fixture = CiFixture::new();
    let cluster = MemoryCluster::new();
    let (a, b) = (node(&cluster, "node-a"), node(&cluster, "node-b"));
    let now = Utc::now();
    a.tasks()
        .insert_if_absent(&TaskDefinitionBuilder::schedule("1h").task("nightly", now))?;

    let held = b.try_lock(&task_lock_key("nightly")).expect("free lock");
    let busy = engine(&fixture, a.clone()).stop_task("nightly", None).await;
    assert!(matches!(busy, Err(CiError::TaskBusy(ref id)) if id == "nightly"), "{busy:?}");
    assert!(!a.tasks().get("nightly")?.unwrap().stopped);

    drop(held);
    assert!(engine(&fixture, a.clone()).stop_task("nightly", None).await?);
    Ok(())
}

#[tokio::test]
async fn request_resumes_a_stopped_task() -> TestResult {
    let fixture = CiFixture::new();
    let cluster = node(&MemoryCluster::new(), "node-a");
    let engine = engine(&fixture, cluster.clone());
    let now = Utc::now();
    cluster
        .tasks()
        .insert_if_absent(&TaskDefinitionBuilder::schedule("1h").task("nightly", now))?;
    engine.stop_task("nightly", None).await?;

    let mut events = EventBus::new();
    engine.request_task(&mut events, "nightly")?;
    assert!(matches!(engine.request_task(&mut events, "ghost"), Err(CiError::TaskNotFound(_))));
    assert_eq!(events.len(), 1);

    for event in events.drain() {
        engine.deliver_event(&event, now).await;
    }
    let (id, attempt) = engine.execute_next_ready(now).expect("requested task runs");
    assert_eq!(id, "nightly");
    assert!(matches!(attempt, ExecutionAttempt::Executed(_)));
    Ok(())
}
