// tests/job_runner.rs

mod common;
use crate::common::{init_tracing, wait_until, with_timeout, TestResult};

use std::fs;
use std::time::Duration;

use fleetci::jobs::{Job, JobOutcome, JobRunner, LOG_FILE};

fn log_of(runner: &JobRunner) -> String {
    fs::read_to_string(runner.log_path()).unwrap_or_default()
}

#[tokio::test]
async fn successful_script_logs_output_and_exit_code() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let job = Job::new("build", "echo hi\n", None);

    let runner = JobRunner::start(job.clone(), dir.path(), Duration::from_secs(1));
    let workspace = dir.path().join(job.id.to_string());
    assert_eq!(runner.workspace(), workspace.as_path());
    assert_eq!(runner.log_path(), workspace.join(LOG_FILE).as_path());

    let outcome = with_timeout(runner.wait()).await;
    assert_eq!(outcome, JobOutcome::Exited(0));
    assert!(outcome.is_success());

    let log = fs::read_to_string(workspace.join(LOG_FILE))?;
    assert!(log.contains("hi\n"), "log was: {log}");
    assert!(log.trim_end().ends_with("exit code: 0"), "log was: {log}");
    assert_eq!(fs::read_to_string(workspace.join("build.sh"))?, "echo hi\n");
    Ok(())
}

#[tokio::test]
async fn script_runs_inside_its_workspace_with_job_env() -> TestResult {
    let dir = tempfile::tempdir()?;
    let job = Job::new("env", "pwd\necho \"$FLEETCI_JOB_NAME $FLEETCI_TASK_ID\"\n", Some("nightly".into()));

    let runner = JobRunner::start(job.clone(), dir.path(), Duration::from_secs(1));
    let log_path = runner.log_path().to_path_buf();
    with_timeout(runner.wait()).await;

    let log = fs::read_to_string(log_path)?;
    assert!(log.contains(&job.id.to_string()), "log was: {log}");
    assert!(log.contains("env nightly"), "log was: {log}");
    Ok(())
}

#[tokio::test]
async fn nonzero_exit_and_stderr_are_recorded() -> TestResult {
    let dir = tempfile::tempdir()?;
    let job = Job::new("fail", "echo oops >&2\nexit 3\n", None);

    let runner = JobRunner::start(job, dir.path(), Duration::from_secs(1));
    let log_path = runner.log_path().to_path_buf();
    let outcome = with_timeout(runner.wait()).await;

    assert_eq!(outcome, JobOutcome::Exited(3));
    let log = fs::read_to_string(log_path)?;
    assert!(log.contains("oops"));
    assert!(log.trim_end().ends_with("exit code: 3"));
    Ok(())
}

#[tokio::test]
async fn graceful_stop_terminates_the_process() -> TestResult {
    let dir = tempfile::tempdir()?;
    let runner = JobRunner::start(
        Job::new("slow", "echo started\nsleep 30\n", None),
        dir.path(),
        Duration::from_secs(5),
    );
    with_timeout(wait_until(|| log_of(&runner).contains("started"))).await;
    assert!(runner.is_running());

    runner.stop();
    let log_path = runner.log_path().to_path_buf();
    let outcome = with_timeout(runner.wait()).await;

    assert_eq!(outcome, JobOutcome::Stopped { forced: false });
    assert!(fs::read_to_string(log_path)?.trim_end().ends_with("stopped (graceful)"));
    Ok(())
}

#[tokio::test]
async fn stop_escalates_to_kill_after_grace_period() -> TestResult {
    let dir = tempfile::tempdir()?;
    let runner = JobRunner::start(
        Job::new("stubborn", "trap '' TERM\necho ready\nsleep 30\n", None),
        dir.path(),
        Duration::from_millis(200),
    );
    with_timeout(wait_until(|| log_of(&runner).contains("ready"))).await;

    runner.stop();
    let outcome = with_timeout(runner.wait()).await;
    assert_eq!(outcome, JobOutcome::Stopped { forced: true });
    Ok(())
}

#[tokio::test]
async fn force_stop_kills_immediately() -> TestResult {
    let dir = tempfile::tempdir()?;
    let runner = JobRunner::start(
        Job::new("forever", "echo up\nsleep 30\n", None),
        dir.path(),
        Duration::from_secs(30),
    );
    with_timeout(wait_until(|| log_of(&runner).contains("up"))).await;

    runner.force_stop();
    let outcome = with_timeout(runner.wait()).await;
    assert_eq!(outcome, JobOutcome::Stopped { forced: true });
    Ok(())
}

#[tokio::test]
async fn stopping_a_finished_job_is_harmless() -> TestResult {
    let dir = tempfile::tempdir()?;
    let runner = JobRunner::start(Job::new("quick", "true\n", None), dir.path(), Duration::from_secs(1));
    with_timeout(wait_until(|| !runner.is_running())).await;

    runner.stop();
    runner.force_stop();
    assert_eq!(with_timeout(runner.wait()).await, JobOutcome::Exited(0));
    Ok(())
}

#[tokio::test]
async fn unusable_workspace_drops_the_job() -> TestResult {
    let dir = tempfile::tempdir()?;
    let not_a_dir = dir.path().join("workspaces");
    fs::write(&not_a_dir, "file in the way")?;

    let runner = JobRunner::start(Job::new("doomed", "true\n", None), &not_a_dir, Duration::from_secs(1));
    let outcome = with_timeout(runner.wait()).await;
    assert!(matches!(outcome, JobOutcome::LaunchFailed(_)), "{outcome:?}");
    Ok(())
}
