// src/jobs/runner.rs

//! Job process runner.
//!
//! A `JobRunner` binds one [`Job`] to one OS process for its whole lifetime.
//! The process runs on its own Tokio task so the orchestrator tick is never
//! blocked by a running job.

use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Sleep;
use tracing::{debug, error, info, warn};

use crate::jobs::Job;

/// Name of the combined stdout/stderr log inside a job workspace.
pub const LOG_FILE: &str = "output.log";

/// How a job ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// The script exited on its own with this code.
    Exited(i32),
    /// The script was killed by a signal nobody here sent.
    Signalled(i32),
    /// The script was stopped through `stop()` / `force_stop()`.
    Stopped { forced: bool },
    /// The process could not be started.
    LaunchFailed(String),
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, JobOutcome::Exited(0))
    }
}

impl fmt::Display for JobOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobOutcome::Exited(code) => write!(f, "exit code: {code}"),
            JobOutcome::Signalled(signal) => write!(f, "terminated by signal {signal}"),
            JobOutcome::Stopped { forced: false } => f.write_str("stopped (graceful)"),
            JobOutcome::Stopped { forced: true } => f.write_str("stopped (forced)"),
            JobOutcome::LaunchFailed(reason) => write!(f, "launch failed: {reason}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopRequest {
    Graceful,
    Forced,
}

pub struct JobRunner {
    job: Job,
    workspace: PathBuf,
    log_path: PathBuf,
    stop_tx: mpsc::UnboundedSender<StopRequest>,
    handle: JoinHandle<JobOutcome>,
}

impl fmt::Debug for JobRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobRunner")
            .field("job", &self.job)
            .field("workspace", &self.workspace)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl JobRunner {
    /// Start `job` in `<workspaces_dir>/<job-id>/`.
    ///
    /// `grace` bounds how long a graceful stop waits before killing.
    /// Must be called from within a Tokio runtime.
    pub fn start(job: Job, workspaces_dir: &Path, grace: Duration) -> Self {
        let workspace = workspaces_dir.join(job.id.to_string());
        let log_path = workspace.join(LOG_FILE);
        let (stop_tx, stop_rx) = mpsc::unbounded_channel();

        let handle = tokio::spawn(run_job(
            job.clone(),
            workspace.clone(),
            log_path.clone(),
            grace,
            stop_rx,
        ));

        Self {
            job,
            workspace,
            log_path,
            stop_tx,
            handle,
        }
    }

    pub fn job(&self) -> &Job {
        &self.job
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Liveness, without blocking.
    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Ask the process to terminate; it is killed if it is still alive
    /// after the grace period.
    pub fn stop(&self) {
        self.request(StopRequest::Graceful);
    }

    /// Kill the process immediately.
    pub fn force_stop(&self) {
        self.request(StopRequest::Forced);
    }

    fn request(&self, request: StopRequest) {
        if self.stop_tx.send(request).is_err() {
            debug!(job_id = %self.job.id, ?request, "job already finished; stop ignored");
        }
    }

    /// Wait for the job to finish.
    pub async fn wait(self) -> JobOutcome {
        match self.handle.await {
            Ok(outcome) => outcome,
            Err(err) => JobOutcome::LaunchFailed(format!("runner task failed: {err}")),
        }
    }
}

async fn run_job(
    job: Job,
    workspace: PathBuf,
    log_path: PathBuf,
    grace: Duration,
    mut stop_rx: mpsc::UnboundedReceiver<StopRequest>,
) -> JobOutcome {
    let outcome = match run_job_inner(&job, &workspace, &log_path, grace, &mut stop_rx).await {
        Ok(outcome) => outcome,
        Err(err) => {
            error!(job_id = %job.id, name = %job.name, error = %format!("{err:#}"), "job could not be started; dropped");
            JobOutcome::LaunchFailed(format!("{err:#}"))
        }
    };

    if let Err(err) = append_log_line(&log_path, &outcome.to_string()) {
        warn!(job_id = %job.id, error = %err, "failed to record job outcome in log");
    }

    match &outcome {
        JobOutcome::Exited(0) => info!(job_id = %job.id, name = %job.name, "job finished"),
        other => warn!(job_id = %job.id, name = %job.name, outcome = %other, "job did not succeed"),
    }

    outcome
}

async fn run_job_inner(
    job: &Job,
    workspace: &Path,
    log_path: &Path,
    grace: Duration,
    stop_rx: &mut mpsc::UnboundedReceiver<StopRequest>,
) -> Result<JobOutcome> {
    fs::create_dir_all(workspace)
        .with_context(|| format!("creating workspace {:?}", workspace))?;

    let script_path = workspace.join(format!("{}.sh", job.name));
    fs::write(&script_path, &job.script)
        .with_context(|| format!("writing script {:?}", script_path))?;

    let log = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .with_context(|| format!("opening log {:?}", log_path))?;
    let err_log = log.try_clone().context("duplicating log handle")?;

    let mut cmd = Command::new("sh");
    cmd.arg(&script_path)
        .current_dir(workspace)
        .env("FLEETCI_JOB_ID", job.id.to_string())
        .env("FLEETCI_JOB_NAME", &job.name)
        .stdin(Stdio::null())
        .stdout(Stdio::from(log))
        .stderr(Stdio::from(err_log))
        .kill_on_drop(true);
    if let Some(task_id) = &job.task_id {
        cmd.env("FLEETCI_TASK_ID", task_id);
    }
    // Own process group, so stopping reaches everything the script spawned.
    #[cfg(unix)]
    cmd.process_group(0);

    let mut child = cmd
        .spawn()
        .with_context(|| format!("spawning process for job '{}'", job.name))?;

    info!(
        job_id = %job.id,
        name = %job.name,
        pid = ?child.id(),
        workspace = %workspace.display(),
        "job process started"
    );

    let mut stop_requested: Option<bool> = None;
    let mut grace_timer: Option<Pin<Box<Sleep>>> = None;

    let status = loop {
        tokio::select! {
            status = child.wait() => {
                break status.with_context(|| format!("waiting for process of job '{}'", job.name))?;
            }

            Some(request) = stop_rx.recv() => match request {
                StopRequest::Graceful => {
                    if stop_requested.is_none() {
                        info!(job_id = %job.id, ?grace, "graceful stop requested");
                        stop_requested = Some(false);
                        terminate(&mut child);
                        grace_timer = Some(Box::pin(tokio::time::sleep(grace)));
                    }
                }
                StopRequest::Forced => {
                    warn!(job_id = %job.id, "forced stop requested; killing process");
                    stop_requested = Some(true);
                    grace_timer = None;
                    kill(&mut child);
                }
            },

            _ = async {
                match grace_timer.as_mut() {
                    Some(timer) => timer.as_mut().await,
                    None => std::future::pending::<()>().await,
                }
            } => {
                warn!(job_id = %job.id, ?grace, "grace period elapsed; killing process");
                stop_requested = Some(true);
                grace_timer = None;
                kill(&mut child);
            }
        }
    };

    Ok(classify(status, stop_requested))
}

fn classify(status: ExitStatus, stop_requested: Option<bool>) -> JobOutcome {
    if let Some(forced) = stop_requested {
        if !status.success() {
            return JobOutcome::Stopped { forced };
        }
    }
    match status.code() {
        Some(code) => JobOutcome::Exited(code),
        None => JobOutcome::Signalled(signal_of(&status)),
    }
}

#[cfg(unix)]
fn signal_of(status: &ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status.signal().unwrap_or(-1)
}

#[cfg(not(unix))]
fn signal_of(_status: &ExitStatus) -> i32 {
    -1
}

/// Send SIGTERM to the job's process group.
#[cfg(unix)]
fn terminate(child: &mut Child) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    match child.id() {
        Some(pid) => {
            if let Err(err) = killpg(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                warn!(pid, error = %err, "failed to signal job process group");
            }
        }
        None => debug!("job process already reaped"),
    }
}

#[cfg(not(unix))]
fn terminate(child: &mut Child) {
    kill(child);
}

fn kill(child: &mut Child) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;
        if let Some(pid) = child.id() {
            let _ = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL);
        }
    }
    if let Err(err) = child.start_kill() {
        debug!(error = %err, "failed to kill job process (already exited?)");
    }
}

fn append_log_line(path: &Path, line: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{line}")
}
