// src/engine/orchestrator.rs

use std::fmt;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::cluster::JOBS_LOCK;
use crate::command::{execute_command, next_command, Command, CommandEffect};
use crate::engine::CiContext;
use crate::errors::Result;
use crate::jobs::{ingest_jobs, JobRunner};
use crate::tasks::ExecutionAttempt;

/// Lifecycle of the orchestrator loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Created,
    Running,
    Stopped,
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoopState::Created => f.write_str("created"),
            LoopState::Running => f.write_str("running"),
            LoopState::Stopped => f.write_str("stopped"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Continue,
    /// A shutdown command was processed.
    Shutdown { force: bool },
}

/// One node's tick loop.
///
/// Ticks are strictly sequential. Each tick:
/// 1. takes at most one command from `commands/`,
/// 2. ingests `jobs/` into the shared queue,
/// 3. starts the next queued job if this node is idle,
/// 4. publishes new task definitions from `tasks/`,
/// 5. scans this node's repositories when due and drains the event bus,
/// 6. attempts one ready and expired task.
pub struct Orchestrator {
    ctx: CiContext,
    state: LoopState,
    /// Interrupts (Ctrl-C). Each message is one interrupt.
    interrupts: Option<mpsc::Receiver<()>>,
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("node", &self.ctx.node_id())
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    pub fn new(ctx: CiContext) -> Self {
        Self {
            ctx,
            state: LoopState::Created,
            interrupts: None,
        }
    }

    /// Treat every message on `interrupts` like a shutdown command.
    pub fn with_interrupts(mut self, interrupts: mpsc::Receiver<()>) -> Self {
        self.interrupts = Some(interrupts);
        self
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn context(&self) -> &CiContext {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut CiContext {
        &mut self.ctx
    }

    /// Run ticks until a shutdown command or an interrupt, then shut down.
    pub async fn run(mut self) -> Result<()> {
        self.state = LoopState::Running;
        info!(
            node = %self.ctx.node_id(),
            root = %self.ctx.layout.root.display(),
            "orchestrator started"
        );

        let tick_interval = self.ctx.config.daemon.tick_interval;
        let force = loop {
            if let TickOutcome::Shutdown { force } = self.tick().await {
                break force;
            }

            tokio::select! {
                _ = tokio::time::sleep(tick_interval) => {}
                Some(()) = next_interrupt(&mut self.interrupts) => {
                    info!("interrupt received; shutting down");
                    break false;
                }
            }
        };

        self.shutdown(force).await
    }

    /// Execute one iteration of the loop.
    pub async fn tick(&mut self) -> TickOutcome {
        match self.state {
            LoopState::Stopped => {
                debug!("tick after shutdown ignored");
                return TickOutcome::Shutdown { force: false };
            }
            LoopState::Created => self.state = LoopState::Running,
            LoopState::Running => {}
        }

        if let Some(command) = next_command(self.ctx.fs.as_ref(), &self.ctx.layout.commands) {
            let label = command.to_string();
            match execute_command(command, &mut self.ctx).await {
                Ok(CommandEffect::Shutdown { force }) => {
                    info!(force, "shutdown requested");
                    return TickOutcome::Shutdown { force };
                }
                Ok(CommandEffect::Continue) => debug!(command = %label, "command executed"),
                Err(err) => warn!(command = %label, error = %err, "command failed"),
            }
        }

        ingest_jobs(
            self.ctx.fs.as_ref(),
            &self.ctx.layout.jobs,
            &self.ctx.config.daemon.script_suffix,
            &self.ctx.cluster,
        );

        self.handle_jobs();

        let now = Utc::now();
        self.ctx.tasks.scan_tasks(now);
        self.scan_repositories(now).await;
        self.dispatch_events(now).await;

        if let Some((task, attempt)) = self.ctx.tasks.execute_next_ready(now) {
            match attempt {
                ExecutionAttempt::Executed(outcome) => debug!(%task, ?outcome, "task attempt finished"),
                ExecutionAttempt::LockBusy => debug!(%task, "task busy on another node"),
                ExecutionAttempt::NotEligible => debug!(%task, "task no longer eligible"),
            }
        }

        TickOutcome::Continue
    }

    /// Start the next queued job unless one is still running here.
    fn handle_jobs(&mut self) {
        if self.ctx.is_job_running() {
            return;
        }
        if let Some(finished) = self.ctx.runner.take() {
            debug!(job_id = %finished.job().id, "previous job finished");
        }

        let Some(_guard) = self.ctx.cluster.try_lock(JOBS_LOCK) else {
            return;
        };

        match self.ctx.cluster.jobs().pop() {
            Ok(Some(job)) => {
                info!(job_id = %job.id, name = %job.name, task = ?job.task_id, "starting job");
                self.ctx.runner = Some(JobRunner::start(
                    job,
                    &self.ctx.layout.workspaces,
                    self.ctx.config.daemon.stop_grace_period,
                ));
            }
            Ok(None) => {}
            Err(err) => warn!(error = %err, "failed to dequeue job"),
        }
    }

    /// Scan the repositories this node originated, if the scan interval
    /// elapsed.
    async fn scan_repositories(&mut self, now: DateTime<Utc>) {
        let interval = self.ctx.config.daemon.repository_scan_interval;
        if self
            .ctx
            .last_repository_scan
            .is_some_and(|last| last.elapsed() < interval)
        {
            return;
        }
        self.ctx.last_repository_scan = Some(std::time::Instant::now());

        let repositories = match self.ctx.repositories.load_all() {
            Ok(repositories) => repositories,
            Err(err) => {
                warn!(error = %err, "failed to load repositories");
                return;
            }
        };

        let node_id = self.ctx.node_id().to_string();
        for repository in repositories.iter().filter(|r| r.node_id == node_id) {
            let (snapshot, outcome) = self
                .ctx
                .scanner
                .scan(repository, &mut self.ctx.events, now)
                .await;
            debug!(repository = %repository.name, ?outcome, "repository scanned");
            if let Err(err) = self.ctx.repositories.save(&snapshot) {
                warn!(repository = %snapshot.name, error = %err, "failed to persist repository snapshot");
            }
        }
    }

    /// Drain the event bus, handing each event to every task.
    async fn dispatch_events(&mut self, now: DateTime<Utc>) {
        for event in self.ctx.events.drain() {
            let updated = self.ctx.tasks.deliver_event(&event, now).await;
            debug!(%event, updated, "event dispatched");
        }
    }

    /// Wait for the running job, then leave the cluster.
    ///
    /// With `force`, or once a further shutdown command or interrupt
    /// arrives while waiting, the job is killed.
    pub async fn shutdown(&mut self, force: bool) -> Result<()> {
        let mut force = force;

        if let Some(runner) = self.ctx.runner.take() {
            if runner.is_running() {
                info!(job_id = %runner.job().id, force, "waiting for running job before shutdown");
                if force {
                    runner.force_stop();
                }

                let tick_interval = self.ctx.config.daemon.tick_interval;
                while runner.is_running() {
                    tokio::select! {
                        _ = tokio::time::sleep(tick_interval) => {}
                        Some(()) = next_interrupt(&mut self.interrupts) => {
                            if !force {
                                warn!("second interrupt; forcing job stop");
                                force = true;
                                runner.force_stop();
                            }
                        }
                    }

                    if force {
                        continue;
                    }
                    match next_command(self.ctx.fs.as_ref(), &self.ctx.layout.commands) {
                        Some(Command::Shutdown { .. }) => {
                            warn!("second shutdown command; forcing job stop");
                            force = true;
                            runner.force_stop();
                        }
                        Some(other) => warn!(command = %other, "command ignored during shutdown"),
                        None => {}
                    }
                }

                let outcome = runner.wait().await;
                info!(%outcome, "job finished before shutdown");
            }
        }

        self.state = LoopState::Stopped;
        self.ctx.cluster.leave()?;
        info!(node = %self.ctx.node_id(), "orchestrator stopped");
        Ok(())
    }
}

/// Next interrupt, or never when there is no interrupt source.
async fn next_interrupt(interrupts: &mut Option<mpsc::Receiver<()>>) -> Option<()> {
    match interrupts {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
