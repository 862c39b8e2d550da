// src/tasks/engine.rs

//! Task engine.
//!
//! Drives every [`Task`] through its lifecycle against the shared task map:
//!
//! ```text
//! SCANNED --trigger--> READY --debounce--> EXPIRED --task lock--> EXECUTING --> EXECUTED
//! ```
//!
//! Writing a task back to the map always happens while holding that task's
//! cluster lock. Readers never lock.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::cluster::{task_lock_key, Cluster};
use crate::config::{CiLayout, DaemonSection};
use crate::errors::{CiError, Result};
use crate::events::{Event, EventBus};
use crate::fs::{file_name, write_atomic, FileSystem};
use crate::jobs::SUBMISSION_TAG;
use crate::tasks::{ExecutionOutcome, Task, TaskDefinition};
use crate::types::TaskId;

/// Result of one attempt to execute a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionAttempt {
    /// This node held the task lock and executed the task.
    Executed(ExecutionOutcome),
    /// Another node holds the task lock; try again on a later tick.
    LockBusy,
    /// Under the lock the task turned out not to be eligible any more
    /// (already executed elsewhere, stopped, or removed).
    NotEligible,
}

#[derive(Debug, Clone)]
pub struct TaskEngine {
    cluster: Cluster,
    fs: Arc<dyn FileSystem>,
    tasks_dir: PathBuf,
    jobs_dir: PathBuf,
    script_suffix: String,
    temp_prefix: String,
    lock_timeout: Duration,
}

impl TaskEngine {
    pub fn new(
        cluster: Cluster,
        fs: Arc<dyn FileSystem>,
        layout: &CiLayout,
        daemon: &DaemonSection,
    ) -> Self {
        Self {
            cluster,
            fs,
            tasks_dir: layout.tasks.clone(),
            jobs_dir: layout.jobs.clone(),
            script_suffix: daemon.script_suffix.clone(),
            temp_prefix: daemon.temp_prefix.clone(),
            lock_timeout: daemon.lock_timeout,
        }
    }

    /// Read task definitions from the tasks directory and publish the ones
    /// the shared map does not know yet.
    ///
    /// Returns the ids of newly published tasks. Definitions that fail to
    /// parse are logged and retried on the next scan.
    pub fn scan_tasks(&self, now: DateTime<Utc>) -> Vec<TaskId> {
        let entries = match self.fs.read_dir(&self.tasks_dir) {
            Ok(entries) => entries,
            Err(err) => {
                warn!(dir = %self.tasks_dir.display(), error = %err, "failed to list tasks directory");
                return Vec::new();
            }
        };

        let mut added = Vec::new();

        for path in entries {
            let Some(id) = file_name(&path) else {
                continue;
            };
            if id.starts_with('.') || id.starts_with(&self.temp_prefix) || !self.fs.is_file(&path) {
                continue;
            }

            match self.cluster.tasks().contains(id) {
                Ok(true) => continue,
                Ok(false) => {}
                Err(err) => {
                    warn!(task = %id, error = %err, "could not check task map; skipping scan");
                    return added;
                }
            }

            let text = match self.fs.read_to_string(&path) {
                Ok(text) => text,
                Err(err) => {
                    warn!(task = %id, error = %err, "failed to read task definition");
                    continue;
                }
            };

            let task = match TaskDefinition::parse(&text)
                .and_then(|definition| Task::from_definition(id, definition, now))
            {
                Ok(task) => task,
                Err(err) => {
                    warn!(task = %id, error = %err, "invalid task definition; skipped");
                    continue;
                }
            };

            match self.cluster.tasks().insert_if_absent(&task) {
                Ok(true) => {
                    info!(task = %task.id, trigger = %task.trigger.describe(), "task scanned");
                    added.push(task.id);
                }
                Ok(false) => debug!(task = %id, "task published concurrently by another node"),
                Err(err) => error!(task = %id, error = %err, "failed to publish task"),
            }
        }

        added
    }

    /// Attempt to execute the first ready and expired task, in map order.
    ///
    /// At most one attempt is made per call. Returns `None` when no task is
    /// eligible.
    pub fn execute_next_ready(&self, now: DateTime<Utc>) -> Option<(TaskId, ExecutionAttempt)> {
        let tasks = match self.cluster.tasks().all() {
            Ok(tasks) => tasks,
            Err(err) => {
                warn!(error = %err, "failed to read task map");
                return None;
            }
        };

        let candidate = tasks.into_iter().find(|task| task.is_trigger_expired(now))?;
        match self.try_execute_task(&candidate.id, now) {
            Ok(attempt) => Some((candidate.id, attempt)),
            Err(err) => {
                error!(task = %candidate.id, error = %err, "task execution failed");
                None
            }
        }
    }

    /// Execute `task_id` if this node can take its lock without waiting and
    /// the task is still eligible under that lock.
    pub fn try_execute_task(&self, task_id: &str, now: DateTime<Utc>) -> Result<ExecutionAttempt> {
        let Some(_guard) = self.cluster.try_lock(&task_lock_key(task_id)) else {
            debug!(task = %task_id, "task locked by another node");
            return Ok(ExecutionAttempt::LockBusy);
        };

        let Some(mut task) = self.cluster.tasks().get(task_id)? else {
            return Ok(ExecutionAttempt::NotEligible);
        };
        if !task.is_trigger_expired(now) {
            debug!(task = %task_id, phase = %task.phase(now), "task no longer eligible");
            return Ok(ExecutionAttempt::NotEligible);
        }

        info!(task = %task.id, node = %self.cluster.node_id(), "executing task");
        let outcome = match self.submit_job(&task) {
            Ok(()) => ExecutionOutcome::Success,
            Err(err) => {
                warn!(task = %task.id, error = %err, "task execution side effect failed");
                ExecutionOutcome::Error {
                    message: err.to_string(),
                }
            }
        };

        task.record_execution(now, outcome.clone());
        self.cluster.tasks().put(&task)?;
        info!(task = %task.id, executions = task.executions, phase = %task.phase(now), "task executed");

        Ok(ExecutionAttempt::Executed(outcome))
    }

    /// Write the task's script into the jobs-intake directory, where the next
    /// tick picks it up as a job owned by this task.
    ///
    /// The file is `<task-id><suffix>`. While an earlier submission of the
    /// same task is still waiting for intake, a tagged name is used instead
    /// so that submission survives. Runs under the task lock.
    fn submit_job(&self, task: &Task) -> anyhow::Result<()> {
        let mut name = format!("{}{}", task.id, self.script_suffix);
        if self.fs.exists(&self.jobs_dir.join(&name)) {
            let token = Uuid::new_v4().simple().to_string();
            name = format!("{}{SUBMISSION_TAG}{}{}", task.id, &token[..8], self.script_suffix);
            debug!(task = %task.id, file = %name, "earlier submission still pending");
        }
        let tmp = self.jobs_dir.join(format!(".{name}.tmp"));
        let path = self.jobs_dir.join(&name);
        write_atomic(self.fs.as_ref(), &tmp, &path, task.script.as_bytes())?;
        debug!(task = %task.id, file = %path.display(), "job script submitted");
        Ok(())
    }

    /// Hand `event` to every task's trigger.
    ///
    /// Tasks the event does not concern are left alone. For the others the
    /// update is applied under the task lock, waiting at most the lock
    /// timeout; a task whose lock cannot be taken misses the event.
    ///
    /// Returns the number of tasks that were updated.
    pub async fn deliver_event(&self, event: &Event, now: DateTime<Utc>) -> usize {
        let ids = match self.cluster.tasks().ids() {
            Ok(ids) => ids,
            Err(err) => {
                warn!(%event, error = %err, "failed to list tasks; event dropped");
                return 0;
            }
        };

        let mut updated = 0;
        for id in ids {
            let interested = match self.cluster.tasks().get(&id) {
                Ok(Some(mut probe)) => probe.on_event(event, now),
                Ok(None) => false,
                Err(err) => {
                    warn!(task = %id, %event, error = %err, "failed to read task");
                    false
                }
            };
            if !interested {
                continue;
            }

            let Some(_guard) = self.cluster.lock(&task_lock_key(&id), self.lock_timeout).await else {
                warn!(task = %id, %event, "task lock unavailable; event dropped for this task");
                continue;
            };

            match self.apply_event(&id, event, now) {
                Ok(true) => {
                    debug!(task = %id, %event, "event accepted");
                    updated += 1;
                }
                Ok(false) => {}
                Err(err) => warn!(task = %id, %event, error = %err, "failed to update task"),
            }
        }
        updated
    }

    fn apply_event(&self, id: &str, event: &Event, now: DateTime<Utc>) -> Result<bool> {
        let Some(mut task) = self.cluster.tasks().get(id)? else {
            return Ok(false);
        };
        if !task.on_event(event, now) {
            return Ok(false);
        }
        self.cluster.tasks().put(&task)?;
        Ok(true)
    }

    /// Stop a task, optionally recording operator-supplied properties.
    ///
    /// Stopping a stopped task changes nothing. Returns whether the task was
    /// running before. If another node keeps the task locked past the lock
    /// timeout the stop is not applied and [`CiError::TaskBusy`] is returned.
    pub async fn stop_task(
        &self,
        task_id: &str,
        properties: Option<BTreeMap<String, String>>,
    ) -> Result<bool> {
        let Some(_guard) = self.cluster.lock(&task_lock_key(task_id), self.lock_timeout).await else {
            warn!(task = %task_id, timeout = ?self.lock_timeout, "task lock held elsewhere; stop not applied");
            return Err(CiError::TaskBusy(task_id.to_string()));
        };

        let Some(mut task) = self.cluster.tasks().get(task_id)? else {
            return Err(CiError::TaskNotFound(task_id.to_string()));
        };

        if !task.stop(properties) {
            debug!(task = %task_id, "task already stopped");
            return Ok(false);
        }
        self.cluster.tasks().put(&task)?;
        info!(task = %task_id, properties = task.stop_properties.len(), "task stopped");
        Ok(true)
    }

    /// Ask for `task_id` to run as soon as possible.
    pub fn request_task(&self, events: &mut EventBus, task_id: &str) -> Result<()> {
        if !self.cluster.tasks().contains(task_id)? {
            return Err(CiError::TaskNotFound(task_id.to_string()));
        }
        events.push(Event::TaskRequested {
            task_id: task_id.to_string(),
        });
        Ok(())
    }

    pub fn cluster(&self) -> &Cluster {
        &self.cluster
    }
}
