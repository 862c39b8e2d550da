// src/tasks/task.rs

//! The `Task` entity stored in the shared task map.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{CiError, Result};
use crate::events::Event;
use crate::tasks::definition::{TaskDefinition, TriggerDefinition};
use crate::tasks::trigger::{to_delta, Trigger};
use crate::types::{is_valid_name, TaskId};

/// Result of one execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ExecutionOutcome {
    Success,
    Error { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Execution {
    pub at: DateTime<Utc>,
    pub outcome: ExecutionOutcome,
}

/// Observable phase of a task at a given instant.
///
/// `Executing` is not represented: it only exists while a node holds the
/// task lock, and the map is written back after the execution completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskPhase {
    /// Known, not ready, never executed.
    Scanned,
    /// Ready, debounce window still open.
    Ready,
    /// Ready and the debounce window has elapsed: eligible for execution.
    Expired,
    /// Not ready; the last execution had this outcome.
    Executed(ExecutionOutcome),
    /// Stopped by an operator.
    Stopped,
}

impl fmt::Display for TaskPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskPhase::Scanned => f.write_str("scanned"),
            TaskPhase::Ready => f.write_str("ready"),
            TaskPhase::Expired => f.write_str("expired"),
            TaskPhase::Executed(ExecutionOutcome::Success) => f.write_str("executed (success)"),
            TaskPhase::Executed(ExecutionOutcome::Error { .. }) => f.write_str("executed (error)"),
            TaskPhase::Stopped => f.write_str("stopped"),
        }
    }
}

/// A recurring/triggered unit of scheduling. Executing a task writes its job
/// script into the jobs-intake directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub trigger: Trigger,
    pub script: String,
    /// Set when an event signalled readiness.
    pub ready: bool,
    pub ready_since: Option<DateTime<Utc>>,
    pub stopped: bool,
    #[serde(default)]
    pub stop_properties: BTreeMap<String, String>,
    pub last_execution: Option<Execution>,
    pub executions: u64,
    pub created_at: DateTime<Utc>,
}

impl Task {
    pub fn new(id: impl Into<TaskId>, trigger: Trigger, script: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            trigger,
            script: script.into(),
            ready: false,
            ready_since: None,
            stopped: false,
            stop_properties: BTreeMap::new(),
            last_execution: None,
            executions: 0,
            created_at: now,
        }
    }

    /// Build a task from a parsed definition file.
    pub fn from_definition(id: &str, definition: TaskDefinition, now: DateTime<Utc>) -> Result<Self> {
        if !is_valid_name(id) {
            return Err(CiError::InvalidTask(format!("invalid task id {id:?}")));
        }
        definition.validate()?;

        let trigger = match definition.trigger {
            TriggerDefinition::Schedule {
                every,
                debounce,
                immediate,
            } => {
                let first_due = if immediate {
                    now
                } else {
                    now.checked_add_signed(to_delta(every))
                        .unwrap_or(DateTime::<Utc>::MAX_UTC)
                };
                Trigger::schedule(every, debounce, first_due)
            }
            TriggerDefinition::Repository {
                repository,
                debounce,
            } => Trigger::repository(repository, debounce),
        };

        Ok(Self::new(id, trigger, definition.job.script, now))
    }

    /// Instant from which the task counts as ready, if it is ready at `now`.
    pub fn ready_since_at(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if self.stopped {
            return None;
        }
        if self.ready {
            return Some(self.ready_since.unwrap_or(now));
        }
        self.trigger.due_at().filter(|due| *due <= now)
    }

    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        self.ready_since_at(now).is_some()
    }

    /// Ready, and the trigger's debounce window has elapsed.
    pub fn is_trigger_expired(&self, now: DateTime<Utc>) -> bool {
        self.ready_since_at(now)
            .and_then(|since| since.checked_add_signed(to_delta(self.trigger.debounce())))
            .is_some_and(|expires| expires <= now)
    }

    /// Hand an event to the trigger. Returns whether the task changed and
    /// must be written back.
    pub fn on_event(&mut self, event: &Event, now: DateTime<Utc>) -> bool {
        if !self.trigger.on_event(&self.id, event) {
            return false;
        }

        if matches!(event, Event::TaskRequested { .. }) && self.stopped {
            self.stopped = false;
            self.stop_properties.clear();
        }

        if self.stopped {
            // Trigger state (pending revision) changed; readiness does not.
            return true;
        }

        // A new change while waiting restarts the debounce window.
        let restart = matches!(event, Event::RepositoryUpdated { .. });
        if !self.ready || restart {
            self.ready_since = Some(now);
        }
        self.ready = true;
        true
    }

    pub fn record_execution(&mut self, now: DateTime<Utc>, outcome: ExecutionOutcome) {
        self.ready = false;
        self.ready_since = None;
        self.trigger.on_executed(now);
        self.executions += 1;
        self.last_execution = Some(Execution { at: now, outcome });
    }

    /// Stop the task. Stopping a stopped task is a no-op; returns whether
    /// anything changed.
    pub fn stop(&mut self, properties: Option<BTreeMap<String, String>>) -> bool {
        if self.stopped {
            return false;
        }
        self.stopped = true;
        self.ready = false;
        self.ready_since = None;
        self.stop_properties = properties.unwrap_or_default();
        true
    }

    pub fn phase(&self, now: DateTime<Utc>) -> TaskPhase {
        if self.stopped {
            TaskPhase::Stopped
        } else if self.is_trigger_expired(now) {
            TaskPhase::Expired
        } else if self.is_ready(now) {
            TaskPhase::Ready
        } else if let Some(execution) = &self.last_execution {
            TaskPhase::Executed(execution.outcome.clone())
        } else {
            TaskPhase::Scanned
        }
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Task[{} trigger={} executions={}{}]",
            self.id,
            self.trigger.kind(),
            self.executions,
            if self.stopped { " stopped" } else { "" }
        )
    }
}
