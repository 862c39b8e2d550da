// src/jobs/job.rs

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::TaskId;

/// Opaque, globally unique job identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// One executable unit of work: a script run as a subprocess.
///
/// A job is created from a file in `jobs/`, pushed onto the shared queue and
/// later owned by exactly one node. It never re-enters the queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    /// Display name (stem of the submitted file).
    pub name: String,
    /// Literal script text.
    pub script: String,
    /// Task that produced this job, if any.
    pub task_id: Option<TaskId>,
}

impl Job {
    pub fn new(name: impl Into<String>, script: impl Into<String>, task_id: Option<TaskId>) -> Self {
        Self {
            id: JobId::new(),
            name: name.into(),
            script: script.into(),
            task_id,
        }
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.task_id {
            Some(task) => write!(f, "Job[{} name={} task={}]", self.id, self.name, task),
            None => write!(f, "Job[{} name={}]", self.id, self.name),
        }
    }
}
