// src/cluster/mod.rs

//! Shared state substrate.
//!
//! Cluster-wide mutable state lives behind the [`Substrate`] trait:
//! - a map from task id to [`Task`],
//! - a FIFO queue of pending [`Job`]s,
//! - named mutual-exclusion locks.
//!
//! Every single operation is linearizable; there are no multi-key
//! transactions. Callers get typed views ([`TaskMap`], [`JobQueue`]) and
//! RAII lock guards ([`ClusterLock`]) from the cloneable [`Cluster`] handle.
//!
//! Implementations:
//! - [`memory::MemoryCluster`]: in-process, several nodes may join it.
//! - [`file::FsCluster`]: directory-backed, shared between processes.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::errors::Result;
use crate::jobs::Job;
use crate::tasks::Task;
use crate::types::TaskId;

pub mod file;
pub mod memory;

pub use file::FsCluster;
pub use memory::{MemoryCluster, MemoryNode};

/// Lock key guarding the shared job queue.
pub const JOBS_LOCK: &str = "jobs";

/// Lock key guarding a single task.
pub fn task_lock_key(task_id: &str) -> String {
    format!("task:{task_id}")
}

/// Capability interface of the shared state substrate, as seen by one node.
pub trait Substrate: Send + Sync + fmt::Debug {
    fn node_id(&self) -> &str;

    fn get_task(&self, id: &str) -> Result<Option<Task>>;
    fn put_task(&self, task: &Task) -> Result<()>;
    /// Publish `task` unless its id is already present. Returns whether it
    /// was inserted.
    fn insert_task_if_absent(&self, task: &Task) -> Result<bool>;
    fn task_ids(&self) -> Result<Vec<TaskId>>;

    fn push_job(&self, job: &Job) -> Result<()>;
    fn pop_job(&self) -> Result<Option<Job>>;
    fn pending_jobs(&self) -> Result<Vec<Job>>;

    /// Non-blocking acquire. `Ok(false)` means the lock is held elsewhere.
    fn try_acquire(&self, key: &str) -> Result<bool>;
    fn release(&self, key: &str) -> Result<()>;

    /// Leave the cluster, releasing every lock this node holds. Later calls
    /// fail with `ClusterUnavailable`.
    fn leave(&self) -> Result<()>;
}

/// Cloneable handle to this node's view of the substrate.
#[derive(Clone)]
pub struct Cluster {
    inner: Arc<dyn Substrate>,
}

impl fmt::Debug for Cluster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cluster")
            .field("node_id", &self.inner.node_id())
            .finish_non_exhaustive()
    }
}

impl Cluster {
    pub fn new(substrate: impl Substrate + 'static) -> Self {
        Self {
            inner: Arc::new(substrate),
        }
    }

    pub fn node_id(&self) -> &str {
        self.inner.node_id()
    }

    pub fn tasks(&self) -> TaskMap<'_> {
        TaskMap {
            substrate: self.inner.as_ref(),
        }
    }

    pub fn jobs(&self) -> JobQueue<'_> {
        JobQueue {
            substrate: self.inner.as_ref(),
        }
    }

    /// Try to take the lock `key` without waiting.
    ///
    /// Contention and transient substrate failures both yield `None`; the
    /// caller tries again on a later tick.
    pub fn try_lock(&self, key: &str) -> Option<ClusterLock> {
        match self.inner.try_acquire(key) {
            Ok(true) => {
                debug!(key, node = %self.node_id(), "lock acquired");
                Some(ClusterLock {
                    substrate: Arc::clone(&self.inner),
                    key: key.to_string(),
                })
            }
            Ok(false) => {
                debug!(key, node = %self.node_id(), "lock busy");
                None
            }
            Err(err) => {
                warn!(key, error = %err, "lock acquisition failed");
                None
            }
        }
    }

    /// Take the lock `key`, polling for at most `timeout`.
    pub async fn lock(&self, key: &str, timeout: Duration) -> Option<ClusterLock> {
        let poll_interval = Duration::from_millis(10).min(timeout);
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(guard) = self.try_lock(key) {
                return Some(guard);
            }
            if tokio::time::Instant::now() >= deadline {
                debug!(key, ?timeout, "gave up waiting for lock");
                return None;
            }
            tokio::time::sleep(poll_interval).await;
        }
    }

    pub fn leave(&self) -> Result<()> {
        self.inner.leave()
    }
}

/// Held cluster lock; released when dropped.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct ClusterLock {
    substrate: Arc<dyn Substrate>,
    key: String,
}

impl ClusterLock {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl fmt::Debug for ClusterLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterLock").field("key", &self.key).finish()
    }
}

impl Drop for ClusterLock {
    fn drop(&mut self) {
        match self.substrate.release(&self.key) {
            Ok(()) => debug!(key = %self.key, "lock released"),
            Err(err) => warn!(key = %self.key, error = %err, "failed to release lock"),
        }
    }
}

/// Typed view of the shared task map.
#[derive(Debug, Clone, Copy)]
pub struct TaskMap<'a> {
    substrate: &'a dyn Substrate,
}

impl TaskMap<'_> {
    pub fn get(&self, id: &str) -> Result<Option<Task>> {
        self.substrate.get_task(id)
    }

    /// Replace (or create) the entry for `task.id`. Only the holder of the
    /// task lock should call this.
    pub fn put(&self, task: &Task) -> Result<()> {
        self.substrate.put_task(task)
    }

    pub fn insert_if_absent(&self, task: &Task) -> Result<bool> {
        self.substrate.insert_task_if_absent(task)
    }

    pub fn contains(&self, id: &str) -> Result<bool> {
        Ok(self.substrate.get_task(id)?.is_some())
    }

    pub fn ids(&self) -> Result<Vec<TaskId>> {
        self.substrate.task_ids()
    }

    /// Snapshot of every task, in id order.
    pub fn all(&self) -> Result<Vec<Task>> {
        let mut tasks = Vec::new();
        for id in self.ids()? {
            if let Some(task) = self.get(&id)? {
                tasks.push(task);
            }
        }
        Ok(tasks)
    }
}

/// Typed view of the shared pending-job queue.
#[derive(Debug, Clone, Copy)]
pub struct JobQueue<'a> {
    substrate: &'a dyn Substrate,
}

impl JobQueue<'_> {
    pub fn push(&self, job: &Job) -> Result<()> {
        self.substrate.push_job(job)
    }

    /// Remove and return the oldest pending job.
    pub fn pop(&self) -> Result<Option<Job>> {
        self.substrate.pop_job()
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.substrate.pending_jobs()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn snapshot(&self) -> Result<Vec<Job>> {
        self.substrate.pending_jobs()
    }
}
