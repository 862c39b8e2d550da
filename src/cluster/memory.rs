// src/cluster/memory.rs

//! In-process substrate.
//!
//! `MemoryCluster` owns the state; each node joins it and gets a
//! `MemoryNode` bound to its node id. Values are stored as owned clones, so
//! no node ever observes another node's in-flight mutation.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

use crate::cluster::Substrate;
use crate::errors::{CiError, Result};
use crate::jobs::Job;
use crate::tasks::Task;
use crate::types::{NodeId, TaskId};

#[derive(Debug, Default)]
struct MemoryState {
    tasks: BTreeMap<TaskId, Task>,
    jobs: VecDeque<Job>,
    /// Lock key -> owning node.
    locks: HashMap<String, NodeId>,
    members: BTreeSet<NodeId>,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryCluster {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the cluster as `node_id`.
    pub fn join(&self, node_id: impl Into<NodeId>) -> Result<MemoryNode> {
        let node_id = node_id.into();
        let mut state = lock_state(&self.state)?;
        if !state.members.insert(node_id.clone()) {
            return Err(CiError::ClusterUnavailable(format!(
                "node id {node_id} is already a member"
            )));
        }
        debug!(node = %node_id, members = state.members.len(), "joined memory cluster");
        Ok(MemoryNode {
            node_id,
            state: Arc::clone(&self.state),
        })
    }

    pub fn members(&self) -> Result<Vec<NodeId>> {
        Ok(lock_state(&self.state)?.members.iter().cloned().collect())
    }

    /// Owner of the lock `key`, if held.
    pub fn lock_owner(&self, key: &str) -> Result<Option<NodeId>> {
        Ok(lock_state(&self.state)?.locks.get(key).cloned())
    }
}

fn lock_state(state: &Mutex<MemoryState>) -> Result<MutexGuard<'_, MemoryState>> {
    state
        .lock()
        .map_err(|_| CiError::ClusterUnavailable("cluster state poisoned".to_string()))
}

/// One node's membership in a `MemoryCluster`.
#[derive(Debug)]
pub struct MemoryNode {
    node_id: NodeId,
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryNode {
    /// Lock the shared state, failing if this node has left.
    fn state(&self) -> Result<MutexGuard<'_, MemoryState>> {
        let state = lock_state(&self.state)?;
        if !state.members.contains(&self.node_id) {
            return Err(CiError::ClusterUnavailable(format!(
                "node {} is not a cluster member",
                self.node_id
            )));
        }
        Ok(state)
    }
}

impl Substrate for MemoryNode {
    fn node_id(&self) -> &str {
        &self.node_id
    }

    fn get_task(&self, id: &str) -> Result<Option<Task>> {
        Ok(self.state()?.tasks.get(id).cloned())
    }

    fn put_task(&self, task: &Task) -> Result<()> {
        self.state()?.tasks.insert(task.id.clone(), task.clone());
        Ok(())
    }

    fn insert_task_if_absent(&self, task: &Task) -> Result<bool> {
        let mut state = self.state()?;
        if state.tasks.contains_key(&task.id) {
            return Ok(false);
        }
        state.tasks.insert(task.id.clone(), task.clone());
        Ok(true)
    }

    fn task_ids(&self) -> Result<Vec<TaskId>> {
        Ok(self.state()?.tasks.keys().cloned().collect())
    }

    fn push_job(&self, job: &Job) -> Result<()> {
        self.state()?.jobs.push_back(job.clone());
        Ok(())
    }

    fn pop_job(&self) -> Result<Option<Job>> {
        Ok(self.state()?.jobs.pop_front())
    }

    fn pending_jobs(&self) -> Result<Vec<Job>> {
        Ok(self.state()?.jobs.iter().cloned().collect())
    }

    fn try_acquire(&self, key: &str) -> Result<bool> {
        let mut state = self.state()?;
        if state.locks.contains_key(key) {
            return Ok(false);
        }
        state.locks.insert(key.to_string(), self.node_id.clone());
        Ok(true)
    }

    fn release(&self, key: &str) -> Result<()> {
        // Releasing must work even after `leave`, which already dropped them.
        let mut state = lock_state(&self.state)?;
        if state.locks.get(key) == Some(&self.node_id) {
            state.locks.remove(key);
        }
        Ok(())
    }

    fn leave(&self) -> Result<()> {
        let mut state = lock_state(&self.state)?;
        state.locks.retain(|_, owner| *owner != self.node_id);
        if state.members.remove(&self.node_id) {
            debug!(node = %self.node_id, "left memory cluster");
        }
        Ok(())
    }
}
