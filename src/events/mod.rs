// src/events/mod.rs

//! Node-local event bus.
//!
//! Producers (repository scans, operator commands) push [`Event`]s; every
//! tick the orchestrator drains the bus and hands each event to every task's
//! trigger exactly once. Events are transient: no retry, no persistence, and
//! no visibility on other nodes.

use std::collections::VecDeque;
use std::fmt;

use crate::types::TaskId;

/// Immutable fact broadcast to every trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A scan observed a new upstream revision.
    RepositoryUpdated { repository: String, revision: String },
    /// An operator asked for a task to run now.
    TaskRequested { task_id: TaskId },
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::RepositoryUpdated {
                repository,
                revision,
            } => write!(f, "RepositoryUpdated[{repository}@{revision}]"),
            Event::TaskRequested { task_id } => write!(f, "TaskRequested[{task_id}]"),
        }
    }
}

/// Single-threaded FIFO of pending events.
#[derive(Debug, Default)]
pub struct EventBus {
    queue: VecDeque<Event>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: Event) {
        tracing::debug!(%event, "event published");
        self.queue.push_back(event);
    }

    /// Take every pending event, oldest first, leaving the bus empty.
    pub fn drain(&mut self) -> Vec<Event> {
        self.queue.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
