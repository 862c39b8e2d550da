// src/tasks/trigger.rs

//! Trigger policies: when does a task become ready, and how long after
//! readiness may it execute.
//!
//! Every variant supports the same capability set:
//! - `due_at`: poll-based readiness (schedules),
//! - `on_event`: event-based readiness (repository changes, operator requests),
//! - `debounce`: the window between readiness and expiry,
//! - `on_executed`: bookkeeping after an execution.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::events::Event;
use crate::types::{duration_str, format_duration};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Trigger {
    Schedule(ScheduleTrigger),
    Repository(RepositoryTrigger),
}

/// Fires every `every`, starting at `next_due`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleTrigger {
    #[serde(with = "duration_str")]
    pub every: Duration,
    #[serde(default, with = "duration_str")]
    pub debounce: Duration,
    pub next_due: DateTime<Utc>,
}

/// Fires when the named repository reports a revision that has not been
/// executed yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryTrigger {
    pub repository: String,
    #[serde(default, with = "duration_str")]
    pub debounce: Duration,
    /// Revision the last execution was made for.
    #[serde(default)]
    pub last_revision: Option<String>,
    /// Newest revision seen since the last execution.
    #[serde(default)]
    pub pending_revision: Option<String>,
}

impl Trigger {
    pub fn schedule(every: Duration, debounce: Duration, first_due: DateTime<Utc>) -> Self {
        Trigger::Schedule(ScheduleTrigger {
            every,
            debounce,
            next_due: first_due,
        })
    }

    pub fn repository(repository: impl Into<String>, debounce: Duration) -> Self {
        Trigger::Repository(RepositoryTrigger {
            repository: repository.into(),
            debounce,
            last_revision: None,
            pending_revision: None,
        })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Trigger::Schedule(_) => "schedule",
            Trigger::Repository(_) => "repository",
        }
    }

    /// Instant from which the trigger is ready without any event, if any.
    pub fn due_at(&self) -> Option<DateTime<Utc>> {
        match self {
            Trigger::Schedule(s) => Some(s.next_due),
            Trigger::Repository(_) => None,
        }
    }

    /// Offer an event to the trigger. Returns `true` when the event signals
    /// readiness for the task `task_id`; uninteresting events are a no-op.
    pub fn on_event(&mut self, task_id: &str, event: &Event) -> bool {
        match (self, event) {
            (_, Event::TaskRequested { task_id: requested }) => requested == task_id,
            (
                Trigger::Repository(r),
                Event::RepositoryUpdated {
                    repository,
                    revision,
                },
            ) => {
                if *repository != r.repository
                    || r.last_revision.as_deref() == Some(revision.as_str())
                {
                    return false;
                }
                r.pending_revision = Some(revision.clone());
                true
            }
            (Trigger::Schedule(_), Event::RepositoryUpdated { .. }) => false,
        }
    }

    pub fn debounce(&self) -> Duration {
        match self {
            Trigger::Schedule(s) => s.debounce,
            Trigger::Repository(r) => r.debounce,
        }
    }

    /// Record that the task executed at `now`.
    pub fn on_executed(&mut self, now: DateTime<Utc>) {
        match self {
            Trigger::Schedule(s) => {
                s.next_due = now
                    .checked_add_signed(to_delta(s.every))
                    .unwrap_or(DateTime::<Utc>::MAX_UTC);
            }
            Trigger::Repository(r) => {
                if let Some(revision) = r.pending_revision.take() {
                    r.last_revision = Some(revision);
                }
            }
        }
    }

    /// One-line human readable description.
    pub fn describe(&self) -> String {
        match self {
            Trigger::Schedule(s) => format!(
                "schedule every {} (next due {}, debounce {})",
                format_duration(s.every),
                s.next_due.to_rfc3339(),
                format_duration(s.debounce)
            ),
            Trigger::Repository(r) => format!(
                "repository {} (last revision {}, pending {}, debounce {})",
                r.repository,
                r.last_revision.as_deref().unwrap_or("-"),
                r.pending_revision.as_deref().unwrap_or("-"),
                format_duration(r.debounce)
            ),
        }
    }
}

/// Convert a std duration, saturating instead of failing on overflow.
pub(crate) fn to_delta(d: Duration) -> TimeDelta {
    TimeDelta::from_std(d).unwrap_or(TimeDelta::MAX)
}
