// src/tasks/mod.rs

//! Tasks: recurring or triggered units of scheduling.
//!
//! - [`definition`]: the on-disk task definition format.
//! - [`trigger`]: readiness/expiry policies.
//! - [`task`]: the entity stored in the shared task map.
//! - [`engine`]: scanning, event delivery, stop and cluster-locked execution.

pub mod definition;
pub mod engine;
pub mod task;
pub mod trigger;

pub use definition::{JobSection, TaskDefinition, TriggerDefinition};
pub use engine::{ExecutionAttempt, TaskEngine};
pub use task::{Execution, ExecutionOutcome, Task, TaskPhase};
pub use trigger::{RepositoryTrigger, ScheduleTrigger, Trigger};
