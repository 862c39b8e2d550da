// src/engine/mod.rs

//! Orchestration engine for fleetci.
//!
//! - [`context`]: the explicit per-node context (config, layout, cluster
//!   handle, event bus, running job) shared by every component.
//! - [`orchestrator`]: the tick loop and its shutdown sequence.

pub mod context;
pub mod orchestrator;

pub use context::CiContext;
pub use orchestrator::{LoopState, Orchestrator, TickOutcome};
