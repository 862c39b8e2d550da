// src/jobs/mod.rs

//! Job engine.
//!
//! - [`job`] defines the `Job` entity.
//! - [`intake`] turns script files dropped into `jobs/` into queued jobs.
//! - [`runner`] binds one job to one OS process (`JobRunner`).

pub mod intake;
pub mod job;
pub mod runner;

pub use intake::{ingest_jobs, SUBMISSION_TAG};
pub use job::{Job, JobId};
pub use runner::{JobOutcome, JobRunner, LOG_FILE};
