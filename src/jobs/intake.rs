// src/jobs/intake.rs

//! Jobs-intake directory ingestion.

use std::path::Path;

use tracing::{debug, error, info, warn};

use crate::cluster::Cluster;
use crate::fs::{file_name, FileSystem};
use crate::jobs::Job;

/// Separates a job name from a uniqueness token in a submitted file name,
/// as in `nightly@1f3a9c2e.sh`. Names never contain it.
pub const SUBMISSION_TAG: char = '@';

/// Turn every `*<suffix>` file in `jobs_dir` into a queued [`Job`].
///
/// - The file stem, up to any [`SUBMISSION_TAG`], is the job's display name.
/// - If that name is a known task id, the job is tagged with that task.
/// - The source file is deleted whether or not reading it succeeded.
///
/// Returns the jobs that were pushed onto the shared queue, in file-name order.
pub fn ingest_jobs(
    fs: &dyn FileSystem,
    jobs_dir: &Path,
    script_suffix: &str,
    cluster: &Cluster,
) -> Vec<Job> {
    let entries = match fs.read_dir(jobs_dir) {
        Ok(entries) => entries,
        Err(err) => {
            warn!(dir = %jobs_dir.display(), error = %err, "failed to list jobs directory");
            return Vec::new();
        }
    };

    let mut pushed = Vec::new();

    for path in entries {
        let Some(name) = file_name(&path) else {
            continue;
        };
        if name.starts_with('.') || !name.ends_with(script_suffix) || !fs.is_file(&path) {
            continue;
        }
        let stem = &name[..name.len() - script_suffix.len()];
        let stem = match stem.split_once(SUBMISSION_TAG) {
            Some((base, _token)) => base.to_string(),
            None => stem.to_string(),
        };

        match fs.read_to_string(&path) {
            Ok(script) => {
                let task_id = match cluster.tasks().contains(&stem) {
                    Ok(true) => Some(stem.clone()),
                    Ok(false) => None,
                    Err(err) => {
                        warn!(job = %stem, error = %err, "could not check task map; job is not tagged");
                        None
                    }
                };
                let job = Job::new(stem, script, task_id);
                match cluster.jobs().push(&job) {
                    Ok(()) => {
                        info!(job_id = %job.id, name = %job.name, task = ?job.task_id, "job queued");
                        pushed.push(job);
                    }
                    Err(err) => {
                        error!(name = %job.name, error = %err, "failed to queue job; submission dropped");
                    }
                }
            }
            Err(err) => {
                error!(file = %path.display(), error = %err, "failed to read script file");
            }
        }

        match fs.remove_file(&path) {
            Ok(()) => debug!(file = %path.display(), "script file removed"),
            Err(err) => warn!(file = %path.display(), error = %err, "failed to delete script file"),
        }
    }

    pushed
}
