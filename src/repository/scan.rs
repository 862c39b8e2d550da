// src/repository/scan.rs

//! Repository scan.
//!
//! ```text
//! EMPTY    --clone-->  CLONING  --+
//!                                 +--rev-parse--> SCANNED(changed | unchanged)
//! (cloned) --pull-->   UPDATING --+
//! any subprocess failure --> FAILED (previous revision kept)
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::errors::Result;
use crate::events::{Event, EventBus};
use crate::repository::{Repository, Vcs};

/// What a scan observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOutcome {
    Unchanged,
    Changed { revision: String },
    Failed { error: String },
}

#[derive(Debug, Clone)]
pub struct RepositoryScanner {
    vcs: Arc<dyn Vcs>,
    dir: PathBuf,
}

impl RepositoryScanner {
    /// `dir` is the `repositories/` directory holding working copies and logs.
    pub fn new(vcs: Arc<dyn Vcs>, dir: impl Into<PathBuf>) -> Self {
        Self {
            vcs,
            dir: dir.into(),
        }
    }

    pub fn working_copy(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    pub fn log_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.log"))
    }

    /// Scan `repository` and return its new snapshot.
    ///
    /// A changed revision pushes exactly one [`Event::RepositoryUpdated`]
    /// onto `events`. Failures never propagate: they are recorded in the
    /// returned snapshot.
    pub async fn scan(
        &self,
        repository: &Repository,
        events: &mut EventBus,
        now: DateTime<Utc>,
    ) -> (Repository, ScanOutcome) {
        match self.fetch_revision(repository).await {
            Ok(revision) if repository.last_revision.as_deref() == Some(revision.as_str()) => {
                debug!(repository = %repository.name, %revision, "repository unchanged");
                (repository.scanned(now, revision), ScanOutcome::Unchanged)
            }
            Ok(revision) => {
                info!(
                    repository = %repository.name,
                    previous = repository.last_revision.as_deref().unwrap_or("-"),
                    %revision,
                    "repository updated"
                );
                events.push(Event::RepositoryUpdated {
                    repository: repository.name.clone(),
                    revision: revision.clone(),
                });
                (
                    repository.scanned(now, revision.clone()),
                    ScanOutcome::Changed { revision },
                )
            }
            Err(err) => {
                let error = err.to_string();
                warn!(repository = %repository.name, error = %error, "repository scan failed");
                (repository.failed(error.clone()), ScanOutcome::Failed { error })
            }
        }
    }

    async fn fetch_revision(&self, repository: &Repository) -> Result<String> {
        let work = self.working_copy(&repository.name);
        let log = self.log_path(&repository.name);

        if is_empty_dir(&work).await? {
            info!(repository = %repository.name, url = %repository.url, "cloning repository");
            tokio::fs::create_dir_all(&work).await?;
            self.vcs.clone_repo(&repository.url, &work, &log).await?;
        } else {
            debug!(repository = %repository.name, "updating repository");
            self.vcs.update(&work, &log).await?;
        }

        self.vcs.head_revision(&work, &log).await
    }
}

/// Missing directories count as empty.
async fn is_empty_dir(dir: &Path) -> Result<bool> {
    match tokio::fs::read_dir(dir).await {
        Ok(mut entries) => Ok(entries.next_entry().await?.is_none()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(true),
        Err(e) => Err(e.into()),
    }
}
