// src/repository/store.rs

//! JSON persistence of repository snapshots (`repositories/<name>.json`).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::warn;

use crate::errors::Result;
use crate::fs::{file_name, write_atomic, FileSystem};
use crate::repository::Repository;

const SNAPSHOT_SUFFIX: &str = ".json";

#[derive(Debug, Clone)]
pub struct RepositoryStore {
    fs: Arc<dyn FileSystem>,
    dir: PathBuf,
}

impl RepositoryStore {
    pub fn new(fs: Arc<dyn FileSystem>, dir: impl Into<PathBuf>) -> Self {
        Self {
            fs,
            dir: dir.into(),
        }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}{SNAPSHOT_SUFFIX}"))
    }

    /// Every readable snapshot, in name order. Unreadable ones are logged.
    pub fn load_all(&self) -> Result<Vec<Repository>> {
        let mut repositories = Vec::new();
        for path in self.fs.read_dir(&self.dir)? {
            let Some(name) = file_name(&path) else {
                continue;
            };
            if name.starts_with('.') || !name.ends_with(SNAPSHOT_SUFFIX) || !self.fs.is_file(&path) {
                continue;
            }
            match self.read_snapshot(&path) {
                Ok(repository) => repositories.push(repository),
                Err(err) => warn!(file = %path.display(), error = %err, "skipping unreadable repository snapshot"),
            }
        }
        Ok(repositories)
    }

    pub fn get(&self, name: &str) -> Result<Option<Repository>> {
        let path = self.path(name);
        if !self.fs.exists(&path) {
            return Ok(None);
        }
        self.read_snapshot(&path).map(Some)
    }

    fn read_snapshot(&self, path: &Path) -> Result<Repository> {
        let text = self.fs.read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn save(&self, repository: &Repository) -> Result<()> {
        let json = serde_json::to_vec_pretty(repository)?;
        let tmp = self.dir.join(format!(".{}{SNAPSHOT_SUFFIX}.tmp", repository.name));
        write_atomic(self.fs.as_ref(), &tmp, &self.path(&repository.name), &json)?;
        Ok(())
    }
}
