// src/config/layout.rs

//! Directory layout under the CI root.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::errors::{CiError, Result};
use crate::fs::FileSystem;

/// Paths of the well-known directories below the CI root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CiLayout {
    pub root: PathBuf,
    pub repositories: PathBuf,
    pub commands: PathBuf,
    pub workspaces: PathBuf,
    pub jobs: PathBuf,
    pub tasks: PathBuf,
}

impl CiLayout {
    /// Build the layout for `root` without touching the filesystem.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            repositories: root.join("repositories"),
            commands: root.join("commands"),
            workspaces: root.join("workspaces"),
            jobs: root.join("jobs"),
            tasks: root.join("tasks"),
            root,
        }
    }

    /// Build the layout for an existing root directory.
    ///
    /// A missing root, or one that is not a directory, is fatal.
    pub fn open(fs: &dyn FileSystem, root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if !fs.exists(&root) {
            return Err(CiError::InvalidRoot(format!(
                "CI root <{}> does not exist",
                root.display()
            )));
        }
        if !fs.is_dir(&root) {
            return Err(CiError::InvalidRoot(format!(
                "CI root <{}> is not a directory",
                root.display()
            )));
        }
        Ok(Self::new(root))
    }

    /// Create every intake/work directory that does not exist yet.
    pub fn create_dirs(&self, fs: &dyn FileSystem) -> Result<()> {
        for dir in self.dirs() {
            if !fs.is_dir(dir) {
                fs.create_dir_all(dir)?;
                debug!(dir = %dir.display(), "created directory");
            }
        }
        Ok(())
    }

    pub fn dirs(&self) -> [&Path; 5] {
        [
            &self.repositories,
            &self.commands,
            &self.workspaces,
            &self.jobs,
            &self.tasks,
        ]
    }

    /// Resolve a path given relative to the CI root.
    pub fn resolve(&self, path: impl AsRef<Path>) -> PathBuf {
        let path = path.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }
}
