// src/fs/mock.rs

use super::FileSystem;
use anyhow::{anyhow, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone)]
pub enum MockEntry {
    File(Vec<u8>),
    Dir,
}

#[derive(Debug, Default)]
struct MockState {
    entries: BTreeMap<PathBuf, MockEntry>,
    unreadable: BTreeSet<PathBuf>,
}

/// In-memory filesystem for intake tests.
///
/// Parent directories are created implicitly; `read_dir` lists direct
/// children in path order, like `RealFileSystem`.
#[derive(Debug, Clone, Default)]
pub struct MockFileSystem {
    state: Arc<Mutex<MockState>>,
}

impl MockFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_file(&self, path: impl AsRef<Path>, content: impl Into<Vec<u8>>) {
        let path = path.as_ref().to_path_buf();
        let mut state = self.state();
        Self::ensure_parents(&mut state.entries, &path);
        state.entries.insert(path, MockEntry::File(content.into()));
    }

    pub fn add_dir(&self, path: impl AsRef<Path>) {
        let path = path.as_ref().to_path_buf();
        let mut state = self.state();
        Self::ensure_parents(&mut state.entries, &path);
        state.entries.insert(path, MockEntry::Dir);
    }

    /// Make reads of `path` fail while the entry still exists.
    pub fn fail_reads(&self, path: impl AsRef<Path>) {
        self.state().unreadable.insert(path.as_ref().to_path_buf());
    }

    /// Contents of a file as UTF-8, for assertions.
    pub fn contents(&self, path: impl AsRef<Path>) -> Option<String> {
        match self.state().entries.get(path.as_ref()) {
            Some(MockEntry::File(bytes)) => Some(String::from_utf8_lossy(bytes).into_owned()),
            _ => None,
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        // A poisoned mock only happens after a panicking test; keep going.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn ensure_parents(entries: &mut BTreeMap<PathBuf, MockEntry>, path: &Path) {
        let mut current = path.parent();
        while let Some(dir) = current {
            if dir.as_os_str().is_empty() {
                break;
            }
            entries.entry(dir.to_path_buf()).or_insert(MockEntry::Dir);
            current = dir.parent();
        }
    }
}

impl FileSystem for MockFileSystem {
    fn read_to_string(&self, path: &Path) -> Result<String> {
        let state = self.state();
        if state.unreadable.contains(path) {
            return Err(anyhow!("Permission denied: {:?}", path));
        }
        match state.entries.get(path) {
            Some(MockEntry::File(content)) => {
                String::from_utf8(content.clone()).map_err(|e| anyhow!("Invalid UTF-8: {}", e))
            }
            Some(MockEntry::Dir) => Err(anyhow!("Is a directory: {:?}", path)),
            None => Err(anyhow!("File not found: {:?}", path)),
        }
    }

    fn write(&self, path: &Path, contents: &[u8]) -> Result<()> {
        self.add_file(path, contents);
        Ok(())
    }

    fn remove_file(&self, path: &Path) -> Result<()> {
        let mut state = self.state();
        match state.entries.get(path) {
            Some(MockEntry::File(_)) => {
                state.entries.remove(path);
                state.unreadable.remove(path);
                Ok(())
            }
            Some(MockEntry::Dir) => Err(anyhow!("Is a directory: {:?}", path)),
            None => Err(anyhow!("File not found: {:?}", path)),
        }
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        let mut state = self.state();
        match state.entries.remove(from) {
            Some(entry @ MockEntry::File(_)) => {
                Self::ensure_parents(&mut state.entries, to);
                state.entries.insert(to.to_path_buf(), entry);
                Ok(())
            }
            Some(MockEntry::Dir) => {
                state.entries.insert(from.to_path_buf(), MockEntry::Dir);
                Err(anyhow!("Renaming directories is not supported: {:?}", from))
            }
            None => Err(anyhow!("File not found: {:?}", from)),
        }
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        self.add_dir(path);
        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        self.state().entries.contains_key(path)
    }

    fn is_file(&self, path: &Path) -> bool {
        matches!(self.state().entries.get(path), Some(MockEntry::File(_)))
    }

    fn is_dir(&self, path: &Path) -> bool {
        matches!(self.state().entries.get(path), Some(MockEntry::Dir))
    }

    fn read_dir(&self, path: &Path) -> Result<Vec<PathBuf>> {
        let state = self.state();
        match state.entries.get(path) {
            Some(MockEntry::Dir) => Ok(state
                .entries
                .keys()
                .filter(|p| p.parent() == Some(path))
                .cloned()
                .collect()),
            _ => Err(anyhow!("Not a directory or not found: {:?}", path)),
        }
    }
}
