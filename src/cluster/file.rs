// src/cluster/file.rs

//! Directory-backed substrate shared by every daemon pointing at the same
//! directory (typically on a shared or network filesystem).
//!
//! Layout below the substrate directory:
//! - `tasks/<task-id>.json`: task map entries,
//! - `jobs/<sequence>-<job-id>.json`: pending jobs, oldest name first,
//! - `locks/<key>.lock`: advisory `flock` locks,
//! - `members/<node-id>`: membership markers.
//!
//! Single operations are made atomic with rename/hard-link publication.
//! `flock` locks are released by the kernel when a process dies, so a
//! crashed node never leaves a task locked.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, warn};
use uuid::Uuid;

use crate::cluster::Substrate;
use crate::errors::{CiError, Result};
use crate::jobs::Job;
use crate::tasks::Task;
use crate::types::{NodeId, TaskId};

const JSON_SUFFIX: &str = ".json";

#[derive(Debug)]
pub struct FsCluster {
    node_id: NodeId,
    dir: PathBuf,
    /// Open lock files; dropping one releases its `flock`.
    held: Mutex<HashMap<String, File>>,
    active: AtomicBool,
}

impl FsCluster {
    /// Join the cluster rooted at `dir`, creating its directories.
    ///
    /// Failure here is fatal for the daemon.
    pub fn join(dir: impl Into<PathBuf>, node_id: impl Into<NodeId>) -> Result<Self> {
        let dir = dir.into();
        let node_id = node_id.into();

        for sub in ["tasks", "jobs", "locks", "members"] {
            fs::create_dir_all(dir.join(sub)).map_err(|e| {
                CiError::ClusterUnavailable(format!(
                    "cannot prepare substrate directory {}: {e}",
                    dir.display()
                ))
            })?;
        }

        let marker = format!("pid={}\njoined={}\n", std::process::id(), chrono::Utc::now().to_rfc3339());
        fs::write(dir.join("members").join(&node_id), marker).map_err(|e| {
            CiError::ClusterUnavailable(format!("cannot register node {node_id}: {e}"))
        })?;

        debug!(node = %node_id, dir = %dir.display(), "joined file cluster");

        Ok(Self {
            node_id,
            dir,
            held: Mutex::new(HashMap::new()),
            active: AtomicBool::new(true),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn ensure_active(&self) -> Result<()> {
        if self.active.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(CiError::ClusterUnavailable(format!(
                "node {} has left the cluster",
                self.node_id
            )))
        }
    }

    fn held(&self) -> Result<MutexGuard<'_, HashMap<String, File>>> {
        self.held
            .lock()
            .map_err(|_| CiError::ClusterUnavailable("lock table poisoned".to_string()))
    }

    fn tasks_dir(&self) -> PathBuf {
        self.dir.join("tasks")
    }

    fn jobs_dir(&self) -> PathBuf {
        self.dir.join("jobs")
    }

    fn task_path(&self, id: &str) -> PathBuf {
        self.tasks_dir().join(format!("{id}{JSON_SUFFIX}"))
    }

    fn lock_path(&self, key: &str) -> PathBuf {
        self.dir.join("locks").join(format!("{}.lock", sanitize_key(key)))
    }

    /// Hidden scratch file next to `dir`'s entries; ignored by listings.
    fn scratch_path(&self, dir: &Path) -> PathBuf {
        dir.join(format!(".{}-{}.tmp", self.node_id, Uuid::new_v4()))
    }

    /// Visible (non-hidden) `.json` entries of `dir`, sorted by name.
    fn list_entries(dir: &Path) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if let Some(name) = entry.file_name().to_str() {
                if !name.starts_with('.') && name.ends_with(JSON_SUFFIX) {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
        match fs::read(path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

impl Substrate for FsCluster {
    fn node_id(&self) -> &str {
        &self.node_id
    }

    fn get_task(&self, id: &str) -> Result<Option<Task>> {
        self.ensure_active()?;
        Self::read_json(&self.task_path(id))
    }

    fn put_task(&self, task: &Task) -> Result<()> {
        self.ensure_active()?;
        let scratch = self.scratch_path(&self.tasks_dir());
        fs::write(&scratch, serde_json::to_vec_pretty(task)?)?;
        if let Err(e) = fs::rename(&scratch, self.task_path(&task.id)) {
            let _ = fs::remove_file(&scratch);
            return Err(e.into());
        }
        Ok(())
    }

    fn insert_task_if_absent(&self, task: &Task) -> Result<bool> {
        self.ensure_active()?;
        let scratch = self.scratch_path(&self.tasks_dir());
        fs::write(&scratch, serde_json::to_vec_pretty(task)?)?;
        // A hard link fails if the target exists, which makes it the
        // publication point.
        let linked = fs::hard_link(&scratch, self.task_path(&task.id));
        let _ = fs::remove_file(&scratch);
        match linked {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn task_ids(&self) -> Result<Vec<TaskId>> {
        self.ensure_active()?;
        Ok(Self::list_entries(&self.tasks_dir())?
            .into_iter()
            .map(|name| name.trim_end_matches(JSON_SUFFIX).to_string())
            .collect())
    }

    fn push_job(&self, job: &Job) -> Result<()> {
        self.ensure_active()?;
        let jobs_dir = self.jobs_dir();
        let sequence = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        let target = jobs_dir.join(format!("{sequence:024}-{}{JSON_SUFFIX}", job.id));
        let scratch = self.scratch_path(&jobs_dir);
        fs::write(&scratch, serde_json::to_vec_pretty(job)?)?;
        if let Err(e) = fs::rename(&scratch, &target) {
            let _ = fs::remove_file(&scratch);
            return Err(e.into());
        }
        Ok(())
    }

    fn pop_job(&self) -> Result<Option<Job>> {
        self.ensure_active()?;
        let jobs_dir = self.jobs_dir();
        for name in Self::list_entries(&jobs_dir)? {
            // Renaming claims the entry; a concurrent claimer sees NotFound.
            let claim = jobs_dir.join(format!(".claimed-{}-{name}", self.node_id));
            match fs::rename(jobs_dir.join(&name), &claim) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            }
            let parsed = Self::read_json::<Job>(&claim);
            let _ = fs::remove_file(&claim);
            match parsed {
                Ok(Some(job)) => return Ok(Some(job)),
                Ok(None) => continue,
                Err(err) => {
                    warn!(entry = %name, error = %err, "dropping unreadable queue entry");
                    continue;
                }
            }
        }
        Ok(None)
    }

    fn pending_jobs(&self) -> Result<Vec<Job>> {
        self.ensure_active()?;
        let jobs_dir = self.jobs_dir();
        let mut jobs = Vec::new();
        for name in Self::list_entries(&jobs_dir)? {
            if let Some(job) = Self::read_json::<Job>(&jobs_dir.join(&name))? {
                jobs.push(job);
            }
        }
        Ok(jobs)
    }

    fn try_acquire(&self, key: &str) -> Result<bool> {
        self.ensure_active()?;
        let mut held = self.held()?;
        if held.contains_key(key) {
            return Ok(false);
        }
        match try_lock_file(&self.lock_path(key)) {
            Ok(file) => {
                held.insert(key.to_string(), file);
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(false),
            Err(e) => Err(CiError::ClusterUnavailable(format!("lock {key}: {e}"))),
        }
    }

    fn release(&self, key: &str) -> Result<()> {
        let was_held = self.held()?.remove(key).is_some();
        if was_held {
            unlock_file(&self.lock_path(key));
        }
        Ok(())
    }

    fn leave(&self) -> Result<()> {
        if !self.active.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        let keys: Vec<String> = self.held()?.drain().map(|(key, _file)| key).collect();
        for key in &keys {
            unlock_file(&self.lock_path(key));
        }
        if let Err(e) = fs::remove_file(self.dir.join("members").join(&self.node_id)) {
            if e.kind() != ErrorKind::NotFound {
                warn!(node = %self.node_id, error = %e, "failed to remove membership marker");
            }
        }
        debug!(node = %self.node_id, released = keys.len(), "left file cluster");
        Ok(())
    }
}

/// Map a lock key onto a safe file name.
fn sanitize_key(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Try to take an exclusive, non-blocking `flock` on `path`.
#[cfg(unix)]
fn try_lock_file(path: &Path) -> io::Result<File> {
    use std::os::unix::io::AsRawFd;

    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)?;

    let result = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };

    if result == 0 {
        Ok(file)
    } else {
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EWOULDBLOCK) {
            Err(io::Error::new(ErrorKind::WouldBlock, "lock held"))
        } else {
            Err(err)
        }
    }
}

/// Without `flock`, the existence of the lock file is the lock.
#[cfg(not(unix))]
fn try_lock_file(path: &Path) -> io::Result<File> {
    match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(file) => Ok(file),
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            Err(io::Error::new(ErrorKind::WouldBlock, "lock held"))
        }
        Err(e) => Err(e),
    }
}

/// Closing the file already dropped the `flock`; the lock file stays so that
/// concurrent lockers keep using the same inode.
#[cfg(unix)]
fn unlock_file(_path: &Path) {}

#[cfg(not(unix))]
fn unlock_file(path: &Path) {
    let _ = fs::remove_file(path);
}
