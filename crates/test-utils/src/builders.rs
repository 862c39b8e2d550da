#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tempfile::TempDir;

use fleetci::cluster::{Cluster, MemoryCluster};
use fleetci::config::{CiLayout, ConfigFile};
use fleetci::engine::CiContext;
use fleetci::fs::{FileSystem, RealFileSystem};
use fleetci::repository::Vcs;
use fleetci::tasks::{Task, TaskDefinition};

use crate::fake_vcs::FakeVcs;

/// Builder for task definition files (TOML text) to simplify test setup.
pub struct TaskDefinitionBuilder {
    trigger: Vec<String>,
    script: String,
}

impl TaskDefinitionBuilder {
    pub fn schedule(every: &str) -> Self {
        Self {
            trigger: vec![
                "type = \"schedule\"".to_string(),
                format!("every = \"{every}\""),
            ],
            script: "echo task".to_string(),
        }
    }

    pub fn repository(name: &str) -> Self {
        Self {
            trigger: vec![
                "type = \"repository\"".to_string(),
                format!("repository = \"{name}\""),
            ],
            script: "echo task".to_string(),
        }
    }

    pub fn immediate(mut self) -> Self {
        self.trigger.push("immediate = true".to_string());
        self
    }

    pub fn debounce(mut self, window: &str) -> Self {
        self.trigger.push(format!("debounce = \"{window}\""));
        self
    }

    pub fn script(mut self, script: &str) -> Self {
        self.script = script.to_string();
        self
    }

    pub fn build(self) -> String {
        format!(
            "[trigger]\n{}\n\n[job]\nscript = '''\n{}'''\n",
            self.trigger.join("\n"),
            self.script
        )
    }

    /// Parse the definition into a `Task` named `id`.
    pub fn task(self, id: &str, now: DateTime<Utc>) -> Task {
        let definition = TaskDefinition::parse(&self.build()).expect("valid task definition");
        Task::from_definition(id, definition, now).expect("valid task")
    }
}

/// Config tuned for tests: fast ticks, short waits, no periodic rescans.
pub fn fast_config() -> ConfigFile {
    let mut config = ConfigFile::default();
    config.daemon.tick_interval = Duration::from_millis(10);
    config.daemon.stop_grace_period = Duration::from_secs(2);
    config.daemon.repository_scan_interval = Duration::from_secs(3600);
    config.daemon.lock_timeout = Duration::from_millis(200);
    config
}

/// Throwaway CI root with every intake directory created.
pub struct CiFixture {
    pub dir: TempDir,
    pub layout: CiLayout,
    pub config: ConfigFile,
}

impl CiFixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("create temp dir");
        let layout = CiLayout::new(dir.path());
        layout.create_dirs(&RealFileSystem).expect("create layout");
        Self {
            dir,
            layout,
            config: fast_config(),
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn write_job(&self, file: &str, script: &str) -> PathBuf {
        write(&self.layout.jobs.join(file), script)
    }

    pub fn write_command(&self, file: &str, toml: &str) -> PathBuf {
        write(&self.layout.commands.join(file), toml)
    }

    pub fn write_task(&self, id: &str, definition: &str) -> PathBuf {
        write(&self.layout.tasks.join(id), definition)
    }

    pub fn write_file(&self, relative: &str, contents: &str) -> PathBuf {
        write(&self.root().join(relative), contents)
    }

    pub fn command_files(&self) -> Vec<PathBuf> {
        list(&self.layout.commands)
    }

    pub fn job_files(&self) -> Vec<PathBuf> {
        list(&self.layout.jobs)
    }

    /// Context on `cluster` backed by the real filesystem.
    pub fn context(&self, cluster: Cluster, vcs: Arc<dyn Vcs>) -> CiContext {
        let fs: Arc<dyn FileSystem> = Arc::new(RealFileSystem);
        CiContext::new(self.config.clone(), self.layout.clone(), fs, cluster, vcs)
    }

    /// Context of a single node joined to a fresh in-memory cluster.
    pub fn memory_context(&self, node_id: &str) -> (MemoryCluster, CiContext) {
        let cluster = MemoryCluster::new();
        let node = cluster.join(node_id).expect("join memory cluster");
        let ctx = self.context(Cluster::new(node), Arc::new(FakeVcs::new("abc123")));
        (cluster, ctx)
    }
}

impl Default for CiFixture {
    fn default() -> Self {
        Self::new()
    }
}

fn write(path: &Path, contents: &str) -> PathBuf {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create parent dir");
    }
    fs::write(path, contents).expect("write fixture file");
    path.to_path_buf()
}

fn list(dir: &Path) -> Vec<PathBuf> {
    let mut entries: Vec<PathBuf> = fs::read_dir(dir)
        .expect("read dir")
        .map(|entry| entry.expect("dir entry").path())
        .collect();
    entries.sort();
    entries
}
