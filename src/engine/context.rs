// src/engine/context.rs

use std::sync::Arc;
use std::time::Instant;

use crate::cluster::Cluster;
use crate::config::{CiLayout, ConfigFile};
use crate::events::EventBus;
use crate::fs::FileSystem;
use crate::jobs::JobRunner;
use crate::repository::{RepositoryScanner, RepositoryStore, Vcs};
use crate::tasks::TaskEngine;

/// Everything one node's orchestrator works with.
///
/// Built once at startup and handed to every component; torn down by
/// [`Orchestrator::shutdown`](crate::engine::Orchestrator::shutdown).
#[derive(Debug)]
pub struct CiContext {
    pub config: ConfigFile,
    pub layout: CiLayout,
    pub fs: Arc<dyn FileSystem>,
    pub cluster: Cluster,
    pub tasks: TaskEngine,
    pub events: EventBus,
    pub repositories: RepositoryStore,
    pub scanner: RepositoryScanner,
    /// The job this node is running, if any. At most one per node.
    pub runner: Option<JobRunner>,
    /// `None` until the first scan, and after a repository was created.
    pub last_repository_scan: Option<Instant>,
}

impl CiContext {
    pub fn new(
        config: ConfigFile,
        layout: CiLayout,
        fs: Arc<dyn FileSystem>,
        cluster: Cluster,
        vcs: Arc<dyn Vcs>,
    ) -> Self {
        let tasks = TaskEngine::new(cluster.clone(), Arc::clone(&fs), &layout, &config.daemon);
        let repositories = RepositoryStore::new(Arc::clone(&fs), layout.repositories.clone());
        let scanner = RepositoryScanner::new(vcs, layout.repositories.clone());

        Self {
            config,
            layout,
            fs,
            cluster,
            tasks,
            events: EventBus::new(),
            repositories,
            scanner,
            runner: None,
            last_repository_scan: None,
        }
    }

    pub fn node_id(&self) -> &str {
        self.cluster.node_id()
    }

    /// Whether this node currently runs a job.
    pub fn is_job_running(&self) -> bool {
        self.runner.as_ref().is_some_and(JobRunner::is_running)
    }
}
