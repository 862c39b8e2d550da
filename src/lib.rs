// src/lib.rs

pub mod cli;
pub mod cluster;
pub mod command;
pub mod config;
pub mod engine;
pub mod errors;
pub mod events;
pub mod fs;
pub mod jobs;
pub mod logging;
pub mod repository;
pub mod tasks;
pub mod types;

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cli::CliArgs;
use crate::cluster::{Cluster, FsCluster, MemoryCluster};
use crate::config::{load_for_root, CiLayout, ConfigFile};
use crate::engine::{CiContext, Orchestrator};
use crate::errors::{CiError, Result};
use crate::fs::{file_name, FileSystem, RealFileSystem};
use crate::repository::GitCli;
use crate::tasks::TaskDefinition;
use crate::types::{format_duration, is_valid_name, ClusterMode};

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - root layout and config loading (fatal on failure)
/// - joining the shared-state substrate (fatal on failure)
/// - the orchestrator context and tick loop
/// - Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<()> {
    let fs: Arc<dyn FileSystem> = Arc::new(RealFileSystem);

    let layout = CiLayout::open(fs.as_ref(), &args.root)?;
    let mut config = load_for_root(&layout.root, args.config.as_deref())?;
    if let Some(mode) = args.cluster {
        config.cluster.mode = mode;
    }

    if args.dry_run {
        print_dry_run(&config, &layout, fs.as_ref());
        return Ok(());
    }

    layout.create_dirs(fs.as_ref())?;

    let node_id = args.node_id.unwrap_or_else(|| Uuid::new_v4().to_string());
    if !is_valid_name(&node_id) {
        return Err(CiError::ConfigError(format!("invalid node id {node_id:?}")));
    }

    let cluster = join_cluster(&config, &layout, &node_id)?;
    info!(node = %node_id, mode = %config.cluster.mode, root = %layout.root.display(), "joined cluster");

    let ctx = CiContext::new(config, layout, fs, cluster, Arc::new(GitCli::default()));

    // Ctrl-C → shutdown; a second one forces the running job down.
    let (interrupt_tx, interrupt_rx) = mpsc::channel::<()>(4);
    tokio::spawn(async move {
        loop {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for Ctrl+C");
                return;
            }
            if interrupt_tx.send(()).await.is_err() {
                return;
            }
        }
    });

    Orchestrator::new(ctx).with_interrupts(interrupt_rx).run().await
}

/// Join the configured substrate. Failure is fatal.
fn join_cluster(config: &ConfigFile, layout: &CiLayout, node_id: &str) -> Result<Cluster> {
    match config.cluster.mode {
        ClusterMode::Memory => {
            let node = MemoryCluster::new().join(node_id)?;
            Ok(Cluster::new(node))
        }
        ClusterMode::File => {
            let node = FsCluster::join(layout.resolve(&config.cluster.dir), node_id)?;
            Ok(Cluster::new(node))
        }
    }
}

/// Print the effective configuration and the task definitions found.
fn print_dry_run(config: &ConfigFile, layout: &CiLayout, fs: &dyn FileSystem) {
    let daemon = &config.daemon;
    println!("fleetci dry-run");
    println!("  root = {}", layout.root.display());
    println!("  daemon.tick_interval = {}", format_duration(daemon.tick_interval));
    println!("  daemon.stop_grace_period = {}", format_duration(daemon.stop_grace_period));
    println!(
        "  daemon.repository_scan_interval = {}",
        format_duration(daemon.repository_scan_interval)
    );
    println!("  daemon.lock_timeout = {}", format_duration(daemon.lock_timeout));
    println!("  daemon.script_suffix = {}", daemon.script_suffix);
    println!("  daemon.temp_prefix = {}", daemon.temp_prefix);
    println!("  cluster.mode = {}", config.cluster.mode);
    if config.cluster.mode == ClusterMode::File {
        println!("  cluster.dir = {}", layout.resolve(&config.cluster.dir).display());
    }
    println!();

    let entries = fs.read_dir(&layout.tasks).unwrap_or_default();
    let definitions: Vec<_> = entries
        .iter()
        .filter_map(|path| file_name(path).map(|name| (path, name)))
        .filter(|(_, name)| !name.starts_with('.') && !name.starts_with(&daemon.temp_prefix))
        .collect();

    println!("tasks ({}):", definitions.len());
    for (path, name) in definitions {
        let parsed = fs
            .read_to_string(path)
            .map_err(CiError::from)
            .and_then(|text| TaskDefinition::parse(&text));
        match parsed {
            Ok(definition) => {
                println!("  - {name}");
                println!("      trigger: {:?}", definition.trigger);
                println!("      script: {}", definition.job.script.trim());
            }
            Err(err) => println!("  - {name} (invalid: {err})"),
        }
    }

    debug!("dry-run complete (no execution)");
}
