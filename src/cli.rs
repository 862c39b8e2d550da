// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::types::ClusterMode;

/// Command-line arguments for `fleetci`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "fleetci",
    version,
    about = "Self-hosted CI daemon: polls a directory for commands, jobs and tasks.",
    long_about = None
)]
pub struct CliArgs {
    /// CI root directory holding `commands/`, `jobs/`, `tasks/`, ...
    #[arg(long, value_name = "DIR", default_value = ".")]
    pub root: PathBuf,

    /// Path to the config file (TOML).
    ///
    /// Default: `fleetci.toml` in the CI root, if present.
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Identifier of this node in the cluster. A random one is generated
    /// when omitted.
    #[arg(long, value_name = "ID")]
    pub node_id: Option<String>,

    /// Override `[cluster].mode` from the config file.
    #[arg(long, value_name = "MODE")]
    pub cluster: Option<ClusterMode>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `FLEETCI_LOG` or `info` is used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Validate root and config, print them, don't start the loop.
    #[arg(long)]
    pub dry_run: bool,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
