// src/config/model.rs

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::types::{duration_str, ClusterMode};

/// Top-level configuration as read from a TOML file (`fleetci.toml`).
///
/// ```toml
/// [daemon]
/// tick_interval = "100ms"
/// stop_grace_period = "10s"
///
/// [cluster]
/// mode = "file"
/// dir = "cluster"
/// ```
///
/// All sections are optional and have reasonable defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub daemon: DaemonSection,

    #[serde(default)]
    pub cluster: ClusterSection,
}

/// `[daemon]` section: orchestrator timing and intake conventions.
#[derive(Debug, Clone, Deserialize)]
pub struct DaemonSection {
    /// Sleep between two ticks of the orchestrator loop.
    #[serde(default = "default_tick_interval", with = "duration_str")]
    pub tick_interval: Duration,

    /// How long a job gets to exit after a graceful stop before it is killed.
    #[serde(default = "default_stop_grace_period", with = "duration_str")]
    pub stop_grace_period: Duration,

    /// How often this node scans the repositories it originated.
    #[serde(default = "default_repository_scan_interval", with = "duration_str")]
    pub repository_scan_interval: Duration,

    /// Upper bound for blocking lock acquisition (event delivery, task stop).
    #[serde(default = "default_lock_timeout", with = "duration_str")]
    pub lock_timeout: Duration,

    /// Files in `jobs/` with this suffix are job submissions.
    #[serde(default = "default_script_suffix")]
    pub script_suffix: String,

    /// Files in `tasks/` starting with this prefix are still being written.
    #[serde(default = "default_temp_prefix")]
    pub temp_prefix: String,
}

fn default_tick_interval() -> Duration {
    Duration::from_millis(100)
}

fn default_stop_grace_period() -> Duration {
    Duration::from_secs(10)
}

fn default_repository_scan_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_lock_timeout() -> Duration {
    Duration::from_secs(1)
}

fn default_script_suffix() -> String {
    ".sh".to_string()
}

fn default_temp_prefix() -> String {
    "temp".to_string()
}

impl Default for DaemonSection {
    fn default() -> Self {
        Self {
            tick_interval: default_tick_interval(),
            stop_grace_period: default_stop_grace_period(),
            repository_scan_interval: default_repository_scan_interval(),
            lock_timeout: default_lock_timeout(),
            script_suffix: default_script_suffix(),
            temp_prefix: default_temp_prefix(),
        }
    }
}

/// `[cluster]` section: which shared-state substrate to join.
#[derive(Debug, Clone, Deserialize)]
pub struct ClusterSection {
    #[serde(default)]
    pub mode: ClusterMode,

    /// Substrate directory for `mode = "file"`, relative to the CI root
    /// unless absolute.
    #[serde(default = "default_cluster_dir")]
    pub dir: PathBuf,
}

fn default_cluster_dir() -> PathBuf {
    PathBuf::from("cluster")
}

impl Default for ClusterSection {
    fn default() -> Self {
        Self {
            mode: ClusterMode::default(),
            dir: default_cluster_dir(),
        }
    }
}

/// Validated configuration.
///
/// Only obtainable through `ConfigFile::try_from(RawConfigFile)` (or
/// `ConfigFile::default()`), so the rest of the daemon can rely on the
/// invariants checked in `validate.rs`.
#[derive(Debug, Clone, Default)]
pub struct ConfigFile {
    pub daemon: DaemonSection,
    pub cluster: ClusterSection,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(daemon: DaemonSection, cluster: ClusterSection) -> Self {
        Self { daemon, cluster }
    }
}
