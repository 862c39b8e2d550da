// src/repository/mod.rs

//! Source repositories tracked by this node.
//!
//! A [`Repository`] value is an immutable snapshot: every scan produces a new
//! one (see [`scan::RepositoryScanner`]) which the [`store::RepositoryStore`]
//! persists as `repositories/<name>.json`.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{CiError, Result};
use crate::types::{is_valid_name, NodeId};

pub mod scan;
pub mod store;
pub mod vcs;

pub use scan::{RepositoryScanner, ScanOutcome};
pub use store::RepositoryStore;
pub use vcs::{GitCli, Vcs, VcsFuture};

/// Version-control system of a repository.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepositoryKind {
    #[default]
    Git,
}

impl fmt::Display for RepositoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RepositoryKind::Git => f.write_str("git"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    pub name: String,
    pub url: String,
    /// Node that created the repository and scans it.
    pub node_id: NodeId,
    #[serde(default)]
    pub kind: RepositoryKind,
    /// Time of the last successful scan.
    pub last_scan: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub last_revision: Option<String>,
}

impl Repository {
    pub fn new(name: impl Into<String>, url: impl Into<String>, node_id: impl Into<NodeId>) -> Result<Self> {
        let name = name.into();
        let url = url.into();
        if !is_valid_name(&name) {
            return Err(CiError::InvalidCommand(format!("invalid repository name {name:?}")));
        }
        if url.trim().is_empty() {
            return Err(CiError::InvalidCommand(format!("repository {name} has no url")));
        }
        Ok(Self {
            name,
            url,
            node_id: node_id.into(),
            kind: RepositoryKind::Git,
            last_scan: None,
            last_error: None,
            last_revision: None,
        })
    }

    /// Snapshot after a successful scan that observed `revision`.
    pub fn scanned(&self, now: DateTime<Utc>, revision: String) -> Self {
        Self {
            last_scan: Some(now),
            last_error: None,
            last_revision: Some(revision),
            ..self.clone()
        }
    }

    /// Snapshot after a failed scan. The previous revision is kept.
    pub fn failed(&self, error: impl Into<String>) -> Self {
        Self {
            last_error: Some(error.into()),
            ..self.clone()
        }
    }

    /// Whether the repository was never successfully scanned.
    pub fn is_empty(&self) -> bool {
        self.last_revision.is_none()
    }
}

impl fmt::Display for Repository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Repository[{} {} {} revision={}]",
            self.name,
            self.kind,
            self.url,
            self.last_revision.as_deref().unwrap_or("-")
        )
    }
}
