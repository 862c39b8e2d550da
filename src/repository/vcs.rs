// src/repository/vcs.rs

//! Version-control seam.
//!
//! The scanner talks to a [`Vcs`] instead of spawning `git` directly, so
//! tests can script revisions and failures without a network.

use std::fmt;
use std::fs::OpenOptions;
use std::future::Future;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::Stdio;

use chrono::Utc;
use tokio::process::Command;
use tracing::debug;

use crate::errors::{CiError, Result};

pub type VcsFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Operations the repository scan needs from a version-control system.
///
/// Every operation appends its subprocess output to `log`.
pub trait Vcs: Send + Sync + fmt::Debug {
    /// Clone `url` into the empty directory `dir`.
    fn clone_repo<'a>(&'a self, url: &'a str, dir: &'a Path, log: &'a Path) -> VcsFuture<'a, ()>;

    /// Bring the working copy in `dir` up to date with its upstream.
    fn update<'a>(&'a self, dir: &'a Path, log: &'a Path) -> VcsFuture<'a, ()>;

    /// Current revision identifier of the working copy in `dir`.
    fn head_revision<'a>(&'a self, dir: &'a Path, log: &'a Path) -> VcsFuture<'a, String>;
}

/// [`Vcs`] backed by the `git` command line.
#[derive(Debug, Clone)]
pub struct GitCli {
    program: PathBuf,
}

impl Default for GitCli {
    fn default() -> Self {
        Self::new("git")
    }
}

impl GitCli {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn command(&self, dir: &Path, args: &[&str]) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(args)
            .current_dir(dir)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .kill_on_drop(true);
        cmd
    }

    /// Run `git <args>` in `dir` with stdout and stderr appended to `log`.
    async fn run_logged(&self, dir: &Path, args: &[&str], log: &Path) -> Result<()> {
        let mut out = open_log(log)?;
        writeln!(out, "[{}] $ git {}", Utc::now().to_rfc3339(), args.join(" "))?;
        let err = out.try_clone()?;

        let mut cmd = self.command(dir, args);
        cmd.stdout(Stdio::from(out)).stderr(Stdio::from(err));

        debug!(dir = %dir.display(), ?args, "running git");
        let status = cmd
            .status()
            .await
            .map_err(|e| CiError::Vcs(format!("failed to run git {}: {e}", args.join(" "))))?;

        if status.success() {
            Ok(())
        } else {
            Err(CiError::Vcs(format!("git {} failed with {status}", args.join(" "))))
        }
    }
}

impl Vcs for GitCli {
    fn clone_repo<'a>(&'a self, url: &'a str, dir: &'a Path, log: &'a Path) -> VcsFuture<'a, ()> {
        Box::pin(async move { self.run_logged(dir, &["clone", url, "."], log).await })
    }

    fn update<'a>(&'a self, dir: &'a Path, log: &'a Path) -> VcsFuture<'a, ()> {
        Box::pin(async move { self.run_logged(dir, &["pull"], log).await })
    }

    fn head_revision<'a>(&'a self, dir: &'a Path, log: &'a Path) -> VcsFuture<'a, String> {
        Box::pin(async move {
            let args = ["rev-parse", "--short", "HEAD"];
            let mut out = open_log(log)?;
            writeln!(out, "[{}] $ git {}", Utc::now().to_rfc3339(), args.join(" "))?;

            let mut cmd = self.command(dir, &args);
            cmd.stdout(Stdio::piped()).stderr(Stdio::from(out.try_clone()?));
            let output = cmd
                .output()
                .await
                .map_err(|e| CiError::Vcs(format!("failed to run git rev-parse: {e}")))?;

            if !output.status.success() {
                return Err(CiError::Vcs(format!("git rev-parse failed with {}", output.status)));
            }

            let revision = String::from_utf8_lossy(&output.stdout).trim().to_string();
            writeln!(out, "{revision}")?;
            if revision.is_empty() {
                return Err(CiError::Vcs("git rev-parse printed no revision".to_string()));
            }
            Ok(revision)
        })
    }
}

/// Open the per-repository log for appending; it is never truncated.
fn open_log(path: &Path) -> Result<std::fs::File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(OpenOptions::new().create(true).append(true).open(path)?)
}
