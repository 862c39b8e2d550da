use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};

use fleetci::errors::{CiError, Result};
use fleetci::repository::{Vcs, VcsFuture};

#[derive(Debug, Default)]
struct FakeVcsState {
    revision: String,
    failure: Option<String>,
    calls: Vec<String>,
}

/// A fake version-control backend that:
/// - reports a scripted upstream revision
/// - fails every operation while a failure is set
/// - records which operations were called.
#[derive(Debug, Clone, Default)]
pub struct FakeVcs {
    state: Arc<Mutex<FakeVcsState>>,
}

impl FakeVcs {
    pub fn new(revision: &str) -> Self {
        let vcs = Self::default();
        vcs.set_revision(revision);
        vcs
    }

    /// Simulate a push upstream.
    pub fn set_revision(&self, revision: &str) {
        self.state.lock().unwrap().revision = revision.to_string();
    }

    pub fn fail_with(&self, message: &str) {
        self.state.lock().unwrap().failure = Some(message.to_string());
    }

    pub fn recover(&self) {
        self.state.lock().unwrap().failure = None;
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    fn record(&self, call: String, log: &Path) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(call.clone());
        append(log, &call)?;
        match &state.failure {
            Some(message) => Err(CiError::Vcs(message.clone())),
            None => Ok(state.revision.clone()),
        }
    }
}

impl Vcs for FakeVcs {
    fn clone_repo<'a>(&'a self, url: &'a str, dir: &'a Path, log: &'a Path) -> VcsFuture<'a, ()> {
        Box::pin(async move {
            self.record(format!("clone {url}"), log)?;
            fs::write(dir.join("README"), "cloned\n")?;
            Ok(())
        })
    }

    fn update<'a>(&'a self, _dir: &'a Path, log: &'a Path) -> VcsFuture<'a, ()> {
        Box::pin(async move { self.record("pull".to_string(), log).map(|_| ()) })
    }

    fn head_revision<'a>(&'a self, _dir: &'a Path, log: &'a Path) -> VcsFuture<'a, String> {
        Box::pin(async move { self.record("rev-parse".to_string(), log) })
    }
}

fn append(log: &Path, line: &str) -> Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(log)?;
    writeln!(file, "{line}")?;
    Ok(())
}
