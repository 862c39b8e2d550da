// src/command/mod.rs

//! Operator commands.
//!
//! A command is one TOML file dropped into `commands/`, tagged by `type`:
//!
//! ```toml
//! type = "stop"
//! task = "nightly"
//! properties = "stop/nightly.properties"
//! ```
//!
//! The orchestrator takes at most one command per tick ([`next_command`]),
//! validates it and runs it ([`execute_command`]).

use std::fmt;
use std::path::PathBuf;

use serde::Deserialize;

use crate::errors::{CiError, Result};
use crate::tasks::TaskDefinition;
use crate::types::is_valid_name;

pub mod execute;
pub mod intake;
pub mod properties;

pub use execute::{execute_command, CommandEffect};
pub use intake::next_command;
pub use properties::{load_properties, parse_properties};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Command {
    /// Stop the daemon once the running job finished, or right away with
    /// `force`.
    Shutdown {
        #[serde(default)]
        force: bool,
    },
    /// Register a repository or a task.
    Create {
        kind: CreateKind,
        name: String,
        /// Repository source url.
        #[serde(default)]
        url: Option<String>,
        /// Task definition text.
        #[serde(default)]
        definition: Option<String>,
    },
    List {
        what: ListTarget,
    },
    Show {
        what: ShowTarget,
        name: String,
    },
    /// Stop a task; `properties` is a properties file relative to the root.
    Stop {
        task: String,
        #[serde(default)]
        properties: Option<PathBuf>,
    },
    /// Run a task as soon as possible.
    Trigger {
        task: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CreateKind {
    Repository,
    Task,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListTarget {
    Tasks,
    Jobs,
    Repositories,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShowTarget {
    Task,
    Repository,
}

impl Command {
    pub fn parse(text: &str) -> Result<Self> {
        let command: Command = toml::from_str(text)?;
        command.validate()?;
        Ok(command)
    }

    /// Check the parts serde cannot express.
    pub fn validate(&self) -> Result<()> {
        match self {
            Command::Shutdown { .. } | Command::List { .. } => Ok(()),
            Command::Create {
                kind,
                name,
                url,
                definition,
            } => {
                check_name("name", name)?;
                match kind {
                    CreateKind::Repository => match url {
                        Some(url) if !url.trim().is_empty() => Ok(()),
                        _ => Err(invalid("create repository requires a non-empty `url`")),
                    },
                    CreateKind::Task => match definition {
                        Some(text) => TaskDefinition::parse(text).map(|_| ()).map_err(|err| {
                            invalid(format!("task definition for {name} is invalid: {err}"))
                        }),
                        None => Err(invalid("create task requires a `definition`")),
                    },
                }
            }
            Command::Show { name, .. } => check_name("name", name),
            Command::Stop { task, .. } | Command::Trigger { task } => check_name("task", task),
        }
    }
}

fn check_name(field: &str, value: &str) -> Result<()> {
    if is_valid_name(value) {
        Ok(())
    } else {
        Err(invalid(format!("`{field}` is not a valid name: {value:?}")))
    }
}

fn invalid(message: impl Into<String>) -> CiError {
    CiError::InvalidCommand(message.into())
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Shutdown { force: false } => f.write_str("shutdown"),
            Command::Shutdown { force: true } => f.write_str("shutdown (forced)"),
            Command::Create { kind, name, .. } => write!(f, "create {kind:?} {name}"),
            Command::List { what } => write!(f, "list {what:?}"),
            Command::Show { what, name } => write!(f, "show {what:?} {name}"),
            Command::Stop { task, .. } => write!(f, "stop {task}"),
            Command::Trigger { task } => write!(f, "trigger {task}"),
        }
    }
}
