// src/tasks/definition.rs

//! On-disk task definition format (`tasks/<task-id>`, TOML).
//!
//! ```toml
//! [trigger]
//! type = "repository"
//! repository = "core"
//! debounce = "30s"
//!
//! [job]
//! script = "make test"
//! ```

use std::time::Duration;

use serde::Deserialize;

use crate::errors::{CiError, Result};
use crate::types::{duration_str, is_valid_name};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskDefinition {
    pub trigger: TriggerDefinition,
    pub job: JobSection,
}

/// `[job]` section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobSection {
    /// Script written to `jobs/<task-id>.sh` on every execution.
    pub script: String,
}

/// `[trigger]` section, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TriggerDefinition {
    Schedule {
        #[serde(with = "duration_str")]
        every: Duration,
        #[serde(default, with = "duration_str")]
        debounce: Duration,
        /// Fire at the first evaluation instead of one interval after creation.
        #[serde(default)]
        immediate: bool,
    },
    Repository {
        repository: String,
        #[serde(default, with = "duration_str")]
        debounce: Duration,
    },
}

impl TaskDefinition {
    pub fn parse(text: &str) -> Result<Self> {
        let definition: TaskDefinition = toml::from_str(text)?;
        definition.validate()?;
        Ok(definition)
    }

    pub fn validate(&self) -> Result<()> {
        if self.job.script.trim().is_empty() {
            return Err(CiError::InvalidTask("[job].script must not be empty".to_string()));
        }
        match &self.trigger {
            TriggerDefinition::Schedule { every, .. } if every.is_zero() => Err(CiError::InvalidTask(
                "[trigger].every must be > 0".to_string(),
            )),
            TriggerDefinition::Repository { repository, .. } if !is_valid_name(repository) => {
                Err(CiError::InvalidTask(format!(
                    "[trigger].repository is not a valid repository name: {repository:?}"
                )))
            }
            _ => Ok(()),
        }
    }
}
