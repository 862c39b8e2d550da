// src/errors.rs

//! Crate-wide error aliases and helpers.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CiError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid CI root: {0}")]
    InvalidRoot(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    #[error("Invalid task definition: {0}")]
    InvalidTask(String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Repository not found: {0}")]
    RepositoryNotFound(String),

    #[error("Task {0} is locked by another node; try again")]
    TaskBusy(String),

    #[error("Cluster unavailable: {0}")]
    ClusterUnavailable(String),

    #[error("Version control error: {0}")]
    Vcs(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, CiError>;
