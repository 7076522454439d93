// src/errors.rs

//! Crate-wide error aliases and helpers.

use thiserror::Error;

use crate::types::{ArchiveId, JobId, RepositoryId, RunId};

#[derive(Error, Debug)]
pub enum BorgschedError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Invalid cron expression: {0}")]
    CronError(#[from] crate::schedule::cron::CronParseError),

    #[error("Unknown timezone: {0}")]
    TimezoneError(String),

    #[error("Backup job not found: {0}")]
    JobNotFound(JobId),

    #[error("Repository not found: {0}")]
    RepositoryNotFound(RepositoryId),

    #[error("Job run not found: {0}")]
    RunNotFound(RunId),

    #[error("Archive not found: {0}")]
    ArchiveNotFound(ArchiveId),

    #[error("Store error: {0}")]
    StoreError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, BorgschedError>;
