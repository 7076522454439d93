use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub type JobId = u64;
pub type RepositoryId = u64;
pub type RunId = u64;
pub type ArchiveId = u64;

/// How a repository is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RepoType {
    #[default]
    Local,
    Ssh,
}

/// SSH authentication method for `ssh` repositories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SshAuthMethod {
    #[default]
    Key,
    Password,
}

/// Borg repository encryption modes accepted by `borg init`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum EncryptionMode {
    None,
    Authenticated,
    AuthenticatedBlake2,
    Repokey,
    #[default]
    RepokeyBlake2,
    Keyfile,
    KeyfileBlake2,
}

impl EncryptionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            EncryptionMode::None => "none",
            EncryptionMode::Authenticated => "authenticated",
            EncryptionMode::AuthenticatedBlake2 => "authenticated-blake2",
            EncryptionMode::Repokey => "repokey",
            EncryptionMode::RepokeyBlake2 => "repokey-blake2",
            EncryptionMode::Keyfile => "keyfile",
            EncryptionMode::KeyfileBlake2 => "keyfile-blake2",
        }
    }
}

impl fmt::Display for EncryptionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EncryptionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "none" => Ok(EncryptionMode::None),
            "authenticated" => Ok(EncryptionMode::Authenticated),
            "authenticated-blake2" => Ok(EncryptionMode::AuthenticatedBlake2),
            "repokey" => Ok(EncryptionMode::Repokey),
            "repokey-blake2" => Ok(EncryptionMode::RepokeyBlake2),
            "keyfile" => Ok(EncryptionMode::Keyfile),
            "keyfile-blake2" => Ok(EncryptionMode::KeyfileBlake2),
            other => Err(format!("invalid encryption mode: {other}")),
        }
    }
}

/// Status of a single job run, also mirrored onto the job's `last_status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Success,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Success => "success",
            RunStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where run records are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LedgerStorage {
    /// Append run records to a JSON-lines file.
    File,
    /// Keep run records in memory only (lost on restart).
    #[default]
    Memory,
}

/// Reachability of a repository, as reported by a connection check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Connected,
    Error,
    Unreachable,
}
