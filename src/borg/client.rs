// src/borg/client.rs

//! Repository-level borg operations (init, listing, info, deletion,
//! connection checks).
//!
//! Backup runs themselves go through the execution engine; this client
//! covers the maintenance operations around a repository.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, anyhow};
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::errors::{BorgschedError, Result};
use crate::exec::runner::SYNTHETIC_EXIT_CODE;
use crate::exec::{CommandOutput, CommandSpec, Decoded, OutputMode, ProcessRunner};
use crate::model::{ArchiveRecord, Repository, RepositoryStatus};
use crate::store::Stores;
use crate::types::{ArchiveId, ConnectionState, EncryptionMode};

use super::command::{BorgCommand, CommandBuilder};
use super::output::{
    self, ArchiveDetails, ArchiveList, InfoResult, ListEntry, parse_archive_list, parse_info,
};

/// Runs repository operations with a fixed per-call timeout.
#[derive(Clone)]
pub struct BorgClient {
    builder: CommandBuilder,
    runner: Arc<dyn ProcessRunner>,
    timeout: Duration,
}

impl BorgClient {
    pub fn new(builder: CommandBuilder, runner: Arc<dyn ProcessRunner>, timeout: Duration) -> Self {
        Self {
            builder,
            runner,
            timeout,
        }
    }

    async fn execute(&self, cmd: BorgCommand) -> CommandOutput {
        debug!(command = %cmd, "running borg");
        self.runner
            .run(CommandSpec::from_borg(cmd, self.timeout))
            .await
    }

    /// Initialize a new repository. Uses the repository's configured
    /// encryption mode unless `encryption` overrides it.
    pub async fn init_repository(
        &self,
        repo: &Repository,
        encryption: Option<EncryptionMode>,
    ) -> CommandOutput {
        let mode = encryption
            .or(repo.encryption_mode)
            .unwrap_or_default();
        info!(repository = %repo.name, encryption = %mode, "initializing repository");
        self.execute(self.builder.init(repo, mode)).await
    }

    pub async fn list_archives(&self, repo: &Repository) -> Result<ArchiveList> {
        let out = self.execute(self.builder.list_archives(repo)).await;
        let doc = expect_document(&out, "borg list")?;
        Ok(parse_archive_list(doc).context("unexpected `borg list` output")?)
    }

    pub async fn repository_info(&self, repo: &Repository) -> Result<InfoResult> {
        let out = self.execute(self.builder.repository_info(repo)).await;
        let doc = expect_document(&out, "borg info")?;
        Ok(parse_info(doc).context("unexpected `borg info` output")?)
    }

    pub async fn archive_info(&self, repo: &Repository, archive_name: &str) -> Result<ArchiveDetails> {
        let out = self.execute(self.builder.archive_info(repo, archive_name)).await;
        let doc = expect_document(&out, "borg info")?;
        let info = parse_info(doc).context("unexpected `borg info` output")?;
        let details = info
            .archives
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("`borg info` returned no archive named '{archive_name}'"))?;
        Ok(details)
    }

    /// File entries of an archive, optionally below `path`.
    ///
    /// Returns an empty list when borg fails; malformed lines are skipped.
    pub async fn list_archive_contents(
        &self,
        repo: &Repository,
        archive_name: &str,
        path: Option<&str>,
    ) -> Vec<ListEntry> {
        let out = self
            .execute(self.builder.list_contents(repo, archive_name, path))
            .await;

        if !out.success {
            warn!(
                repository = %repo.name,
                archive = archive_name,
                exit_code = out.exit_code,
                stderr = %out.stderr.trim(),
                "listing archive contents failed"
            );
            return Vec::new();
        }

        match out.decode(OutputMode::JsonLines) {
            Decoded::Records { records, skipped } => {
                let (entries, foreign) = output::parse_list_entries(records);
                if skipped + foreign > 0 {
                    debug!(
                        archive = archive_name,
                        skipped = skipped + foreign,
                        "skipped unparseable archive entries"
                    );
                }
                entries
            }
            _ => Vec::new(),
        }
    }

    /// Re-read a recorded archive's statistics and metadata from borg and
    /// store the updated record.
    pub async fn refresh_archive_stats(
        &self,
        stores: &Stores,
        archive_id: ArchiveId,
    ) -> Result<ArchiveRecord> {
        let mut archive = stores
            .archives
            .get_archive(archive_id)?
            .ok_or(BorgschedError::ArchiveNotFound(archive_id))?;
        let repo = stores
            .repositories
            .get_repository(archive.repository_id)?
            .ok_or(BorgschedError::RepositoryNotFound(archive.repository_id))?;

        let details = self.archive_info(&repo, &archive.name).await?;
        apply_archive_details(&mut archive, &details);
        stores.archives.update_archive(&archive)?;

        info!(repository = %repo.name, archive = %archive.name, archive_id, "archive stats refreshed");
        Ok(archive)
    }

    pub async fn delete_archive(&self, repo: &Repository, archive_name: &str) -> CommandOutput {
        info!(repository = %repo.name, archive = archive_name, "deleting archive");
        self.execute(self.builder.delete_archive(repo, archive_name)).await
    }

    /// Check a repository with `borg info`.
    ///
    /// `connected` when borg answers, `error` when it answers with a failure,
    /// `unreachable` when it could not be run or did not answer in time.
    pub async fn check_connection(&self, repo: &Repository) -> RepositoryStatus {
        let out = self.execute(self.builder.repository_info(repo)).await;

        let (status, message) = if out.success {
            (
                ConnectionState::Connected,
                "Repository is accessible".to_string(),
            )
        } else if out.timed_out || out.exit_code == SYNTHETIC_EXIT_CODE {
            (ConnectionState::Unreachable, out.stderr.trim().to_string())
        } else {
            (ConnectionState::Error, out.stderr.trim().to_string())
        };

        RepositoryStatus {
            repository_id: repo.id,
            name: repo.name.clone(),
            status,
            message: Some(message),
            last_checked: Utc::now(),
        }
    }
}

/// Copy what `borg info` reported onto `archive`. Fields borg left out keep
/// their recorded values.
fn apply_archive_details(archive: &mut ArchiveRecord, details: &ArchiveDetails) {
    if let Some(stats) = details.stats {
        archive.original_size = stats.original_size;
        archive.compressed_size = stats.compressed_size;
        archive.deduplicated_size = stats.deduplicated_size;
        archive.nfiles = stats.nfiles;
    }
    if let Some(id) = &details.id {
        archive.borg_id = Some(id.clone());
    }
    if let Some(start) = details.start.as_deref().and_then(output::parse_borg_timestamp) {
        archive.start_time = Some(start);
    }
    if let Some(end) = details.end.as_deref().and_then(output::parse_borg_timestamp) {
        archive.end_time = Some(end);
    }
    if details.duration > 0.0 {
        archive.duration = Some(details.duration);
    }
    if details.hostname.is_some() {
        archive.hostname = details.hostname.clone();
    }
    if details.username.is_some() {
        archive.username = details.username.clone();
    }
    if details.comment.is_some() {
        archive.comment = details.comment.clone();
    }
}

fn expect_document(out: &CommandOutput, what: &str) -> anyhow::Result<serde_json::Value> {
    if !out.success {
        return Err(anyhow!(
            "{what} failed (exit code {}): {}",
            out.exit_code,
            out.stderr.trim()
        ));
    }
    match out.decode(OutputMode::Json) {
        Decoded::Document(doc) => Ok(doc),
        Decoded::Malformed(e) => Err(anyhow!("{what} printed invalid JSON: {e}")),
        _ => Err(anyhow!("{what} printed no JSON output")),
    }
}
