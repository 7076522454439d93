// src/borg/output.rs

//! Strongly typed views of the JSON documents borg prints.
//!
//! The process runner decodes stdout into `serde_json::Value`s; the helpers
//! here turn those into per-operation structures and reject documents that
//! do not have the expected shape instead of trusting field presence.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Size and file counters reported for an archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveStats {
    pub original_size: u64,
    pub compressed_size: u64,
    pub deduplicated_size: u64,
    pub nfiles: u64,
}

/// The `archive` block of `borg create --json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatedArchive {
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    pub start: Option<String>,
    pub end: Option<String>,
    #[serde(default)]
    pub duration: f64,
    pub stats: ArchiveStats,
}

/// `borg create --stats --json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateResult {
    pub archive: CreatedArchive,
}

/// Repository block shared by `info` and `list`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryDescriptor {
    pub id: Option<String>,
    pub location: Option<String>,
    #[serde(default)]
    pub last_modified: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Encryption {
    pub mode: String,
}

/// One archive as described by `borg info --json <target>::<archive>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveDetails {
    pub name: String,
    pub id: Option<String>,
    pub start: Option<String>,
    pub end: Option<String>,
    #[serde(default)]
    pub duration: f64,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub comment: Option<String>,
    pub stats: Option<ArchiveStats>,
}

/// `borg info --json`, repository- or archive-scoped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InfoResult {
    pub repository: Option<RepositoryDescriptor>,
    pub encryption: Option<Encryption>,
    #[serde(default)]
    pub archives: Vec<ArchiveDetails>,
}

impl InfoResult {
    pub fn encryption_mode(&self) -> Option<&str> {
        self.encryption.as_ref().map(|e| e.mode.as_str())
    }
}

/// One entry of `borg list --json <target>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveSummary {
    pub name: String,
    pub id: Option<String>,
    pub start: Option<String>,
    #[serde(default)]
    pub time: Option<String>,
}

/// `borg list --json <target>`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveList {
    pub archives: Vec<ArchiveSummary>,
}

/// One file entry of `borg list --json-lines <target>::<archive>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListEntry {
    #[serde(rename = "type")]
    pub kind: String,
    pub path: String,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub mtime: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub healthy: Option<bool>,
    #[serde(default)]
    pub linktarget: Option<String>,
}

pub fn parse_create(doc: Value) -> serde_json::Result<CreateResult> {
    serde_json::from_value(doc)
}

pub fn parse_info(doc: Value) -> serde_json::Result<InfoResult> {
    serde_json::from_value(doc)
}

pub fn parse_archive_list(doc: Value) -> serde_json::Result<ArchiveList> {
    serde_json::from_value(doc)
}

/// Convert decoded JSON lines into file entries, skipping (and returning the
/// number of) records that do not look like a file entry.
pub fn parse_list_entries(records: Vec<Value>) -> (Vec<ListEntry>, usize) {
    let mut skipped = 0;
    let entries = records
        .into_iter()
        .filter_map(|record| match serde_json::from_value(record) {
            Ok(entry) => Some(entry),
            Err(_) => {
                skipped += 1;
                None
            }
        })
        .collect();
    (entries, skipped)
}

/// Parse a timestamp as printed by borg.
///
/// Borg prints ISO-8601 without an offset (`2025-01-01T00:00:00.000000`);
/// those are taken as UTC. RFC 3339 strings with an offset are accepted too.
pub fn parse_borg_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    let naive = raw.strip_suffix('Z').unwrap_or(raw);
    NaiveDateTime::parse_from_str(naive, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|dt| dt.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn create_fixture_parses() {
        let doc = json!({
            "archive": {
                "id": "X",
                "start": "2025-01-01T00:00:00",
                "end": "2025-01-01T00:05:00",
                "duration": 300,
                "stats": {
                    "original_size": 1000,
                    "compressed_size": 600,
                    "deduplicated_size": 400,
                    "nfiles": 10
                }
            }
        });
        let result = parse_create(doc).unwrap();
        assert_eq!(result.archive.id.as_deref(), Some("X"));
        assert_eq!(result.archive.duration, 300.0);
        assert_eq!(
            result.archive.stats,
            ArchiveStats {
                original_size: 1000,
                compressed_size: 600,
                deduplicated_size: 400,
                nfiles: 10,
            }
        );
    }

    #[test]
    fn create_without_stats_is_rejected() {
        assert!(parse_create(json!({"archive": {"id": "X"}})).is_err());
        assert!(parse_create(json!({"repository": {}})).is_err());
    }

    #[test]
    fn archive_info_exposes_stats_and_encryption() {
        let doc = json!({
            "repository": {"id": "abc", "location": "/srv/borg"},
            "encryption": {"mode": "repokey-blake2"},
            "archives": [{
                "name": "host-1",
                "id": "def",
                "start": "2025-01-01T00:00:00.000000",
                "end": "2025-01-01T00:01:00.000000",
                "duration": 60.5,
                "hostname": "host",
                "username": "root",
                "stats": {"original_size": 5, "compressed_size": 4, "deduplicated_size": 3, "nfiles": 2}
            }]
        });
        let info = parse_info(doc).unwrap();
        assert_eq!(info.encryption_mode(), Some("repokey-blake2"));
        assert_eq!(info.archives[0].hostname.as_deref(), Some("host"));
        assert_eq!(info.archives[0].stats.unwrap().nfiles, 2);
    }

    #[test]
    fn list_entries_skip_foreign_records() {
        let records = vec![
            json!({"type": "d", "path": "home", "mode": "drwxr-xr-x"}),
            json!({"unexpected": true}),
            json!({"type": "-", "path": "home/a.txt", "size": 12}),
        ];
        let (entries, skipped) = parse_list_entries(records);
        assert_eq!(skipped, 1);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].size, Some(12));
    }

    #[test]
    fn timestamps_without_offset_are_utc() {
        let expected = Utc.with_ymd_and_hms(2025, 1, 1, 0, 5, 0).unwrap();
        assert_eq!(parse_borg_timestamp("2025-01-01T00:05:00"), Some(expected));
        assert_eq!(parse_borg_timestamp("2025-01-01T00:05:00.000000"), Some(expected));
        assert_eq!(parse_borg_timestamp("2025-01-01T00:05:00Z"), Some(expected));
        assert_eq!(parse_borg_timestamp("2025-01-01T01:05:00+01:00"), Some(expected));
        assert_eq!(parse_borg_timestamp("yesterday"), None);
    }
}
