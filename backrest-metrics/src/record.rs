//! Serde model of `pgbackrest info --output=json`.
//!
//! Fields that only some pgBackRest releases report are modelled as `Option`
//! and are never defaulted here. Deciding what an absent value means is the
//! job of [`crate::normalize`] and [`crate::block_incr`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Backup class as reported in the `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupClass {
    Full,
    Diff,
    Incr,
}

impl BackupClass {
    pub const ALL: [BackupClass; 3] = [BackupClass::Full, BackupClass::Diff, BackupClass::Incr];

    pub fn as_str(self) -> &'static str {
        match self {
            BackupClass::Full => "full",
            BackupClass::Diff => "diff",
            BackupClass::Incr => "incr",
        }
    }

    /// Lineage slots a completed backup of this class is a candidate for.
    ///
    /// A full backup restarts every chain, a differential restarts the
    /// incremental chain, an incremental only counts for itself.
    pub fn cascade(self) -> &'static [BackupClass] {
        match self {
            BackupClass::Full => &[BackupClass::Full, BackupClass::Diff, BackupClass::Incr],
            BackupClass::Diff => &[BackupClass::Diff, BackupClass::Incr],
            BackupClass::Incr => &[BackupClass::Incr],
        }
    }

    pub(crate) fn slot(self) -> usize {
        match self {
            BackupClass::Full => 0,
            BackupClass::Diff => 1,
            BackupClass::Incr => 2,
        }
    }
}

impl fmt::Display for BackupClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown backup type: {0}")]
pub struct UnknownBackupClass(pub String);

impl FromStr for BackupClass {
    type Err = UnknownBackupClass;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "full" => Ok(BackupClass::Full),
            "diff" => Ok(BackupClass::Diff),
            "incr" => Ok(BackupClass::Incr),
            other => Err(UnknownBackupClass(other.to_string())),
        }
    }
}

/// One element of a stanza's `backup` array.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BackupRecord {
    pub label: String,

    #[serde(rename = "type")]
    pub class: BackupClass,

    pub timestamp: Timestamps,

    pub backrest: BackrestVersion,

    /// Label of the backup this one depends on. `null` for full backups.
    #[serde(default)]
    pub prior: Option<String>,

    #[serde(default)]
    pub lsn: Option<Span>,

    /// First and last WAL segment needed for consistency.
    #[serde(default)]
    pub archive: Option<Span>,

    pub database: DatabaseKey,

    pub info: BackupSizes,

    /// Not reported before pgBackRest 2.36.
    #[serde(default)]
    pub error: Option<bool>,

    /// Labels of the backups this one references.
    #[serde(default)]
    pub reference: Option<Vec<String>>,

    /// Not reported before pgBackRest 2.41.
    #[serde(default)]
    pub annotation: Option<BTreeMap<String, String>>,

    /// Only reported when a single backup is requested with `--set`.
    #[serde(default, rename = "database-ref")]
    pub database_ref: Option<Vec<DatabaseEntry>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Timestamps {
    pub start: i64,
    pub stop: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BackrestVersion {
    pub format: u32,
    pub version: String,
}

/// A start/stop pair of optional markers (LSN or WAL segment names).
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Span {
    #[serde(default)]
    pub start: Option<String>,
    #[serde(default)]
    pub stop: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct DatabaseKey {
    pub id: u32,

    /// Not reported before multi-repository support (pgBackRest 2.33).
    #[serde(default, rename = "repo-key")]
    pub repo_key: Option<u32>,
}

impl DatabaseKey {
    pub fn repo_key_or_default(&self) -> u32 {
        self.repo_key.unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DatabaseEntry {
    pub name: String,
    pub oid: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BackupSizes {
    /// Uncompressed database size.
    pub size: u64,

    /// Amount of data actually backed up.
    pub delta: u64,

    pub repository: RepositorySizes,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RepositorySizes {
    /// Full backup set size including referenced backups. Omitted by newer
    /// releases for block incremental backups.
    #[serde(default)]
    pub size: Option<u64>,

    pub delta: u64,

    #[serde(default, rename = "size-map")]
    pub size_map: Option<u64>,

    #[serde(default, rename = "delta-map")]
    pub delta_map: Option<u64>,
}

/// One element of the top level `info` array.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StanzaInfo {
    pub name: String,

    pub status: StanzaStatus,

    #[serde(default)]
    pub cipher: Option<String>,

    #[serde(default)]
    pub db: Vec<DbInfo>,

    #[serde(default)]
    pub archive: Vec<ArchiveInfo>,

    /// Not reported before multi-repository support.
    #[serde(default)]
    pub repo: Option<Vec<RepoInfo>>,

    #[serde(default)]
    pub backup: Vec<BackupRecord>,
}

impl StanzaInfo {
    /// PostgreSQL version of the cluster a backup or archive belongs to.
    pub fn pg_version(&self, database_id: u32, repo_key: u32) -> Option<&str> {
        self.db
            .iter()
            .find(|db| db.id == database_id && db.repo_key.unwrap_or(0) == repo_key)
            .or_else(|| self.db.iter().find(|db| db.id == database_id))
            .map(|db| db.version.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StanzaStatus {
    pub code: i64,

    #[serde(default)]
    pub message: String,

    #[serde(default)]
    pub lock: Option<LockInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LockInfo {
    #[serde(default)]
    pub backup: Option<BackupLock>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BackupLock {
    pub held: bool,

    /// Bytes already copied by the running backup.
    #[serde(default, rename = "size-cplt")]
    pub size_complete: Option<u64>,

    /// Bytes the running backup will copy in total.
    #[serde(default)]
    pub size: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DbInfo {
    pub id: u32,

    #[serde(default, rename = "repo-key")]
    pub repo_key: Option<u32>,

    #[serde(rename = "system-id")]
    pub system_id: u64,

    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ArchiveInfo {
    pub database: DatabaseKey,

    pub id: String,

    #[serde(default)]
    pub min: Option<String>,

    #[serde(default)]
    pub max: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RepoInfo {
    pub key: u32,

    pub cipher: String,

    pub status: RepoStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RepoStatus {
    pub code: i64,

    #[serde(default)]
    pub message: String,
}

/// Parse the raw stdout of `pgbackrest info --output=json`.
pub fn parse_info(raw: &[u8]) -> Result<Vec<StanzaInfo>, serde_json::Error> {
    serde_json::from_slice(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL_BACKUP_2_47: &str = r#"{
        "annotation": {"source": "cron"},
        "archive": {"start": "000000010000000000000004", "stop": "000000010000000000000004"},
        "backrest": {"format": 5, "version": "2.47"},
        "database": {"id": 1, "repo-key": 1},
        "error": false,
        "info": {
            "delta": 24316343,
            "repository": {"delta": 2969512, "size": 2969512},
            "size": 24316343
        },
        "label": "20230701-092423F",
        "lsn": {"start": "0/4000028", "stop": "0/4000100"},
        "prior": null,
        "reference": null,
        "timestamp": {"start": 1688203463, "stop": 1688203466},
        "type": "full"
    }"#;

    const INCR_BACKUP_2_32: &str = r#"{
        "archive": {"start": "000000010000000000000006", "stop": null},
        "backrest": {"format": 5, "version": "2.32"},
        "database": {"id": 1},
        "info": {
            "delta": 8429,
            "repository": {"delta": 1024, "size": 2970536},
            "size": 24316343
        },
        "label": "20210301-092423F_20210302-010101I",
        "prior": "20210301-092423F",
        "reference": ["20210301-092423F"],
        "timestamp": {"start": 1614646861, "stop": 1614646863},
        "type": "incr"
    }"#;

    #[test]
    fn test_parse_current_backup_record() {
        let record: BackupRecord = serde_json::from_str(FULL_BACKUP_2_47).unwrap();

        assert_eq!(record.class, BackupClass::Full);
        assert_eq!(record.database.repo_key, Some(1));
        assert_eq!(record.error, Some(false));
        assert_eq!(record.info.repository.size, Some(2969512));
        assert_eq!(record.info.repository.size_map, None);
        assert_eq!(record.annotation.as_ref().map(|a| a.len()), Some(1));
        assert!(record.prior.is_none());
    }

    #[test]
    fn test_parse_old_backup_record_keeps_absence() {
        let record: BackupRecord = serde_json::from_str(INCR_BACKUP_2_32).unwrap();

        assert_eq!(record.class, BackupClass::Incr);
        assert_eq!(record.database.repo_key, None);
        assert_eq!(record.database.repo_key_or_default(), 0);
        assert_eq!(record.error, None);
        assert_eq!(record.annotation, None);
        assert!(record.lsn.is_none());
        assert_eq!(record.archive.as_ref().and_then(|a| a.stop.clone()), None);
    }

    #[test]
    fn test_backup_class_from_str() {
        assert_eq!("FULL".parse::<BackupClass>().unwrap(), BackupClass::Full);
        assert_eq!(" diff ".parse::<BackupClass>().unwrap(), BackupClass::Diff);
        assert!("weekly".parse::<BackupClass>().is_err());
    }

    #[test]
    fn test_cascade_order() {
        assert_eq!(BackupClass::Full.cascade().len(), 3);
        assert_eq!(BackupClass::Diff.cascade(), &[BackupClass::Diff, BackupClass::Incr]);
        assert_eq!(BackupClass::Incr.cascade(), &[BackupClass::Incr]);
    }

    #[test]
    fn test_pg_version_lookup() {
        let raw = r#"[{
            "name": "demo",
            "status": {"code": 0, "message": "ok"},
            "db": [
                {"id": 1, "repo-key": 1, "system-id": 7000000000000000001, "version": "13"},
                {"id": 2, "repo-key": 1, "system-id": 7000000000000000002, "version": "15"}
            ]
        }]"#;
        let stanzas = parse_info(raw.as_bytes()).unwrap();

        assert_eq!(stanzas[0].pg_version(2, 1), Some("15"));
        assert_eq!(stanzas[0].pg_version(1, 0), Some("13"));
        assert_eq!(stanzas[0].pg_version(3, 1), None);
        assert!(stanzas[0].backup.is_empty());
        assert!(stanzas[0].repo.is_none());
    }
}
