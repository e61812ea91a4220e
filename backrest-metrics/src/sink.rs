//! Metric descriptors and the sink the projector writes to.

use std::sync::Mutex;
use thiserror::Error;

const BACKUP_LABELS: &[&str] = &["backup_name", "backup_type", "block_incr", "database_id", "repo_key", "stanza"];
const LAST_BACKUP_LABELS: &[&str] = &["backup_type", "block_incr", "stanza"];
const STANZA_LABELS: &[&str] = &["stanza"];

/// Every gauge the exporter publishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Metric {
    BackupInfo,
    BackupDuration,
    BackupSize,
    BackupDelta,
    BackupRepoSize,
    BackupRepoDelta,
    BackupRepoSizeMap,
    BackupRepoDeltaMap,
    BackupError,
    BackupAnnotations,
    BackupReferences,
    BackupDatabases,
    SinceLastCompletion,
    LastBackupDuration,
    LastBackupSize,
    LastBackupDelta,
    LastBackupRepoSize,
    LastBackupRepoDelta,
    LastBackupRepoSizeMap,
    LastBackupRepoDeltaMap,
    LastBackupError,
    LastBackupAnnotations,
    LastBackupDatabases,
    StanzaStatus,
    StanzaLockStatus,
    StanzaBackupComplete,
    StanzaBackupTotal,
    RepoStatus,
    WalArchiveStatus,
    ExporterStatus,
    ExporterInfo,
}

impl Metric {
    pub const ALL: [Metric; 31] = [
        Metric::BackupInfo,
        Metric::BackupDuration,
        Metric::BackupSize,
        Metric::BackupDelta,
        Metric::BackupRepoSize,
        Metric::BackupRepoDelta,
        Metric::BackupRepoSizeMap,
        Metric::BackupRepoDeltaMap,
        Metric::BackupError,
        Metric::BackupAnnotations,
        Metric::BackupReferences,
        Metric::BackupDatabases,
        Metric::SinceLastCompletion,
        Metric::LastBackupDuration,
        Metric::LastBackupSize,
        Metric::LastBackupDelta,
        Metric::LastBackupRepoSize,
        Metric::LastBackupRepoDelta,
        Metric::LastBackupRepoSizeMap,
        Metric::LastBackupRepoDeltaMap,
        Metric::LastBackupError,
        Metric::LastBackupAnnotations,
        Metric::LastBackupDatabases,
        Metric::StanzaStatus,
        Metric::StanzaLockStatus,
        Metric::StanzaBackupComplete,
        Metric::StanzaBackupTotal,
        Metric::RepoStatus,
        Metric::WalArchiveStatus,
        Metric::ExporterStatus,
        Metric::ExporterInfo,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Metric::BackupInfo => "pgbackrest_backup_info",
            Metric::BackupDuration => "pgbackrest_backup_duration_seconds",
            Metric::BackupSize => "pgbackrest_backup_size_bytes",
            Metric::BackupDelta => "pgbackrest_backup_delta_bytes",
            Metric::BackupRepoSize => "pgbackrest_backup_repo_size_bytes",
            Metric::BackupRepoDelta => "pgbackrest_backup_repo_delta_bytes",
            Metric::BackupRepoSizeMap => "pgbackrest_backup_repo_size_map_bytes",
            Metric::BackupRepoDeltaMap => "pgbackrest_backup_repo_delta_map_bytes",
            Metric::BackupError => "pgbackrest_backup_error_status",
            Metric::BackupAnnotations => "pgbackrest_backup_annotations",
            Metric::BackupReferences => "pgbackrest_backup_references",
            Metric::BackupDatabases => "pgbackrest_backup_databases",
            Metric::SinceLastCompletion => "pgbackrest_backup_since_last_completion_seconds",
            Metric::LastBackupDuration => "pgbackrest_backup_last_duration_seconds",
            Metric::LastBackupSize => "pgbackrest_backup_last_size_bytes",
            Metric::LastBackupDelta => "pgbackrest_backup_last_delta_bytes",
            Metric::LastBackupRepoSize => "pgbackrest_backup_last_repo_size_bytes",
            Metric::LastBackupRepoDelta => "pgbackrest_backup_last_repo_delta_bytes",
            Metric::LastBackupRepoSizeMap => "pgbackrest_backup_last_repo_size_map_bytes",
            Metric::LastBackupRepoDeltaMap => "pgbackrest_backup_last_repo_delta_map_bytes",
            Metric::LastBackupError => "pgbackrest_backup_last_error_status",
            Metric::LastBackupAnnotations => "pgbackrest_backup_last_annotations",
            Metric::LastBackupDatabases => "pgbackrest_backup_last_databases",
            Metric::StanzaStatus => "pgbackrest_stanza_status",
            Metric::StanzaLockStatus => "pgbackrest_stanza_lock_status",
            Metric::StanzaBackupComplete => "pgbackrest_stanza_backup_complete_bytes",
            Metric::StanzaBackupTotal => "pgbackrest_stanza_backup_total_bytes",
            Metric::RepoStatus => "pgbackrest_repo_status",
            Metric::WalArchiveStatus => "pgbackrest_wal_archive_status",
            Metric::ExporterStatus => "pgbackrest_exporter_status",
            Metric::ExporterInfo => "pgbackrest_exporter_info",
        }
    }

    pub fn help(self) -> &'static str {
        match self {
            Metric::BackupInfo => "Backup info.",
            Metric::BackupDuration => "Backup duration.",
            Metric::BackupSize => "Full uncompressed size of the database.",
            Metric::BackupDelta => "Amount of data in the database to actually backup.",
            Metric::BackupRepoSize => "Full compressed files size to restore the database from backup.",
            Metric::BackupRepoDelta => "Compressed files size in backup.",
            Metric::BackupRepoSizeMap => "Size of block incremental map.",
            Metric::BackupRepoDeltaMap => "Size of block incremental delta map.",
            Metric::BackupError => "Backup error status.",
            Metric::BackupAnnotations => "Number of annotations in backup.",
            Metric::BackupReferences => "Number of references to another backup (backup reference list).",
            Metric::BackupDatabases => "Number of databases in backup.",
            Metric::SinceLastCompletion => "Seconds since the last completed full, differential or incremental backup.",
            Metric::LastBackupDuration => "Backup duration for the last full, differential or incremental backup.",
            Metric::LastBackupSize => "Full uncompressed size of the database in the last full, differential or incremental backup.",
            Metric::LastBackupDelta => "Amount of data in the database to actually backup in the last full, differential or incremental backup.",
            Metric::LastBackupRepoSize => "Full compressed files size to restore the database from the last full, differential or incremental backup.",
            Metric::LastBackupRepoDelta => "Compressed files size in the last full, differential or incremental backup.",
            Metric::LastBackupRepoSizeMap => "Size of block incremental map in the last full, differential or incremental backup.",
            Metric::LastBackupRepoDeltaMap => "Size of block incremental delta map in the last full, differential or incremental backup.",
            Metric::LastBackupError => "Error status in the last full, differential or incremental backup.",
            Metric::LastBackupAnnotations => "Number of annotations in the last full, differential or incremental backup.",
            Metric::LastBackupDatabases => "Number of databases in the last full, differential or incremental backup.",
            Metric::StanzaStatus => "Current stanza status.",
            Metric::StanzaLockStatus => "Current stanza lock status.",
            Metric::StanzaBackupComplete => "Completed size for backup in progress.",
            Metric::StanzaBackupTotal => "Total size for backup in progress.",
            Metric::RepoStatus => "Current repository status.",
            Metric::WalArchiveStatus => "Current WAL archive status.",
            Metric::ExporterStatus => "pgBackRest exporter get data status.",
            Metric::ExporterInfo => "Information about pgBackRest exporter.",
        }
    }

    /// Label names, in the order values are passed to [`MetricSink::observe`].
    pub fn label_names(self) -> &'static [&'static str] {
        match self {
            Metric::BackupInfo => &[
                "backrest_ver",
                "backup_name",
                "backup_type",
                "block_incr",
                "database_id",
                "lsn_start",
                "lsn_stop",
                "pg_version",
                "prior",
                "repo_key",
                "stanza",
                "wal_start",
                "wal_stop",
            ],
            Metric::BackupDuration => &[
                "backup_name",
                "backup_type",
                "block_incr",
                "database_id",
                "repo_key",
                "stanza",
                "start_time",
                "stop_time",
            ],
            Metric::BackupSize
            | Metric::BackupDelta
            | Metric::BackupRepoSize
            | Metric::BackupRepoDelta
            | Metric::BackupRepoSizeMap
            | Metric::BackupRepoDeltaMap
            | Metric::BackupError
            | Metric::BackupAnnotations
            | Metric::BackupReferences
            | Metric::BackupDatabases => BACKUP_LABELS,
            Metric::SinceLastCompletion
            | Metric::LastBackupDuration
            | Metric::LastBackupSize
            | Metric::LastBackupDelta
            | Metric::LastBackupRepoSize
            | Metric::LastBackupRepoDelta
            | Metric::LastBackupRepoSizeMap
            | Metric::LastBackupRepoDeltaMap
            | Metric::LastBackupError
            | Metric::LastBackupAnnotations
            | Metric::LastBackupDatabases => LAST_BACKUP_LABELS,
            Metric::StanzaStatus
            | Metric::StanzaLockStatus
            | Metric::StanzaBackupComplete
            | Metric::StanzaBackupTotal
            | Metric::ExporterStatus => STANZA_LABELS,
            Metric::RepoStatus => &["cipher", "repo_key", "stanza"],
            Metric::WalArchiveStatus => &["database_id", "pg_version", "repo_key", "stanza", "wal_max", "wal_min"],
            Metric::ExporterInfo => &["version"],
        }
    }

    /// Gauges cleared before every collection so expired backups and
    /// removed stanzas disappear.
    pub fn is_cycle_scoped(self) -> bool {
        !matches!(self, Metric::ExporterInfo)
    }
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("{metric}: expected {expected} label values, got {actual}")]
    LabelArity {
        metric: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("{metric}: {reason}")]
    Rejected { metric: &'static str, reason: String },
}

impl SinkError {
    pub fn check_arity(metric: Metric, labels: &[&str]) -> Result<(), SinkError> {
        let expected = metric.label_names().len();
        if labels.len() == expected {
            Ok(())
        } else {
            Err(SinkError::LabelArity {
                metric: metric.name(),
                expected,
                actual: labels.len(),
            })
        }
    }
}

/// Destination for projected gauge values.
///
/// Writes for the same metric and label values replace each other.
pub trait MetricSink: Send + Sync {
    fn observe(&self, metric: Metric, value: f64, labels: &[&str]) -> Result<(), SinkError>;
}

/// Counts what was written and logs rejected writes without stopping.
pub(crate) struct Emitter<'s> {
    sink: &'s dyn MetricSink,
    pub(crate) emitted: usize,
    pub(crate) failed: usize,
}

impl<'s> Emitter<'s> {
    pub(crate) fn new(sink: &'s dyn MetricSink) -> Self {
        Self {
            sink,
            emitted: 0,
            failed: 0,
        }
    }

    pub(crate) fn emit(&mut self, metric: Metric, value: f64, labels: &[&str]) {
        match self.sink.observe(metric, value, labels) {
            Ok(()) => self.emitted += 1,
            Err(e) => {
                self.failed += 1;
                tracing::warn!(metric = metric.name(), error = %e, "Failed to set metric");
            }
        }
    }
}

/// One recorded write.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub metric: Metric,
    pub value: f64,
    pub labels: Vec<String>,
}

impl Observation {
    /// Value of a label by name.
    pub fn label(&self, name: &str) -> Option<&str> {
        self.metric
            .label_names()
            .iter()
            .position(|n| *n == name)
            .and_then(|i| self.labels.get(i))
            .map(String::as_str)
    }
}

/// In-memory sink that keeps every write, for tests and dry runs.
#[derive(Debug, Default)]
pub struct RecordingSink {
    observations: Mutex<Vec<Observation>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observations(&self) -> Vec<Observation> {
        self.observations
            .lock()
            .map(|o| o.clone())
            .unwrap_or_default()
    }

    /// All writes of one metric, in write order.
    pub fn of(&self, metric: Metric) -> Vec<Observation> {
        self.observations()
            .into_iter()
            .filter(|o| o.metric == metric)
            .collect()
    }

    /// First write of `metric` whose `label` equals `value`.
    pub fn find(&self, metric: Metric, label: &str, value: &str) -> Option<Observation> {
        self.of(metric)
            .into_iter()
            .find(|o| o.label(label) == Some(value))
    }
}

impl MetricSink for RecordingSink {
    fn observe(&self, metric: Metric, value: f64, labels: &[&str]) -> Result<(), SinkError> {
        SinkError::check_arity(metric, labels)?;
        let mut observations = self.observations.lock().map_err(|e| SinkError::Rejected {
            metric: metric.name(),
            reason: e.to_string(),
        })?;
        observations.push(Observation {
            metric,
            value,
            labels: labels.iter().map(|l| l.to_string()).collect(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_metric_names_unique() {
        let names: HashSet<_> = Metric::ALL.iter().map(|m| m.name()).collect();
        assert_eq!(names.len(), Metric::ALL.len());
    }

    #[test]
    fn test_recording_sink_checks_arity() {
        let sink = RecordingSink::new();

        assert!(sink.observe(Metric::StanzaStatus, 0.0, &["demo"]).is_ok());
        assert!(matches!(
            sink.observe(Metric::StanzaStatus, 0.0, &["demo", "extra"]),
            Err(SinkError::LabelArity { expected: 1, actual: 2, .. })
        ));
        assert_eq!(sink.observations().len(), 1);
    }

    #[test]
    fn test_observation_label_lookup() {
        let sink = RecordingSink::new();
        sink.observe(Metric::RepoStatus, 0.0, &["none", "1", "demo"]).unwrap();

        let obs = sink.find(Metric::RepoStatus, "repo_key", "1").unwrap();
        assert_eq!(obs.label("cipher"), Some("none"));
        assert_eq!(obs.label("missing"), None);
    }

    struct RejectingSink;

    impl MetricSink for RejectingSink {
        fn observe(&self, metric: Metric, _value: f64, _labels: &[&str]) -> Result<(), SinkError> {
            Err(SinkError::Rejected {
                metric: metric.name(),
                reason: "closed".to_string(),
            })
        }
    }

    #[test]
    fn test_emitter_continues_after_failure() {
        let sink = RejectingSink;
        let mut emitter = Emitter::new(&sink);

        emitter.emit(Metric::StanzaStatus, 0.0, &["a"]);
        emitter.emit(Metric::StanzaStatus, 0.0, &["b"]);

        assert_eq!(emitter.failed, 2);
        assert_eq!(emitter.emitted, 0);
    }
}
