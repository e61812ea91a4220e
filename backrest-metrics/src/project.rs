//! Projection of a stanza's backups into gauges.
//!
//! [`project_stanza`] is the whole pipeline for one stanza: normalize,
//! resolve block incremental state, reduce the lineage, then write the
//! per-backup, last-backup, freshness and status gauges to a sink.

use crate::block_incr::BlockIncremental;
use crate::lineage::{self, LineageState};
use crate::normalize::{normalize_all, NormalizedBackup, ABSENT_MARKER};
use crate::record::{BackupClass, StanzaInfo};
use crate::sink::{Emitter, Metric, MetricSink};
use crate::stanza;
use std::collections::HashMap;

/// Database counts resolved out of band, keyed by backup label.
pub type DatabaseCounts = HashMap<String, usize>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectOptions {
    /// Emit the database count of every backup.
    pub database_count: bool,
    /// Emit the database count of the last backup of each class only.
    pub database_count_latest: bool,
    /// Fill the WAL start/stop labels of the info gauge.
    pub verbose_wal: bool,
    /// Backup classes exported per backup. Empty means all.
    pub backup_types: Vec<BackupClass>,
}

impl ProjectOptions {
    pub fn includes(&self, class: BackupClass) -> bool {
        self.backup_types.is_empty() || self.backup_types.contains(&class)
    }

    pub fn wants_database_counts(&self) -> bool {
        self.database_count || self.database_count_latest
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectSummary {
    pub backups: usize,
    pub emitted: usize,
    pub failed_writes: usize,
    pub malformed_maps: usize,
    /// Classes that got a freshness gauge.
    pub fresh_classes: Vec<BackupClass>,
}

/// Reduce and project one stanza.
pub fn project_stanza(
    stanza: &StanzaInfo,
    now: i64,
    options: &ProjectOptions,
    counts: &DatabaseCounts,
    sink: &dyn MetricSink,
) -> ProjectSummary {
    let backups = normalize_all(&stanza.backup);
    let lineage = lineage::reduce(&backups);
    let mut emitter = Emitter::new(sink);
    let mut summary = ProjectSummary {
        backups: backups.len(),
        ..Default::default()
    };

    for backup in backups.iter().filter(|b| options.includes(b.class)) {
        let block = BlockIncremental::resolve(backup);
        if block.malformed {
            summary.malformed_maps += 1;
            tracing::warn!(
                stanza = %stanza.name,
                backup = %backup.label,
                "Only one of size-map and delta-map reported, treating backup as not block incremental"
            );
        }
        project_backup(stanza, backup, &block, options, counts, &mut emitter);
    }

    summary.fresh_classes = project_lineage(&stanza.name, &lineage, now, options, counts, &mut emitter);

    stanza::project_status(stanza, &mut emitter);
    stanza::project_repos(stanza, &mut emitter);
    stanza::project_archives(stanza, &mut emitter);

    summary.emitted = emitter.emitted;
    summary.failed_writes = emitter.failed;
    summary
}

/// Labels that still need an out-of-band database count lookup.
///
/// Backups whose record already listed its databases are skipped.
pub fn lookup_labels(stanza: &StanzaInfo, options: &ProjectOptions) -> Vec<String> {
    let backups = normalize_all(&stanza.backup);
    let mut labels: Vec<String> = if options.database_count {
        backups
            .iter()
            .filter(|b| options.includes(b.class) && b.databases.is_none())
            .map(|b| b.label.clone())
            .collect()
    } else {
        Vec::new()
    };

    if options.database_count_latest {
        let lineage = lineage::reduce(&backups);
        for (_, slot) in lineage.iter() {
            let backup = slot.backup();
            if backup.databases.is_none() && !labels.contains(&backup.label) {
                labels.push(backup.label.clone());
            }
        }
    }

    labels
}

fn database_count(backup: &NormalizedBackup, counts: &DatabaseCounts) -> Option<usize> {
    backup.databases.or_else(|| counts.get(&backup.label).copied())
}

fn project_backup(
    stanza: &StanzaInfo,
    backup: &NormalizedBackup,
    block: &BlockIncremental,
    options: &ProjectOptions,
    counts: &DatabaseCounts,
    emitter: &mut Emitter<'_>,
) {
    let name = stanza.name.as_str();
    let class = backup.class.as_str();
    let block_incr = block.label();
    let database_id = backup.database_id.to_string();
    let repo_key = backup.repo_key.to_string();
    let pg_version = stanza
        .pg_version(backup.database_id, backup.repo_key)
        .unwrap_or(ABSENT_MARKER);
    let (wal_start, wal_stop) = if options.verbose_wal {
        (backup.wal_start.as_str(), backup.wal_stop.as_str())
    } else {
        (ABSENT_MARKER, ABSENT_MARKER)
    };

    emitter.emit(
        Metric::BackupInfo,
        1.0,
        &[
            &backup.backrest_version,
            &backup.label,
            class,
            block_incr,
            &database_id,
            &backup.lsn_start,
            &backup.lsn_stop,
            pg_version,
            &backup.prior,
            &repo_key,
            name,
            wal_start,
            wal_stop,
        ],
    );

    let start_time = backup.start.to_string();
    let stop_time = backup.stop.to_string();
    emitter.emit(
        Metric::BackupDuration,
        backup.duration_secs(),
        &[&backup.label, class, block_incr, &database_id, &repo_key, name, &start_time, &stop_time],
    );

    let labels: [&str; 6] = [&backup.label, class, block_incr, &database_id, &repo_key, name];
    emitter.emit(Metric::BackupSize, backup.size, &labels);
    emitter.emit(Metric::BackupDelta, backup.delta, &labels);
    if block.repo_size_emitted {
        emitter.emit(
            Metric::BackupRepoSize,
            NormalizedBackup::size_or_zero(backup.repo_size),
            &labels,
        );
    }
    emitter.emit(Metric::BackupRepoDelta, backup.repo_delta, &labels);
    if block.map_metrics_emitted {
        emitter.emit(Metric::BackupRepoSizeMap, block.size_map, &labels);
        emitter.emit(Metric::BackupRepoDeltaMap, block.delta_map, &labels);
    }
    if let Some(status) = backup.error_status() {
        emitter.emit(Metric::BackupError, status, &labels);
    }
    emitter.emit(Metric::BackupAnnotations, backup.annotations as f64, &labels);
    emitter.emit(Metric::BackupReferences, backup.references as f64, &labels);

    if options.database_count {
        if let Some(databases) = database_count(backup, counts) {
            emitter.emit(Metric::BackupDatabases, databases as f64, &labels);
        }
    }
}

/// Freshness and last-backup gauges. Returns the classes that got one.
fn project_lineage(
    stanza: &str,
    lineage: &LineageState<'_>,
    now: i64,
    options: &ProjectOptions,
    counts: &DatabaseCounts,
    emitter: &mut Emitter<'_>,
) -> Vec<BackupClass> {
    if lineage.get(BackupClass::Full).is_none() {
        tracing::debug!(stanza, "No full backup, skipping freshness metrics");
        return Vec::new();
    }

    let mut fresh = Vec::with_capacity(3);
    for (class, slot) in lineage.iter() {
        let backup = slot.backup();
        let block = BlockIncremental::resolve(backup);
        let labels = [class.as_str(), block.label(), stanza];

        emitter.emit(Metric::SinceLastCompletion, slot.age_secs(now), &labels);
        emitter.emit(Metric::LastBackupDuration, backup.duration_secs(), &labels);
        emitter.emit(Metric::LastBackupSize, backup.size, &labels);
        emitter.emit(Metric::LastBackupDelta, backup.delta, &labels);
        if block.repo_size_emitted {
            emitter.emit(
                Metric::LastBackupRepoSize,
                NormalizedBackup::size_or_zero(backup.repo_size),
                &labels,
            );
        }
        emitter.emit(Metric::LastBackupRepoDelta, backup.repo_delta, &labels);
        if block.map_metrics_emitted {
            emitter.emit(Metric::LastBackupRepoSizeMap, block.size_map, &labels);
            emitter.emit(Metric::LastBackupRepoDeltaMap, block.delta_map, &labels);
        }
        if let Some(status) = backup.error_status() {
            emitter.emit(Metric::LastBackupError, status, &labels);
        }
        emitter.emit(Metric::LastBackupAnnotations, backup.annotations as f64, &labels);
        if options.wants_database_counts() {
            if let Some(databases) = database_count(backup, counts) {
                emitter.emit(Metric::LastBackupDatabases, databases as f64, &labels);
            }
        }
        fresh.push(class);
    }
    fresh
}
