//! Field normalization across pgBackRest releases.
//!
//! Turns a raw [`BackupRecord`] into a [`NormalizedBackup`] whose fields are
//! ready to be used as metric values and label values. Absence is kept
//! explicit wherever it changes what gets emitted.

use crate::record::{BackupClass, BackupRecord, Span};

/// Label value used for markers the tool did not report.
pub const ABSENT_MARKER: &str = "-";

/// A backup record with version skew resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedBackup {
    pub label: String,
    pub class: BackupClass,
    pub backrest_version: String,
    pub backrest_format: u32,
    /// Empty for backups without a prior.
    pub prior: String,
    pub lsn_start: String,
    pub lsn_stop: String,
    pub wal_start: String,
    pub wal_stop: String,
    pub database_id: u32,
    pub repo_key: u32,
    pub start: i64,
    pub stop: i64,
    pub size: f64,
    pub delta: f64,
    /// `None` when the tool did not report the backup set size.
    pub repo_size: Option<f64>,
    pub repo_delta: f64,
    pub size_map: Option<f64>,
    pub delta_map: Option<f64>,
    /// `None` on releases without the error flag. Never shown as `false`.
    pub error: Option<bool>,
    pub annotations: usize,
    pub references: usize,
    /// Known only when the record carried a `database-ref` list.
    pub databases: Option<usize>,
}

impl NormalizedBackup {
    pub fn duration_secs(&self) -> f64 {
        self.stop.saturating_sub(self.start).max(0) as f64
    }

    /// Error status as a gauge value, or `None` if it must not be emitted.
    pub fn error_status(&self) -> Option<f64> {
        self.error.map(|failed| if failed { 1.0 } else { 0.0 })
    }

    /// Size metric value for an optional size field.
    pub fn size_or_zero(value: Option<f64>) -> f64 {
        value.unwrap_or(0.0)
    }
}

/// Conversion into the canonical form. Implemented for raw records and for
/// already normalized ones so normalization can be re-applied safely.
pub trait Normalize {
    fn normalize(&self) -> NormalizedBackup;
}

impl Normalize for BackupRecord {
    fn normalize(&self) -> NormalizedBackup {
        let repository = &self.info.repository;
        NormalizedBackup {
            label: self.label.clone(),
            class: self.class,
            backrest_version: self.backrest.version.clone(),
            backrest_format: self.backrest.format,
            prior: self.prior.clone().unwrap_or_default(),
            lsn_start: marker(span_start(&self.lsn)),
            lsn_stop: marker(span_stop(&self.lsn)),
            wal_start: marker(span_start(&self.archive)),
            wal_stop: marker(span_stop(&self.archive)),
            database_id: self.database.id,
            repo_key: self.database.repo_key_or_default(),
            start: self.timestamp.start,
            stop: self.timestamp.stop,
            size: self.info.size as f64,
            delta: self.info.delta as f64,
            repo_size: repository.size.map(|v| v as f64),
            repo_delta: repository.delta as f64,
            size_map: repository.size_map.map(|v| v as f64),
            delta_map: repository.delta_map.map(|v| v as f64),
            error: self.error,
            annotations: self.annotation.as_ref().map_or(0, |a| a.len()),
            references: self.reference.as_ref().map_or(0, |r| r.len()),
            databases: self.database_ref.as_ref().map(|d| d.len()),
        }
    }
}

impl Normalize for NormalizedBackup {
    fn normalize(&self) -> NormalizedBackup {
        NormalizedBackup {
            lsn_start: marker(Some(&self.lsn_start)),
            lsn_stop: marker(Some(&self.lsn_stop)),
            wal_start: marker(Some(&self.wal_start)),
            wal_stop: marker(Some(&self.wal_stop)),
            ..self.clone()
        }
    }
}

/// Normalize every record of a stanza, keeping input order.
pub fn normalize_all(records: &[BackupRecord]) -> Vec<NormalizedBackup> {
    records.iter().map(Normalize::normalize).collect()
}

fn span_start(span: &Option<Span>) -> Option<&str> {
    span.as_ref().and_then(|s| s.start.as_deref())
}

fn span_stop(span: &Option<Span>) -> Option<&str> {
    span.as_ref().and_then(|s| s.stop.as_deref())
}

fn marker(value: Option<&str>) -> String {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => v.to_string(),
        _ => ABSENT_MARKER.to_string(),
    }
}
