//! Configuration management for the exporter.
//!
//! Loads configuration from a TOML file. Every field has a default, so an
//! empty file (or no file) gives a working setup.

use backrest_metrics::{BackupClass, ProjectOptions};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::utils::errors::{ExporterError, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub exporter: ExporterConfig,
    #[serde(default)]
    pub backrest: BackrestConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExporterConfig {
    /// HTTP port serving the metrics endpoint
    #[serde(default = "default_port")]
    pub port: u16,

    /// Path the metrics are served on
    #[serde(default = "default_metrics_path")]
    pub metrics_path: String,

    /// Seconds between two collections
    #[serde(default = "default_collect_interval")]
    pub collect_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackrestConfig {
    /// pgbackrest executable
    #[serde(default = "default_binary")]
    pub binary: PathBuf,

    /// Passed as --config
    #[serde(default)]
    pub config: Option<PathBuf>,

    /// Passed as --config-include-path
    #[serde(default)]
    pub config_include_path: Option<PathBuf>,

    /// Passed as --repo. All repositories when unset.
    #[serde(default)]
    pub repo: Option<u32>,

    /// Only export these stanzas. All stanzas when empty.
    #[serde(default)]
    pub stanza_include: Vec<String>,

    #[serde(default)]
    pub stanza_exclude: Vec<String>,

    /// Only export these backup types per backup. All types when empty.
    #[serde(default)]
    pub backup_types: Vec<BackupClass>,

    /// Look up and export the database count of every backup
    #[serde(default)]
    pub database_count: bool,

    /// Look up and export the database count of the last backups only
    #[serde(default)]
    pub database_count_latest: bool,

    /// Concurrent `--set` lookups per stanza
    #[serde(default = "default_database_parallel_processes")]
    pub database_parallel_processes: usize,

    /// Export WAL start/stop in the backup info labels
    #[serde(default)]
    pub verbose_wal: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (full, compact)
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default values
fn default_port() -> u16 {
    9854
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

fn default_collect_interval() -> u64 {
    600
}

fn default_binary() -> PathBuf {
    PathBuf::from("pgbackrest")
}

fn default_database_parallel_processes() -> usize {
    1
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "full".to_string()
}

impl Default for ExporterConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            metrics_path: default_metrics_path(),
            collect_interval_secs: default_collect_interval(),
        }
    }
}

impl Default for BackrestConfig {
    fn default() -> Self {
        Self {
            binary: default_binary(),
            config: None,
            config_include_path: None,
            repo: None,
            stanza_include: Vec::new(),
            stanza_exclude: Vec::new(),
            backup_types: Vec::new(),
            database_count: false,
            database_count_latest: false,
            database_parallel_processes: default_database_parallel_processes(),
            verbose_wal: false,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| ExporterError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.exporter.metrics_path.starts_with('/') {
            return Err(ExporterError::Config(format!(
                "metrics_path must start with '/': {}",
                self.exporter.metrics_path
            )));
        }
        if self.exporter.collect_interval_secs == 0 {
            return Err(ExporterError::Config("collect_interval_secs must be positive".into()));
        }
        if self.backrest.database_parallel_processes == 0 {
            return Err(ExporterError::Config(
                "database_parallel_processes must be positive".into(),
            ));
        }
        if let Some(stanza) = self
            .backrest
            .stanza_include
            .iter()
            .find(|s| self.backrest.stanza_exclude.contains(s))
        {
            return Err(ExporterError::Config(format!(
                "stanza {} is both included and excluded",
                stanza
            )));
        }
        Ok(())
    }

    pub fn collect_interval(&self) -> Duration {
        Duration::from_secs(self.exporter.collect_interval_secs)
    }
}

impl BackrestConfig {
    pub fn project_options(&self) -> ProjectOptions {
        ProjectOptions {
            database_count: self.database_count,
            database_count_latest: self.database_count_latest,
            verbose_wal: self.verbose_wal,
            backup_types: self.backup_types.clone(),
        }
    }

    /// Whether a stanza passes the include and exclude lists.
    pub fn exports_stanza(&self, stanza: &str) -> bool {
        let included = self.stanza_include.is_empty() || self.stanza_include.iter().any(|s| s == stanza);
        included && !self.stanza_exclude.iter().any(|s| s == stanza)
    }

    /// The only stanza to ask pgbackrest about, if exactly one is included.
    pub fn single_stanza(&self) -> Option<&str> {
        match self.stanza_include.as_slice() {
            [only] => Some(only.as_str()),
            _ => None,
        }
    }
}
