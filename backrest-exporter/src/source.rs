//! pgbackrest invocation.
//!
//! [`RecordSource`] supplies the parsed `info` output for a collection and
//! [`DatabaseLookup`] resolves the databases of a single backup. Both are
//! implemented by [`PgBackRestSource`], which shells out to the
//! `pgbackrest` binary.

use async_trait::async_trait;
use backrest_metrics::record::{parse_info, DatabaseEntry};
use backrest_metrics::StanzaInfo;
use std::path::PathBuf;
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;

use crate::config::BackrestConfig;

/// Printed by pgbackrest releases that cannot combine `--set` with JSON output.
const SET_UNSUPPORTED: &str = "option 'set' is currently only valid for text output";

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("failed to run {binary}: {source}")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },

    #[error("pgbackrest exited with {status}: {stderr}")]
    Exit { status: String, stderr: String },

    #[error("failed to parse pgbackrest output: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum LookupError {
    /// The installed pgbackrest cannot report databases per backup.
    #[error("per-backup database lookup is not supported by this pgbackrest release")]
    Unsupported,

    #[error("backup {0} not found")]
    NotFound(String),

    #[error("lookup aborted: {0}")]
    Aborted(String),

    #[error(transparent)]
    Source(#[from] SourceError),
}

#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Info for one stanza, or for every stanza when `stanza` is `None`.
    async fn stanzas(&self, stanza: Option<&str>) -> Result<Vec<StanzaInfo>, SourceError>;
}

#[async_trait]
pub trait DatabaseLookup: Send + Sync {
    async fn databases(&self, stanza: &str, label: &str) -> Result<Vec<DatabaseEntry>, LookupError>;
}

/// Runs the `pgbackrest` binary.
#[derive(Debug, Clone)]
pub struct PgBackRestSource {
    binary: PathBuf,
    config: Option<PathBuf>,
    config_include_path: Option<PathBuf>,
    repo: Option<u32>,
}

impl PgBackRestSource {
    pub fn new(config: &BackrestConfig) -> Self {
        Self {
            binary: config.binary.clone(),
            config: config.config.clone(),
            config_include_path: config.config_include_path.clone(),
            repo: config.repo,
        }
    }

    /// Arguments of an `info` call.
    pub fn info_args(&self, stanza: Option<&str>, set: Option<&str>) -> Vec<String> {
        let mut args = vec!["info".to_string(), "--output=json".to_string()];
        if let Some(config) = &self.config {
            args.push(format!("--config={}", config.display()));
        }
        if let Some(path) = &self.config_include_path {
            args.push(format!("--config-include-path={}", path.display()));
        }
        if let Some(stanza) = stanza {
            args.push(format!("--stanza={}", stanza));
        }
        if let Some(repo) = self.repo {
            args.push(format!("--repo={}", repo));
        }
        if let Some(set) = set {
            args.push(format!("--set={}", set));
        }
        args
    }

    async fn run(&self, args: &[String]) -> Result<Vec<u8>, SourceError> {
        tracing::debug!(binary = %self.binary.display(), args = ?args, "Running pgbackrest");

        let output = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| SourceError::Spawn {
                binary: self.binary.display().to_string(),
                source,
            })?;

        if !output.status.success() {
            return Err(SourceError::Exit {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(output.stdout)
    }
}

#[async_trait]
impl RecordSource for PgBackRestSource {
    async fn stanzas(&self, stanza: Option<&str>) -> Result<Vec<StanzaInfo>, SourceError> {
        let stdout = self.run(&self.info_args(stanza, None)).await?;
        Ok(parse_info(&stdout)?)
    }
}

#[async_trait]
impl DatabaseLookup for PgBackRestSource {
    async fn databases(&self, stanza: &str, label: &str) -> Result<Vec<DatabaseEntry>, LookupError> {
        let stdout = self
            .run(&self.info_args(Some(stanza), Some(label)))
            .await
            .map_err(classify_failure)?;
        let stanzas = parse_info(&stdout).map_err(SourceError::from)?;
        databases_of(stanzas, label)
    }
}

/// Tell an old pgbackrest apart from a real failure.
pub fn classify_failure(err: SourceError) -> LookupError {
    if let SourceError::Exit { stderr, .. } = &err {
        if stderr.contains(SET_UNSUPPORTED) {
            return LookupError::Unsupported;
        }
    }
    LookupError::Source(err)
}

/// Extract the database list of `label` from a `--set` info output.
pub fn databases_of(stanzas: Vec<StanzaInfo>, label: &str) -> Result<Vec<DatabaseEntry>, LookupError> {
    let backup = stanzas
        .into_iter()
        .flat_map(|s| s.backup)
        .find(|b| b.label == label)
        .ok_or_else(|| LookupError::NotFound(label.to_string()))?;
    backup.database_ref.ok_or(LookupError::Unsupported)
}
