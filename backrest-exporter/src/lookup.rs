//! Bounded fan-out of per-backup database lookups.

use backrest_metrics::DatabaseCounts;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::source::{DatabaseLookup, LookupError};

/// Resolve the database count of every label, at most `limit` at a time.
///
/// Each lookup runs in its own task. A failed lookup only drops its own
/// label from the result.
pub async fn resolve_database_counts(
    lookup: Arc<dyn DatabaseLookup>,
    stanza: &str,
    labels: Vec<String>,
    limit: usize,
) -> DatabaseCounts {
    let semaphore = Arc::new(Semaphore::new(limit.max(1)));
    let mut handles = Vec::with_capacity(labels.len());

    for label in labels {
        let sem = Arc::clone(&semaphore);
        let lookup = Arc::clone(&lookup);
        let stanza = stanza.to_string();

        let handle = tokio::spawn(async move {
            let permit = match sem.acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    return (label, Err(LookupError::Aborted(e.to_string())));
                }
            };
            let result = lookup.databases(&stanza, &label).await;
            drop(permit);
            (label, result)
        });

        handles.push(handle);
    }

    let mut counts = DatabaseCounts::with_capacity(handles.len());
    let mut unsupported = false;
    for handle in handles {
        match handle.await {
            Ok((label, Ok(databases))) => {
                counts.insert(label, databases.len());
            }
            Ok((_, Err(LookupError::Unsupported))) => unsupported = true,
            Ok((label, Err(e))) => {
                warn!(stanza, backup = %label, error = %e, "Failed to get databases of backup");
            }
            Err(e) => {
                warn!(stanza, error = %e, "Database lookup task failed");
            }
        }
    }

    if unsupported {
        debug!(stanza, "pgbackrest does not report databases per backup, skipping database count");
    }

    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use backrest_metrics::record::DatabaseEntry;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct FakeLookup {
        running: AtomicUsize,
        peak: AtomicUsize,
    }

    impl FakeLookup {
        fn new() -> Self {
            Self {
                running: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl DatabaseLookup for FakeLookup {
        async fn databases(&self, _stanza: &str, label: &str) -> Result<Vec<DatabaseEntry>, LookupError> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.running.fetch_sub(1, Ordering::SeqCst);

            match label {
                "broken" => Err(LookupError::NotFound(label.to_string())),
                "old" => Err(LookupError::Unsupported),
                _ => Ok(vec![
                    DatabaseEntry { name: "postgres".into(), oid: 5 },
                    DatabaseEntry { name: label.into(), oid: 16384 },
                ]),
            }
        }
    }

    #[tokio::test]
    async fn test_failures_do_not_affect_siblings() {
        let lookup = Arc::new(FakeLookup::new());
        let labels = vec!["a".to_string(), "broken".to_string(), "old".to_string(), "b".to_string()];

        let counts = resolve_database_counts(lookup, "main", labels, 2).await;

        assert_eq!(counts.len(), 2);
        assert_eq!(counts.get("a"), Some(&2));
        assert_eq!(counts.get("b"), Some(&2));
        assert!(!counts.contains_key("broken"));
        assert!(!counts.contains_key("old"));
    }

    #[tokio::test]
    async fn test_concurrency_limit() {
        let lookup = Arc::new(FakeLookup::new());
        let labels: Vec<String> = (0..8).map(|i| format!("b{i}")).collect();

        let counts = resolve_database_counts(lookup.clone(), "main", labels, 3).await;

        assert_eq!(counts.len(), 8);
        assert!(lookup.peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_zero_limit_still_progresses() {
        let lookup = Arc::new(FakeLookup::new());

        let counts = resolve_database_counts(lookup.clone(), "main", vec!["a".into()], 0).await;

        assert_eq!(counts.len(), 1);
        assert_eq!(lookup.peak.load(Ordering::SeqCst), 1);
    }
}
