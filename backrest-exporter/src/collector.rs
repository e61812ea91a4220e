//! Collection loop.
//!
//! Every tick fetches `pgbackrest info`, runs the projection for each
//! exported stanza and records whether the data could be fetched.

use backrest_metrics::sink::{Metric, MetricSink};
use backrest_metrics::{lookup_labels, project_stanza, DatabaseCounts, ProjectOptions};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::BackrestConfig;
use crate::lookup::resolve_database_counts;
use crate::registry::PrometheusSink;
use crate::source::{DatabaseLookup, RecordSource};

/// `stanza` label of the exporter status when no stanza could be fetched.
pub const ALL_STANZAS: &str = "all-stanzas";

/// Outcome of one collection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub stanzas: usize,
    pub backups: usize,
    pub failed_writes: usize,
    pub source_failed: bool,
}

pub struct Collector {
    source: Arc<dyn RecordSource>,
    lookup: Arc<dyn DatabaseLookup>,
    sink: Arc<PrometheusSink>,
    backrest: BackrestConfig,
    options: ProjectOptions,
}

impl Collector {
    pub fn new(
        source: Arc<dyn RecordSource>,
        lookup: Arc<dyn DatabaseLookup>,
        sink: Arc<PrometheusSink>,
        backrest: BackrestConfig,
    ) -> Self {
        let options = backrest.project_options();
        Self {
            source,
            lookup,
            sink,
            backrest,
            options,
        }
    }

    /// Run a single collection against the current time `now` (epoch seconds).
    ///
    /// Everything that awaits happens before the registry is reset, so a
    /// scrape never sees a half-written cycle.
    pub async fn collect_once(&self, now: i64) -> CycleReport {
        let mut report = CycleReport::default();

        let stanzas = match self.source.stanzas(self.backrest.single_stanza()).await {
            Ok(stanzas) => stanzas,
            Err(e) => {
                error!(error = %e, "Failed to get pgbackrest info");
                report.source_failed = true;
                self.sink.reset_cycle();
                self.emit(Metric::ExporterInfo, 1.0, &[env!("CARGO_PKG_VERSION")]);
                self.emit(Metric::ExporterStatus, 0.0, &[ALL_STANZAS]);
                return report;
            }
        };

        let mut resolved = Vec::with_capacity(stanzas.len());
        for stanza in stanzas.iter().filter(|s| self.backrest.exports_stanza(&s.name)) {
            let counts = if self.options.wants_database_counts() {
                let labels = lookup_labels(stanza, &self.options);
                resolve_database_counts(
                    Arc::clone(&self.lookup),
                    &stanza.name,
                    labels,
                    self.backrest.database_parallel_processes,
                )
                .await
            } else {
                DatabaseCounts::new()
            };
            resolved.push((stanza, counts));
        }

        self.sink.reset_cycle();
        self.emit(Metric::ExporterInfo, 1.0, &[env!("CARGO_PKG_VERSION")]);

        for (stanza, counts) in &resolved {
            let summary = project_stanza(stanza, now, &self.options, counts, self.sink.as_ref());
            debug!(
                stanza = %stanza.name,
                backups = summary.backups,
                emitted = summary.emitted,
                "Stanza metrics updated"
            );

            report.stanzas += 1;
            report.backups += summary.backups;
            report.failed_writes += summary.failed_writes;
            self.emit(Metric::ExporterStatus, 1.0, &[&stanza.name]);
        }

        if report.stanzas == 0 {
            warn!("No stanza to export");
        }
        report
    }

    fn emit(&self, metric: Metric, value: f64, labels: &[&str]) {
        if let Err(e) = self.sink.observe(metric, value, labels) {
            warn!(metric = metric.name(), error = %e, "Failed to set metric");
        }
    }

    /// Collect every `interval` until cancelled.
    pub fn start(self: Arc<Self>, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let started = std::time::Instant::now();
                        let report = self.collect_once(chrono::Utc::now().timestamp()).await;
                        info!(
                            stanzas = report.stanzas,
                            backups = report.backups,
                            failed = report.source_failed,
                            elapsed_ms = started.elapsed().as_millis() as u64,
                            "Collection finished"
                        );
                    }
                }
            }
            info!("Collector stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{LookupError, SourceError};
    use async_trait::async_trait;
    use backrest_metrics::record::DatabaseEntry;
    use backrest_metrics::{parse_info, StanzaInfo};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;
    use tokio::sync::Notify;

    const INFO: &str = r#"[
        {
            "name": "main",
            "status": {"code": 0, "message": "ok"},
            "db": [{"id": 1, "repo-key": 1, "system-id": 1, "version": "16"}],
            "backup": [{
                "backrest": {"format": 5, "version": "2.51"},
                "database": {"id": 1, "repo-key": 1},
                "info": {"delta": 10, "repository": {"delta": 1, "size": 1}, "size": 10},
                "label": "20240107-010000F",
                "timestamp": {"start": 1704589200, "stop": 1704589260},
                "type": "full"
            }]
        },
        {
            "name": "scratch",
            "status": {"code": 2, "message": "no valid backups"}
        }
    ]"#;

    struct FakeSource {
        fail: AtomicBool,
        requested: Mutex<Vec<Option<String>>>,
    }

    impl FakeSource {
        fn new() -> Self {
            Self {
                fail: AtomicBool::new(false),
                requested: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl RecordSource for FakeSource {
        async fn stanzas(&self, stanza: Option<&str>) -> Result<Vec<StanzaInfo>, SourceError> {
            self.requested.lock().unwrap().push(stanza.map(String::from));
            if self.fail.load(Ordering::SeqCst) {
                return Err(SourceError::Exit {
                    status: "exit status: 56".into(),
                    stderr: "ERROR: [056]: unable to find primary cluster".into(),
                });
            }
            Ok(parse_info(INFO.as_bytes())?)
        }
    }

    #[async_trait]
    impl DatabaseLookup for FakeSource {
        async fn databases(&self, _stanza: &str, _label: &str) -> Result<Vec<DatabaseEntry>, LookupError> {
            Ok(vec![DatabaseEntry { name: "postgres".into(), oid: 5 }])
        }
    }

    /// Holds every lookup until released while `park` is set.
    struct ParkedLookup {
        park: AtomicBool,
        entered: Notify,
        release: Notify,
    }

    #[async_trait]
    impl DatabaseLookup for ParkedLookup {
        async fn databases(&self, _stanza: &str, _label: &str) -> Result<Vec<DatabaseEntry>, LookupError> {
            if self.park.load(Ordering::SeqCst) {
                self.entered.notify_one();
                self.release.notified().await;
            }
            Ok(vec![DatabaseEntry { name: "postgres".into(), oid: 5 }])
        }
    }

    fn collector(source: Arc<FakeSource>, backrest: BackrestConfig) -> (Collector, Arc<PrometheusSink>) {
        let sink = Arc::new(PrometheusSink::new().unwrap());
        let collector = Collector::new(source.clone(), source, sink.clone(), backrest);
        (collector, sink)
    }

    fn text(sink: &PrometheusSink) -> String {
        String::from_utf8(sink.encode().unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_collect_once() {
        let source = Arc::new(FakeSource::new());
        let (collector, sink) = collector(source, BackrestConfig::default());

        let report = collector.collect_once(1704589360).await;

        assert_eq!(report.stanzas, 2);
        assert_eq!(report.backups, 1);
        assert!(!report.source_failed);

        let body = text(&sink);
        assert!(body.contains(
            "pgbackrest_backup_since_last_completion_seconds{backup_type=\"full\",block_incr=\"n\",stanza=\"main\"} 100"
        ));
        assert!(body.contains("pgbackrest_exporter_status{stanza=\"scratch\"} 1"));
        assert!(body.contains("pgbackrest_stanza_status{stanza=\"scratch\"} 2"));
        assert!(!body.contains("pgbackrest_backup_databases"));
    }

    #[tokio::test]
    async fn test_source_failure_sets_status() {
        let source = Arc::new(FakeSource::new());
        let (collector, sink) = collector(source.clone(), BackrestConfig::default());

        collector.collect_once(1704589360).await;
        source.fail.store(true, Ordering::SeqCst);
        let report = collector.collect_once(1704589400).await;

        assert!(report.source_failed);
        let body = text(&sink);
        assert!(body.contains("pgbackrest_exporter_status{stanza=\"all-stanzas\"} 0"));
        // Stale backup data from the previous cycle is gone.
        assert!(!body.contains("pgbackrest_backup_info"));
        assert!(body.contains("pgbackrest_exporter_info"));
    }

    #[tokio::test]
    async fn test_stanza_filters_and_database_count() {
        let source = Arc::new(FakeSource::new());
        let backrest = BackrestConfig {
            stanza_include: vec!["main".into()],
            database_count: true,
            ..Default::default()
        };
        let (collector, sink) = collector(source.clone(), backrest);

        let report = collector.collect_once(1704589360).await;

        assert_eq!(report.stanzas, 1);
        assert_eq!(source.requested.lock().unwrap().as_slice(), &[Some("main".to_string())]);
        let body = text(&sink);
        assert!(body.contains("pgbackrest_backup_databases{"));
        assert!(!body.contains("stanza=\"scratch\""));
    }

    #[tokio::test]
    async fn test_start_stops_on_cancel() {
        let source = Arc::new(FakeSource::new());
        let (collector, _sink) = collector(source.clone(), BackrestConfig::default());
        let cancel = CancellationToken::new();

        let handle = Arc::new(collector).start(Duration::from_secs(3600), cancel.clone());
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        handle.await.unwrap();

        // The first tick fires immediately.
        assert_eq!(source.requested.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_scrape_during_lookup_sees_previous_cycle() {
        let source = Arc::new(FakeSource::new());
        let lookup = Arc::new(ParkedLookup {
            park: AtomicBool::new(false),
            entered: Notify::new(),
            release: Notify::new(),
        });
        let sink = Arc::new(PrometheusSink::new().unwrap());
        let backrest = BackrestConfig {
            database_count: true,
            ..Default::default()
        };
        let collector = Arc::new(Collector::new(source, lookup.clone(), sink.clone(), backrest));

        collector.collect_once(1704589360).await;
        lookup.park.store(true, Ordering::SeqCst);

        let running = Arc::clone(&collector);
        let handle = tokio::spawn(async move { running.collect_once(1704589460).await });
        lookup.entered.notified().await;

        let mid = text(&sink);
        assert!(mid.contains("pgbackrest_backup_info{"));
        assert!(mid.contains(
            "pgbackrest_backup_since_last_completion_seconds{backup_type=\"full\",block_incr=\"n\",stanza=\"main\"} 100"
        ));
        assert!(mid.contains("pgbackrest_exporter_status{stanza=\"main\"} 1"));

        lookup.release.notify_one();
        let report = handle.await.unwrap();

        assert_eq!(report.stanzas, 2);
        let body = text(&sink);
        assert!(body.contains(
            "pgbackrest_backup_since_last_completion_seconds{backup_type=\"full\",block_incr=\"n\",stanza=\"main\"} 200"
        ));
    }
}
