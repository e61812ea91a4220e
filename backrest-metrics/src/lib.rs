//! Backup lineage reduction and metric projection for pgBackRest.
//!
//! Parses `pgbackrest info --output=json`, resolves differences between
//! pgBackRest releases and derives backup health and freshness gauges.
//! No I/O happens here: values are written to a caller supplied
//! [`MetricSink`].

pub mod block_incr;
pub mod lineage;
pub mod normalize;
pub mod project;
pub mod record;
pub mod sink;
mod stanza;

// Re-export commonly used types
pub use lineage::{reduce, LineageSlot, LineageState};
pub use normalize::{Normalize, NormalizedBackup};
pub use project::{lookup_labels, project_stanza, DatabaseCounts, ProjectOptions, ProjectSummary};
pub use record::{parse_info, BackupClass, BackupRecord, StanzaInfo};
pub use sink::{Metric, MetricSink, SinkError};
