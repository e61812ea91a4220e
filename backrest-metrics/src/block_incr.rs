//! Block incremental bookkeeping.
//!
//! pgBackRest reports `size-map` and `delta-map` together for block
//! incremental backups and omits both otherwise. A record carrying only one
//! of them is treated as a non block incremental backup and gets no map
//! gauges at all.

use crate::normalize::NormalizedBackup;

/// Resolved block incremental view of one backup.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlockIncremental {
    pub active: bool,
    /// Zero when inactive.
    pub size_map: f64,
    /// Zero when inactive.
    pub delta_map: f64,
    /// Whether the size map and delta map gauges are emitted.
    pub map_metrics_emitted: bool,
    /// Whether the repository backup set size gauge is emitted.
    pub repo_size_emitted: bool,
    /// Exactly one of the map fields was present.
    pub malformed: bool,
}

impl BlockIncremental {
    pub fn resolve(backup: &NormalizedBackup) -> Self {
        let repo_size_emitted = backup.repo_size.is_some();
        match (backup.size_map, backup.delta_map) {
            (Some(size_map), Some(delta_map)) => Self {
                active: true,
                size_map,
                delta_map,
                map_metrics_emitted: true,
                repo_size_emitted,
                malformed: false,
            },
            (size_map, delta_map) => {
                let malformed = size_map.is_some() != delta_map.is_some();
                Self {
                    active: false,
                    size_map: 0.0,
                    delta_map: 0.0,
                    map_metrics_emitted: !malformed,
                    repo_size_emitted,
                    malformed,
                }
            }
        }
    }

    /// Value of the `block_incr` label.
    pub fn label(&self) -> &'static str {
        if self.active {
            "y"
        } else {
            "n"
        }
    }
}
