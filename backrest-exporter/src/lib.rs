//! pgBackRest Exporter Library
//!
//! Runs `pgbackrest info` on a schedule, feeds the result through
//! `backrest-metrics` and serves the gauges to Prometheus.

pub mod api;
pub mod collector;
pub mod config;
pub mod daemon;
pub mod lookup;
pub mod registry;
pub mod source;
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use utils::errors::ExporterError;
pub type Result<T> = std::result::Result<T, ExporterError>;
