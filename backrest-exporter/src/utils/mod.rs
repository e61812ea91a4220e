//! Utility modules for the exporter.

pub mod errors;
pub mod logger;

pub use errors::{ExporterError, Result};
