//! Logging configuration using tracing.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::utils::errors::{ExporterError, Result};

/// Initialize logging with the specified level and format.
///
/// `RUST_LOG` takes precedence over `level` when set.
pub fn init(level: &str, format: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| ExporterError::Logging(format!("invalid log level {}: {}", level, e)))?;

    let registry = tracing_subscriber::registry().with(filter);
    let result = match format {
        "compact" => registry.with(tracing_subscriber::fmt::layer().compact()).try_init(),
        "full" => registry.with(tracing_subscriber::fmt::layer()).try_init(),
        other => return Err(ExporterError::Logging(format!("unknown log format: {}", other))),
    };

    result.map_err(|e| ExporterError::Logging(e.to_string()))
}
