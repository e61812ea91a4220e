//! Prometheus registry backing the metric sink.

use backrest_metrics::sink::{Metric, MetricSink, SinkError};
use prometheus::{Encoder, GaugeVec, Opts, Registry, TextEncoder};
use std::collections::HashMap;

use crate::utils::errors::ExporterError;

/// One `GaugeVec` per [`Metric`], registered once at startup.
pub struct PrometheusSink {
    registry: Registry,
    gauges: HashMap<Metric, GaugeVec>,
}

impl PrometheusSink {
    pub fn new() -> Result<Self, ExporterError> {
        let registry = Registry::new();
        let mut gauges = HashMap::with_capacity(Metric::ALL.len());

        for metric in Metric::ALL {
            let gauge = GaugeVec::new(Opts::new(metric.name(), metric.help()), metric.label_names())?;
            registry.register(Box::new(gauge.clone()))?;
            gauges.insert(metric, gauge);
        }

        Ok(Self { registry, gauges })
    }

    /// Drop every label combination written by the previous collection.
    pub fn reset_cycle(&self) {
        for (metric, gauge) in &self.gauges {
            if metric.is_cycle_scoped() {
                gauge.reset();
            }
        }
    }

    /// Text exposition format of everything registered.
    pub fn encode(&self) -> Result<Vec<u8>, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(buffer)
    }

    pub fn content_type(&self) -> String {
        TextEncoder::new().format_type().to_string()
    }
}

impl MetricSink for PrometheusSink {
    fn observe(&self, metric: Metric, value: f64, labels: &[&str]) -> Result<(), SinkError> {
        SinkError::check_arity(metric, labels)?;
        let gauge = self.gauges.get(&metric).ok_or_else(|| SinkError::Rejected {
            metric: metric.name(),
            reason: "not registered".to_string(),
        })?;
        gauge
            .get_metric_with_label_values(labels)
            .map_err(|e| SinkError::Rejected {
                metric: metric.name(),
                reason: e.to_string(),
            })?
            .set(value);
        Ok(())
    }
}
